//! In-memory backend.
//!
//! Backs every unit and integration test, and local development without a
//! database. All tables live behind one `RwLock` so the multi-row units
//! (reservation, cancellation) are naturally atomic.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::activity::{ActivityEvent, ActivityType};
use crate::domain::inventory::{alert_for, AdjustmentReason, InventoryAdjustment, StockAlert};
use crate::domain::order::{ensure_transition, Order, OrderStatus, StatusChange};
use crate::domain::product::{EngagementCounters, ProductRecord};
use crate::error::{Error, Result};
use crate::store::{
    ActivityRollup, ActivityStore, AdjustmentApplied, CancelApplied, CatalogStore,
    EngagementSource, OrderStore,
};

#[derive(Default)]
struct Inner {
    products: HashMap<Uuid, ProductRecord>,
    orders: HashMap<Uuid, Order>,
    adjustments: Vec<InventoryAdjustment>,
    history: Vec<StatusChange>,
    activity: Vec<ActivityEvent>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total adjustment rows across all products. Test helper.
    pub fn adjustment_count(&self) -> usize {
        self.inner.read().expect("RwLock poisoned").adjustments.len()
    }
}

fn apply_delta(
    inner: &mut Inner,
    product_id: Uuid,
    delta: i32,
    reason: AdjustmentReason,
    created_by: &str,
    at: DateTime<Utc>,
) -> Result<AdjustmentApplied> {
    let product = inner
        .products
        .get_mut(&product_id)
        .ok_or(Error::ProductNotFound(product_id))?;
    let before = product.inventory;
    let after = before + delta;
    if after < 0 {
        return Err(Error::InvalidAdjustment {
            product_id,
            delta,
            current: before,
        });
    }
    product.inventory = after;
    product.updated_at = at;
    let threshold = product.low_stock_threshold;
    let adjustment = InventoryAdjustment {
        id: Uuid::now_v7(),
        product_id,
        quantity_delta: delta,
        reason,
        created_by: created_by.to_string(),
        created_at: at,
    };
    inner.adjustments.push(adjustment.clone());
    Ok(AdjustmentApplied {
        adjustment,
        level_before: before,
        level_after: after,
        alert: alert_for(product_id, before, after, threshold),
    })
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn insert_product(&self, product: &ProductRecord) -> Result<()> {
        let mut inner = self.inner.write().expect("RwLock poisoned");
        inner.products.insert(product.id, product.clone());
        Ok(())
    }

    async fn product(&self, id: Uuid) -> Result<Option<ProductRecord>> {
        let inner = self.inner.read().expect("RwLock poisoned");
        Ok(inner.products.get(&id).cloned())
    }

    async fn products(&self) -> Result<Vec<ProductRecord>> {
        let inner = self.inner.read().expect("RwLock poisoned");
        let mut all: Vec<_> = inner.products.values().cloned().collect();
        all.sort_by_key(|p| p.id);
        Ok(all)
    }

    async fn products_by_ids(&self, ids: &[Uuid]) -> Result<Vec<ProductRecord>> {
        let inner = self.inner.read().expect("RwLock poisoned");
        Ok(ids
            .iter()
            .filter_map(|id| inner.products.get(id).cloned())
            .collect())
    }

    async fn published_products(&self) -> Result<Vec<ProductRecord>> {
        let inner = self.inner.read().expect("RwLock poisoned");
        let mut all: Vec<_> = inner
            .products
            .values()
            .filter(|p| p.is_published())
            .cloned()
            .collect();
        all.sort_by_key(|p| p.id);
        Ok(all)
    }

    async fn apply_adjustment(
        &self,
        product_id: Uuid,
        delta: i32,
        reason: AdjustmentReason,
        created_by: &str,
        at: DateTime<Utc>,
    ) -> Result<AdjustmentApplied> {
        let mut inner = self.inner.write().expect("RwLock poisoned");
        apply_delta(&mut inner, product_id, delta, reason, created_by, at)
    }

    async fn adjustments(&self, product_id: Uuid, limit: u32) -> Result<Vec<InventoryAdjustment>> {
        let inner = self.inner.read().expect("RwLock poisoned");
        let mut rows: Vec<_> = inner
            .adjustments
            .iter()
            .filter(|a| a.product_id == product_id)
            .cloned()
            .collect();
        rows.reverse();
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn low_stock(&self, limit: u32) -> Result<Vec<ProductRecord>> {
        let inner = self.inner.read().expect("RwLock poisoned");
        let mut rows: Vec<_> = inner
            .products
            .values()
            .filter(|p| p.is_low_stock())
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.inventory.cmp(&b.inventory).then_with(|| a.id.cmp(&b.id)));
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn out_of_stock(&self, limit: u32) -> Result<Vec<ProductRecord>> {
        let inner = self.inner.read().expect("RwLock poisoned");
        let mut rows: Vec<_> = inner
            .products
            .values()
            .filter(|p| p.is_out_of_stock())
            .cloned()
            .collect();
        rows.sort_by_key(|p| p.id);
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn write_counters(&self, product_id: Uuid, counters: EngagementCounters) -> Result<()> {
        let mut inner = self.inner.write().expect("RwLock poisoned");
        let product = inner
            .products
            .get_mut(&product_id)
            .ok_or(Error::ProductNotFound(product_id))?;
        product.counters = counters;
        Ok(())
    }

    async fn write_score(&self, product_id: Uuid, score: f64) -> Result<()> {
        let mut inner = self.inner.write().expect("RwLock poisoned");
        let product = inner
            .products
            .get_mut(&product_id)
            .ok_or(Error::ProductNotFound(product_id))?;
        product.popularity_score = score;
        Ok(())
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn insert_reserving_stock(&self, order: &Order) -> Result<Vec<StockAlert>> {
        let mut inner = self.inner.write().expect("RwLock poisoned");
        if inner
            .orders
            .values()
            .any(|o| o.payment_reference == order.payment_reference)
        {
            return Err(Error::Storage(format!(
                "duplicate payment reference {}",
                order.payment_reference
            )));
        }
        // Check every line before touching anything, so a late failure
        // leaves no partial reservation behind.
        for item in &order.items {
            let product = inner
                .products
                .get(&item.product_id)
                .ok_or(Error::ProductNotFound(item.product_id))?;
            if product.inventory < item.quantity as i32 {
                return Err(Error::InsufficientInventory {
                    product_id: item.product_id,
                    requested: item.quantity,
                    available: product.inventory,
                });
            }
        }
        let created_by = format!("order:{}", order.order_number);
        let mut alerts = Vec::new();
        for item in &order.items {
            let applied = apply_delta(
                &mut inner,
                item.product_id,
                -(item.quantity as i32),
                AdjustmentReason::OrderReserve,
                &created_by,
                order.created_at,
            )?;
            alerts.extend(applied.alert);
        }
        inner.orders.insert(order.id, order.clone());
        Ok(alerts)
    }

    async fn order(&self, id: Uuid) -> Result<Option<Order>> {
        let inner = self.inner.read().expect("RwLock poisoned");
        Ok(inner.orders.get(&id).cloned())
    }

    async fn by_payment_reference(&self, payment_reference: &str) -> Result<Option<Order>> {
        let inner = self.inner.read().expect("RwLock poisoned");
        Ok(inner
            .orders
            .values()
            .find(|o| o.payment_reference == payment_reference)
            .cloned())
    }

    async fn recent_orders(&self, limit: u32) -> Result<Vec<Order>> {
        let inner = self.inner.read().expect("RwLock poisoned");
        let mut rows: Vec<_> = inner.orders.values().cloned().collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn stale_in_status(
        &self,
        status: OrderStatus,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Uuid>> {
        let inner = self.inner.read().expect("RwLock poisoned");
        let mut ids: Vec<_> = inner
            .orders
            .values()
            .filter(|o| o.status == status && o.updated_at <= cutoff)
            .map(|o| o.id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn set_status_if(
        &self,
        id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        ensure_transition(from, to)?;
        let mut inner = self.inner.write().expect("RwLock poisoned");
        let order = inner.orders.get_mut(&id).ok_or(Error::OrderNotFound(id))?;
        if order.status != from {
            return Ok(false);
        }
        order.status = to;
        order.updated_at = at;
        inner.history.push(StatusChange {
            order_id: id,
            from,
            to,
            at,
        });
        Ok(true)
    }

    async fn cancel_restoring_stock(
        &self,
        id: Uuid,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<CancelApplied> {
        let mut inner = self.inner.write().expect("RwLock poisoned");
        let order = inner.orders.get(&id).ok_or(Error::OrderNotFound(id))?.clone();
        if order.status == OrderStatus::Cancelled {
            return Ok(CancelApplied {
                order,
                newly_cancelled: false,
                restored: false,
            });
        }
        ensure_transition(order.status, OrderStatus::Cancelled)?;

        let from = order.status;
        let restore = !order.inventory_restored;
        if restore {
            let created_by = format!("order:{}", order.order_number);
            for item in &order.items {
                apply_delta(
                    &mut inner,
                    item.product_id,
                    item.quantity as i32,
                    AdjustmentReason::OrderCancelRestore,
                    &created_by,
                    at,
                )?;
            }
        }
        let order = inner.orders.get_mut(&id).ok_or(Error::OrderNotFound(id))?;
        order.status = OrderStatus::Cancelled;
        order.cancel_reason = Some(reason.to_string());
        order.inventory_restored = order.inventory_restored || restore;
        order.updated_at = at;
        let snapshot = order.clone();
        inner.history.push(StatusChange {
            order_id: id,
            from,
            to: OrderStatus::Cancelled,
            at,
        });
        Ok(CancelApplied {
            order: snapshot,
            newly_cancelled: true,
            restored: restore,
        })
    }

    async fn status_history(&self, id: Uuid) -> Result<Vec<StatusChange>> {
        let inner = self.inner.read().expect("RwLock poisoned");
        Ok(inner
            .history
            .iter()
            .filter(|c| c.order_id == id)
            .cloned()
            .collect())
    }

    async fn engagement_sources(&self) -> Result<HashMap<Uuid, EngagementSource>> {
        let inner = self.inner.read().expect("RwLock poisoned");
        let mut out: HashMap<Uuid, EngagementSource> = HashMap::new();
        for order in inner.orders.values() {
            if order.status == OrderStatus::Cancelled {
                continue;
            }
            let distinct: HashSet<Uuid> = order.items.iter().map(|i| i.product_id).collect();
            for product_id in distinct {
                out.entry(product_id).or_default().order_count += 1;
            }
            for item in &order.items {
                let entry = out.entry(item.product_id).or_default();
                entry.purchase_count += item.quantity as i64;
                entry.last_ordered_at = Some(match entry.last_ordered_at {
                    Some(prev) => prev.max(order.created_at),
                    None => order.created_at,
                });
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl ActivityStore for MemoryStore {
    async fn append(&self, event: &ActivityEvent) -> Result<()> {
        let mut inner = self.inner.write().expect("RwLock poisoned");
        inner.activity.push(event.clone());
        Ok(())
    }

    async fn activity_rollup(&self) -> Result<HashMap<Uuid, ActivityRollup>> {
        let inner = self.inner.read().expect("RwLock poisoned");
        let mut out: HashMap<Uuid, ActivityRollup> = HashMap::new();
        for event in &inner.activity {
            let entry = out.entry(event.product_id).or_default();
            match event.activity_type {
                ActivityType::View => entry.view_count += 1,
                ActivityType::CartAdd => entry.cart_count += 1,
                ActivityType::Order => {}
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::{OrderItem, OrderOwner};
    use crate::domain::product::ProductStatus;
    use crate::domain::value_objects::Money;
    use rust_decimal::Decimal;

    fn product(id: Uuid, inventory: i32) -> ProductRecord {
        ProductRecord {
            id,
            name: "Widget".into(),
            category_id: None,
            status: ProductStatus::Published,
            inventory,
            low_stock_threshold: 2,
            counters: Default::default(),
            popularity_score: 0.0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn order(items: Vec<OrderItem>, payment_reference: &str) -> Order {
        let now = Utc::now();
        let total = items
            .iter()
            .fold(Money::zero("USD"), |acc, i| acc.add(&i.line_total()).unwrap());
        Order {
            id: Uuid::now_v7(),
            order_number: "ORD-00000001".into(),
            owner: OrderOwner::Guest {
                email: "a@b.com".into(),
                name: "A".into(),
            },
            items,
            grand_total: total.clone(),
            total,
            status: OrderStatus::Pending,
            payment_reference: payment_reference.into(),
            shipping_address: None,
            cancel_reason: None,
            inventory_restored: false,
            created_at: now,
            updated_at: now,
        }
    }

    fn item(product_id: Uuid, quantity: u32) -> OrderItem {
        OrderItem {
            product_id,
            quantity,
            unit_price: Money::new(Decimal::new(500, 2), "USD"),
        }
    }

    #[tokio::test]
    async fn test_reservation_is_all_or_nothing() {
        let store = MemoryStore::new();
        let p1 = Uuid::now_v7();
        let p2 = Uuid::now_v7();
        store.insert_product(&product(p1, 10)).await.unwrap();
        store.insert_product(&product(p2, 1)).await.unwrap();

        let err = store
            .insert_reserving_stock(&order(vec![item(p1, 3), item(p2, 5)], "pay-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InsufficientInventory { product_id, .. } if product_id == p2));

        // First line rolled back, no order persisted, no audit rows.
        assert_eq!(store.product(p1).await.unwrap().unwrap().inventory, 10);
        assert_eq!(store.adjustment_count(), 0);
        assert!(store.by_payment_reference("pay-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_status_if_is_compare_and_set() {
        let store = MemoryStore::new();
        let p = Uuid::now_v7();
        store.insert_product(&product(p, 5)).await.unwrap();
        let o = order(vec![item(p, 1)], "pay-2");
        store.insert_reserving_stock(&o).await.unwrap();

        let now = Utc::now();
        assert!(store
            .set_status_if(o.id, OrderStatus::Pending, OrderStatus::Processing, now)
            .await
            .unwrap());
        // Second identical write loses the race check.
        assert!(!store
            .set_status_if(o.id, OrderStatus::Pending, OrderStatus::Processing, now)
            .await
            .unwrap());
        let history = store.status_history(o.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].to, OrderStatus::Processing);
    }

    #[tokio::test]
    async fn test_cancel_restores_stock_once() {
        let store = MemoryStore::new();
        let p = Uuid::now_v7();
        store.insert_product(&product(p, 5)).await.unwrap();
        let o = order(vec![item(p, 4)], "pay-3");
        store.insert_reserving_stock(&o).await.unwrap();
        assert_eq!(store.product(p).await.unwrap().unwrap().inventory, 1);

        let first = store
            .cancel_restoring_stock(o.id, "customer request", Utc::now())
            .await
            .unwrap();
        assert!(first.newly_cancelled);
        assert!(first.restored);
        assert_eq!(store.product(p).await.unwrap().unwrap().inventory, 5);

        let second = store
            .cancel_restoring_stock(o.id, "retry", Utc::now())
            .await
            .unwrap();
        assert!(!second.newly_cancelled);
        assert!(!second.restored);
        assert_eq!(store.product(p).await.unwrap().unwrap().inventory, 5);
    }

    #[tokio::test]
    async fn test_low_stock_ordering() {
        let store = MemoryStore::new();
        let mut ids: Vec<Uuid> = (0..3).map(|_| Uuid::now_v7()).collect();
        ids.sort();
        let mut a = product(ids[0], 2);
        let mut b = product(ids[1], 1);
        let mut c = product(ids[2], 2);
        a.low_stock_threshold = 3;
        b.low_stock_threshold = 3;
        c.low_stock_threshold = 3;
        for p in [&a, &b, &c] {
            store.insert_product(p).await.unwrap();
        }
        let rows = store.low_stock(10).await.unwrap();
        let got: Vec<Uuid> = rows.iter().map(|p| p.id).collect();
        // Ascending inventory, id tie-break.
        assert_eq!(got, vec![ids[1], ids[0], ids[2]]);
    }
}
