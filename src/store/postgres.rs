//! Postgres backend.
//!
//! Reservation and cancellation run inside a single transaction with
//! row-level locks on the product rows, so concurrent checkouts against the
//! same product serialize instead of double-selling the last unit.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::activity::{ActivityEvent, Actor};
use crate::domain::inventory::{alert_for, AdjustmentReason, InventoryAdjustment, StockAlert};
use crate::domain::order::{
    ensure_transition, Order, OrderItem, OrderOwner, OrderStatus, StatusChange,
};
use crate::domain::product::{EngagementCounters, ProductRecord, ProductStatus};
use crate::domain::value_objects::Money;
use crate::error::{Error, Result};
use crate::store::{
    ActivityRollup, ActivityStore, AdjustmentApplied, CancelApplied, CatalogStore,
    EngagementSource, OrderStore,
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ProductRow {
    id: Uuid,
    name: String,
    category_id: Option<Uuid>,
    status: String,
    inventory: i32,
    low_stock_threshold: i32,
    view_count: i64,
    cart_count: i64,
    order_count: i64,
    purchase_count: i64,
    popularity_score: f64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ProductRow> for ProductRecord {
    type Error = Error;

    fn try_from(row: ProductRow) -> Result<Self> {
        let status = ProductStatus::parse(&row.status)
            .ok_or_else(|| Error::Storage(format!("unknown product status {:?}", row.status)))?;
        Ok(ProductRecord {
            id: row.id,
            name: row.name,
            category_id: row.category_id,
            status,
            inventory: row.inventory,
            low_stock_threshold: row.low_stock_threshold,
            counters: EngagementCounters {
                view_count: row.view_count,
                cart_count: row.cart_count,
                order_count: row.order_count,
                purchase_count: row.purchase_count,
            },
            popularity_score: row.popularity_score,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    order_number: String,
    user_id: Option<Uuid>,
    guest_email: Option<String>,
    guest_name: Option<String>,
    status: String,
    total: Decimal,
    grand_total: Decimal,
    currency: String,
    payment_reference: String,
    shipping_address: Option<serde_json::Value>,
    cancel_reason: Option<String>,
    inventory_restored: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl OrderRow {
    fn into_order(self, items: Vec<OrderItem>) -> Result<Order> {
        let owner = match (self.user_id, self.guest_email) {
            (Some(user_id), None) => OrderOwner::Authenticated { user_id },
            (None, Some(email)) => OrderOwner::Guest {
                email,
                name: self.guest_name.unwrap_or_default(),
            },
            _ => {
                return Err(Error::Storage(format!(
                    "order {} has inconsistent owner columns",
                    self.id
                )))
            }
        };
        let status = OrderStatus::parse(&self.status)
            .ok_or_else(|| Error::Storage(format!("unknown order status {:?}", self.status)))?;
        Ok(Order {
            id: self.id,
            order_number: self.order_number,
            owner,
            items,
            total: Money::new(self.total, &self.currency),
            grand_total: Money::new(self.grand_total, &self.currency),
            status,
            payment_reference: self.payment_reference,
            shipping_address: self.shipping_address,
            cancel_reason: self.cancel_reason,
            inventory_restored: self.inventory_restored,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AdjustmentRow {
    id: Uuid,
    product_id: Uuid,
    quantity_delta: i32,
    reason: String,
    created_by: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<AdjustmentRow> for InventoryAdjustment {
    type Error = Error;

    fn try_from(row: AdjustmentRow) -> Result<Self> {
        let reason = AdjustmentReason::parse(&row.reason)
            .ok_or_else(|| Error::Storage(format!("unknown adjustment reason {:?}", row.reason)))?;
        Ok(InventoryAdjustment {
            id: row.id,
            product_id: row.product_id,
            quantity_delta: row.quantity_delta,
            reason,
            created_by: row.created_by,
            created_at: row.created_at,
        })
    }
}

impl PgStore {
    async fn items_for(&self, order_ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<OrderItem>>> {
        let rows = sqlx::query_as::<_, (Uuid, Uuid, i32, Decimal, String)>(
            "SELECT order_id, product_id, quantity, unit_price, currency \
             FROM order_items WHERE order_id = ANY($1) ORDER BY position",
        )
        .bind(order_ids)
        .fetch_all(&self.pool)
        .await?;
        let mut out: HashMap<Uuid, Vec<OrderItem>> = HashMap::new();
        for (order_id, product_id, quantity, unit_price, currency) in rows {
            out.entry(order_id).or_default().push(OrderItem {
                product_id,
                quantity: quantity as u32,
                unit_price: Money::new(unit_price, &currency),
            });
        }
        Ok(out)
    }

    async fn load_order(&self, row: OrderRow) -> Result<Order> {
        let mut items = self.items_for(&[row.id]).await?;
        let items = items.remove(&row.id).unwrap_or_default();
        row.into_order(items)
    }
}

#[async_trait]
impl CatalogStore for PgStore {
    async fn insert_product(&self, product: &ProductRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO products (id, name, category_id, status, inventory, low_stock_threshold, \
             view_count, cart_count, order_count, purchase_count, popularity_score, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(product.id)
        .bind(&product.name)
        .bind(product.category_id)
        .bind(product.status.as_str())
        .bind(product.inventory)
        .bind(product.low_stock_threshold)
        .bind(product.counters.view_count)
        .bind(product.counters.cart_count)
        .bind(product.counters.order_count)
        .bind(product.counters.purchase_count)
        .bind(product.popularity_score)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn product(&self, id: Uuid) -> Result<Option<ProductRecord>> {
        let row = sqlx::query_as::<_, ProductRow>("SELECT * FROM products WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(ProductRecord::try_from).transpose()
    }

    async fn products(&self) -> Result<Vec<ProductRecord>> {
        let rows = sqlx::query_as::<_, ProductRow>("SELECT * FROM products ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(ProductRecord::try_from).collect()
    }

    async fn products_by_ids(&self, ids: &[Uuid]) -> Result<Vec<ProductRecord>> {
        let rows =
            sqlx::query_as::<_, ProductRow>("SELECT * FROM products WHERE id = ANY($1) ORDER BY id")
                .bind(ids)
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(ProductRecord::try_from).collect()
    }

    async fn published_products(&self) -> Result<Vec<ProductRecord>> {
        let rows = sqlx::query_as::<_, ProductRow>(
            "SELECT * FROM products WHERE status = 'published' ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ProductRecord::try_from).collect()
    }

    async fn apply_adjustment(
        &self,
        product_id: Uuid,
        delta: i32,
        reason: AdjustmentReason,
        created_by: &str,
        at: DateTime<Utc>,
    ) -> Result<AdjustmentApplied> {
        let mut tx = self.pool.begin().await?;
        let current = sqlx::query_as::<_, (i32, i32)>(
            "SELECT inventory, low_stock_threshold FROM products WHERE id = $1 FOR UPDATE",
        )
        .bind(product_id)
        .fetch_optional(&mut *tx)
        .await?;
        let (before, threshold) = current.ok_or(Error::ProductNotFound(product_id))?;
        let after = before + delta;
        if after < 0 {
            return Err(Error::InvalidAdjustment {
                product_id,
                delta,
                current: before,
            });
        }
        sqlx::query("UPDATE products SET inventory = $2, updated_at = $3 WHERE id = $1")
            .bind(product_id)
            .bind(after)
            .bind(at)
            .execute(&mut *tx)
            .await?;
        let adjustment = InventoryAdjustment {
            id: Uuid::now_v7(),
            product_id,
            quantity_delta: delta,
            reason,
            created_by: created_by.to_string(),
            created_at: at,
        };
        insert_adjustment(&mut tx, &adjustment).await?;
        tx.commit().await?;
        Ok(AdjustmentApplied {
            adjustment,
            level_before: before,
            level_after: after,
            alert: alert_for(product_id, before, after, threshold),
        })
    }

    async fn adjustments(&self, product_id: Uuid, limit: u32) -> Result<Vec<InventoryAdjustment>> {
        let rows = sqlx::query_as::<_, AdjustmentRow>(
            "SELECT * FROM inventory_adjustments WHERE product_id = $1 \
             ORDER BY created_at DESC, id DESC LIMIT $2",
        )
        .bind(product_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(InventoryAdjustment::try_from).collect()
    }

    async fn low_stock(&self, limit: u32) -> Result<Vec<ProductRecord>> {
        let rows = sqlx::query_as::<_, ProductRow>(
            "SELECT * FROM products WHERE inventory > 0 AND inventory <= low_stock_threshold \
             ORDER BY inventory ASC, id ASC LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ProductRecord::try_from).collect()
    }

    async fn out_of_stock(&self, limit: u32) -> Result<Vec<ProductRecord>> {
        let rows = sqlx::query_as::<_, ProductRow>(
            "SELECT * FROM products WHERE inventory = 0 ORDER BY id ASC LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ProductRecord::try_from).collect()
    }

    async fn write_counters(&self, product_id: Uuid, counters: EngagementCounters) -> Result<()> {
        let result = sqlx::query(
            "UPDATE products SET view_count = $2, cart_count = $3, order_count = $4, \
             purchase_count = $5, updated_at = now() WHERE id = $1",
        )
        .bind(product_id)
        .bind(counters.view_count)
        .bind(counters.cart_count)
        .bind(counters.order_count)
        .bind(counters.purchase_count)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::ProductNotFound(product_id));
        }
        Ok(())
    }

    async fn write_score(&self, product_id: Uuid, score: f64) -> Result<()> {
        let result = sqlx::query(
            "UPDATE products SET popularity_score = $2, updated_at = now() WHERE id = $1",
        )
        .bind(product_id)
        .bind(score)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::ProductNotFound(product_id));
        }
        Ok(())
    }
}

async fn insert_adjustment(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    adjustment: &InventoryAdjustment,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO inventory_adjustments (id, product_id, quantity_delta, reason, created_by, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(adjustment.id)
    .bind(adjustment.product_id)
    .bind(adjustment.quantity_delta)
    .bind(adjustment.reason.as_str())
    .bind(&adjustment.created_by)
    .bind(adjustment.created_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_history(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    change: &StatusChange,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO order_status_history (id, order_id, from_status, to_status, changed_at) \
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(Uuid::now_v7())
    .bind(change.order_id)
    .bind(change.from.as_str())
    .bind(change.to.as_str())
    .bind(change.at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[async_trait]
impl OrderStore for PgStore {
    async fn insert_reserving_stock(&self, order: &Order) -> Result<Vec<StockAlert>> {
        let mut tx = self.pool.begin().await?;
        let created_by = format!("order:{}", order.order_number);
        let mut alerts = Vec::new();
        for item in &order.items {
            let qty = item.quantity as i32;
            let updated = sqlx::query_as::<_, (i32, i32)>(
                "UPDATE products SET inventory = inventory - $2, updated_at = $3 \
                 WHERE id = $1 AND inventory >= $2 RETURNING inventory, low_stock_threshold",
            )
            .bind(item.product_id)
            .bind(qty)
            .bind(order.created_at)
            .fetch_optional(&mut *tx)
            .await?;
            let (after, threshold) = match updated {
                Some(row) => row,
                // Transaction drops here, rolling back earlier decrements.
                None => {
                    let available =
                        sqlx::query_as::<_, (i32,)>("SELECT inventory FROM products WHERE id = $1")
                            .bind(item.product_id)
                            .fetch_optional(&mut *tx)
                            .await?;
                    return Err(match available {
                        Some((available,)) => Error::InsufficientInventory {
                            product_id: item.product_id,
                            requested: item.quantity,
                            available,
                        },
                        None => Error::ProductNotFound(item.product_id),
                    });
                }
            };
            insert_adjustment(
                &mut tx,
                &InventoryAdjustment {
                    id: Uuid::now_v7(),
                    product_id: item.product_id,
                    quantity_delta: -qty,
                    reason: AdjustmentReason::OrderReserve,
                    created_by: created_by.clone(),
                    created_at: order.created_at,
                },
            )
            .await?;
            alerts.extend(alert_for(item.product_id, after + qty, after, threshold));
        }

        let (user_id, guest_email, guest_name) = match &order.owner {
            OrderOwner::Authenticated { user_id } => (Some(*user_id), None, None),
            OrderOwner::Guest { email, name } => {
                (None, Some(email.clone()), Some(name.clone()))
            }
        };
        sqlx::query(
            "INSERT INTO orders (id, order_number, user_id, guest_email, guest_name, status, total, \
             grand_total, currency, payment_reference, shipping_address, cancel_reason, \
             inventory_restored, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
        )
        .bind(order.id)
        .bind(&order.order_number)
        .bind(user_id)
        .bind(guest_email)
        .bind(guest_name)
        .bind(order.status.as_str())
        .bind(order.total.amount())
        .bind(order.grand_total.amount())
        .bind(order.total.currency())
        .bind(&order.payment_reference)
        .bind(&order.shipping_address)
        .bind(&order.cancel_reason)
        .bind(order.inventory_restored)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await?;
        for (position, item) in order.items.iter().enumerate() {
            sqlx::query(
                "INSERT INTO order_items (id, order_id, product_id, quantity, unit_price, currency, position) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(Uuid::now_v7())
            .bind(order.id)
            .bind(item.product_id)
            .bind(item.quantity as i32)
            .bind(item.unit_price.amount())
            .bind(item.unit_price.currency())
            .bind(position as i32)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(alerts)
    }

    async fn order(&self, id: Uuid) -> Result<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(self.load_order(row).await?)),
            None => Ok(None),
        }
    }

    async fn by_payment_reference(&self, payment_reference: &str) -> Result<Option<Order>> {
        let row =
            sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE payment_reference = $1")
                .bind(payment_reference)
                .fetch_optional(&self.pool)
                .await?;
        match row {
            Some(row) => Ok(Some(self.load_order(row).await?)),
            None => Ok(None),
        }
    }

    async fn recent_orders(&self, limit: u32) -> Result<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>(
            "SELECT * FROM orders ORDER BY created_at DESC, id ASC LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let mut items = self.items_for(&ids).await?;
        rows.into_iter()
            .map(|row| {
                let order_items = items.remove(&row.id).unwrap_or_default();
                row.into_order(order_items)
            })
            .collect()
    }

    async fn stale_in_status(
        &self,
        status: OrderStatus,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Uuid>> {
        let rows = sqlx::query_as::<_, (Uuid,)>(
            "SELECT id FROM orders WHERE status = $1 AND updated_at <= $2 ORDER BY id",
        )
        .bind(status.as_str())
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn set_status_if(
        &self,
        id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        ensure_transition(from, to)?;
        let mut tx = self.pool.begin().await?;
        let current =
            sqlx::query_as::<_, (String,)>("SELECT status FROM orders WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let (current,) = current.ok_or(Error::OrderNotFound(id))?;
        let current = OrderStatus::parse(&current)
            .ok_or_else(|| Error::Storage(format!("unknown order status {current:?}")))?;
        if current != from {
            return Ok(false);
        }
        sqlx::query("UPDATE orders SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(to.as_str())
            .bind(at)
            .execute(&mut *tx)
            .await?;
        insert_history(
            &mut tx,
            &StatusChange {
                order_id: id,
                from,
                to,
                at,
            },
        )
        .await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn cancel_restoring_stock(
        &self,
        id: Uuid,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<CancelApplied> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(Error::OrderNotFound(id))?;
        let items = sqlx::query_as::<_, (Uuid, i32, Decimal, String)>(
            "SELECT product_id, quantity, unit_price, currency FROM order_items \
             WHERE order_id = $1 ORDER BY position",
        )
        .bind(id)
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .map(|(product_id, quantity, unit_price, currency)| OrderItem {
            product_id,
            quantity: quantity as u32,
            unit_price: Money::new(unit_price, &currency),
        })
        .collect::<Vec<_>>();
        let order = row.into_order(items)?;

        if order.status == OrderStatus::Cancelled {
            return Ok(CancelApplied {
                order,
                newly_cancelled: false,
                restored: false,
            });
        }
        ensure_transition(order.status, OrderStatus::Cancelled)?;

        let restore = !order.inventory_restored;
        if restore {
            let created_by = format!("order:{}", order.order_number);
            for item in &order.items {
                sqlx::query(
                    "UPDATE products SET inventory = inventory + $2, updated_at = $3 WHERE id = $1",
                )
                .bind(item.product_id)
                .bind(item.quantity as i32)
                .bind(at)
                .execute(&mut *tx)
                .await?;
                insert_adjustment(
                    &mut tx,
                    &InventoryAdjustment {
                        id: Uuid::now_v7(),
                        product_id: item.product_id,
                        quantity_delta: item.quantity as i32,
                        reason: AdjustmentReason::OrderCancelRestore,
                        created_by: created_by.clone(),
                        created_at: at,
                    },
                )
                .await?;
            }
        }
        sqlx::query(
            "UPDATE orders SET status = 'cancelled', cancel_reason = $2, inventory_restored = true, \
             updated_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(reason)
        .bind(at)
        .execute(&mut *tx)
        .await?;
        insert_history(
            &mut tx,
            &StatusChange {
                order_id: id,
                from: order.status,
                to: OrderStatus::Cancelled,
                at,
            },
        )
        .await?;
        tx.commit().await?;

        let mut cancelled = order;
        cancelled.status = OrderStatus::Cancelled;
        cancelled.cancel_reason = Some(reason.to_string());
        cancelled.inventory_restored = true;
        cancelled.updated_at = at;
        Ok(CancelApplied {
            order: cancelled,
            newly_cancelled: true,
            restored: restore,
        })
    }

    async fn status_history(&self, id: Uuid) -> Result<Vec<StatusChange>> {
        let rows = sqlx::query_as::<_, (Uuid, String, String, DateTime<Utc>)>(
            "SELECT order_id, from_status, to_status, changed_at FROM order_status_history \
             WHERE order_id = $1 ORDER BY changed_at, id",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|(order_id, from, to, at)| {
                let from = OrderStatus::parse(&from)
                    .ok_or_else(|| Error::Storage(format!("unknown order status {from:?}")))?;
                let to = OrderStatus::parse(&to)
                    .ok_or_else(|| Error::Storage(format!("unknown order status {to:?}")))?;
                Ok(StatusChange {
                    order_id,
                    from,
                    to,
                    at,
                })
            })
            .collect()
    }

    async fn engagement_sources(&self) -> Result<HashMap<Uuid, EngagementSource>> {
        let rows = sqlx::query_as::<_, (Uuid, i64, i64, Option<DateTime<Utc>>)>(
            "SELECT oi.product_id, COUNT(DISTINCT o.id), COALESCE(SUM(oi.quantity), 0)::BIGINT, \
             MAX(o.created_at) \
             FROM order_items oi JOIN orders o ON o.id = oi.order_id \
             WHERE o.status <> 'cancelled' GROUP BY oi.product_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(product_id, order_count, purchase_count, last_ordered_at)| {
                (
                    product_id,
                    EngagementSource {
                        order_count,
                        purchase_count,
                        last_ordered_at,
                    },
                )
            })
            .collect())
    }
}

#[async_trait]
impl ActivityStore for PgStore {
    async fn append(&self, event: &ActivityEvent) -> Result<()> {
        let (user_id, session_id) = match &event.actor {
            Actor::User { user_id } => (Some(*user_id), None),
            Actor::Session { session_id } => (None, Some(session_id.clone())),
        };
        sqlx::query(
            "INSERT INTO activity_events (id, product_id, activity_type, user_id, session_id, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(event.id)
        .bind(event.product_id)
        .bind(event.activity_type.as_str())
        .bind(user_id)
        .bind(session_id)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn activity_rollup(&self) -> Result<HashMap<Uuid, ActivityRollup>> {
        let rows = sqlx::query_as::<_, (Uuid, i64, i64)>(
            "SELECT product_id, \
             COUNT(*) FILTER (WHERE activity_type = 'view'), \
             COUNT(*) FILTER (WHERE activity_type = 'cart_add') \
             FROM activity_events GROUP BY product_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(product_id, view_count, cart_count)| {
                (
                    product_id,
                    ActivityRollup {
                        view_count,
                        cart_count,
                    },
                )
            })
            .collect())
    }
}
