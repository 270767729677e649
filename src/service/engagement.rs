//! Engagement aggregation: full recompute of per-product counters.
//!
//! The counters are a materialized view over the orders table and the
//! activity feed. Recomputing from source every pass keeps them idempotent
//! and self-healing against drift or a crash mid-update.

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::domain::activity::{ActivityEvent, ActivityType, Actor};
use crate::domain::product::EngagementCounters;
use crate::error::{Error, Result};
use crate::service::Clock;
use crate::store::{ActivityStore, CatalogStore, OrderStore};

/// Machine-readable result of one recompute pass.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct RecalcOutcome {
    pub products: usize,
    pub updated: usize,
    pub failed: usize,
}

pub struct EngagementAggregator {
    catalog: Arc<dyn CatalogStore>,
    orders: Arc<dyn OrderStore>,
    activity: Arc<dyn ActivityStore>,
    clock: Arc<dyn Clock>,
    chunk_size: usize,
}

impl EngagementAggregator {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        orders: Arc<dyn OrderStore>,
        activity: Arc<dyn ActivityStore>,
        clock: Arc<dyn Clock>,
        chunk_size: usize,
    ) -> Self {
        Self {
            catalog,
            orders,
            activity,
            clock,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Appends one activity record to the feed.
    pub async fn record(
        &self,
        product_id: Uuid,
        activity_type: ActivityType,
        actor: Actor,
    ) -> Result<ActivityEvent> {
        self.catalog
            .product(product_id)
            .await?
            .ok_or(Error::ProductNotFound(product_id))?;
        let event = ActivityEvent {
            id: Uuid::now_v7(),
            product_id,
            activity_type,
            actor,
            created_at: self.clock.now(),
        };
        self.activity.append(&event).await?;
        Ok(event)
    }

    /// Recomputes every product's counters from the orders table and the
    /// activity feed. Chunked writes; a failure on one product is counted
    /// and logged, never aborts the pass.
    pub async fn recalculate_all_product_metrics(&self) -> Result<RecalcOutcome> {
        let sources = self.orders.engagement_sources().await?;
        let rollup = self.activity.activity_rollup().await?;
        let products = self.catalog.products().await?;

        let mut outcome = RecalcOutcome {
            products: products.len(),
            ..Default::default()
        };
        for chunk in products.chunks(self.chunk_size) {
            for product in chunk {
                let source = sources.get(&product.id).copied().unwrap_or_default();
                let feed = rollup.get(&product.id).copied().unwrap_or_default();
                let counters = EngagementCounters {
                    view_count: feed.view_count,
                    cart_count: feed.cart_count,
                    order_count: source.order_count,
                    purchase_count: source.purchase_count,
                };
                match self.catalog.write_counters(product.id, counters).await {
                    Ok(()) => outcome.updated += 1,
                    Err(e) => {
                        outcome.failed += 1;
                        tracing::warn!(product_id = %product.id, error = %e, "counter write failed");
                    }
                }
            }
            tracing::debug!(chunk = chunk.len(), "engagement chunk committed");
        }
        tracing::info!(
            products = outcome.products,
            updated = outcome.updated,
            failed = outcome.failed,
            "engagement recompute complete"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::domain::order::{OrderItem, OrderOwner};
    use crate::domain::product::{ProductRecord, ProductStatus};
    use crate::domain::value_objects::Money;
    use crate::service::orders::{CreateOrderInput, OrderService};
    use crate::service::ManualClock;
    use crate::store::{CatalogStore, MemoryStore};
    use chrono::Utc;
    use rust_decimal::Decimal;

    struct Fixture {
        store: Arc<MemoryStore>,
        orders: OrderService,
        aggregator: EngagementAggregator,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let orders = OrderService::new(
            store.clone(),
            store.clone(),
            clock.clone(),
            EngineConfig::default(),
        );
        let aggregator = EngagementAggregator::new(
            store.clone(),
            store.clone(),
            store.clone(),
            clock,
            2, // small chunks to exercise the chunk loop
        );
        Fixture {
            store,
            orders,
            aggregator,
        }
    }

    async fn seed(store: &MemoryStore) -> Uuid {
        let id = Uuid::now_v7();
        let now = Utc::now();
        store
            .insert_product(&ProductRecord {
                id,
                name: "Widget".into(),
                category_id: None,
                status: ProductStatus::Published,
                inventory: 100,
                low_stock_threshold: 2,
                counters: Default::default(),
                popularity_score: 0.0,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
        id
    }

    fn usd(cents: i64) -> Money {
        Money::new(Decimal::new(cents, 2), "USD")
    }

    async fn place_order(orders: &OrderService, product_id: Uuid, quantity: u32, payment_ref: &str) -> Uuid {
        orders
            .create_order(CreateOrderInput {
                owner: OrderOwner::Authenticated {
                    user_id: Uuid::now_v7(),
                },
                items: vec![OrderItem {
                    product_id,
                    quantity,
                    unit_price: usd(100),
                }],
                claimed_total: usd(100 * quantity as i64),
                shipping_fee: usd(0),
                payment_reference: payment_ref.into(),
                shipping_address: None,
            })
            .await
            .unwrap()
            .order
            .id
    }

    #[tokio::test]
    async fn test_counters_derive_from_orders() {
        let f = fixture();
        let q = seed(&f.store).await;
        place_order(&f.orders, q, 2, "pay-1").await;
        place_order(&f.orders, q, 4, "pay-2").await;
        place_order(&f.orders, q, 1, "pay-3").await;

        let outcome = f.aggregator.recalculate_all_product_metrics().await.unwrap();
        assert_eq!(outcome.updated, 1);
        assert_eq!(outcome.failed, 0);

        let product = f.store.product(q).await.unwrap().unwrap();
        assert_eq!(product.counters.order_count, 3);
        assert_eq!(product.counters.purchase_count, 7);
    }

    #[tokio::test]
    async fn test_cancelled_orders_drop_out_on_recompute() {
        let f = fixture();
        let q = seed(&f.store).await;
        place_order(&f.orders, q, 2, "pay-1").await;
        let doomed = place_order(&f.orders, q, 5, "pay-2").await;

        f.aggregator.recalculate_all_product_metrics().await.unwrap();
        assert_eq!(
            f.store.product(q).await.unwrap().unwrap().counters.purchase_count,
            7
        );

        f.orders.cancel_order(doomed, "test").await.unwrap();
        f.aggregator.recalculate_all_product_metrics().await.unwrap();
        let counters = f.store.product(q).await.unwrap().unwrap().counters;
        assert_eq!(counters.order_count, 1);
        assert_eq!(counters.purchase_count, 2);
    }

    #[tokio::test]
    async fn test_view_and_cart_counts_from_activity_feed() {
        let f = fixture();
        let p = seed(&f.store).await;
        for _ in 0..3 {
            f.aggregator
                .record(
                    p,
                    ActivityType::View,
                    Actor::Session {
                        session_id: "s-1".into(),
                    },
                )
                .await
                .unwrap();
        }
        f.aggregator
            .record(
                p,
                ActivityType::CartAdd,
                Actor::User {
                    user_id: Uuid::now_v7(),
                },
            )
            .await
            .unwrap();

        f.aggregator.recalculate_all_product_metrics().await.unwrap();
        let counters = f.store.product(p).await.unwrap().unwrap().counters;
        assert_eq!(counters.view_count, 3);
        assert_eq!(counters.cart_count, 1);
        assert_eq!(counters.order_count, 0);
    }

    #[tokio::test]
    async fn test_record_rejects_unknown_product() {
        let f = fixture();
        let missing = Uuid::now_v7();
        let err = f
            .aggregator
            .record(
                missing,
                ActivityType::View,
                Actor::Session {
                    session_id: "s".into(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ProductNotFound(id) if id == missing));
    }
}
