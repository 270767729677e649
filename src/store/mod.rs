//! Storage seam for the engine.
//!
//! Three narrow traits, one per owned table group, with two backends: an
//! in-memory store for tests and local development, and a Postgres store
//! for production. Operations that the correctness contract requires to be
//! atomic (order insert + stock reservation, cancellation + restore) are
//! single trait methods so each backend can provide its own atomic unit.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::activity::ActivityEvent;
use crate::domain::inventory::{AdjustmentReason, InventoryAdjustment, StockAlert};
use crate::domain::order::{Order, OrderStatus, StatusChange};
use crate::domain::product::{EngagementCounters, ProductRecord};
use crate::error::Result;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Result of a committed inventory adjustment.
#[derive(Clone, Debug)]
pub struct AdjustmentApplied {
    pub adjustment: InventoryAdjustment,
    pub level_before: i32,
    pub level_after: i32,
    pub alert: Option<StockAlert>,
}

/// Result of a cancellation attempt on a cancellable or already-cancelled
/// order.
#[derive(Clone, Debug)]
pub struct CancelApplied {
    pub order: Order,
    /// False when the order was already CANCELLED (idempotent re-run).
    pub newly_cancelled: bool,
    /// True when this call credited stock back.
    pub restored: bool,
}

/// Per-product aggregate derived from the orders table.
#[derive(Clone, Copy, Debug, Default)]
pub struct EngagementSource {
    pub order_count: i64,
    pub purchase_count: i64,
    pub last_ordered_at: Option<DateTime<Utc>>,
}

/// Per-product aggregate derived from the activity feed.
#[derive(Clone, Copy, Debug, Default)]
pub struct ActivityRollup {
    pub view_count: i64,
    pub cart_count: i64,
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn insert_product(&self, product: &ProductRecord) -> Result<()>;

    async fn product(&self, id: Uuid) -> Result<Option<ProductRecord>>;

    /// Every product, ordered by ascending id.
    async fn products(&self) -> Result<Vec<ProductRecord>>;

    async fn products_by_ids(&self, ids: &[Uuid]) -> Result<Vec<ProductRecord>>;

    async fn published_products(&self) -> Result<Vec<ProductRecord>>;

    /// Applies a signed stock delta and appends the audit row as one unit.
    /// Fails with `ProductNotFound` for unknown products and
    /// `InvalidAdjustment` when the result would be negative.
    async fn apply_adjustment(
        &self,
        product_id: Uuid,
        delta: i32,
        reason: AdjustmentReason,
        created_by: &str,
        at: DateTime<Utc>,
    ) -> Result<AdjustmentApplied>;

    /// Audit trail for one product, newest first.
    async fn adjustments(&self, product_id: Uuid, limit: u32) -> Result<Vec<InventoryAdjustment>>;

    /// Products with `0 < inventory <= low_stock_threshold`, ascending
    /// inventory, ties broken by id.
    async fn low_stock(&self, limit: u32) -> Result<Vec<ProductRecord>>;

    async fn out_of_stock(&self, limit: u32) -> Result<Vec<ProductRecord>>;

    async fn write_counters(&self, product_id: Uuid, counters: EngagementCounters) -> Result<()>;

    async fn write_score(&self, product_id: Uuid, score: f64) -> Result<()>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persists the order at PENDING and decrements stock for every line
    /// item as one atomic unit: either the order and all reservations
    /// commit, or nothing does. Returns threshold-crossing alerts.
    async fn insert_reserving_stock(&self, order: &Order) -> Result<Vec<StockAlert>>;

    async fn order(&self, id: Uuid) -> Result<Option<Order>>;

    async fn by_payment_reference(&self, payment_reference: &str) -> Result<Option<Order>>;

    async fn recent_orders(&self, limit: u32) -> Result<Vec<Order>>;

    /// Orders sitting in `status` whose last write is at or before `cutoff`.
    async fn stale_in_status(&self, status: OrderStatus, cutoff: DateTime<Utc>) -> Result<Vec<Uuid>>;

    /// Compare-and-set status write. `Ok(false)` when the current status no
    /// longer matches `from` (another writer got there first); the edge
    /// itself is validated against the transition table.
    async fn set_status_if(
        &self,
        id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    /// CANCELLED write plus flag-guarded stock restore in one unit.
    /// Re-running on an already-cancelled order is a no-op; running on a
    /// shipped or fulfilled order is an `InvalidTransition`.
    async fn cancel_restoring_stock(
        &self,
        id: Uuid,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<CancelApplied>;

    async fn status_history(&self, id: Uuid) -> Result<Vec<StatusChange>>;

    /// Order/purchase counts and recency per product, cancelled orders
    /// excluded.
    async fn engagement_sources(&self) -> Result<HashMap<Uuid, EngagementSource>>;
}

#[async_trait]
pub trait ActivityStore: Send + Sync {
    async fn append(&self, event: &ActivityEvent) -> Result<()>;

    /// View/cart tallies per product over the whole feed.
    async fn activity_rollup(&self) -> Result<HashMap<Uuid, ActivityRollup>>;
}
