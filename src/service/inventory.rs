//! Manual inventory adjustments and stock-level reads.

use std::sync::Arc;

use uuid::Uuid;

use crate::domain::inventory::{AdjustmentReason, InventoryAdjustment};
use crate::domain::product::ProductRecord;
use crate::error::{Error, Result};
use crate::service::Clock;
use crate::store::{AdjustmentApplied, CatalogStore};

pub struct InventoryService {
    catalog: Arc<dyn CatalogStore>,
    clock: Arc<dyn Clock>,
}

impl InventoryService {
    pub fn new(catalog: Arc<dyn CatalogStore>, clock: Arc<dyn Clock>) -> Self {
        Self { catalog, clock }
    }

    /// Admin stock correction. Rejects zero deltas and any delta that would
    /// drive stock negative.
    pub async fn adjust(
        &self,
        product_id: Uuid,
        delta: i32,
        created_by: &str,
    ) -> Result<AdjustmentApplied> {
        if delta == 0 {
            return Err(Error::InvalidAdjustment {
                product_id,
                delta,
                current: 0,
            });
        }
        let applied = self
            .catalog
            .apply_adjustment(
                product_id,
                delta,
                AdjustmentReason::ManualAdjust,
                created_by,
                self.clock.now(),
            )
            .await?;
        tracing::info!(
            product_id = %product_id,
            delta,
            level = applied.level_after,
            created_by,
            "manual inventory adjustment"
        );
        Ok(applied)
    }

    pub async fn product(&self, product_id: Uuid) -> Result<ProductRecord> {
        self.catalog
            .product(product_id)
            .await?
            .ok_or(Error::ProductNotFound(product_id))
    }

    pub async fn low_stock(&self, limit: u32) -> Result<Vec<ProductRecord>> {
        self.catalog.low_stock(limit).await
    }

    pub async fn out_of_stock(&self, limit: u32) -> Result<Vec<ProductRecord>> {
        self.catalog.out_of_stock(limit).await
    }

    pub async fn adjustments(
        &self,
        product_id: Uuid,
        limit: u32,
    ) -> Result<Vec<InventoryAdjustment>> {
        // Surface unknown products as 404 rather than an empty trail.
        self.product(product_id).await?;
        self.catalog.adjustments(product_id, limit).await
    }
}
