//! Popularity scoring.
//!
//! The score is additive over log-damped engagement counters plus an
//! exponentially decaying recency boost, clamped to [0, 100]. Every counter
//! appears only in an increasing term, so the score is monotonic in each
//! input; there are deliberately no ratio terms (a conversion denominator
//! would make more views lower the score).

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::product::{EngagementCounters, ProductRecord};
use crate::error::{Error, Result};
use crate::service::Clock;
use crate::store::{CatalogStore, OrderStore};

const W_ORDERS: f64 = 12.0;
const W_PURCHASES: f64 = 8.0;
const W_CART: f64 = 2.0;
const W_VIEWS: f64 = 1.0;
const W_RECENCY: f64 = 15.0;
const RECENCY_DECAY_DAYS: f64 = 30.0;

pub const MAX_SCORE: f64 = 100.0;

fn ln_1p(count: i64) -> f64 {
    (1.0 + count.max(0) as f64).ln()
}

/// Bounded, monotonic score for one product.
pub fn compute_score(
    counters: &EngagementCounters,
    last_ordered_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> f64 {
    let recency = match last_ordered_at {
        Some(at) => {
            let days = (now - at).num_seconds().max(0) as f64 / 86_400.0;
            W_RECENCY * (-days / RECENCY_DECAY_DAYS).exp()
        }
        None => 0.0,
    };
    let raw = W_ORDERS * ln_1p(counters.order_count)
        + W_PURCHASES * ln_1p(counters.purchase_count)
        + W_CART * ln_1p(counters.cart_count)
        + W_VIEWS * ln_1p(counters.view_count)
        + recency;
    raw.clamp(0.0, MAX_SCORE)
}

fn similarity(a: &ProductRecord, b: &ProductRecord) -> f64 {
    let category = match (a.category_id, b.category_id) {
        (Some(x), Some(y)) if x == y => 2.0,
        _ => 0.0,
    };
    category + 1.0 / (1.0 + (a.popularity_score - b.popularity_score).abs())
}

/// Machine-readable result of one score pass.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct ScoreUpdateOutcome {
    pub products: usize,
    pub updated: usize,
    pub failed: usize,
}

pub struct ScoringEngine {
    catalog: Arc<dyn CatalogStore>,
    orders: Arc<dyn OrderStore>,
    clock: Arc<dyn Clock>,
}

impl ScoringEngine {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        orders: Arc<dyn OrderStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            catalog,
            orders,
            clock,
        }
    }

    async fn score_products(&self, products: &[ProductRecord]) -> Result<ScoreUpdateOutcome> {
        let sources = self.orders.engagement_sources().await?;
        let now = self.clock.now();
        let mut outcome = ScoreUpdateOutcome {
            products: products.len(),
            ..Default::default()
        };
        for product in products {
            let last_ordered_at = sources.get(&product.id).and_then(|s| s.last_ordered_at);
            let score = compute_score(&product.counters, last_ordered_at, now);
            // One write per product; readers never observe a partial score.
            match self.catalog.write_score(product.id, score).await {
                Ok(()) => outcome.updated += 1,
                Err(e) => {
                    outcome.failed += 1;
                    tracing::warn!(product_id = %product.id, error = %e, "score write failed");
                }
            }
        }
        Ok(outcome)
    }

    /// Recomputes every product's score.
    pub async fn update_all_product_scores(&self) -> Result<ScoreUpdateOutcome> {
        let products = self.catalog.products().await?;
        let outcome = self.score_products(&products).await?;
        tracing::info!(
            products = outcome.products,
            updated = outcome.updated,
            failed = outcome.failed,
            "score recompute complete"
        );
        Ok(outcome)
    }

    /// Recomputes exactly the given subset, leaving all other products
    /// untouched. The subset must be non-empty and fully resolvable.
    pub async fn update_scores_for(&self, product_ids: &[Uuid]) -> Result<ScoreUpdateOutcome> {
        if product_ids.is_empty() {
            return Err(Error::EmptyProductSelection);
        }
        let unique: Vec<Uuid> = {
            let mut seen = HashSet::new();
            product_ids
                .iter()
                .copied()
                .filter(|id| seen.insert(*id))
                .collect()
        };
        let products = self.catalog.products_by_ids(&unique).await?;
        let found: HashSet<Uuid> = products.iter().map(|p| p.id).collect();
        if let Some(missing) = unique.iter().find(|id| !found.contains(*id)) {
            return Err(Error::ProductNotFound(*missing));
        }
        self.score_products(&products).await
    }

    /// Published products most similar to the given one: same-category
    /// bonus plus popularity proximity, similarity descending, id ascending
    /// for determinism, source excluded.
    pub async fn get_similar_products(
        &self,
        product_id: Uuid,
        limit: u32,
    ) -> Result<Vec<ProductRecord>> {
        let source = self
            .catalog
            .product(product_id)
            .await?
            .ok_or(Error::ProductNotFound(product_id))?;
        let mut candidates: Vec<(f64, ProductRecord)> = self
            .catalog
            .published_products()
            .await?
            .into_iter()
            .filter(|p| p.id != source.id)
            .map(|p| (similarity(&source, &p), p))
            .collect();
        candidates.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.1.id.cmp(&b.1.id))
        });
        candidates.truncate(limit as usize);
        Ok(candidates.into_iter().map(|(_, p)| p).collect())
    }
}
