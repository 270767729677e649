//! Product read/write model.
//!
//! Products are owned by the (external) catalog; the engine owns their
//! inventory level, engagement counters, and popularity score.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus {
    Draft,
    Published,
    Archived,
}

impl ProductStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Published => "published",
            Self::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "published" => Some(Self::Published),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }
}

impl fmt::Display for ProductStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived engagement metrics, recomputed in full from source tables.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngagementCounters {
    pub view_count: i64,
    pub cart_count: i64,
    pub order_count: i64,
    pub purchase_count: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProductRecord {
    pub id: Uuid,
    pub name: String,
    pub category_id: Option<Uuid>,
    pub status: ProductStatus,
    pub inventory: i32,
    pub low_stock_threshold: i32,
    pub counters: EngagementCounters,
    pub popularity_score: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProductRecord {
    pub fn is_published(&self) -> bool {
        self.status == ProductStatus::Published
    }

    pub fn is_low_stock(&self) -> bool {
        self.inventory > 0 && self.inventory <= self.low_stock_threshold
    }

    pub fn is_out_of_stock(&self) -> bool {
        self.inventory == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(inventory: i32, threshold: i32) -> ProductRecord {
        ProductRecord {
            id: Uuid::new_v4(),
            name: "Widget".into(),
            category_id: None,
            status: ProductStatus::Published,
            inventory,
            low_stock_threshold: threshold,
            counters: EngagementCounters::default(),
            popularity_score: 0.0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_stock_classification() {
        assert!(product(0, 5).is_out_of_stock());
        assert!(!product(0, 5).is_low_stock()); // out of stock is not "low"
        assert!(product(3, 5).is_low_stock());
        assert!(!product(6, 5).is_low_stock());
    }
}
