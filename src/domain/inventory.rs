//! Inventory ledger records and threshold-crossing alerts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentReason {
    OrderReserve,
    OrderCancelRestore,
    ManualAdjust,
}

impl AdjustmentReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OrderReserve => "order_reserve",
            Self::OrderCancelRestore => "order_cancel_restore",
            Self::ManualAdjust => "manual_adjust",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "order_reserve" => Some(Self::OrderReserve),
            "order_cancel_restore" => Some(Self::OrderCancelRestore),
            "manual_adjust" => Some(Self::ManualAdjust),
            _ => None,
        }
    }
}

impl fmt::Display for AdjustmentReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only audit record. Never mutated after insert; the sum of deltas
/// reconstructs the stock level for any product.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InventoryAdjustment {
    pub id: Uuid,
    pub product_id: Uuid,
    pub quantity_delta: i32,
    pub reason: AdjustmentReason,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// Raised when a committed write moves a product across its low-stock
/// threshold or down to zero.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StockAlert {
    LowStock {
        product_id: Uuid,
        remaining: i32,
        threshold: i32,
    },
    OutOfStock {
        product_id: Uuid,
    },
}

/// Compares the stock level before and after a write and reports a crossing,
/// if any. Restores that move stock upward never alert.
pub fn alert_for(product_id: Uuid, before: i32, after: i32, threshold: i32) -> Option<StockAlert> {
    if after >= before {
        return None;
    }
    if after == 0 {
        Some(StockAlert::OutOfStock { product_id })
    } else if after <= threshold && before > threshold {
        Some(StockAlert::LowStock {
            product_id,
            remaining: after,
            threshold,
        })
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_on_threshold_crossing() {
        let id = Uuid::new_v4();
        assert_eq!(
            alert_for(id, 6, 4, 5),
            Some(StockAlert::LowStock {
                product_id: id,
                remaining: 4,
                threshold: 5
            })
        );
    }

    #[test]
    fn test_alert_on_exhaustion() {
        let id = Uuid::new_v4();
        assert_eq!(alert_for(id, 2, 0, 5), Some(StockAlert::OutOfStock { product_id: id }));
    }

    #[test]
    fn test_no_alert_when_already_below_threshold() {
        let id = Uuid::new_v4();
        assert_eq!(alert_for(id, 4, 3, 5), None);
    }

    #[test]
    fn test_no_alert_on_restore() {
        let id = Uuid::new_v4();
        assert_eq!(alert_for(id, 0, 3, 5), None);
        assert_eq!(alert_for(id, 3, 3, 5), None);
    }
}
