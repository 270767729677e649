//! Domain events published to NATS, best-effort.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::inventory::StockAlert;
use crate::domain::order::OrderStatus;

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    OrderCreated {
        order_id: Uuid,
        order_number: String,
        grand_total: Decimal,
        currency: String,
        at: DateTime<Utc>,
    },
    OrderStatusChanged {
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
        at: DateTime<Utc>,
    },
    OrderCancelled {
        order_id: Uuid,
        reason: Option<String>,
        at: DateTime<Utc>,
    },
    Stock(StockAlert),
}

impl DomainEvent {
    pub fn subject(&self) -> &'static str {
        match self {
            Self::OrderCreated { .. } => "orders.created",
            Self::OrderStatusChanged { .. } => "orders.status_changed",
            Self::OrderCancelled { .. } => "orders.cancelled",
            Self::Stock(StockAlert::LowStock { .. }) => "inventory.low_stock",
            Self::Stock(StockAlert::OutOfStock { .. }) => "inventory.out_of_stock",
        }
    }
}
