//! Error taxonomy for the engine.
//!
//! Validation and business-rule failures (`InvalidOrderInput`,
//! `InsufficientInventory`, `InvalidTransition`) are deterministic and are
//! surfaced to the caller unretried. `Storage` wraps transient persistence
//! failures; batch sweeps isolate those per item and report them in the
//! sweep outcome instead of aborting.

use thiserror::Error;
use uuid::Uuid;

use crate::domain::order::OrderStatus;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid order input: {0}")]
    InvalidOrderInput(String),

    #[error("insufficient inventory for product {product_id}: requested {requested}, available {available}")]
    InsufficientInventory {
        product_id: Uuid,
        requested: u32,
        available: i32,
    },

    #[error("invalid order transition: {from} -> {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("product {0} not found")]
    ProductNotFound(Uuid),

    #[error("order {0} not found")]
    OrderNotFound(Uuid),

    #[error("adjustment of {delta} would drive product {product_id} below zero (current {current})")]
    InvalidAdjustment {
        product_id: Uuid,
        delta: i32,
        current: i32,
    },

    #[error("a full update is already in progress")]
    UpdateAlreadyInProgress,

    #[error("no product ids supplied")]
    EmptyProductSelection,

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
