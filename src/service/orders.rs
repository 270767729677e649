//! Order processing: creation, lifecycle kickoff, sweeps, cancellation.

use std::sync::Arc;

use chrono::Duration;
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::domain::activity::{ActivityEvent, ActivityType, Actor};
use crate::domain::inventory::StockAlert;
use crate::domain::order::{
    ensure_transition, Order, OrderItem, OrderOwner, OrderStatus, StatusChange,
};
use crate::domain::value_objects::Money;
use crate::error::{Error, Result};
use crate::service::Clock;
use crate::store::{ActivityStore, CancelApplied, OrderStore};

/// Checkout input as supplied by the payment collaborator. Prices are a
/// snapshot taken upstream; the claimed total is re-validated against them.
#[derive(Clone, Debug)]
pub struct CreateOrderInput {
    pub owner: OrderOwner,
    pub items: Vec<OrderItem>,
    pub claimed_total: Money,
    pub shipping_fee: Money,
    pub payment_reference: String,
    pub shipping_address: Option<serde_json::Value>,
}

#[derive(Clone, Debug)]
pub struct CreatedOrder {
    pub order: Order,
    /// False when the payment reference matched an existing order and the
    /// call was de-duplicated.
    pub created: bool,
    pub alerts: Vec<StockAlert>,
}

/// Machine-readable result of one sweep run.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct SweepOutcome {
    pub examined: usize,
    pub transitioned: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct OrderService {
    orders: Arc<dyn OrderStore>,
    activity: Arc<dyn ActivityStore>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl OrderService {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        activity: Arc<dyn ActivityStore>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            orders,
            activity,
            clock,
            config,
        }
    }

    /// Validates input and returns the recomputed line-item total.
    fn validate(&self, input: &CreateOrderInput) -> Result<Money> {
        if input.items.is_empty() {
            return Err(Error::InvalidOrderInput("order has no line items".into()));
        }
        if input.payment_reference.trim().is_empty() {
            return Err(Error::InvalidOrderInput("payment reference is empty".into()));
        }
        if let OrderOwner::Guest { email, .. } = &input.owner {
            if !email.contains('@') {
                return Err(Error::InvalidOrderInput(format!(
                    "guest email {email:?} is not an email address"
                )));
            }
        }
        let mut seen = std::collections::HashSet::new();
        for item in &input.items {
            if item.quantity == 0 {
                return Err(Error::InvalidOrderInput(format!(
                    "zero quantity for product {}",
                    item.product_id
                )));
            }
            if !seen.insert(item.product_id) {
                return Err(Error::InvalidOrderInput(format!(
                    "duplicate line item for product {}",
                    item.product_id
                )));
            }
        }
        let currency = input.items[0].unit_price.currency().to_string();
        let mut computed = Money::zero(&currency);
        for item in &input.items {
            computed = computed.add(&item.line_total()).map_err(|_| {
                Error::InvalidOrderInput("line items mix currencies".into())
            })?;
        }
        if !input.claimed_total.within(&computed, Decimal::new(1, 2)) {
            return Err(Error::InvalidOrderInput(format!(
                "claimed total {} does not match line items {}",
                input.claimed_total, computed
            )));
        }
        Ok(computed)
    }

    /// Validate -> de-duplicate on payment reference -> reserve stock for
    /// every line and persist the order at PENDING, all-or-nothing.
    /// Lifecycle advancement is asynchronous; see
    /// [`OrderService::process_order_lifecycle`].
    pub async fn create_order(&self, input: CreateOrderInput) -> Result<CreatedOrder> {
        let total = self.validate(&input)?;
        if let Some(existing) = self
            .orders
            .by_payment_reference(&input.payment_reference)
            .await?
        {
            tracing::info!(
                order_id = %existing.id,
                payment_reference = %input.payment_reference,
                "returning existing order for retried payment reference"
            );
            return Ok(CreatedOrder {
                order: existing,
                created: false,
                alerts: Vec::new(),
            });
        }

        let grand_total = total.add(&input.shipping_fee).map_err(|_| {
            Error::InvalidOrderInput("shipping fee currency differs from line items".into())
        })?;
        let now = self.clock.now();
        let order = Order {
            id: Uuid::now_v7(),
            order_number: format!("ORD-{:08}", rand::random::<u32>()),
            owner: input.owner,
            items: input.items,
            total,
            grand_total,
            status: OrderStatus::Pending,
            payment_reference: input.payment_reference,
            shipping_address: input.shipping_address,
            cancel_reason: None,
            inventory_restored: false,
            created_at: now,
            updated_at: now,
        };
        let alerts = self.orders.insert_reserving_stock(&order).await?;
        tracing::info!(
            order_id = %order.id,
            order_number = %order.order_number,
            items = order.items.len(),
            "order created"
        );

        // Engagement feed rows are best-effort; counters are recomputed from
        // the orders table anyway.
        let actor = match &order.owner {
            OrderOwner::Authenticated { user_id } => Actor::User { user_id: *user_id },
            OrderOwner::Guest { email, .. } => Actor::Session {
                session_id: format!("guest:{email}"),
            },
        };
        for item in &order.items {
            let event = ActivityEvent {
                id: Uuid::now_v7(),
                product_id: item.product_id,
                activity_type: ActivityType::Order,
                actor: actor.clone(),
                created_at: now,
            };
            if let Err(e) = self.activity.append(&event).await {
                tracing::warn!(product_id = %item.product_id, error = %e, "order activity append failed");
            }
        }

        Ok(CreatedOrder {
            order,
            created: true,
            alerts,
        })
    }

    /// Best-effort kickoff of the first transition. Never fails order
    /// creation; the recurring sweep is the authoritative driver.
    pub async fn process_order_lifecycle(&self, order_id: Uuid) -> bool {
        match self
            .orders
            .set_status_if(
                order_id,
                OrderStatus::Pending,
                OrderStatus::Processing,
                self.clock.now(),
            )
            .await
        {
            Ok(true) => true,
            Ok(false) => {
                tracing::debug!(order_id = %order_id, "lifecycle kickoff: order already advanced");
                false
            }
            Err(e) => {
                tracing::warn!(order_id = %order_id, error = %e, "lifecycle kickoff failed");
                false
            }
        }
    }

    async fn sweep(
        &self,
        from: OrderStatus,
        to: OrderStatus,
        dwell: Duration,
    ) -> Result<SweepOutcome> {
        let now = self.clock.now();
        let ids = self.orders.stale_in_status(from, now - dwell).await?;
        let mut outcome = SweepOutcome {
            examined: ids.len(),
            ..Default::default()
        };
        for id in ids {
            // Each transition commits independently; one failing order does
            // not block the batch.
            match self.orders.set_status_if(id, from, to, now).await {
                Ok(true) => outcome.transitioned += 1,
                Ok(false) => outcome.skipped += 1,
                Err(e) => {
                    outcome.failed += 1;
                    tracing::warn!(order_id = %id, error = %e, "sweep transition failed");
                }
            }
        }
        tracing::info!(
            %from,
            %to,
            examined = outcome.examined,
            transitioned = outcome.transitioned,
            skipped = outcome.skipped,
            failed = outcome.failed,
            "order sweep complete"
        );
        Ok(outcome)
    }

    /// PENDING -> PROCESSING for orders past the pending dwell time.
    pub async fn process_pending_orders(&self) -> Result<SweepOutcome> {
        self.sweep(
            OrderStatus::Pending,
            OrderStatus::Processing,
            self.config.pending_dwell,
        )
        .await
    }

    /// PROCESSING -> SHIPPED for orders past the processing dwell time.
    pub async fn ship_processing_orders(&self) -> Result<SweepOutcome> {
        self.sweep(
            OrderStatus::Processing,
            OrderStatus::Shipped,
            self.config.processing_dwell,
        )
        .await
    }

    /// Legal from PENDING or PROCESSING only; restores stock exactly once.
    pub async fn cancel_order(&self, order_id: Uuid, reason: &str) -> Result<CancelApplied> {
        let applied = self
            .orders
            .cancel_restoring_stock(order_id, reason, self.clock.now())
            .await?;
        if applied.newly_cancelled {
            tracing::info!(order_id = %order_id, restored = applied.restored, "order cancelled");
        }
        Ok(applied)
    }

    /// SHIPPED -> FULFILLED. Re-running on a fulfilled order is a no-op.
    pub async fn mark_fulfilled(&self, order_id: Uuid) -> Result<Order> {
        let order = self
            .orders
            .order(order_id)
            .await?
            .ok_or(Error::OrderNotFound(order_id))?;
        if order.status == OrderStatus::Fulfilled {
            return Ok(order);
        }
        ensure_transition(order.status, OrderStatus::Fulfilled)?;
        self.orders
            .set_status_if(
                order_id,
                OrderStatus::Shipped,
                OrderStatus::Fulfilled,
                self.clock.now(),
            )
            .await?;
        let current = self
            .orders
            .order(order_id)
            .await?
            .ok_or(Error::OrderNotFound(order_id))?;
        if current.status == OrderStatus::Fulfilled {
            Ok(current)
        } else {
            Err(Error::InvalidTransition {
                from: current.status,
                to: OrderStatus::Fulfilled,
            })
        }
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<Order> {
        self.orders
            .order(order_id)
            .await?
            .ok_or(Error::OrderNotFound(order_id))
    }

    pub async fn recent_orders(&self, limit: u32) -> Result<Vec<Order>> {
        self.orders.recent_orders(limit).await
    }

    pub async fn status_history(&self, order_id: Uuid) -> Result<Vec<StatusChange>> {
        self.orders.status_history(order_id).await
    }
}
