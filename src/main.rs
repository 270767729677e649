//! Order engine service binary: HTTP surface plus background schedulers.

use anyhow::Result;
use axum::{extract::{Path, Query, State}, http::StatusCode, routing::{get, post}, Json, Router};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;
use validator::Validate;

use order_engine::domain::activity::{ActivityEvent, ActivityType, Actor};
use order_engine::domain::events::DomainEvent;
use order_engine::domain::inventory::InventoryAdjustment;
use order_engine::domain::order::{Order, OrderItem, OrderOwner, StatusChange};
use order_engine::domain::product::ProductRecord;
use order_engine::domain::value_objects::Money;
use order_engine::service::orders::{CreateOrderInput, SweepOutcome};
use order_engine::service::engagement::RecalcOutcome;
use order_engine::service::scoring::ScoreUpdateOutcome;
use order_engine::service::tracker::{FullUpdateOutcome, UpdateStatusReport};
use order_engine::service::{
    Clock, EngagementAggregator, InventoryService, OrderService, ScoringEngine, SystemClock,
    UpdateCoordinator, UpdateTracker,
};
use order_engine::store::PgStore;
use order_engine::{EngineConfig, Error};

#[derive(Clone)]
struct AppState {
    orders: Arc<OrderService>,
    inventory: Arc<InventoryService>,
    engagement: Arc<EngagementAggregator>,
    scoring: Arc<ScoringEngine>,
    updates: Arc<UpdateCoordinator>,
    nats: Option<async_nats::Client>,
    config: EngineConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())).with(tracing_subscriber::fmt::layer()).init();
    let config = EngineConfig::from_env();
    let db = PgPoolOptions::new().max_connections(10).connect(&std::env::var("DATABASE_URL")?).await?;
    sqlx::migrate!("./migrations").run(&db).await?;
    let nats = std::env::var("NATS_URL").ok().and_then(|url| futures::executor::block_on(async_nats::connect(&url)).ok());

    let store = Arc::new(PgStore::new(db));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let orders = Arc::new(OrderService::new(store.clone(), store.clone(), clock.clone(), config.clone()));
    let inventory = Arc::new(InventoryService::new(store.clone(), clock.clone()));
    let engagement = Arc::new(EngagementAggregator::new(store.clone(), store.clone(), store.clone(), clock.clone(), config.metrics_chunk_size));
    let scoring = Arc::new(ScoringEngine::new(store.clone(), store.clone(), clock.clone()));
    let tracker = Arc::new(UpdateTracker::new(clock.clone()));
    let updates = Arc::new(UpdateCoordinator::new(tracker, engagement.clone(), scoring.clone(), clock));
    let state = AppState { orders, inventory, engagement, scoring, updates, nats, config: config.clone() };

    spawn_schedulers(state.clone(), &config);

    let app = Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "order-engine"})) }))
        .route("/api/v1/checkout", post(checkout))
        .route("/api/v1/orders", get(list_orders))
        .route("/api/v1/orders/:id", get(get_order))
        .route("/api/v1/orders/:id/history", get(order_history))
        .route("/api/v1/orders/:id/cancel", post(cancel_order))
        .route("/api/v1/orders/:id/fulfill", post(fulfill_order))
        .route("/api/v1/activity", post(record_activity))
        .route("/api/v1/products/:id/similar", get(similar_products))
        .route("/api/v1/admin/inventory/adjust", post(adjust_inventory))
        .route("/api/v1/admin/inventory/low-stock", get(low_stock))
        .route("/api/v1/admin/inventory/out-of-stock", get(out_of_stock))
        .route("/api/v1/admin/inventory/:id/adjustments", get(adjustment_trail))
        .route("/api/v1/admin/update-status", get(update_status))
        .route("/api/v1/admin/scores/refresh", post(refresh_scores))
        .route("/api/v1/cron/orders/process-pending", post(process_pending))
        .route("/api/v1/cron/orders/ship", post(ship_processing))
        .route("/api/v1/cron/metrics/recalculate", post(recalculate_metrics))
        .route("/api/v1/cron/scores/update", post(update_scores))
        .route("/api/v1/cron/full-update", post(full_update))
        .layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive()).with_state(state);

    let port = std::env::var("PORT").unwrap_or_else(|_| "8084".to_string());
    tracing::info!("order-engine listening on 0.0.0.0:{}", port);
    axum::serve(tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?, app).await?;
    Ok(())
}

fn spawn_schedulers(state: AppState, config: &EngineConfig) {
    let orders = state.orders.clone();
    let sweep_secs = config.sweep_interval_secs.max(1);
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(std::time::Duration::from_secs(sweep_secs));
        loop {
            tick.tick().await;
            if let Err(e) = orders.process_pending_orders().await {
                tracing::error!(error = %e, "pending sweep failed");
            }
            if let Err(e) = orders.ship_processing_orders().await {
                tracing::error!(error = %e, "shipping sweep failed");
            }
        }
    });

    let updates = state.updates.clone();
    let update_secs = config.full_update_interval_secs.max(1);
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(std::time::Duration::from_secs(update_secs));
        loop {
            tick.tick().await;
            match updates.force_full_update().await {
                Ok(outcome) => tracing::debug!(scores = outcome.scores.updated, "scheduled full update done"),
                Err(Error::UpdateAlreadyInProgress) => tracing::debug!("full update already running"),
                Err(e) => tracing::error!(error = %e, "scheduled full update failed"),
            }
        }
    });
}

fn err(e: Error) -> (StatusCode, String) {
    let status = match &e {
        Error::InvalidOrderInput(_) | Error::InvalidAdjustment { .. } | Error::EmptyProductSelection => StatusCode::BAD_REQUEST,
        Error::ProductNotFound(_) | Error::OrderNotFound(_) => StatusCode::NOT_FOUND,
        Error::InsufficientInventory { .. } | Error::InvalidTransition { .. } | Error::UpdateAlreadyInProgress => StatusCode::CONFLICT,
        Error::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

fn publish(nats: &Option<async_nats::Client>, event: DomainEvent) {
    let Some(client) = nats.clone() else { return };
    tokio::spawn(async move {
        let subject = event.subject().to_string();
        let payload = match serde_json::to_vec(&event) {
            Ok(p) => p,
            Err(_) => return,
        };
        if let Err(e) = client.publish(subject, payload.into()).await {
            tracing::warn!(error = %e, "event publish failed");
        }
    });
}

#[derive(Debug, Deserialize)] struct ListParams { limit: Option<u32> }

#[derive(Debug, Deserialize)]
struct CheckoutItem { product_id: Uuid, quantity: u32, unit_price: Decimal }

#[derive(Debug, Deserialize, Validate)]
struct CheckoutRequest {
    user_id: Option<Uuid>,
    #[validate(email)]
    guest_email: Option<String>,
    guest_name: Option<String>,
    items: Vec<CheckoutItem>,
    total: Decimal,
    #[serde(default)]
    shipping_fee: Decimal,
    #[serde(default = "default_currency")]
    currency: String,
    #[validate(length(min = 1))]
    payment_reference: String,
    shipping_address: Option<serde_json::Value>,
}

fn default_currency() -> String { "USD".to_string() }

impl CheckoutRequest {
    fn owner(&self) -> std::result::Result<OrderOwner, Error> {
        match (self.user_id, &self.guest_email) {
            (Some(user_id), None) if self.guest_name.is_none() => Ok(OrderOwner::Authenticated { user_id }),
            (None, Some(email)) => Ok(OrderOwner::Guest { email: email.clone(), name: self.guest_name.clone().unwrap_or_default() }),
            (Some(_), None) => Err(Error::InvalidOrderInput("guest_name supplied alongside user_id".into())),
            (Some(_), Some(_)) => Err(Error::InvalidOrderInput("both user_id and guest identity supplied".into())),
            (None, None) => Err(Error::InvalidOrderInput("neither user_id nor guest identity supplied".into())),
        }
    }
}

async fn checkout(State(s): State<AppState>, Json(r): Json<CheckoutRequest>) -> std::result::Result<(StatusCode, Json<Order>), (StatusCode, String)> {
    r.validate().map_err(|e| err(Error::InvalidOrderInput(e.to_string())))?;
    let owner = r.owner().map_err(err)?;
    let items: Vec<OrderItem> = r.items.iter()
        .map(|i| OrderItem { product_id: i.product_id, quantity: i.quantity, unit_price: Money::new(i.unit_price, &r.currency) })
        .collect();
    let created = s.orders.create_order(CreateOrderInput {
        owner,
        items,
        claimed_total: Money::new(r.total, &r.currency),
        shipping_fee: Money::new(r.shipping_fee, &r.currency),
        payment_reference: r.payment_reference,
        shipping_address: r.shipping_address,
    }).await.map_err(err)?;

    if !created.created {
        return Ok((StatusCode::OK, Json(created.order)));
    }
    publish(&s.nats, DomainEvent::OrderCreated {
        order_id: created.order.id,
        order_number: created.order.order_number.clone(),
        grand_total: created.order.grand_total.amount(),
        currency: created.order.grand_total.currency().to_string(),
        at: created.order.created_at,
    });
    for alert in created.alerts {
        publish(&s.nats, DomainEvent::Stock(alert));
    }
    // Kickoff off the request path; the sweep remains the authoritative driver.
    let orders = s.orders.clone();
    let id = created.order.id;
    tokio::spawn(async move { orders.process_order_lifecycle(id).await; });
    Ok((StatusCode::CREATED, Json(created.order)))
}

async fn list_orders(State(s): State<AppState>, Query(p): Query<ListParams>) -> std::result::Result<Json<Vec<Order>>, (StatusCode, String)> {
    let limit = p.limit.unwrap_or(s.config.default_list_limit).min(100);
    s.orders.recent_orders(limit).await.map(Json).map_err(err)
}

async fn get_order(State(s): State<AppState>, Path(id): Path<Uuid>) -> std::result::Result<Json<Order>, (StatusCode, String)> {
    s.orders.get_order(id).await.map(Json).map_err(err)
}

async fn order_history(State(s): State<AppState>, Path(id): Path<Uuid>) -> std::result::Result<Json<Vec<StatusChange>>, (StatusCode, String)> {
    s.orders.get_order(id).await.map_err(err)?;
    s.orders.status_history(id).await.map(Json).map_err(err)
}

#[derive(Debug, Deserialize)] struct CancelRequest { reason: Option<String> }
#[derive(Debug, Serialize)] struct CancelResponse { order: Order, newly_cancelled: bool, restored: bool }

async fn cancel_order(State(s): State<AppState>, Path(id): Path<Uuid>, Json(r): Json<CancelRequest>) -> std::result::Result<Json<CancelResponse>, (StatusCode, String)> {
    let reason = r.reason.unwrap_or_else(|| "cancelled by caller".to_string());
    let applied = s.orders.cancel_order(id, &reason).await.map_err(err)?;
    if applied.newly_cancelled {
        publish(&s.nats, DomainEvent::OrderCancelled { order_id: id, reason: applied.order.cancel_reason.clone(), at: applied.order.updated_at });
    }
    Ok(Json(CancelResponse { newly_cancelled: applied.newly_cancelled, restored: applied.restored, order: applied.order }))
}

async fn fulfill_order(State(s): State<AppState>, Path(id): Path<Uuid>) -> std::result::Result<Json<Order>, (StatusCode, String)> {
    let before = s.orders.get_order(id).await.map_err(err)?;
    let order = s.orders.mark_fulfilled(id).await.map_err(err)?;
    if before.status != order.status {
        publish(&s.nats, DomainEvent::OrderStatusChanged { order_id: id, from: before.status, to: order.status, at: order.updated_at });
    }
    Ok(Json(order))
}

#[derive(Debug, Deserialize)]
struct ActivityRequest {
    product_id: Uuid,
    activity_type: String,
    user_id: Option<Uuid>,
    session_id: Option<String>,
}

async fn record_activity(State(s): State<AppState>, Json(r): Json<ActivityRequest>) -> std::result::Result<(StatusCode, Json<ActivityEvent>), (StatusCode, String)> {
    let activity_type = ActivityType::parse(&r.activity_type)
        .ok_or_else(|| err(Error::InvalidOrderInput(format!("unknown activity type {:?}", r.activity_type))))?;
    let actor = match (r.user_id, r.session_id) {
        (Some(user_id), None) => Actor::User { user_id },
        (None, Some(session_id)) => Actor::Session { session_id },
        _ => return Err(err(Error::InvalidOrderInput("exactly one of user_id and session_id is required".into()))),
    };
    let event = s.engagement.record(r.product_id, activity_type, actor).await.map_err(err)?;
    Ok((StatusCode::CREATED, Json(event)))
}

async fn similar_products(State(s): State<AppState>, Path(id): Path<Uuid>, Query(p): Query<ListParams>) -> std::result::Result<Json<Vec<ProductRecord>>, (StatusCode, String)> {
    let limit = p.limit.unwrap_or(s.config.default_list_limit).min(100);
    s.scoring.get_similar_products(id, limit).await.map(Json).map_err(err)
}

#[derive(Debug, Deserialize)]
struct AdjustRequest { product_id: Uuid, delta: i32, created_by: String }
#[derive(Debug, Serialize)]
struct AdjustResponse { adjustment: InventoryAdjustment, level_before: i32, level_after: i32 }

async fn adjust_inventory(State(s): State<AppState>, Json(r): Json<AdjustRequest>) -> std::result::Result<Json<AdjustResponse>, (StatusCode, String)> {
    let applied = s.inventory.adjust(r.product_id, r.delta, &r.created_by).await.map_err(err)?;
    if let Some(alert) = applied.alert {
        publish(&s.nats, DomainEvent::Stock(alert));
    }
    Ok(Json(AdjustResponse { adjustment: applied.adjustment, level_before: applied.level_before, level_after: applied.level_after }))
}

async fn low_stock(State(s): State<AppState>, Query(p): Query<ListParams>) -> std::result::Result<Json<Vec<ProductRecord>>, (StatusCode, String)> {
    let limit = p.limit.unwrap_or(s.config.default_list_limit).min(100);
    s.inventory.low_stock(limit).await.map(Json).map_err(err)
}

async fn out_of_stock(State(s): State<AppState>, Query(p): Query<ListParams>) -> std::result::Result<Json<Vec<ProductRecord>>, (StatusCode, String)> {
    let limit = p.limit.unwrap_or(s.config.default_list_limit).min(100);
    s.inventory.out_of_stock(limit).await.map(Json).map_err(err)
}

async fn adjustment_trail(State(s): State<AppState>, Path(id): Path<Uuid>, Query(p): Query<ListParams>) -> std::result::Result<Json<Vec<InventoryAdjustment>>, (StatusCode, String)> {
    let limit = p.limit.unwrap_or(s.config.default_list_limit).min(100);
    s.inventory.adjustments(id, limit).await.map(Json).map_err(err)
}

async fn update_status(State(s): State<AppState>) -> Json<UpdateStatusReport> {
    Json(s.updates.status())
}

#[derive(Debug, Deserialize)] struct RefreshRequest { product_ids: Vec<Uuid> }

async fn refresh_scores(State(s): State<AppState>, Json(r): Json<RefreshRequest>) -> std::result::Result<Json<ScoreUpdateOutcome>, (StatusCode, String)> {
    s.updates.trigger_manual_update(&r.product_ids).await.map(Json).map_err(err)
}

async fn process_pending(State(s): State<AppState>) -> std::result::Result<Json<SweepOutcome>, (StatusCode, String)> {
    s.orders.process_pending_orders().await.map(Json).map_err(err)
}

async fn ship_processing(State(s): State<AppState>) -> std::result::Result<Json<SweepOutcome>, (StatusCode, String)> {
    s.orders.ship_processing_orders().await.map(Json).map_err(err)
}

async fn recalculate_metrics(State(s): State<AppState>) -> std::result::Result<Json<RecalcOutcome>, (StatusCode, String)> {
    s.engagement.recalculate_all_product_metrics().await.map(Json).map_err(err)
}

async fn update_scores(State(s): State<AppState>) -> std::result::Result<Json<ScoreUpdateOutcome>, (StatusCode, String)> {
    s.scoring.update_all_product_scores().await.map(Json).map_err(err)
}

async fn full_update(State(s): State<AppState>) -> std::result::Result<Json<FullUpdateOutcome>, (StatusCode, String)> {
    s.updates.force_full_update().await.map(Json).map_err(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(user_id: Option<Uuid>, guest_email: Option<&str>, guest_name: Option<&str>) -> CheckoutRequest {
        CheckoutRequest {
            user_id,
            guest_email: guest_email.map(String::from),
            guest_name: guest_name.map(String::from),
            items: vec![],
            total: Decimal::ZERO,
            shipping_fee: Decimal::ZERO,
            currency: default_currency(),
            payment_reference: "pay-1".into(),
            shipping_address: None,
        }
    }

    #[test]
    fn test_owner_requires_exactly_one_identity() {
        let user = Uuid::now_v7();
        assert!(matches!(
            request(Some(user), None, None).owner().unwrap(),
            OrderOwner::Authenticated { user_id } if user_id == user
        ));
        assert!(matches!(
            request(None, Some("a@b.com"), Some("A")).owner().unwrap(),
            OrderOwner::Guest { .. }
        ));
        // Both identities, partial guest identity alongside a user id, or
        // neither: all rejected before the engine sees the order.
        for bad in [
            request(Some(user), Some("a@b.com"), None),
            request(Some(user), None, Some("A")),
            request(None, None, None),
        ] {
            assert!(matches!(bad.owner().unwrap_err(), Error::InvalidOrderInput(_)));
        }
    }
}
