//! End-to-end lifecycle scenarios over the in-memory backend: checkout,
//! sweep advancement, cancellation, metric recompute, and scoring, wired
//! the same way the service binary wires them.

use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use order_engine::config::EngineConfig;
use order_engine::domain::order::{OrderItem, OrderOwner, OrderStatus};
use order_engine::domain::product::{ProductRecord, ProductStatus};
use order_engine::domain::value_objects::Money;
use order_engine::error::Error;
use order_engine::service::orders::{CreateOrderInput, OrderService};
use order_engine::service::{
    Clock, EngagementAggregator, InventoryService, ManualClock, ScoringEngine, UpdateCoordinator,
    UpdateTracker,
};
use order_engine::store::{CatalogStore, MemoryStore, OrderStore};

struct Engine {
    store: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
    orders: OrderService,
    inventory: InventoryService,
    scoring: Arc<ScoringEngine>,
    coordinator: UpdateCoordinator,
}

fn engine() -> Engine {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let dyn_clock: Arc<dyn Clock> = clock.clone();
    let orders = OrderService::new(
        store.clone(),
        store.clone(),
        dyn_clock.clone(),
        EngineConfig::default(),
    );
    let inventory = InventoryService::new(store.clone(), dyn_clock.clone());
    let engagement = Arc::new(EngagementAggregator::new(
        store.clone(),
        store.clone(),
        store.clone(),
        dyn_clock.clone(),
        100,
    ));
    let scoring = Arc::new(ScoringEngine::new(
        store.clone(),
        store.clone(),
        dyn_clock.clone(),
    ));
    let tracker = Arc::new(UpdateTracker::new(dyn_clock.clone()));
    let coordinator = UpdateCoordinator::new(tracker, engagement, scoring.clone(), dyn_clock);
    Engine {
        store,
        clock,
        orders,
        inventory,
        scoring,
        coordinator,
    }
}

async fn seed_product(store: &MemoryStore, inventory: i32, threshold: i32) -> Uuid {
    let id = Uuid::now_v7();
    let now = Utc::now();
    store
        .insert_product(&ProductRecord {
            id,
            name: "Widget".into(),
            category_id: None,
            status: ProductStatus::Published,
            inventory,
            low_stock_threshold: threshold,
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

fn guest_input(product_id: Uuid, quantity: u32, payment_reference: &str) -> CreateOrderInput {
    CreateOrderInput {
        owner: OrderOwner::Guest {
            email: "a@b.com".into(),
            name: "Guest A".into(),
        },
        items: vec![OrderItem {
            product_id,
            quantity,
            unit_price: usd(1999),
        }],
        claimed_total: usd(1999 * quantity as i64),
        shipping_fee: usd(500),
        payment_reference: payment_reference.into(),
        shipping_address: Some(serde_json::json!({"city": "Kathmandu"})),
    }
}

#[tokio::test]
async fn exhausting_stock_surfaces_in_listings_and_blocks_the_next_order() {
    let e = engine();
    let p = seed_product(&e.store, 5, 3).await;

    let created = e.orders.create_order(guest_input(p, 5, "pay-1")).await.unwrap();
    assert_eq!(created.order.status, OrderStatus::Pending);
    assert_eq!(
        created.order.grand_total.amount(),
        Decimal::new(1999 * 5 + 500, 2)
    );
    assert_eq!(e.store.product(p).await.unwrap().unwrap().inventory, 0);

    let out = e.inventory.out_of_stock(10).await.unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].id, p);
    assert!(e.inventory.low_stock(10).await.unwrap().is_empty());

    let err = e.orders.create_order(guest_input(p, 1, "pay-2")).await.unwrap_err();
    match err {
        Error::InsufficientInventory {
            product_id,
            requested,
            available,
        } => {
            assert_eq!(product_id, p);
            assert_eq!(requested, 1);
            assert_eq!(available, 0);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn order_advances_through_sweeps_and_rejects_late_cancellation() {
    let e = engine();
    let p = seed_product(&e.store, 10, 2).await;
    let order = e.orders.create_order(guest_input(p, 2, "pay-1")).await.unwrap().order;

    e.clock.advance(Duration::minutes(20));
    assert_eq!(e.orders.process_pending_orders().await.unwrap().transitioned, 1);
    assert_eq!(
        e.orders.get_order(order.id).await.unwrap().status,
        OrderStatus::Processing
    );

    e.clock.advance(Duration::minutes(70));
    assert_eq!(e.orders.ship_processing_orders().await.unwrap().transitioned, 1);
    assert_eq!(
        e.orders.get_order(order.id).await.unwrap().status,
        OrderStatus::Shipped
    );

    let err = e.orders.cancel_order(order.id, "too late").await.unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidTransition {
            from: OrderStatus::Shipped,
            to: OrderStatus::Cancelled
        }
    ));
    // Stock stays reserved.
    assert_eq!(e.store.product(p).await.unwrap().unwrap().inventory, 8);

    let fulfilled = e.orders.mark_fulfilled(order.id).await.unwrap();
    assert_eq!(fulfilled.status, OrderStatus::Fulfilled);

    // The recorded history never skips a state.
    let history = e.orders.status_history(order.id).await.unwrap();
    let steps: Vec<_> = history.iter().map(|c| (c.from, c.to)).collect();
    assert_eq!(
        steps,
        vec![
            (OrderStatus::Pending, OrderStatus::Processing),
            (OrderStatus::Processing, OrderStatus::Shipped),
            (OrderStatus::Shipped, OrderStatus::Fulfilled),
        ]
    );
}

#[tokio::test]
async fn guest_and_authenticated_identities_are_exclusive_by_construction() {
    let e = engine();
    let p = seed_product(&e.store, 10, 2).await;

    let guest = e.orders.create_order(guest_input(p, 1, "pay-1")).await.unwrap().order;
    assert!(matches!(guest.owner, OrderOwner::Guest { .. }));

    let mut authed = guest_input(p, 1, "pay-2");
    authed.owner = OrderOwner::Authenticated {
        user_id: Uuid::now_v7(),
    };
    let order = e.orders.create_order(authed).await.unwrap().order;
    assert!(matches!(order.owner, OrderOwner::Authenticated { .. }));
}

#[tokio::test]
async fn retried_checkout_and_overlapping_cancellation_stay_idempotent() {
    let e = engine();
    let p = seed_product(&e.store, 10, 2).await;

    let first = e.orders.create_order(guest_input(p, 4, "pay-1")).await.unwrap();
    let retry = e.orders.create_order(guest_input(p, 4, "pay-1")).await.unwrap();
    assert_eq!(first.order.id, retry.order.id);
    assert!(!retry.created);
    assert_eq!(e.store.product(p).await.unwrap().unwrap().inventory, 6);

    let cancel = e.orders.cancel_order(first.order.id, "first").await.unwrap();
    assert!(cancel.restored);
    let cancel_retry = e.orders.cancel_order(first.order.id, "second").await.unwrap();
    assert!(!cancel_retry.restored);
    assert_eq!(e.store.product(p).await.unwrap().unwrap().inventory, 10);
}

#[tokio::test]
async fn full_update_recomputes_counters_and_scores_from_source() {
    let e = engine();
    let q = seed_product(&e.store, 100, 2).await;
    let other = seed_product(&e.store, 100, 2).await;

    for (qty, pay) in [(2u32, "pay-1"), (4, "pay-2"), (1, "pay-3")] {
        e.orders.create_order(guest_input(q, qty, pay)).await.unwrap();
    }
    let cancelled = e.orders.create_order(guest_input(q, 9, "pay-4")).await.unwrap().order;
    e.orders.cancel_order(cancelled.id, "test").await.unwrap();

    let outcome = e.coordinator.force_full_update().await.unwrap();
    assert_eq!(outcome.metrics.updated, 2);
    assert_eq!(outcome.scores.updated, 2);

    let product = e.store.product(q).await.unwrap().unwrap();
    assert_eq!(product.counters.order_count, 3);
    assert_eq!(product.counters.purchase_count, 7);
    assert!(product.popularity_score > 0.0);

    let untouched = e.store.product(other).await.unwrap().unwrap();
    assert_eq!(untouched.counters.order_count, 0);
    assert_eq!(untouched.popularity_score, 0.0);

    // The ordered product now outranks the untouched one in similarity
    // listings driven by the score, and the status tracker reflects the run.
    let status = e.coordinator.status();
    assert!(status.last_full_update_at.is_some());
    assert!(!status.in_progress);

    // Re-running is idempotent: same counters, same score.
    let score_before = product.popularity_score;
    e.coordinator.force_full_update().await.unwrap();
    let product = e.store.product(q).await.unwrap().unwrap();
    assert_eq!(product.counters.purchase_count, 7);
    assert_eq!(product.popularity_score, score_before);

    let similar = e.scoring.get_similar_products(q, 5).await.unwrap();
    assert_eq!(similar.len(), 1);
    assert_eq!(similar[0].id, other);
}

#[tokio::test]
async fn overlapping_sweeps_converge_without_double_transitions() {
    let e = engine();
    let p = seed_product(&e.store, 50, 2).await;
    for i in 0..5 {
        e.orders
            .create_order(guest_input(p, 1, &format!("pay-{i}")))
            .await
            .unwrap();
    }
    e.clock.advance(Duration::minutes(20));

    // Same sweep twice back-to-back: the second finds nothing left.
    let first = e.orders.process_pending_orders().await.unwrap();
    let second = e.orders.process_pending_orders().await.unwrap();
    assert_eq!(first.transitioned, 5);
    assert_eq!(second.examined, 0);
    assert_eq!(second.transitioned, 0);

    // Direct CAS on an already-advanced order is a skip, not an error.
    let ids = e
        .store
        .stale_in_status(OrderStatus::Processing, e.clock.now())
        .await
        .unwrap();
    assert_eq!(ids.len(), 5);
    let raced = e
        .store
        .set_status_if(
            ids[0],
            OrderStatus::Pending,
            OrderStatus::Processing,
            e.clock.now(),
        )
        .await
        .unwrap();
    assert!(!raced);
}
