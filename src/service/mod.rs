//! Orchestration services over the store seam.

use std::sync::Mutex;

use chrono::{DateTime, Utc};

pub mod engagement;
pub mod inventory;
pub mod orders;
pub mod scoring;
pub mod tracker;

pub use engagement::EngagementAggregator;
pub use inventory::InventoryService;
pub use orders::OrderService;
pub use scoring::ScoringEngine;
pub use tracker::{UpdateCoordinator, UpdateTracker};

/// Injected time source. Production uses `SystemClock`; tests use
/// `ManualClock` instead of sleeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Test clock with an explicitly advanced current time.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().expect("Mutex poisoned");
        *now = *now + by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().expect("Mutex poisoned") = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("Mutex poisoned")
    }
}
