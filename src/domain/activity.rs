//! Activity feed records consumed by the engagement aggregator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    View,
    CartAdd,
    Order,
}

impl ActivityType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::View => "view",
            Self::CartAdd => "cart_add",
            Self::Order => "order",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "view" => Some(Self::View),
            "cart_add" => Some(Self::CartAdd),
            "order" => Some(Self::Order),
            _ => None,
        }
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who generated the activity: a signed-in user or an anonymous session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Actor {
    User { user_id: Uuid },
    Session { session_id: String },
}

/// Append-only activity record. May be compacted after the aggregation
/// window; durability beyond that is not part of the contract.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub id: Uuid,
    pub product_id: Uuid,
    pub activity_type: ActivityType,
    pub actor: Actor,
    pub created_at: DateTime<Utc>,
}
