use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Paused,
    Canceled,
    Trialing,
}

/// Mirror of the billing provider's subscription object.
/// Drives `License.expires_at` and `License.active` via the sync routine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub organization_id: String,
    pub status: SubscriptionStatus,
    pub active: bool,
    pub period_ends_at: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone)]
pub struct UpsertSubscription {
    pub id: String,
    pub organization_id: String,
    pub status: SubscriptionStatus,
    pub active: bool,
    pub period_ends_at: i64,
}
