use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct License {
    pub id: String,
    pub license_key: String,
    pub organization_id: String,
    /// How many domains may hold an activation slot at once
    pub max_domains: i32,
    /// Lifetime count of activations (not decremented on deactivate)
    pub activation_count: i32,
    pub active: bool,
    pub expires_at: i64,
    pub deleted_at: Option<i64>,
    pub subscription_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl License {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at < now
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Live license: active flag set, not soft-deleted, not expired.
    pub fn is_valid(&self, now: i64) -> bool {
        self.active && !self.is_deleted() && !self.is_expired(now)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainActivation {
    pub id: String,
    pub license_id: String,
    /// Normalized hostname (no scheme, no www., no trailing slash, lowercase)
    pub domain: String,
    pub activated_at: i64,
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum LicenseActivityType {
    Activate,
    Deactivate,
    AutoDeactivate,
}

/// Append-only audit log row. Never mutated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LicenseActivity {
    pub id: String,
    pub license_id: String,
    pub action_type: LicenseActivityType,
    pub domain: Option<String>,
    pub ip_address: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub occurred_at: i64,
}

#[derive(Debug, Clone)]
pub struct NewLicenseActivity {
    pub license_id: String,
    pub action_type: LicenseActivityType,
    pub domain: Option<String>,
    pub ip_address: Option<String>,
    pub metadata: Option<serde_json::Value>,
}
