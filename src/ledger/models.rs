use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

pub type IdentityId = Uuid;
pub type PlanId = Uuid;

/// Role carried by an identity and by its tokens.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize, ToSchema)]
pub enum Role {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "wifi_provider")]
    Provider,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Provider => "wifi_provider",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "user" => Some(Self::User),
            "wifi_provider" | "isp" => Some(Self::Provider),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Identity {
    pub id: IdentityId,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub wallet_address: Option<String>,
    pub is_active: bool,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct NewIdentity {
    pub username: String,
    pub email: String,
    pub role: Role,
    pub wallet_address: Option<String>,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PendingRegistration {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub wallet_address: Option<String>,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct NewPendingRegistration {
    pub username: String,
    pub email: String,
    pub role: Role,
    pub wallet_address: Option<String>,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
pub struct Plan {
    pub id: Uuid,
    pub provider_id: Uuid,
    pub name: String,
    /// Data units (MB) granted by the plan.
    pub capacity: f64,
    pub price: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, ToSchema)]
pub struct PlanDraft {
    pub name: String,
    pub capacity: f64,
    pub price: f64,
}

/// A purchase snapshots capacity and price so later plan edits do not move
/// the cap of a running window.
#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
pub struct PlanPurchase {
    pub id: Uuid,
    pub identity_id: Uuid,
    pub plan_id: Uuid,
    pub capacity: f64,
    pub price: f64,
    pub purchased_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct NewPurchase {
    pub identity_id: IdentityId,
    pub plan_id: PlanId,
    pub capacity: f64,
    pub price: f64,
    pub purchased_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
pub struct UsageRecord {
    pub id: Uuid,
    pub identity_id: Uuid,
    pub amount: f64,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NewUsageRecord {
    pub identity_id: IdentityId,
    pub amount: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Usage of all identities summed per second.
#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
pub struct UsagePoint {
    pub timestamp: DateTime<Utc>,
    pub total: f64,
}
