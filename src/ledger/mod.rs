//! Durable state behind the auth protocol and the quota meter.
//!
//! The engine only needs the query shapes below; `PgLedger` backs them with
//! PostgreSQL and `MemoryLedger` keeps everything in process for development
//! runs without a DSN.

mod memory;
mod models;
mod postgres;

pub use memory::MemoryLedger;
pub use models::{
    Identity, IdentityId, NewIdentity, NewPendingRegistration, NewPurchase, NewUsageRecord,
    PendingRegistration, Plan, PlanDraft, PlanId, PlanPurchase, Role, UsagePoint, UsageRecord,
};
pub use postgres::PgLedger;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// A unique column (username, email, wallet address) already holds the value.
    #[error("duplicate {0}")]
    Duplicate(&'static str),
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Connectivity check used at startup.
    async fn ping(&self) -> Result<(), LedgerError>;

    async fn find_identity(&self, id: IdentityId) -> Result<Option<Identity>, LedgerError>;
    async fn find_identity_by_username(
        &self,
        username: &str,
    ) -> Result<Option<Identity>, LedgerError>;
    async fn find_identity_by_email(&self, email: &str) -> Result<Option<Identity>, LedgerError>;
    async fn find_identity_by_wallet(&self, wallet: &str)
        -> Result<Option<Identity>, LedgerError>;

    async fn find_pending(&self, id: Uuid) -> Result<Option<PendingRegistration>, LedgerError>;
    async fn find_pending_by_username(
        &self,
        username: &str,
    ) -> Result<Option<PendingRegistration>, LedgerError>;
    async fn find_pending_by_email(
        &self,
        email: &str,
    ) -> Result<Option<PendingRegistration>, LedgerError>;
    async fn find_pending_by_wallet(
        &self,
        wallet: &str,
    ) -> Result<Option<PendingRegistration>, LedgerError>;
    async fn list_pending(&self) -> Result<Vec<PendingRegistration>, LedgerError>;

    async fn create_identity(&self, identity: NewIdentity) -> Result<Identity, LedgerError>;
    async fn create_pending(
        &self,
        pending: NewPendingRegistration,
    ) -> Result<PendingRegistration, LedgerError>;
    /// Turn a pending registration into an identity with the same id.
    /// Returns `None` when the pending record does not exist.
    async fn promote_pending(
        &self,
        id: Uuid,
        approved_at: DateTime<Utc>,
    ) -> Result<Option<Identity>, LedgerError>;
    async fn reject_pending(&self, id: Uuid) -> Result<bool, LedgerError>;
    /// Set the wallet of an identity that has none yet. Returns `false` when
    /// nothing was written (unknown identity or a wallet already set);
    /// `Duplicate` when another identity or a pending record holds `wallet`.
    async fn set_wallet(&self, id: IdentityId, wallet: &str) -> Result<bool, LedgerError>;

    async fn create_plan(
        &self,
        provider_id: IdentityId,
        draft: PlanDraft,
        created_at: DateTime<Utc>,
    ) -> Result<Plan, LedgerError>;
    async fn update_plan(&self, id: PlanId, draft: PlanDraft)
        -> Result<Option<Plan>, LedgerError>;
    async fn delete_plan(&self, id: PlanId) -> Result<bool, LedgerError>;
    async fn find_plan(&self, id: PlanId) -> Result<Option<Plan>, LedgerError>;
    async fn list_plans(&self) -> Result<Vec<Plan>, LedgerError>;

    async fn create_purchase(&self, purchase: NewPurchase) -> Result<PlanPurchase, LedgerError>;
    /// The purchase with the latest timestamp for the identity.
    async fn latest_purchase(
        &self,
        identity_id: IdentityId,
    ) -> Result<Option<PlanPurchase>, LedgerError>;
    async fn list_purchases(
        &self,
        identity_id: IdentityId,
    ) -> Result<Vec<PlanPurchase>, LedgerError>;

    /// Sum of usage amounts recorded at or after `since`.
    async fn sum_usage_since(
        &self,
        identity_id: IdentityId,
        since: DateTime<Utc>,
    ) -> Result<f64, LedgerError>;
    async fn append_usage(&self, record: NewUsageRecord) -> Result<UsageRecord, LedgerError>;
    /// Append every record or none of them.
    async fn append_usage_batch(&self, records: &[NewUsageRecord]) -> Result<(), LedgerError>;
    async fn usage_history(&self, identity_id: IdentityId)
        -> Result<Vec<UsageRecord>, LedgerError>;
    async fn usage_timeline(&self) -> Result<Vec<UsagePoint>, LedgerError>;
}
