//! Data metering: session enrollment, plan purchase, usage logging and reports.
//!
//! Foreground requests and the background `QuotaMeter` share the same window
//! loading and the same `quota::decide` rule. There is no transaction across
//! the two paths; concurrent writes for one identity may overshoot the cap by
//! at most one draw.

pub mod meter;
pub mod quota;
pub mod sessions;

pub use meter::{CycleReport, MeterConfig, QuotaMeter};
pub use quota::{decide, load_window, QuotaDecision, QuotaWindow};
pub use sessions::ActiveSessions;

use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::{
    auth::Principal,
    clock::Clock,
    error::{Error, Result},
    ledger::{IdentityId, Ledger, NewPurchase, NewUsageRecord, PlanId, PlanPurchase, Role, UsagePoint, UsageRecord},
    registration::require_provider,
};

pub(crate) fn require_user(principal: &Principal) -> Result<()> {
    if principal.role == Role::User {
        Ok(())
    } else {
        Err(Error::Forbidden)
    }
}

fn validate_amount(amount: f64) -> Result<()> {
    if amount.is_finite() && amount > 0.0 {
        Ok(())
    } else {
        Err(Error::InvalidInput("usage amount must be positive".to_string()))
    }
}

pub struct Metering {
    ledger: Arc<dyn Ledger>,
    sessions: Arc<ActiveSessions>,
    clock: Arc<dyn Clock>,
}

impl Metering {
    #[must_use]
    pub fn new(ledger: Arc<dyn Ledger>, sessions: Arc<ActiveSessions>, clock: Arc<dyn Clock>) -> Self {
        Self {
            ledger,
            sessions,
            clock,
        }
    }

    #[must_use]
    pub fn sessions(&self) -> &ActiveSessions {
        &self.sessions
    }

    /// Enroll an identity for the background meter. Idempotent.
    pub async fn start_metering(&self, identity: IdentityId) {
        if self.sessions.insert(identity).await {
            debug!(identity_id = %identity, "metering started");
        }
    }

    /// Remove an identity from the background meter. Idempotent.
    pub async fn stop_metering(&self, identity: IdentityId) {
        if self.sessions.remove(identity).await {
            debug!(identity_id = %identity, "metering stopped");
        }
    }

    /// Record `amount` against the latest purchase of `identity`.
    ///
    /// # Errors
    /// `InvalidInput`, `NoActivePlan`, `QuotaExceeded` or `Storage`.
    #[instrument(skip(self))]
    pub async fn log_usage(&self, identity: IdentityId, amount: f64) -> Result<UsageRecord> {
        validate_amount(amount)?;
        let window = load_window(self.ledger.as_ref(), identity)
            .await?
            .ok_or(Error::NoActivePlan)?;
        decide(&window, amount).into_result()?;

        let record = self
            .ledger
            .append_usage(NewUsageRecord {
                identity_id: identity,
                amount,
                recorded_at: self.clock.now(),
            })
            .await?;
        debug!(used = window.used + amount, capacity = window.capacity(), "usage logged");
        Ok(record)
    }

    /// Provider-side logging for an end-user found by username.
    ///
    /// # Errors
    /// `Forbidden`, `InvalidInput`, `NotFound`, `NoActivePlan`,
    /// `QuotaExceeded` or `Storage`.
    #[instrument(skip(self, principal), fields(provider = %principal.username))]
    pub async fn log_usage_for(
        &self,
        principal: &Principal,
        username: &str,
        amount: f64,
    ) -> Result<UsageRecord> {
        require_provider(principal)?;
        let username = username.trim();
        if username.is_empty() {
            return Err(Error::InvalidInput("username must not be empty".to_string()));
        }
        validate_amount(amount)?;
        let target = self
            .ledger
            .find_identity_by_username(username)
            .await?
            .filter(|identity| identity.role == Role::User)
            .ok_or(Error::NotFound("user"))?;
        self.log_usage(target.id, amount).await
    }

    /// Buy a plan; capacity and price are copied so later edits do not
    /// affect this window. The buyer is enrolled for metering.
    ///
    /// # Errors
    /// `Forbidden`, `NotFound` or `Storage`.
    #[instrument(skip(self, principal), fields(identity_id = %principal.identity_id))]
    pub async fn purchase_plan(&self, principal: &Principal, plan_id: PlanId) -> Result<PlanPurchase> {
        require_user(principal)?;
        let plan = self
            .ledger
            .find_plan(plan_id)
            .await?
            .ok_or(Error::NotFound("plan"))?;
        let purchase = self
            .ledger
            .create_purchase(NewPurchase {
                identity_id: principal.identity_id,
                plan_id: plan.id,
                capacity: plan.capacity,
                price: plan.price,
                purchased_at: self.clock.now(),
            })
            .await?;
        info!(plan_id = %plan.id, capacity = plan.capacity, "plan purchased");
        self.start_metering(principal.identity_id).await;
        Ok(purchase)
    }

    /// The caller's usage records, oldest first.
    ///
    /// # Errors
    /// `Storage`.
    pub async fn usage_history(&self, principal: &Principal) -> Result<Vec<UsageRecord>> {
        Ok(self.ledger.usage_history(principal.identity_id).await?)
    }

    /// Usage of all identities summed per second. Providers only.
    ///
    /// # Errors
    /// `Forbidden` or `Storage`.
    pub async fn usage_timeline(&self, principal: &Principal) -> Result<Vec<UsagePoint>> {
        require_provider(principal)?;
        Ok(self.ledger.usage_timeline().await?)
    }
}
