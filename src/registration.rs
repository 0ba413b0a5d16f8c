//! Sign-up requests, provider approval, wallet assignment and provider bootstrap.
//!
//! A registration first lands in the pending table. It only becomes an
//! identity once a provider approves it; until then the username, email and
//! wallet are reserved and login is refused.

use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::{
        utils::{normalize_email, valid_email},
        Credentials, NoopRateLimiter, Principal, RateLimitAction, RateLimitDecision, RateLimiter,
    },
    clock::Clock,
    error::{Error, Result},
    ledger::{Identity, Ledger, LedgerError, NewIdentity, NewPendingRegistration, PendingRegistration, Role},
};

/// Sign-up request as submitted by a client.
#[derive(Clone, Debug)]
pub struct Registration {
    pub username: String,
    pub password: String,
    pub email: String,
    pub wallet_address: Option<String>,
    pub role: Role,
}

struct Normalized {
    username: String,
    email: String,
    wallet_address: Option<String>,
}

fn normalize(username: &str, email: &str, wallet: Option<&str>) -> Result<Normalized> {
    let username = username.trim();
    if username.is_empty() {
        return Err(Error::InvalidInput("username must not be empty".to_string()));
    }
    let email = normalize_email(email);
    if !valid_email(&email) {
        return Err(Error::InvalidInput("invalid email".to_string()));
    }
    let wallet_address = wallet
        .map(str::trim)
        .filter(|wallet| !wallet.is_empty())
        .map(ToString::to_string);
    Ok(Normalized {
        username: username.to_string(),
        email,
        wallet_address,
    })
}

pub struct Registrations {
    ledger: Arc<dyn Ledger>,
    credentials: Credentials,
    rate_limiter: Arc<dyn RateLimiter>,
    clock: Arc<dyn Clock>,
}

impl Registrations {
    #[must_use]
    pub fn new(ledger: Arc<dyn Ledger>, clock: Arc<dyn Clock>) -> Self {
        Self {
            ledger,
            credentials: Credentials::new(),
            rate_limiter: Arc::new(NoopRateLimiter),
            clock,
        }
    }

    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    #[must_use]
    pub fn with_rate_limiter(mut self, rate_limiter: Arc<dyn RateLimiter>) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }

    /// Identities win over pending records: a taken value is a `Conflict`,
    /// a reserved one is `PendingApproval`.
    async fn ensure_available(&self, candidate: &Normalized) -> Result<()> {
        if self
            .ledger
            .find_identity_by_username(&candidate.username)
            .await?
            .is_some()
        {
            return Err(Error::Conflict("username"));
        }
        if self
            .ledger
            .find_identity_by_email(&candidate.email)
            .await?
            .is_some()
        {
            return Err(Error::Conflict("email"));
        }
        if let Some(wallet) = &candidate.wallet_address {
            if self.ledger.find_identity_by_wallet(wallet).await?.is_some() {
                return Err(Error::Conflict("wallet_address"));
            }
        }

        if self
            .ledger
            .find_pending_by_username(&candidate.username)
            .await?
            .is_some()
            || self
                .ledger
                .find_pending_by_email(&candidate.email)
                .await?
                .is_some()
        {
            return Err(Error::PendingApproval);
        }
        if let Some(wallet) = &candidate.wallet_address {
            if self.ledger.find_pending_by_wallet(wallet).await?.is_some() {
                return Err(Error::PendingApproval);
            }
        }
        Ok(())
    }

    /// Queue a sign-up for provider approval.
    ///
    /// # Errors
    /// `InvalidInput`, `Conflict`, `PendingApproval`, `TooManyAttempts` or `Storage`.
    #[instrument(skip(self, request), fields(username = %request.username))]
    pub async fn register(&self, request: Registration) -> Result<PendingRegistration> {
        let candidate = normalize(
            &request.username,
            &request.email,
            request.wallet_address.as_deref(),
        )?;
        if self
            .rate_limiter
            .check(&candidate.email, RateLimitAction::Register)
            == RateLimitDecision::Limited
        {
            warn!("registration rate limited");
            return Err(Error::TooManyAttempts);
        }
        let password_hash = self.credentials.hash(&request.password)?;
        self.ensure_available(&candidate).await?;

        let pending = self
            .ledger
            .create_pending(NewPendingRegistration {
                username: candidate.username,
                email: candidate.email,
                role: request.role,
                wallet_address: candidate.wallet_address,
                password_hash,
                created_at: self.clock.now(),
            })
            .await
            .map_err(|err| match err {
                LedgerError::Duplicate(_) => Error::PendingApproval,
                other => Error::Storage(other),
            })?;

        info!(pending_id = %pending.id, role = pending.role.as_str(), "registration queued");
        Ok(pending)
    }

    /// # Errors
    /// `Forbidden` for non-providers, `Storage`.
    pub async fn list_pending(&self, principal: &Principal) -> Result<Vec<PendingRegistration>> {
        require_provider(principal)?;
        Ok(self.ledger.list_pending().await?)
    }

    /// Promote a pending registration to an identity with the same id.
    ///
    /// # Errors
    /// `Forbidden`, `NotFound`, `Conflict` or `Storage`.
    #[instrument(skip(self, principal), fields(provider = %principal.username))]
    pub async fn approve(&self, principal: &Principal, pending_id: Uuid) -> Result<Identity> {
        require_provider(principal)?;
        let identity = self
            .ledger
            .promote_pending(pending_id, self.clock.now())
            .await
            .map_err(Error::from_ledger_conflict)?
            .ok_or(Error::NotFound("registration"))?;
        info!(identity_id = %identity.id, username = %identity.username, "registration approved");
        Ok(identity)
    }

    /// # Errors
    /// `Forbidden`, `NotFound` or `Storage`.
    #[instrument(skip(self, principal), fields(provider = %principal.username))]
    pub async fn reject(&self, principal: &Principal, pending_id: Uuid) -> Result<()> {
        require_provider(principal)?;
        if !self.ledger.reject_pending(pending_id).await? {
            return Err(Error::NotFound("registration"));
        }
        info!(%pending_id, "registration rejected");
        Ok(())
    }

    /// Attach a wallet to the caller. A wallet can be set once and must not
    /// belong to any other identity or pending registration.
    ///
    /// # Errors
    /// `InvalidInput`, `NotFound`, `Conflict` or `Storage`.
    #[instrument(skip(self, principal), fields(identity_id = %principal.identity_id))]
    pub async fn update_wallet(&self, principal: &Principal, wallet: &str) -> Result<Identity> {
        let wallet = wallet.trim();
        if wallet.is_empty() {
            return Err(Error::InvalidInput("wallet address must not be empty".to_string()));
        }
        let identity = self
            .ledger
            .find_identity(principal.identity_id)
            .await?
            .ok_or(Error::NotFound("identity"))?;
        if identity.wallet_address.as_deref() == Some(wallet) {
            return Ok(identity);
        }
        if identity.wallet_address.is_some() {
            return Err(Error::Conflict("wallet_address"));
        }
        if self.ledger.find_identity_by_wallet(wallet).await?.is_some()
            || self.ledger.find_pending_by_wallet(wallet).await?.is_some()
        {
            return Err(Error::Conflict("wallet_address"));
        }

        let written = self
            .ledger
            .set_wallet(identity.id, wallet)
            .await
            .map_err(Error::from_ledger_conflict)?;
        if !written {
            // lost a race with another update for the same identity
            let current = self
                .ledger
                .find_identity(identity.id)
                .await?
                .ok_or(Error::NotFound("identity"))?;
            if current.wallet_address.as_deref() == Some(wallet) {
                return Ok(current);
            }
            return Err(Error::Conflict("wallet_address"));
        }
        info!("wallet address set");
        Ok(Identity {
            wallet_address: Some(wallet.to_string()),
            ..identity
        })
    }

    /// Create an approved provider directly, bypassing the pending queue.
    ///
    /// # Errors
    /// `InvalidInput`, `Conflict`, `PendingApproval` or `Storage`.
    #[instrument(skip(self, password, email))]
    pub async fn create_provider(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<Identity> {
        let candidate = normalize(username, email, None)?;
        let password_hash = self.credentials.hash(password)?;
        self.ensure_available(&candidate).await?;

        let identity = self
            .ledger
            .create_identity(NewIdentity {
                username: candidate.username,
                email: candidate.email,
                role: Role::Provider,
                wallet_address: None,
                password_hash,
                created_at: self.clock.now(),
            })
            .await
            .map_err(Error::from_ledger_conflict)?;
        info!(identity_id = %identity.id, "provider created");
        Ok(identity)
    }
}

pub(crate) fn require_provider(principal: &Principal) -> Result<()> {
    if principal.role == Role::Provider {
        Ok(())
    } else {
        Err(Error::Forbidden)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::password::tests::cheap,
        clock::ManualClock,
        ledger::MemoryLedger,
    };
    use chrono::{TimeZone, Utc};

    fn registrations() -> (Registrations, Arc<MemoryLedger>) {
        let ledger = Arc::new(MemoryLedger::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 1, 6, 9, 0, 0).unwrap(),
        ));
        let service = Registrations::new(ledger.clone(), clock).with_credentials(cheap());
        (service, ledger)
    }

    fn request(username: &str, wallet: Option<&str>) -> Registration {
        Registration {
            username: username.to_string(),
            password: "pw".to_string(),
            email: format!(" {}@Example.com", username.to_uppercase()),
            wallet_address: wallet.map(ToString::to_string),
            role: Role::User,
        }
    }

    fn principal(identity: &Identity) -> Principal {
        Principal {
            identity_id: identity.id,
            username: identity.username.clone(),
            role: identity.role,
            temporary: false,
        }
    }

    #[tokio::test]
    async fn register_normalizes_and_queues() {
        let (service, ledger) = registrations();
        let pending = service.register(request("carol", Some(" 0xabc "))).await.unwrap();

        assert_eq!(pending.email, "carol@example.com");
        assert_eq!(pending.wallet_address.as_deref(), Some("0xabc"));
        assert_eq!(ledger.list_pending().await.unwrap().len(), 1);
        assert!(ledger.find_identity_by_username("carol").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_while_pending_is_rejected() {
        let (service, _) = registrations();
        service.register(request("carol", Some("0xabc"))).await.unwrap();

        let err = service.register(request("carol", None)).await.unwrap_err();
        assert!(matches!(err, Error::PendingApproval));

        let mut other = request("dave", Some("0xabc"));
        other.email = "dave@example.com".to_string();
        let err = service.register(other).await.unwrap_err();
        assert!(matches!(err, Error::PendingApproval));
    }

    #[tokio::test]
    async fn register_validates_input() {
        let (service, _) = registrations();

        let mut bad_email = request("erin", None);
        bad_email.email = "erin-at-example".to_string();
        assert!(matches!(
            service.register(bad_email).await,
            Err(Error::InvalidInput(_))
        ));

        let mut no_password = request("erin", None);
        no_password.password = String::new();
        assert!(matches!(
            service.register(no_password).await,
            Err(Error::InvalidInput(_))
        ));

        assert!(matches!(
            service.register(request("  ", None)).await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn approval_flow_promotes_and_conflicts_afterwards() {
        let (service, _) = registrations();
        let provider = service
            .create_provider("isp", "isp@example.com", "root")
            .await
            .unwrap();
        let isp = principal(&provider);

        let pending = service.register(request("carol", None)).await.unwrap();
        assert_eq!(service.list_pending(&isp).await.unwrap().len(), 1);

        let identity = service.approve(&isp, pending.id).await.unwrap();
        assert_eq!(identity.id, pending.id);
        assert_eq!(identity.role, Role::User);
        assert_eq!(
            identity.created_at,
            Utc.with_ymd_and_hms(2025, 1, 6, 9, 0, 0).unwrap()
        );
        assert_eq!(provider.created_at, identity.created_at);
        assert!(service.list_pending(&isp).await.unwrap().is_empty());

        let err = service.register(request("carol", None)).await.unwrap_err();
        assert!(matches!(err, Error::Conflict("username")));

        let err = service.approve(&isp, pending.id).await.unwrap_err();
        assert!(matches!(err, Error::NotFound("registration")));
    }

    #[tokio::test]
    async fn only_providers_manage_registrations() {
        let (service, ledger) = registrations();
        let pending = service.register(request("carol", None)).await.unwrap();
        let user = ledger
            .create_identity(NewIdentity {
                username: "mallory".to_string(),
                email: "mallory@example.com".to_string(),
                role: Role::User,
                wallet_address: None,
                password_hash: String::new(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        let caller = principal(&user);

        assert!(matches!(
            service.list_pending(&caller).await,
            Err(Error::Forbidden)
        ));
        assert!(matches!(
            service.approve(&caller, pending.id).await,
            Err(Error::Forbidden)
        ));
        assert!(matches!(
            service.reject(&caller, pending.id).await,
            Err(Error::Forbidden)
        ));
    }

    #[tokio::test]
    async fn reject_removes_pending_record() {
        let (service, _) = registrations();
        let provider = service
            .create_provider("isp", "isp@example.com", "root")
            .await
            .unwrap();
        let isp = principal(&provider);
        let pending = service.register(request("carol", None)).await.unwrap();

        service.reject(&isp, pending.id).await.unwrap();
        assert!(matches!(
            service.reject(&isp, pending.id).await,
            Err(Error::NotFound("registration"))
        ));
        service.register(request("carol", None)).await.unwrap();
    }

    #[tokio::test]
    async fn wallet_is_set_once_and_unique() {
        let (service, ledger) = registrations();
        let provider = service
            .create_provider("isp", "isp@example.com", "root")
            .await
            .unwrap();
        let isp = principal(&provider);
        service.register(request("carol", Some("0xpending"))).await.unwrap();

        let updated = service.update_wallet(&isp, "0xisp").await.unwrap();
        assert_eq!(updated.wallet_address.as_deref(), Some("0xisp"));
        assert_eq!(
            ledger
                .find_identity_by_wallet("0xisp")
                .await
                .unwrap()
                .map(|identity| identity.id),
            Some(provider.id)
        );
        // Same value again is a no-op.
        service.update_wallet(&isp, "0xisp").await.unwrap();

        assert!(matches!(
            service.update_wallet(&isp, "0xother").await,
            Err(Error::Conflict("wallet_address"))
        ));

        let other = service
            .create_provider("isp2", "isp2@example.com", "root")
            .await
            .unwrap();
        assert!(matches!(
            service.update_wallet(&principal(&other), "0xpending").await,
            Err(Error::Conflict("wallet_address"))
        ));
        assert!(matches!(
            service.update_wallet(&principal(&other), "   ").await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_wallet_updates_keep_one_winner() {
        let (service, ledger) = registrations();
        let service = Arc::new(service);

        for round in 0..50 {
            let identity = service
                .create_provider(&format!("isp{round}"), &format!("isp{round}@example.com"), "root")
                .await
                .unwrap();
            let caller = principal(&identity);

            let updates: Vec<_> = ["0x1", "0x2"]
                .into_iter()
                .map(|prefix| {
                    let service = service.clone();
                    let caller = caller.clone();
                    let wallet = format!("{prefix}-{round}");
                    tokio::spawn(async move { service.update_wallet(&caller, &wallet).await })
                })
                .collect();
            let mut results = Vec::new();
            for update in updates {
                results.push(update.await.unwrap());
            }

            let winners: Vec<&Identity> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
            assert_eq!(winners.len(), 1, "round {round}: {results:?}");
            assert!(results
                .iter()
                .any(|r| matches!(r, Err(Error::Conflict("wallet_address")))));

            let stored = ledger.find_identity(identity.id).await.unwrap().unwrap();
            assert_eq!(stored.wallet_address, winners[0].wallet_address);
        }
    }

    #[tokio::test]
    async fn create_provider_checks_uniqueness() {
        let (service, _) = registrations();
        service
            .create_provider("isp", "isp@example.com", "root")
            .await
            .unwrap();
        assert!(matches!(
            service
                .create_provider("isp", "other@example.com", "root")
                .await,
            Err(Error::Conflict("username"))
        ));
        assert!(matches!(
            service
                .create_provider("isp2", "ISP@example.com", "root")
                .await,
            Err(Error::Conflict("email"))
        ));
    }
}
