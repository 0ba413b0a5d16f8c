//! Login, passcode verification, token checks and logout.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{
    otp::{OtpCheck, OtpEntry, OtpRegistry},
    password::Credentials,
    rate_limit::{NoopRateLimiter, RateLimitAction, RateLimitDecision, RateLimiter},
    token::{Claims, TokenKind, TokenService},
    utils::{generate_otp, normalize_email},
    AuthConfig,
};
use crate::{
    clock::Clock,
    error::{Error, Result},
    ledger::{Identity, Ledger, Role},
    metering::ActiveSessions,
    notify::Notifier,
};

/// Answer to a successful password check.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct LoginChallenge {
    pub temporary_token: String,
    pub expires_at: DateTime<Utc>,
    pub otp_expires_at: DateTime<Utc>,
}

/// Answer to a successful passcode check.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct Session {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub role: Role,
    pub username: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
pub struct Principal {
    pub identity_id: Uuid,
    pub username: String,
    pub role: Role,
    pub temporary: bool,
}

impl From<Claims> for Principal {
    fn from(claims: Claims) -> Self {
        let temporary = claims.is_temporary();
        Self {
            identity_id: claims.sub,
            username: claims.usr,
            role: claims.role,
            temporary,
        }
    }
}

pub struct AuthProtocol {
    config: AuthConfig,
    tokens: TokenService,
    ledger: Arc<dyn Ledger>,
    otps: Arc<OtpRegistry>,
    sessions: Arc<ActiveSessions>,
    notifier: Arc<dyn Notifier>,
    credentials: Credentials,
    rate_limiter: Arc<dyn RateLimiter>,
    clock: Arc<dyn Clock>,
}

impl AuthProtocol {
    #[must_use]
    pub fn new(
        config: AuthConfig,
        tokens: TokenService,
        ledger: Arc<dyn Ledger>,
        sessions: Arc<ActiveSessions>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config: config.normalize(),
            tokens,
            ledger,
            otps: Arc::new(OtpRegistry::new()),
            sessions,
            notifier,
            credentials: Credentials::new(),
            rate_limiter: Arc::new(NoopRateLimiter),
            clock,
        }
    }

    #[must_use]
    pub fn with_otp_registry(mut self, otps: Arc<OtpRegistry>) -> Self {
        self.otps = otps;
        self
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

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn otps(&self) -> &OtpRegistry {
        &self.otps
    }

    fn check_rate(&self, subject: &str, action: RateLimitAction) -> Result<()> {
        match self.rate_limiter.check(subject, action) {
            RateLimitDecision::Allowed => Ok(()),
            RateLimitDecision::Limited => {
                warn!(subject = %subject, ?action, "rate limited");
                Err(Error::TooManyAttempts)
            }
        }
    }

    fn issue(&self, identity: &Identity, kind: TokenKind) -> Result<super::IssuedToken> {
        let ttl = match kind {
            TokenKind::Temporary => self.config.temporary_token_ttl(),
            TokenKind::Full => self.config.session_ttl(),
        };
        self.tokens
            .issue(identity, kind, ttl, self.clock.now())
            .map_err(|err| {
                error!("failed to sign token: {err}");
                Error::InvalidToken
            })
    }

    /// Check password and email, then send a one-time passcode.
    ///
    /// Every credential failure yields the same `InvalidCredentials`. A failed
    /// delivery surfaces as `Notification` and leaves the stored passcode in
    /// place.
    ///
    /// # Errors
    /// `TooManyAttempts`, `InvalidCredentials`, `Notification` or `Storage`.
    #[instrument(skip(self, password, email))]
    pub async fn login(&self, username: &str, password: &str, email: &str) -> Result<LoginChallenge> {
        self.check_rate(username, RateLimitAction::Login)?;

        if self
            .ledger
            .find_pending_by_username(username)
            .await?
            .is_some()
        {
            debug!("login for a registration awaiting approval");
            return Err(Error::InvalidCredentials);
        }

        let Some(identity) = self.ledger.find_identity_by_username(username).await? else {
            return Err(Error::InvalidCredentials);
        };
        if !identity.is_active
            || identity.email != normalize_email(email)
            || !self.credentials.verify(password, &identity.password_hash)
        {
            return Err(Error::InvalidCredentials);
        }

        let temporary = self.issue(&identity, TokenKind::Temporary)?;

        let now = self.clock.now();
        let code = generate_otp(self.config.otp_length());
        let otp_expires_at = now + self.config.otp_ttl();
        let purged = self.otps.purge_expired(now).await;
        if purged > 0 {
            debug!(purged, "dropped expired passcodes");
        }
        self.otps
            .put(
                identity.id,
                OtpEntry {
                    code: code.clone(),
                    expires_at: otp_expires_at,
                },
            )
            .await;

        let valid_for = self.config.otp_ttl().to_std().unwrap_or_default();
        let delivery = self
            .notifier
            .send_one_time_passcode(&identity.email, &code, valid_for);
        match tokio::time::timeout(self.config.notify_timeout(), delivery).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                error!("failed to deliver one-time passcode: {err:#}");
                return Err(Error::Notification(err.to_string()));
            }
            Err(_) => {
                error!("one-time passcode delivery timed out");
                return Err(Error::Notification("delivery timed out".to_string()));
            }
        }

        info!(identity_id = %identity.id, "one-time passcode issued");
        Ok(LoginChallenge {
            temporary_token: temporary.token,
            expires_at: temporary.expires_at,
            otp_expires_at,
        })
    }

    /// Trade a temporary token and its passcode for a full session.
    ///
    /// # Errors
    /// `InvalidToken`, `TooManyAttempts`, `OtpNotFound`, `OtpExpired`,
    /// `OtpMismatch` or `Storage`.
    #[instrument(skip(self, temporary_token, otp))]
    pub async fn verify_otp(&self, temporary_token: &str, otp: &str) -> Result<Session> {
        let principal = self.verify_token(temporary_token)?;
        if !principal.temporary {
            return Err(Error::InvalidToken);
        }
        self.check_rate(&principal.username, RateLimitAction::VerifyOtp)?;

        let identity_id = principal.identity_id;
        if self
            .ledger
            .find_pending_by_username(&principal.username)
            .await?
            .is_some()
        {
            self.otps.delete(identity_id).await;
            return Err(Error::OtpNotFound);
        }
        let identity = match self.ledger.find_identity(identity_id).await? {
            Some(identity) if identity.is_active => identity,
            _ => {
                self.otps.delete(identity_id).await;
                return Err(Error::OtpNotFound);
            }
        };

        match self.otps.consume(identity_id, otp, self.clock.now()).await {
            OtpCheck::Accepted => {}
            OtpCheck::Missing => return Err(Error::OtpNotFound),
            OtpCheck::Expired => return Err(Error::OtpExpired),
            OtpCheck::Mismatch => return Err(Error::OtpMismatch),
        }

        let full = self.issue(&identity, TokenKind::Full)?;
        self.sessions.insert(identity_id).await;
        info!(identity_id = %identity_id, "session established");

        Ok(Session {
            access_token: full.token,
            expires_at: full.expires_at,
            role: identity.role,
            username: identity.username,
        })
    }

    /// Pure token validation; temporary tokens pass.
    ///
    /// # Errors
    /// `InvalidToken` on any signature, issuer, version or expiry failure.
    pub fn verify_token(&self, token: &str) -> Result<Principal> {
        self.tokens
            .verify(token, self.clock.now())
            .map(Principal::from)
            .map_err(|err| {
                debug!("token rejected: {err}");
                Error::InvalidToken
            })
    }

    /// `verify_token` that also refuses temporary tokens.
    ///
    /// # Errors
    /// `InvalidToken`.
    pub fn authorize(&self, token: &str) -> Result<Principal> {
        let principal = self.verify_token(token)?;
        if principal.temporary {
            return Err(Error::InvalidToken);
        }
        Ok(principal)
    }

    /// Stop metering the caller. Idempotent.
    ///
    /// # Errors
    /// `InvalidToken`.
    #[instrument(skip(self, token))]
    pub async fn logout(&self, token: &str) -> Result<()> {
        let principal = self.authorize(token)?;
        if self.sessions.remove(principal.identity_id).await {
            info!(identity_id = %principal.identity_id, "session ended");
        }
        Ok(())
    }
}
