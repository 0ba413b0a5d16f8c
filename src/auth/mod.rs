//! Two-phase login: password and email check, one-time passcode, full token.
//!
//! `login` answers with a short-lived *temporary* token and sends a passcode
//! through the configured `Notifier`. `verify_otp` trades the temporary token
//! plus the passcode for a *full* token and enrolls the identity for metering.
//! Protected operations accept full tokens only (see `AuthProtocol::authorize`).

pub mod otp;
pub mod password;
pub mod protocol;
pub mod rate_limit;
pub mod token;
pub mod utils;

pub use otp::{OtpCheck, OtpEntry, OtpRegistry};
pub use password::Credentials;
pub use protocol::{AuthProtocol, LoginChallenge, Principal, Session};
pub use rate_limit::{NoopRateLimiter, RateLimitAction, RateLimitDecision, RateLimiter};
pub use token::{Claims, IssuedToken, TokenError, TokenKind, TokenService};

use chrono::TimeDelta;
use std::time::Duration;

const DEFAULT_ISSUER: &str = "wifimeter";
const DEFAULT_TEMPORARY_TOKEN_TTL_SECONDS: i64 = 10 * 60;
const DEFAULT_SESSION_TTL_SECONDS: i64 = 12 * 60 * 60;
const DEFAULT_OTP_TTL_SECONDS: i64 = 5 * 60;
const DEFAULT_OTP_LENGTH: usize = 6;
const DEFAULT_NOTIFY_TIMEOUT_SECONDS: u64 = 10;

const MAX_TTL_SECONDS: i64 = 366 * 24 * 60 * 60;

const MIN_OTP_LENGTH: usize = 4;
const MAX_OTP_LENGTH: usize = 10;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    issuer: String,
    temporary_token_ttl_seconds: i64,
    session_ttl_seconds: i64,
    otp_ttl_seconds: i64,
    otp_length: usize,
    notify_timeout_seconds: u64,
}

impl AuthConfig {
    /// Defaults: 10 minute temporary tokens, 12 hour sessions, 6 digit
    /// passcodes valid for 5 minutes, 10 second delivery timeout.
    #[must_use]
    pub fn new() -> Self {
        Self {
            issuer: DEFAULT_ISSUER.to_string(),
            temporary_token_ttl_seconds: DEFAULT_TEMPORARY_TOKEN_TTL_SECONDS,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            otp_ttl_seconds: DEFAULT_OTP_TTL_SECONDS,
            otp_length: DEFAULT_OTP_LENGTH,
            notify_timeout_seconds: DEFAULT_NOTIFY_TIMEOUT_SECONDS,
        }
    }

    #[must_use]
    pub fn with_issuer(mut self, issuer: String) -> Self {
        self.issuer = issuer;
        self
    }

    #[must_use]
    pub fn with_temporary_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.temporary_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_otp_ttl_seconds(mut self, seconds: i64) -> Self {
        self.otp_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_otp_length(mut self, length: usize) -> Self {
        self.otp_length = length;
        self
    }

    #[must_use]
    pub fn with_notify_timeout_seconds(mut self, seconds: u64) -> Self {
        self.notify_timeout_seconds = seconds;
        self
    }

    /// Clamp every setting into a usable range.
    #[must_use]
    pub fn normalize(self) -> Self {
        let issuer = if self.issuer.trim().is_empty() {
            DEFAULT_ISSUER.to_string()
        } else {
            self.issuer.trim().to_string()
        };
        Self {
            issuer,
            temporary_token_ttl_seconds: clamp_ttl(self.temporary_token_ttl_seconds),
            session_ttl_seconds: clamp_ttl(self.session_ttl_seconds),
            otp_ttl_seconds: clamp_ttl(self.otp_ttl_seconds),
            otp_length: self.otp_length.clamp(MIN_OTP_LENGTH, MAX_OTP_LENGTH),
            notify_timeout_seconds: self.notify_timeout_seconds.max(1),
        }
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn temporary_token_ttl(&self) -> TimeDelta {
        TimeDelta::seconds(clamp_ttl(self.temporary_token_ttl_seconds))
    }

    #[must_use]
    pub fn session_ttl(&self) -> TimeDelta {
        TimeDelta::seconds(clamp_ttl(self.session_ttl_seconds))
    }

    #[must_use]
    pub fn otp_ttl(&self) -> TimeDelta {
        TimeDelta::seconds(clamp_ttl(self.otp_ttl_seconds))
    }

    #[must_use]
    pub fn otp_length(&self) -> usize {
        self.otp_length
    }

    #[must_use]
    pub fn notify_timeout(&self) -> Duration {
        Duration::from_secs(self.notify_timeout_seconds)
    }
}

/// Lifetimes run from one second up to a year.
const fn clamp_ttl(seconds: i64) -> i64 {
    if seconds < 1 {
        1
    } else if seconds > MAX_TTL_SECONDS {
        MAX_TTL_SECONDS
    } else {
        seconds
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_config_defaults_and_overrides() {
        let config = AuthConfig::new();
        assert_eq!(config.issuer(), DEFAULT_ISSUER);
        assert_eq!(config.temporary_token_ttl(), TimeDelta::seconds(600));
        assert_eq!(config.session_ttl(), TimeDelta::hours(12));
        assert_eq!(config.otp_ttl(), TimeDelta::seconds(300));
        assert_eq!(config.otp_length(), 6);
        assert_eq!(config.notify_timeout(), Duration::from_secs(10));

        let config = config
            .with_issuer("isp.test".to_string())
            .with_temporary_token_ttl_seconds(30)
            .with_session_ttl_seconds(60)
            .with_otp_ttl_seconds(45)
            .with_otp_length(8)
            .with_notify_timeout_seconds(2);
        assert_eq!(config.issuer(), "isp.test");
        assert_eq!(config.temporary_token_ttl(), TimeDelta::seconds(30));
        assert_eq!(config.session_ttl(), TimeDelta::seconds(60));
        assert_eq!(config.otp_ttl(), TimeDelta::seconds(45));
        assert_eq!(config.otp_length(), 8);
        assert_eq!(config.notify_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn normalize_clamps_out_of_range_values() {
        let config = AuthConfig::new()
            .with_issuer("  ".to_string())
            .with_temporary_token_ttl_seconds(0)
            .with_session_ttl_seconds(-5)
            .with_otp_ttl_seconds(0)
            .with_otp_length(40)
            .with_notify_timeout_seconds(0)
            .normalize();
        assert_eq!(config.issuer(), DEFAULT_ISSUER);
        assert_eq!(config.temporary_token_ttl(), TimeDelta::seconds(1));
        assert_eq!(config.session_ttl(), TimeDelta::seconds(1));
        assert_eq!(config.otp_ttl(), TimeDelta::seconds(1));
        assert_eq!(config.otp_length(), MAX_OTP_LENGTH);
        assert_eq!(config.notify_timeout(), Duration::from_secs(1));

        let short = AuthConfig::new().with_otp_length(1).normalize();
        assert_eq!(short.otp_length(), MIN_OTP_LENGTH);
    }

    #[test]
    fn huge_lifetimes_are_capped() {
        let year = TimeDelta::seconds(MAX_TTL_SECONDS);
        let config = AuthConfig::new()
            .with_temporary_token_ttl_seconds(i64::MAX)
            .with_session_ttl_seconds(i64::MAX)
            .with_otp_ttl_seconds(i64::MAX / 1000 + 1);
        assert_eq!(config.session_ttl(), year);

        let config = config.normalize();
        assert_eq!(config.temporary_token_ttl(), year);
        assert_eq!(config.session_ttl(), year);
        assert_eq!(config.otp_ttl(), year);
        assert!(chrono::Utc::now().checked_add_signed(config.session_ttl()).is_some());
    }
}
