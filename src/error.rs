//! Caller-visible failures of the auth protocol, registrations and metering.

use thiserror::Error;

use crate::ledger::LedgerError;

#[derive(Debug, Error)]
pub enum Error {
    /// Username, password or email did not match. Never says which one.
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("registration pending approval")]
    PendingApproval,
    #[error("invalid token")]
    InvalidToken,
    #[error("one-time passcode not found")]
    OtpNotFound,
    #[error("one-time passcode expired")]
    OtpExpired,
    #[error("one-time passcode mismatch")]
    OtpMismatch,
    #[error("quota exceeded: {used} used + {requested} requested > {capacity}")]
    QuotaExceeded {
        used: f64,
        requested: f64,
        capacity: f64,
    },
    #[error("no active plan")]
    NoActivePlan,
    #[error("too many attempts")]
    TooManyAttempts,
    #[error("forbidden")]
    Forbidden,
    #[error("{0} already registered")]
    Conflict(&'static str),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("storage fault: {0}")]
    Storage(#[from] LedgerError),
    #[error("notification fault: {0}")]
    Notification(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Map a ledger uniqueness violation to a registration conflict.
    pub(crate) fn from_ledger_conflict(err: LedgerError) -> Self {
        match err {
            LedgerError::Duplicate(field) => Self::Conflict(field),
            other => Self::Storage(other),
        }
    }
}
