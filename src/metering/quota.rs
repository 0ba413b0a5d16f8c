//! The data cap rule shared by the background meter and foreground logging.

use crate::{
    error::Error,
    ledger::{IdentityId, Ledger, LedgerError, PlanPurchase},
};

/// Remainders at or below this share of capacity are summation residue.
const RESIDUE: f64 = 1e-9;

/// Latest purchase of an identity and the usage recorded since it was made.
#[derive(Clone, Debug, PartialEq)]
pub struct QuotaWindow {
    pub purchase: PlanPurchase,
    pub used: f64,
}

impl QuotaWindow {
    #[must_use]
    pub fn capacity(&self) -> f64 {
        self.purchase.capacity
    }

    #[must_use]
    pub fn remaining(&self) -> f64 {
        (self.capacity() - self.used).max(0.0)
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.remaining() <= self.capacity() * RESIDUE
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum QuotaDecision {
    Allowed,
    Exceeded {
        used: f64,
        requested: f64,
        capacity: f64,
    },
}

impl QuotaDecision {
    /// # Errors
    /// `QuotaExceeded` carrying the amounts.
    pub fn into_result(self) -> Result<(), Error> {
        match self {
            Self::Allowed => Ok(()),
            Self::Exceeded {
                used,
                requested,
                capacity,
            } => Err(Error::QuotaExceeded {
                used,
                requested,
                capacity,
            }),
        }
    }
}

/// `requested` fits iff `used + requested <= capacity`.
#[must_use]
pub fn decide(window: &QuotaWindow, requested: f64) -> QuotaDecision {
    if window.used + requested > window.capacity() {
        QuotaDecision::Exceeded {
            used: window.used,
            requested,
            capacity: window.capacity(),
        }
    } else {
        QuotaDecision::Allowed
    }
}

/// `None` when the identity never bought a plan.
///
/// # Errors
/// Propagates ledger failures.
pub async fn load_window(
    ledger: &dyn Ledger,
    identity: IdentityId,
) -> Result<Option<QuotaWindow>, LedgerError> {
    let Some(purchase) = ledger.latest_purchase(identity).await? else {
        return Ok(None);
    };
    let used = ledger
        .sum_usage_since(identity, purchase.purchased_at)
        .await?;
    Ok(Some(QuotaWindow { purchase, used }))
}
