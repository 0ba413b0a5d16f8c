//! Identities currently enrolled for metering.

use std::collections::HashSet;
use tokio::sync::Mutex;

use crate::ledger::IdentityId;

/// The lock is only held inside these methods, never across ledger calls.
#[derive(Debug, Default)]
pub struct ActiveSessions {
    members: Mutex<HashSet<IdentityId>>,
}

impl ActiveSessions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when the identity was not enrolled yet.
    pub async fn insert(&self, identity: IdentityId) -> bool {
        self.members.lock().await.insert(identity)
    }

    /// Returns `true` when the identity was enrolled.
    pub async fn remove(&self, identity: IdentityId) -> bool {
        self.members.lock().await.remove(&identity)
    }

    pub async fn contains(&self, identity: IdentityId) -> bool {
        self.members.lock().await.contains(&identity)
    }

    /// Copy of the current members; later changes do not affect it.
    pub async fn snapshot(&self) -> Vec<IdentityId> {
        self.members.lock().await.iter().copied().collect()
    }

    pub async fn len(&self) -> usize {
        self.members.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.members.lock().await.is_empty()
    }
}
