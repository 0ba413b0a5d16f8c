//! Process-local one-time passcode store keyed by identity.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::ledger::IdentityId;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OtpEntry {
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

impl OtpEntry {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Outcome of checking a submitted passcode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OtpCheck {
    Accepted,
    Missing,
    Expired,
    Mismatch,
}

#[derive(Debug, Default)]
pub struct OtpRegistry {
    entries: Mutex<HashMap<IdentityId, OtpEntry>>,
}

impl OtpRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `entry`, replacing any previous passcode for the identity.
    pub async fn put(&self, identity: IdentityId, entry: OtpEntry) {
        self.entries.lock().await.insert(identity, entry);
    }

    pub async fn get(&self, identity: IdentityId) -> Option<OtpEntry> {
        self.entries.lock().await.get(&identity).cloned()
    }

    pub async fn delete(&self, identity: IdentityId) -> Option<OtpEntry> {
        self.entries.lock().await.remove(&identity)
    }

    /// Drop every entry at or past its expiry. Returns how many were removed.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Check `code` under one lock. An accepted or expired entry is removed;
    /// a mismatch leaves it in place.
    pub async fn consume(&self, identity: IdentityId, code: &str, now: DateTime<Utc>) -> OtpCheck {
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get(&identity) else {
            return OtpCheck::Missing;
        };
        if entry.is_expired(now) {
            entries.remove(&identity);
            return OtpCheck::Expired;
        }
        if entry.code != code {
            return OtpCheck::Mismatch;
        }
        entries.remove(&identity);
        OtpCheck::Accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};
    use uuid::Uuid;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 6, 9, 0, 0).unwrap()
    }

    fn entry(code: &str, ttl_seconds: i64) -> OtpEntry {
        OtpEntry {
            code: code.to_string(),
            expires_at: now() + TimeDelta::seconds(ttl_seconds),
        }
    }

    #[tokio::test]
    async fn put_overwrites_previous_entry() {
        let registry = OtpRegistry::new();
        let id = Uuid::new_v4();
        registry.put(id, entry("111111", 300)).await;
        registry.put(id, entry("222222", 300)).await;

        assert_eq!(registry.len().await, 1);
        assert_eq!(registry.get(id).await.unwrap().code, "222222");
    }

    #[tokio::test]
    async fn consume_is_single_use() {
        let registry = OtpRegistry::new();
        let id = Uuid::new_v4();
        registry.put(id, entry("123456", 300)).await;

        assert_eq!(registry.consume(id, "123456", now()).await, OtpCheck::Accepted);
        assert_eq!(registry.consume(id, "123456", now()).await, OtpCheck::Missing);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn mismatch_keeps_entry() {
        let registry = OtpRegistry::new();
        let id = Uuid::new_v4();
        registry.put(id, entry("123456", 300)).await;

        assert_eq!(registry.consume(id, "654321", now()).await, OtpCheck::Mismatch);
        assert_eq!(registry.consume(id, "123456", now()).await, OtpCheck::Accepted);
    }

    #[tokio::test]
    async fn expiry_is_inclusive_and_removes_entry() {
        let registry = OtpRegistry::new();
        let id = Uuid::new_v4();
        registry.put(id, entry("123456", 300)).await;

        let at_expiry = now() + TimeDelta::seconds(300);
        assert_eq!(
            registry.consume(id, "123456", at_expiry).await,
            OtpCheck::Expired
        );
        assert!(registry.get(id).await.is_none());
    }

    #[tokio::test]
    async fn purge_expired_keeps_live_entries() {
        let registry = OtpRegistry::new();
        let stale = Uuid::new_v4();
        let live = Uuid::new_v4();
        registry.put(stale, entry("111111", 10)).await;
        registry.put(live, entry("222222", 300)).await;

        let removed = registry.purge_expired(now() + TimeDelta::seconds(10)).await;
        assert_eq!(removed, 1);
        assert!(registry.get(stale).await.is_none());
        assert!(registry.get(live).await.is_some());
        assert!(registry.delete(live).await.is_some());
    }
}
