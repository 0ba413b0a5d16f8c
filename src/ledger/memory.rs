use async_trait::async_trait;
use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    Identity, IdentityId, Ledger, LedgerError, NewIdentity, NewPendingRegistration, NewPurchase,
    NewUsageRecord, PendingRegistration, Plan, PlanDraft, PlanId, PlanPurchase, UsagePoint,
    UsageRecord,
};

#[derive(Default)]
struct State {
    identities: HashMap<IdentityId, Identity>,
    pending: HashMap<Uuid, PendingRegistration>,
    plans: HashMap<PlanId, Plan>,
    purchases: Vec<PlanPurchase>,
    usage: Vec<UsageRecord>,
}

impl State {
    fn check_identity_unique(
        &self,
        username: &str,
        email: &str,
        wallet: Option<&str>,
    ) -> Result<(), LedgerError> {
        for identity in self.identities.values() {
            if identity.username == username {
                return Err(LedgerError::Duplicate("username"));
            }
            if identity.email == email {
                return Err(LedgerError::Duplicate("email"));
            }
            if wallet.is_some() && identity.wallet_address.as_deref() == wallet {
                return Err(LedgerError::Duplicate("wallet_address"));
            }
        }
        Ok(())
    }
}

/// Process-local ledger. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryLedger {
    state: RwLock<State>,
}

impl MemoryLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn ping(&self) -> Result<(), LedgerError> {
        Ok(())
    }

    async fn find_identity(&self, id: IdentityId) -> Result<Option<Identity>, LedgerError> {
        Ok(self.state.read().await.identities.get(&id).cloned())
    }

    async fn find_identity_by_username(
        &self,
        username: &str,
    ) -> Result<Option<Identity>, LedgerError> {
        let state = self.state.read().await;
        Ok(state
            .identities
            .values()
            .find(|identity| identity.username == username)
            .cloned())
    }

    async fn find_identity_by_email(&self, email: &str) -> Result<Option<Identity>, LedgerError> {
        let state = self.state.read().await;
        Ok(state
            .identities
            .values()
            .find(|identity| identity.email == email)
            .cloned())
    }

    async fn find_identity_by_wallet(
        &self,
        wallet: &str,
    ) -> Result<Option<Identity>, LedgerError> {
        let state = self.state.read().await;
        Ok(state
            .identities
            .values()
            .find(|identity| identity.wallet_address.as_deref() == Some(wallet))
            .cloned())
    }

    async fn find_pending(&self, id: Uuid) -> Result<Option<PendingRegistration>, LedgerError> {
        Ok(self.state.read().await.pending.get(&id).cloned())
    }

    async fn find_pending_by_username(
        &self,
        username: &str,
    ) -> Result<Option<PendingRegistration>, LedgerError> {
        let state = self.state.read().await;
        Ok(state
            .pending
            .values()
            .find(|pending| pending.username == username)
            .cloned())
    }

    async fn find_pending_by_email(
        &self,
        email: &str,
    ) -> Result<Option<PendingRegistration>, LedgerError> {
        let state = self.state.read().await;
        Ok(state
            .pending
            .values()
            .find(|pending| pending.email == email)
            .cloned())
    }

    async fn find_pending_by_wallet(
        &self,
        wallet: &str,
    ) -> Result<Option<PendingRegistration>, LedgerError> {
        let state = self.state.read().await;
        Ok(state
            .pending
            .values()
            .find(|pending| pending.wallet_address.as_deref() == Some(wallet))
            .cloned())
    }

    async fn list_pending(&self) -> Result<Vec<PendingRegistration>, LedgerError> {
        let state = self.state.read().await;
        let mut pending: Vec<_> = state.pending.values().cloned().collect();
        pending.sort_by_key(|p| p.created_at);
        Ok(pending)
    }

    async fn create_identity(&self, new: NewIdentity) -> Result<Identity, LedgerError> {
        let mut state = self.state.write().await;
        state.check_identity_unique(&new.username, &new.email, new.wallet_address.as_deref())?;

        let identity = Identity {
            id: Uuid::new_v4(),
            username: new.username,
            email: new.email,
            role: new.role,
            wallet_address: new.wallet_address,
            is_active: true,
            password_hash: new.password_hash,
            created_at: new.created_at,
        };
        state.identities.insert(identity.id, identity.clone());
        Ok(identity)
    }

    async fn create_pending(
        &self,
        new: NewPendingRegistration,
    ) -> Result<PendingRegistration, LedgerError> {
        let mut state = self.state.write().await;
        for pending in state.pending.values() {
            if pending.username == new.username {
                return Err(LedgerError::Duplicate("username"));
            }
            if pending.email == new.email {
                return Err(LedgerError::Duplicate("email"));
            }
            if new.wallet_address.is_some() && pending.wallet_address == new.wallet_address {
                return Err(LedgerError::Duplicate("wallet_address"));
            }
        }

        let pending = PendingRegistration {
            id: Uuid::new_v4(),
            username: new.username,
            email: new.email,
            role: new.role,
            wallet_address: new.wallet_address,
            password_hash: new.password_hash,
            created_at: new.created_at,
        };
        state.pending.insert(pending.id, pending.clone());
        Ok(pending)
    }

    async fn promote_pending(
        &self,
        id: Uuid,
        approved_at: DateTime<Utc>,
    ) -> Result<Option<Identity>, LedgerError> {
        let mut state = self.state.write().await;
        let Some(pending) = state.pending.get(&id).cloned() else {
            return Ok(None);
        };
        state.check_identity_unique(
            &pending.username,
            &pending.email,
            pending.wallet_address.as_deref(),
        )?;
        state.pending.remove(&id);

        let identity = Identity {
            id: pending.id,
            username: pending.username,
            email: pending.email,
            role: pending.role,
            wallet_address: pending.wallet_address,
            is_active: true,
            password_hash: pending.password_hash,
            created_at: approved_at,
        };
        state.identities.insert(identity.id, identity.clone());
        Ok(Some(identity))
    }

    async fn reject_pending(&self, id: Uuid) -> Result<bool, LedgerError> {
        Ok(self.state.write().await.pending.remove(&id).is_some())
    }

    async fn set_wallet(&self, id: IdentityId, wallet: &str) -> Result<bool, LedgerError> {
        let mut state = self.state.write().await;
        let taken = state
            .identities
            .values()
            .any(|identity| identity.id != id && identity.wallet_address.as_deref() == Some(wallet))
            || state
                .pending
                .values()
                .any(|pending| pending.wallet_address.as_deref() == Some(wallet));
        if taken {
            return Err(LedgerError::Duplicate("wallet_address"));
        }
        match state.identities.get_mut(&id) {
            Some(identity) if identity.wallet_address.is_none() => {
                identity.wallet_address = Some(wallet.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn create_plan(
        &self,
        provider_id: IdentityId,
        draft: PlanDraft,
        created_at: DateTime<Utc>,
    ) -> Result<Plan, LedgerError> {
        let plan = Plan {
            id: Uuid::new_v4(),
            provider_id,
            name: draft.name,
            capacity: draft.capacity,
            price: draft.price,
            created_at,
        };
        self.state
            .write()
            .await
            .plans
            .insert(plan.id, plan.clone());
        Ok(plan)
    }

    async fn update_plan(
        &self,
        id: PlanId,
        draft: PlanDraft,
    ) -> Result<Option<Plan>, LedgerError> {
        let mut state = self.state.write().await;
        Ok(state.plans.get_mut(&id).map(|plan| {
            plan.name = draft.name;
            plan.capacity = draft.capacity;
            plan.price = draft.price;
            plan.clone()
        }))
    }

    async fn delete_plan(&self, id: PlanId) -> Result<bool, LedgerError> {
        Ok(self.state.write().await.plans.remove(&id).is_some())
    }

    async fn find_plan(&self, id: PlanId) -> Result<Option<Plan>, LedgerError> {
        Ok(self.state.read().await.plans.get(&id).cloned())
    }

    async fn list_plans(&self) -> Result<Vec<Plan>, LedgerError> {
        let state = self.state.read().await;
        let mut plans: Vec<_> = state.plans.values().cloned().collect();
        plans.sort_by_key(|plan| plan.created_at);
        Ok(plans)
    }

    async fn create_purchase(&self, new: NewPurchase) -> Result<PlanPurchase, LedgerError> {
        let purchase = PlanPurchase {
            id: Uuid::new_v4(),
            identity_id: new.identity_id,
            plan_id: new.plan_id,
            capacity: new.capacity,
            price: new.price,
            purchased_at: new.purchased_at,
        };
        self.state.write().await.purchases.push(purchase.clone());
        Ok(purchase)
    }

    async fn latest_purchase(
        &self,
        identity_id: IdentityId,
    ) -> Result<Option<PlanPurchase>, LedgerError> {
        let state = self.state.read().await;
        // Later insertion wins a timestamp tie.
        Ok(state
            .purchases
            .iter()
            .filter(|purchase| purchase.identity_id == identity_id)
            .fold(None::<&PlanPurchase>, |latest, purchase| match latest {
                Some(current) if current.purchased_at > purchase.purchased_at => Some(current),
                _ => Some(purchase),
            })
            .cloned())
    }

    async fn list_purchases(
        &self,
        identity_id: IdentityId,
    ) -> Result<Vec<PlanPurchase>, LedgerError> {
        let state = self.state.read().await;
        Ok(state
            .purchases
            .iter()
            .filter(|purchase| purchase.identity_id == identity_id)
            .cloned()
            .collect())
    }

    async fn sum_usage_since(
        &self,
        identity_id: IdentityId,
        since: DateTime<Utc>,
    ) -> Result<f64, LedgerError> {
        let state = self.state.read().await;
        Ok(state
            .usage
            .iter()
            .filter(|record| record.identity_id == identity_id && record.recorded_at >= since)
            .map(|record| record.amount)
            .sum())
    }

    async fn append_usage(&self, new: NewUsageRecord) -> Result<UsageRecord, LedgerError> {
        let record = UsageRecord {
            id: Uuid::new_v4(),
            identity_id: new.identity_id,
            amount: new.amount,
            recorded_at: new.recorded_at,
        };
        self.state.write().await.usage.push(record.clone());
        Ok(record)
    }

    async fn append_usage_batch(&self, records: &[NewUsageRecord]) -> Result<(), LedgerError> {
        let mut state = self.state.write().await;
        state.usage.extend(records.iter().map(|new| UsageRecord {
            id: Uuid::new_v4(),
            identity_id: new.identity_id,
            amount: new.amount,
            recorded_at: new.recorded_at,
        }));
        Ok(())
    }

    async fn usage_history(
        &self,
        identity_id: IdentityId,
    ) -> Result<Vec<UsageRecord>, LedgerError> {
        let state = self.state.read().await;
        let mut history: Vec<_> = state
            .usage
            .iter()
            .filter(|record| record.identity_id == identity_id)
            .cloned()
            .collect();
        history.sort_by_key(|record| record.recorded_at);
        Ok(history)
    }

    async fn usage_timeline(&self) -> Result<Vec<UsagePoint>, LedgerError> {
        let state = self.state.read().await;
        let mut buckets: BTreeMap<DateTime<Utc>, f64> = BTreeMap::new();
        for record in &state.usage {
            let second = record
                .recorded_at
                .duration_trunc(TimeDelta::seconds(1))
                .unwrap_or(record.recorded_at);
            *buckets.entry(second).or_default() += record.amount;
        }
        Ok(buckets
            .into_iter()
            .map(|(timestamp, total)| UsagePoint { timestamp, total })
            .collect())
    }
}
