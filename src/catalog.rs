//! WiFi plans offered by providers.

use std::sync::Arc;
use tracing::{info, instrument};

use crate::{
    auth::Principal,
    clock::Clock,
    error::{Error, Result},
    ledger::{Ledger, Plan, PlanDraft, PlanId},
    registration::require_provider,
};

fn validate(draft: PlanDraft) -> Result<PlanDraft> {
    let name = draft.name.trim();
    if name.is_empty() {
        return Err(Error::InvalidInput("plan name must not be empty".to_string()));
    }
    if !draft.capacity.is_finite() || draft.capacity <= 0.0 {
        return Err(Error::InvalidInput("capacity must be positive".to_string()));
    }
    if !draft.price.is_finite() || draft.price < 0.0 {
        return Err(Error::InvalidInput("price must not be negative".to_string()));
    }
    Ok(PlanDraft {
        name: name.to_string(),
        ..draft
    })
}

pub struct PlanCatalog {
    ledger: Arc<dyn Ledger>,
    clock: Arc<dyn Clock>,
}

impl PlanCatalog {
    #[must_use]
    pub fn new(ledger: Arc<dyn Ledger>, clock: Arc<dyn Clock>) -> Self {
        Self { ledger, clock }
    }

    /// # Errors
    /// `Storage`.
    pub async fn list_plans(&self) -> Result<Vec<Plan>> {
        Ok(self.ledger.list_plans().await?)
    }

    /// # Errors
    /// `Forbidden`, `InvalidInput` or `Storage`.
    #[instrument(skip(self, principal, draft), fields(provider = %principal.username))]
    pub async fn create_plan(&self, principal: &Principal, draft: PlanDraft) -> Result<Plan> {
        require_provider(principal)?;
        let draft = validate(draft)?;
        let plan = self
            .ledger
            .create_plan(principal.identity_id, draft, self.clock.now())
            .await?;
        info!(plan_id = %plan.id, name = %plan.name, "plan created");
        Ok(plan)
    }

    async fn owned_plan(&self, principal: &Principal, id: PlanId) -> Result<Plan> {
        require_provider(principal)?;
        let plan = self
            .ledger
            .find_plan(id)
            .await?
            .ok_or(Error::NotFound("plan"))?;
        if plan.provider_id != principal.identity_id {
            return Err(Error::Forbidden);
        }
        Ok(plan)
    }

    /// Edits never touch existing purchases; those keep their snapshot.
    ///
    /// # Errors
    /// `Forbidden`, `NotFound`, `InvalidInput` or `Storage`.
    #[instrument(skip(self, principal, draft), fields(provider = %principal.username))]
    pub async fn update_plan(
        &self,
        principal: &Principal,
        id: PlanId,
        draft: PlanDraft,
    ) -> Result<Plan> {
        self.owned_plan(principal, id).await?;
        let draft = validate(draft)?;
        let plan = self
            .ledger
            .update_plan(id, draft)
            .await?
            .ok_or(Error::NotFound("plan"))?;
        info!(plan_id = %plan.id, "plan updated");
        Ok(plan)
    }

    /// # Errors
    /// `Forbidden`, `NotFound` or `Storage`.
    #[instrument(skip(self, principal), fields(provider = %principal.username))]
    pub async fn delete_plan(&self, principal: &Principal, id: PlanId) -> Result<()> {
        self.owned_plan(principal, id).await?;
        if !self.ledger.delete_plan(id).await? {
            return Err(Error::NotFound("plan"));
        }
        info!(plan_id = %id, "plan deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::ManualClock,
        ledger::{MemoryLedger, Role},
    };
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn catalog() -> PlanCatalog {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 1, 6, 9, 0, 0).unwrap(),
        ));
        PlanCatalog::new(Arc::new(MemoryLedger::new()), clock)
    }

    fn caller(role: Role) -> Principal {
        Principal {
            identity_id: Uuid::new_v4(),
            username: "caller".to_string(),
            role,
            temporary: false,
        }
    }

    fn draft(name: &str, capacity: f64, price: f64) -> PlanDraft {
        PlanDraft {
            name: name.to_string(),
            capacity,
            price,
        }
    }

    #[tokio::test]
    async fn provider_manages_own_plans() {
        let catalog = catalog();
        let isp = caller(Role::Provider);

        let plan = catalog
            .create_plan(&isp, draft(" Basic ", 1000.0, 5.0))
            .await
            .unwrap();
        assert_eq!(plan.name, "Basic");
        assert_eq!(plan.provider_id, isp.identity_id);

        let updated = catalog
            .update_plan(&isp, plan.id, draft("Basic+", 2000.0, 8.0))
            .await
            .unwrap();
        assert!((updated.capacity - 2000.0).abs() < f64::EPSILON);
        assert_eq!(catalog.list_plans().await.unwrap(), vec![updated]);

        catalog.delete_plan(&isp, plan.id).await.unwrap();
        assert!(catalog.list_plans().await.unwrap().is_empty());
        assert!(matches!(
            catalog.delete_plan(&isp, plan.id).await,
            Err(Error::NotFound("plan"))
        ));
    }

    #[tokio::test]
    async fn other_callers_are_forbidden() {
        let catalog = catalog();
        let owner = caller(Role::Provider);
        let plan = catalog
            .create_plan(&owner, draft("Basic", 1000.0, 5.0))
            .await
            .unwrap();

        let user = caller(Role::User);
        assert!(matches!(
            catalog.create_plan(&user, draft("Free", 1.0, 0.0)).await,
            Err(Error::Forbidden)
        ));

        let other = caller(Role::Provider);
        assert!(matches!(
            catalog
                .update_plan(&other, plan.id, draft("Mine", 1.0, 0.0))
                .await,
            Err(Error::Forbidden)
        ));
        assert!(matches!(
            catalog.delete_plan(&other, plan.id).await,
            Err(Error::Forbidden)
        ));
    }

    #[tokio::test]
    async fn drafts_are_validated() {
        let catalog = catalog();
        let isp = caller(Role::Provider);
        for bad in [
            draft("", 10.0, 1.0),
            draft("Zero", 0.0, 1.0),
            draft("Negative", 10.0, -1.0),
            draft("Nan", f64::NAN, 1.0),
        ] {
            assert!(matches!(
                catalog.create_plan(&isp, bad).await,
                Err(Error::InvalidInput(_))
            ));
        }
        catalog
            .create_plan(&isp, draft("Free", 10.0, 0.0))
            .await
            .unwrap();
    }
}
