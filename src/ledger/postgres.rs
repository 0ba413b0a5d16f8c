//! PostgreSQL ledger. Schema lives in `sql/schema.sql`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, postgres::PgRow, PgPool, Row};
use std::time::Duration;
use tracing::{info_span, Instrument, Span};
use uuid::Uuid;

use super::{
    Identity, IdentityId, Ledger, LedgerError, NewIdentity, NewPendingRegistration, NewPurchase,
    NewUsageRecord, PendingRegistration, Plan, PlanDraft, PlanId, PlanPurchase, Role, UsagePoint,
    UsageRecord,
};

const SCHEMA_SQL: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/sql/schema.sql"));

const IDENTITY_COLUMNS: &str =
    "id, username, email, role, wallet_address, is_active, password_hash, created_at";
const PENDING_COLUMNS: &str =
    "id, username, email, role, wallet_address, password_hash, created_at";
const PLAN_COLUMNS: &str = "id, provider_id, name, capacity, price, created_at";
const PURCHASE_COLUMNS: &str = "id, identity_id, plan_id, capacity, price, purchased_at";

#[derive(Clone, Debug)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a small pool against `dsn`.
    ///
    /// # Errors
    /// Returns an error if the database cannot be reached.
    pub async fn connect(dsn: &str) -> Result<Self, LedgerError> {
        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(5)
            .max_lifetime(Duration::from_secs(60 * 2))
            .test_before_acquire(true)
            .connect(dsn)
            .await?;
        Ok(Self::new(pool))
    }

    /// Create missing tables and indexes. Safe to run on every start.
    ///
    /// # Errors
    /// Returns an error if a statement fails.
    pub async fn apply_schema(&self) -> Result<(), LedgerError> {
        sqlx::raw_sql(SCHEMA_SQL)
            .execute(&self.pool)
            .instrument(db_span("CREATE", "schema"))
            .await?;
        Ok(())
    }

    async fn fetch_identity(
        &self,
        column: &'static str,
        value: &str,
    ) -> Result<Option<Identity>, LedgerError> {
        let query = format!("SELECT {IDENTITY_COLUMNS} FROM identities WHERE {column} = $1");
        let row = sqlx::query(&query)
            .bind(value)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", "identities"))
            .await?;
        row.as_ref().map(identity_from_row).transpose()
    }

    async fn fetch_pending(
        &self,
        column: &'static str,
        value: &str,
    ) -> Result<Option<PendingRegistration>, LedgerError> {
        let query =
            format!("SELECT {PENDING_COLUMNS} FROM pending_registrations WHERE {column} = $1");
        let row = sqlx::query(&query)
            .bind(value)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", "pending_registrations"))
            .await?;
        row.as_ref().map(pending_from_row).transpose()
    }
}

fn db_span(operation: &'static str, table: &'static str) -> Span {
    info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.sql.table = table
    )
}

fn parse_role(value: &str) -> Result<Role, LedgerError> {
    Role::parse(value).ok_or_else(|| {
        LedgerError::Database(sqlx::Error::Decode(
            format!("unknown role: {value}").into(),
        ))
    })
}

fn identity_from_row(row: &PgRow) -> Result<Identity, LedgerError> {
    let role: String = row.try_get("role")?;
    Ok(Identity {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        role: parse_role(&role)?,
        wallet_address: row.try_get("wallet_address")?,
        is_active: row.try_get("is_active")?,
        password_hash: row.try_get("password_hash")?,
        created_at: row.try_get("created_at")?,
    })
}

fn pending_from_row(row: &PgRow) -> Result<PendingRegistration, LedgerError> {
    let role: String = row.try_get("role")?;
    Ok(PendingRegistration {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        role: parse_role(&role)?,
        wallet_address: row.try_get("wallet_address")?,
        password_hash: row.try_get("password_hash")?,
        created_at: row.try_get("created_at")?,
    })
}

fn plan_from_row(row: &PgRow) -> Result<Plan, LedgerError> {
    Ok(Plan {
        id: row.try_get("id")?,
        provider_id: row.try_get("provider_id")?,
        name: row.try_get("name")?,
        capacity: row.try_get("capacity")?,
        price: row.try_get("price")?,
        created_at: row.try_get("created_at")?,
    })
}

fn purchase_from_row(row: &PgRow) -> Result<PlanPurchase, LedgerError> {
    Ok(PlanPurchase {
        id: row.try_get("id")?,
        identity_id: row.try_get("identity_id")?,
        plan_id: row.try_get("plan_id")?,
        capacity: row.try_get("capacity")?,
        price: row.try_get("price")?,
        purchased_at: row.try_get("purchased_at")?,
    })
}

fn usage_from_row(row: &PgRow) -> Result<UsageRecord, LedgerError> {
    Ok(UsageRecord {
        id: row.try_get("id")?,
        identity_id: row.try_get("identity_id")?,
        amount: row.try_get("amount")?,
        recorded_at: row.try_get("recorded_at")?,
    })
}

/// Translate unique violations (`23505`) into `Duplicate` keyed by column.
fn map_unique(err: sqlx::Error) -> LedgerError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().is_some_and(|code| code.as_ref() == "23505") {
            let constraint = db_err.constraint().unwrap_or_default();
            let field = if constraint.contains("wallet") {
                "wallet_address"
            } else if constraint.contains("email") {
                "email"
            } else {
                "username"
            };
            return LedgerError::Duplicate(field);
        }
    }
    LedgerError::Database(err)
}

#[async_trait]
impl Ledger for PgLedger {
    async fn ping(&self) -> Result<(), LedgerError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .instrument(db_span("SELECT", "none"))
            .await?;
        Ok(())
    }

    async fn find_identity(&self, id: IdentityId) -> Result<Option<Identity>, LedgerError> {
        let query = format!("SELECT {IDENTITY_COLUMNS} FROM identities WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", "identities"))
            .await?;
        row.as_ref().map(identity_from_row).transpose()
    }

    async fn find_identity_by_username(
        &self,
        username: &str,
    ) -> Result<Option<Identity>, LedgerError> {
        self.fetch_identity("username", username).await
    }

    async fn find_identity_by_email(&self, email: &str) -> Result<Option<Identity>, LedgerError> {
        self.fetch_identity("email", email).await
    }

    async fn find_identity_by_wallet(
        &self,
        wallet: &str,
    ) -> Result<Option<Identity>, LedgerError> {
        self.fetch_identity("wallet_address", wallet).await
    }

    async fn find_pending(&self, id: Uuid) -> Result<Option<PendingRegistration>, LedgerError> {
        let query = format!("SELECT {PENDING_COLUMNS} FROM pending_registrations WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", "pending_registrations"))
            .await?;
        row.as_ref().map(pending_from_row).transpose()
    }

    async fn find_pending_by_username(
        &self,
        username: &str,
    ) -> Result<Option<PendingRegistration>, LedgerError> {
        self.fetch_pending("username", username).await
    }

    async fn find_pending_by_email(
        &self,
        email: &str,
    ) -> Result<Option<PendingRegistration>, LedgerError> {
        self.fetch_pending("email", email).await
    }

    async fn find_pending_by_wallet(
        &self,
        wallet: &str,
    ) -> Result<Option<PendingRegistration>, LedgerError> {
        self.fetch_pending("wallet_address", wallet).await
    }

    async fn list_pending(&self) -> Result<Vec<PendingRegistration>, LedgerError> {
        let query =
            format!("SELECT {PENDING_COLUMNS} FROM pending_registrations ORDER BY created_at");
        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", "pending_registrations"))
            .await?;
        rows.iter().map(pending_from_row).collect()
    }

    async fn create_identity(&self, new: NewIdentity) -> Result<Identity, LedgerError> {
        let query = format!(
            "INSERT INTO identities
                (id, username, email, role, wallet_address, password_hash, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING {IDENTITY_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(Uuid::now_v7())
            .bind(&new.username)
            .bind(&new.email)
            .bind(new.role.as_str())
            .bind(&new.wallet_address)
            .bind(&new.password_hash)
            .bind(new.created_at)
            .fetch_one(&self.pool)
            .instrument(db_span("INSERT", "identities"))
            .await
            .map_err(map_unique)?;
        identity_from_row(&row)
    }

    async fn create_pending(
        &self,
        new: NewPendingRegistration,
    ) -> Result<PendingRegistration, LedgerError> {
        let query = format!(
            "INSERT INTO pending_registrations
                (id, username, email, role, wallet_address, password_hash, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING {PENDING_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(Uuid::now_v7())
            .bind(&new.username)
            .bind(&new.email)
            .bind(new.role.as_str())
            .bind(&new.wallet_address)
            .bind(&new.password_hash)
            .bind(new.created_at)
            .fetch_one(&self.pool)
            .instrument(db_span("INSERT", "pending_registrations"))
            .await
            .map_err(map_unique)?;
        pending_from_row(&row)
    }

    async fn promote_pending(
        &self,
        id: Uuid,
        approved_at: DateTime<Utc>,
    ) -> Result<Option<Identity>, LedgerError> {
        let mut tx = self.pool.begin().await?;

        let query = format!(
            "DELETE FROM pending_registrations WHERE id = $1 RETURNING {PENDING_COLUMNS}"
        );
        let Some(row) = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&mut *tx)
            .instrument(db_span("DELETE", "pending_registrations"))
            .await?
        else {
            tx.rollback().await?;
            return Ok(None);
        };
        let pending = pending_from_row(&row)?;

        let query = format!(
            "INSERT INTO identities
                (id, username, email, role, wallet_address, password_hash, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING {IDENTITY_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(pending.id)
            .bind(&pending.username)
            .bind(&pending.email)
            .bind(pending.role.as_str())
            .bind(&pending.wallet_address)
            .bind(&pending.password_hash)
            .bind(approved_at)
            .fetch_one(&mut *tx)
            .instrument(db_span("INSERT", "identities"))
            .await
            .map_err(map_unique)?;
        let identity = identity_from_row(&row)?;

        tx.commit().await?;
        Ok(Some(identity))
    }

    async fn reject_pending(&self, id: Uuid) -> Result<bool, LedgerError> {
        let result = sqlx::query("DELETE FROM pending_registrations WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .instrument(db_span("DELETE", "pending_registrations"))
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_wallet(&self, id: IdentityId, wallet: &str) -> Result<bool, LedgerError> {
        let mut tx = self.pool.begin().await?;

        // Serializes against registrations claiming the same wallet.
        sqlx::query("LOCK TABLE pending_registrations IN SHARE ROW EXCLUSIVE MODE")
            .execute(&mut *tx)
            .instrument(db_span("LOCK", "pending_registrations"))
            .await?;
        let claimed: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM pending_registrations WHERE wallet_address = $1)",
        )
        .bind(wallet)
        .fetch_one(&mut *tx)
        .instrument(db_span("SELECT", "pending_registrations"))
        .await?;
        if claimed {
            tx.rollback().await?;
            return Err(LedgerError::Duplicate("wallet_address"));
        }

        let result = sqlx::query(
            "UPDATE identities SET wallet_address = $2 WHERE id = $1 AND wallet_address IS NULL",
        )
        .bind(id)
        .bind(wallet)
        .execute(&mut *tx)
        .instrument(db_span("UPDATE", "identities"))
        .await
        .map_err(map_unique)?;

        tx.commit().await?;
        Ok(result.rows_affected() == 1)
    }

    async fn create_plan(
        &self,
        provider_id: IdentityId,
        draft: PlanDraft,
        created_at: DateTime<Utc>,
    ) -> Result<Plan, LedgerError> {
        let query = format!(
            "INSERT INTO plans (id, provider_id, name, capacity, price, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {PLAN_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(Uuid::now_v7())
            .bind(provider_id)
            .bind(&draft.name)
            .bind(draft.capacity)
            .bind(draft.price)
            .bind(created_at)
            .fetch_one(&self.pool)
            .instrument(db_span("INSERT", "plans"))
            .await?;
        plan_from_row(&row)
    }

    async fn update_plan(
        &self,
        id: PlanId,
        draft: PlanDraft,
    ) -> Result<Option<Plan>, LedgerError> {
        let query = format!(
            "UPDATE plans SET name = $2, capacity = $3, price = $4
             WHERE id = $1
             RETURNING {PLAN_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(id)
            .bind(&draft.name)
            .bind(draft.capacity)
            .bind(draft.price)
            .fetch_optional(&self.pool)
            .instrument(db_span("UPDATE", "plans"))
            .await?;
        row.as_ref().map(plan_from_row).transpose()
    }

    async fn delete_plan(&self, id: PlanId) -> Result<bool, LedgerError> {
        let result = sqlx::query("DELETE FROM plans WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .instrument(db_span("DELETE", "plans"))
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_plan(&self, id: PlanId) -> Result<Option<Plan>, LedgerError> {
        let query = format!("SELECT {PLAN_COLUMNS} FROM plans WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", "plans"))
            .await?;
        row.as_ref().map(plan_from_row).transpose()
    }

    async fn list_plans(&self) -> Result<Vec<Plan>, LedgerError> {
        let query = format!("SELECT {PLAN_COLUMNS} FROM plans ORDER BY created_at");
        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", "plans"))
            .await?;
        rows.iter().map(plan_from_row).collect()
    }

    async fn create_purchase(&self, new: NewPurchase) -> Result<PlanPurchase, LedgerError> {
        let query = format!(
            "INSERT INTO plan_purchases (id, identity_id, plan_id, capacity, price, purchased_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {PURCHASE_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(Uuid::now_v7())
            .bind(new.identity_id)
            .bind(new.plan_id)
            .bind(new.capacity)
            .bind(new.price)
            .bind(new.purchased_at)
            .fetch_one(&self.pool)
            .instrument(db_span("INSERT", "plan_purchases"))
            .await?;
        purchase_from_row(&row)
    }

    async fn latest_purchase(
        &self,
        identity_id: IdentityId,
    ) -> Result<Option<PlanPurchase>, LedgerError> {
        let query = format!(
            "SELECT {PURCHASE_COLUMNS} FROM plan_purchases
             WHERE identity_id = $1
             ORDER BY purchased_at DESC, id DESC
             LIMIT 1"
        );
        let row = sqlx::query(&query)
            .bind(identity_id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", "plan_purchases"))
            .await?;
        row.as_ref().map(purchase_from_row).transpose()
    }

    async fn list_purchases(
        &self,
        identity_id: IdentityId,
    ) -> Result<Vec<PlanPurchase>, LedgerError> {
        let query = format!(
            "SELECT {PURCHASE_COLUMNS} FROM plan_purchases
             WHERE identity_id = $1
             ORDER BY purchased_at"
        );
        let rows = sqlx::query(&query)
            .bind(identity_id)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", "plan_purchases"))
            .await?;
        rows.iter().map(purchase_from_row).collect()
    }

    async fn sum_usage_since(
        &self,
        identity_id: IdentityId,
        since: DateTime<Utc>,
    ) -> Result<f64, LedgerError> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(amount), 0)::float8 AS total
             FROM usage_records
             WHERE identity_id = $1 AND recorded_at >= $2",
        )
        .bind(identity_id)
        .bind(since)
        .fetch_one(&self.pool)
        .instrument(db_span("SELECT", "usage_records"))
        .await?;
        Ok(row.try_get("total")?)
    }

    async fn append_usage(&self, new: NewUsageRecord) -> Result<UsageRecord, LedgerError> {
        let row = sqlx::query(
            "INSERT INTO usage_records (id, identity_id, amount, recorded_at)
             VALUES ($1, $2, $3, $4)
             RETURNING id, identity_id, amount, recorded_at",
        )
        .bind(Uuid::now_v7())
        .bind(new.identity_id)
        .bind(new.amount)
        .bind(new.recorded_at)
        .fetch_one(&self.pool)
        .instrument(db_span("INSERT", "usage_records"))
        .await?;
        usage_from_row(&row)
    }

    async fn append_usage_batch(&self, records: &[NewUsageRecord]) -> Result<(), LedgerError> {
        let mut tx = self.pool.begin().await?;
        for record in records {
            sqlx::query(
                "INSERT INTO usage_records (id, identity_id, amount, recorded_at)
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(Uuid::now_v7())
            .bind(record.identity_id)
            .bind(record.amount)
            .bind(record.recorded_at)
            .execute(&mut *tx)
            .instrument(db_span("INSERT", "usage_records"))
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn usage_history(
        &self,
        identity_id: IdentityId,
    ) -> Result<Vec<UsageRecord>, LedgerError> {
        let rows = sqlx::query(
            "SELECT id, identity_id, amount, recorded_at
             FROM usage_records
             WHERE identity_id = $1
             ORDER BY recorded_at",
        )
        .bind(identity_id)
        .fetch_all(&self.pool)
        .instrument(db_span("SELECT", "usage_records"))
        .await?;
        rows.iter().map(usage_from_row).collect()
    }

    async fn usage_timeline(&self) -> Result<Vec<UsagePoint>, LedgerError> {
        let rows = sqlx::query(
            "SELECT date_trunc('second', recorded_at) AS bucket, SUM(amount)::float8 AS total
             FROM usage_records
             GROUP BY bucket
             ORDER BY bucket",
        )
        .fetch_all(&self.pool)
        .instrument(db_span("SELECT", "usage_records"))
        .await?;
        rows.iter()
            .map(|row| {
                Ok(UsagePoint {
                    timestamp: row.try_get("bucket")?,
                    total: row.try_get("total")?,
                })
            })
            .collect()
    }
}
