//! Membership record store
//!
//! The webhook processor and the command service race against the same rows,
//! so every write is compare-and-swap on the record's `version` column. A lost
//! race surfaces as [`BillingError::ConcurrentModification`] instead of a
//! silent overwrite.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use campus_shared::types::MembershipRecord;

use crate::error::{BillingError, BillingResult};

/// Port over durable membership state.
#[async_trait]
pub trait MembershipStore: Send + Sync {
    /// Fetch the record for an account. A missing record is a fatal
    /// precondition violation: every registered account has one.
    async fn get(&self, account_id: Uuid) -> BillingResult<MembershipRecord>;

    /// Look up the record owning an external subscription id.
    async fn find_by_subscription(
        &self,
        subscription_id: &str,
    ) -> BillingResult<Option<MembershipRecord>>;

    /// Persist the external customer id. Write-once: fails with
    /// `ConcurrentModification` if a different id is already stored.
    async fn set_customer_id(&self, account_id: Uuid, customer_id: &str) -> BillingResult<()>;

    /// Replace the mutable membership fields, CAS on `record.version`.
    /// Returns the stored record with its bumped version.
    async fn replace(&self, record: &MembershipRecord) -> BillingResult<MembershipRecord>;
}

const RECORD_COLUMNS: &str = "account_id, tier, stripe_customer_id, stripe_subscription_id, \
     stripe_price_id, current_period_end, cancel_at_period_end, version, updated_at";

/// Postgres-backed membership store
pub struct PgMembershipStore {
    pool: PgPool,
}

impl PgMembershipStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MembershipStore for PgMembershipStore {
    async fn get(&self, account_id: Uuid) -> BillingResult<MembershipRecord> {
        let record: Option<MembershipRecord> = sqlx::query_as(&format!(
            "SELECT {RECORD_COLUMNS} FROM memberships WHERE account_id = $1"
        ))
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        record.ok_or_else(|| BillingError::MembershipNotFound(account_id.to_string()))
    }

    async fn find_by_subscription(
        &self,
        subscription_id: &str,
    ) -> BillingResult<Option<MembershipRecord>> {
        let record: Option<MembershipRecord> = sqlx::query_as(&format!(
            "SELECT {RECORD_COLUMNS} FROM memberships WHERE stripe_subscription_id = $1"
        ))
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn set_customer_id(&self, account_id: Uuid, customer_id: &str) -> BillingResult<()> {
        let result = sqlx::query(
            "UPDATE memberships
             SET stripe_customer_id = $1, version = version + 1, updated_at = NOW()
             WHERE account_id = $2 AND stripe_customer_id IS NULL",
        )
        .bind(customer_id)
        .bind(account_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        // Either the record is missing or another writer got here first.
        let current = self.get(account_id).await?;
        if current.stripe_customer_id.as_deref() == Some(customer_id) {
            Ok(())
        } else {
            Err(BillingError::ConcurrentModification(format!(
                "customer id already set for account {account_id}"
            )))
        }
    }

    async fn replace(&self, record: &MembershipRecord) -> BillingResult<MembershipRecord> {
        if !record.invariants_hold() {
            return Err(BillingError::Internal(format!(
                "membership invariant violated for account {}",
                record.account_id
            )));
        }

        let updated: Option<MembershipRecord> = sqlx::query_as(&format!(
            "UPDATE memberships
             SET tier = $1,
                 stripe_subscription_id = $2,
                 stripe_price_id = $3,
                 current_period_end = $4,
                 cancel_at_period_end = $5,
                 version = version + 1,
                 updated_at = NOW()
             WHERE account_id = $6 AND version = $7
             RETURNING {RECORD_COLUMNS}"
        ))
        .bind(record.tier.as_str())
        .bind(&record.stripe_subscription_id)
        .bind(&record.stripe_price_id)
        .bind(record.current_period_end)
        .bind(record.cancel_at_period_end)
        .bind(record.account_id)
        .bind(record.version)
        .fetch_optional(&self.pool)
        .await?;

        updated.ok_or_else(|| {
            BillingError::ConcurrentModification(format!(
                "membership for account {} changed since version {}",
                record.account_id, record.version
            ))
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use campus_shared::db::create_pool;
    use campus_shared::types::MembershipTier;

    async fn seeded_store() -> (PgMembershipStore, Uuid) {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
        let pool = create_pool(&url, 5).await.expect("pool");
        let account_id = Uuid::new_v4();
        sqlx::query("INSERT INTO accounts (id, email) VALUES ($1, $2)")
            .bind(account_id)
            .bind(format!("{account_id}@test.local"))
            .execute(&pool)
            .await
            .expect("insert account");
        sqlx::query("INSERT INTO memberships (account_id) VALUES ($1)")
            .bind(account_id)
            .execute(&pool)
            .await
            .expect("insert membership");
        (PgMembershipStore::new(pool), account_id)
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_replace_is_cas_on_version() {
        let (store, account_id) = seeded_store().await;

        let mut rec = store.get(account_id).await.unwrap();
        rec.tier = MembershipTier::Pro;
        rec.stripe_subscription_id = Some("sub_cas".to_string());
        let updated = store.replace(&rec).await.unwrap();
        assert_eq!(updated.version, rec.version + 1);

        // The stale copy must now lose.
        let err = store.replace(&rec).await.unwrap_err();
        assert!(matches!(err, BillingError::ConcurrentModification(_)));
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_set_customer_id_is_write_once() {
        let (store, account_id) = seeded_store().await;

        store.set_customer_id(account_id, "cus_a").await.unwrap();
        // Same value is fine on retry.
        store.set_customer_id(account_id, "cus_a").await.unwrap();
        // A different value is not.
        let err = store.set_customer_id(account_id, "cus_b").await.unwrap_err();
        assert!(matches!(err, BillingError::ConcurrentModification(_)));
    }
}
