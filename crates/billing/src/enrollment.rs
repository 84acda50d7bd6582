//! Enrollment store
//!
//! Creation is a single conditional insert guarded by the
//! `(account_id, course_id)` unique constraint, so a redelivered or concurrent
//! checkout-completed event cannot create a duplicate enrollment.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use campus_shared::types::Enrollment;

use crate::error::BillingResult;

#[async_trait]
pub trait EnrollmentStore: Send + Sync {
    async fn find(&self, account_id: Uuid, course_id: Uuid) -> BillingResult<Option<Enrollment>>;

    /// Insert unless the pair already exists. Returns whether a row was created.
    async fn create_if_absent(&self, account_id: Uuid, course_id: Uuid) -> BillingResult<bool>;
}

/// Postgres-backed enrollment store
pub struct PgEnrollmentStore {
    pool: PgPool,
}

impl PgEnrollmentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EnrollmentStore for PgEnrollmentStore {
    async fn find(&self, account_id: Uuid, course_id: Uuid) -> BillingResult<Option<Enrollment>> {
        let enrollment: Option<Enrollment> = sqlx::query_as(
            "SELECT id, account_id, course_id, created_at
             FROM enrollments
             WHERE account_id = $1 AND course_id = $2",
        )
        .bind(account_id)
        .bind(course_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(enrollment)
    }

    async fn create_if_absent(&self, account_id: Uuid, course_id: Uuid) -> BillingResult<bool> {
        let result = sqlx::query(
            "INSERT INTO enrollments (account_id, course_id)
             VALUES ($1, $2)
             ON CONFLICT (account_id, course_id) DO NOTHING",
        )
        .bind(account_id)
        .bind(course_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
