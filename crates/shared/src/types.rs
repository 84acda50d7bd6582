//! Core domain types for the Campus platform

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Membership tier controlling content access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MembershipTier {
    #[default]
    Free,
    Pro,
}

impl MembershipTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            MembershipTier::Free => "free",
            MembershipTier::Pro => "pro",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "free" => Some(MembershipTier::Free),
            "pro" => Some(MembershipTier::Pro),
            _ => None,
        }
    }

    pub fn is_pro(&self) -> bool {
        matches!(self, MembershipTier::Pro)
    }
}

impl std::fmt::Display for MembershipTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Role carried in session claims
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Student,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Student => "student",
            UserRole::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "student" => Some(UserRole::Student),
            "admin" => Some(UserRole::Admin),
            _ => None,
        }
    }
}

/// Durable membership state, one row per account.
///
/// `version` is bumped on every write; updates are compare-and-swap on it so
/// webhook-vs-command races surface as conflicts instead of silent overwrites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MembershipRecord {
    pub account_id: Uuid,
    pub tier: MembershipTier,
    /// Stable once assigned, never reassigned.
    pub stripe_customer_id: Option<String>,
    /// Present only while a subscription exists.
    pub stripe_subscription_id: Option<String>,
    pub stripe_price_id: Option<String>,
    /// Meaningful only when `stripe_subscription_id` is set.
    pub current_period_end: Option<OffsetDateTime>,
    /// True when a downgrade is scheduled but not yet effective.
    pub cancel_at_period_end: bool,
    pub version: i64,
    pub updated_at: OffsetDateTime,
}

impl MembershipRecord {
    /// Record as created at registration: free tier, no external identifiers.
    pub fn new(account_id: Uuid) -> Self {
        Self {
            account_id,
            tier: MembershipTier::Free,
            stripe_customer_id: None,
            stripe_subscription_id: None,
            stripe_price_id: None,
            current_period_end: None,
            cancel_at_period_end: false,
            version: 1,
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    /// `cancel_at_period_end` implies an active Pro subscription, and a free
    /// tier never has a pending cancellation.
    pub fn invariants_hold(&self) -> bool {
        if self.cancel_at_period_end
            && (self.tier != MembershipTier::Pro || self.stripe_subscription_id.is_none())
        {
            return false;
        }
        if self.tier == MembershipTier::Free && self.cancel_at_period_end {
            return false;
        }
        true
    }

    pub fn pro_active(&self) -> bool {
        self.tier.is_pro()
    }
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for MembershipRecord {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        let tier: String = row.try_get("tier")?;
        let tier = MembershipTier::parse(&tier)
            .ok_or_else(|| sqlx::Error::Decode(format!("unknown membership tier: {tier}").into()))?;
        Ok(Self {
            account_id: row.try_get("account_id")?,
            tier,
            stripe_customer_id: row.try_get("stripe_customer_id")?,
            stripe_subscription_id: row.try_get("stripe_subscription_id")?,
            stripe_price_id: row.try_get("stripe_price_id")?,
            current_period_end: row.try_get("current_period_end")?,
            cancel_at_period_end: row.try_get("cancel_at_period_end")?,
            version: row.try_get("version")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// A student's enrollment in a course. At most one per (account, course) pair,
/// enforced by a unique constraint at the storage layer.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Enrollment {
    pub id: Uuid,
    pub account_id: Uuid,
    pub course_id: Uuid,
    pub created_at: OffsetDateTime,
}
