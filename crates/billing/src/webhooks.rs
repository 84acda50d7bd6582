//! Webhook event processor
//!
//! Manual signature verification using the provider's `t=..,v1=..` header
//! scheme (HMAC-SHA256 over `"{timestamp}.{payload}"`). This is a workaround
//! for async-stripe's webhook module rejecting newer API-version payloads;
//! event bodies are parsed as raw JSON through `normalize` for the same
//! reason.
//!
//! Verification failures are the caller's 400. Everything after verification
//! is fire-and-acknowledge: the HTTP layer logs handler errors and still
//! returns 200 so the provider does not retry-storm us.

use std::sync::Arc;

use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use time::OffsetDateTime;
use uuid::Uuid;

use campus_shared::types::{MembershipRecord, MembershipTier};

use crate::enrollment::EnrollmentStore;
use crate::error::{BillingError, BillingResult};
use crate::gateway::BillingGateway;
use crate::normalize;
use crate::store::MembershipStore;

/// Reject signatures whose timestamp is further than this from now.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// A webhook delivery races the command service for the same row, so lost
/// CAS writes are re-read and reapplied up to this many times.
const CAS_RETRY_LIMIT: u32 = 3;

/// A verified, minimally parsed provider event.
#[derive(Debug, Clone)]
pub struct BillingEvent {
    pub id: String,
    pub event_type: String,
    /// The `data.object` payload, kept raw for tolerant extraction.
    pub object: Value,
}

pub struct WebhookService {
    store: Arc<dyn MembershipStore>,
    enrollments: Arc<dyn EnrollmentStore>,
    gateway: Arc<dyn BillingGateway>,
    webhook_secret: String,
}

impl WebhookService {
    pub fn new(
        store: Arc<dyn MembershipStore>,
        enrollments: Arc<dyn EnrollmentStore>,
        gateway: Arc<dyn BillingGateway>,
        webhook_secret: String,
    ) -> Self {
        Self {
            store,
            enrollments,
            gateway,
            webhook_secret,
        }
    }

    /// Verify the signature header and parse the event. Must be called before
    /// any other processing; an error here means the delivery is rejected
    /// with no state mutation.
    pub fn verify_event(&self, payload: &str, signature_header: &str) -> BillingResult<BillingEvent> {
        verify_signature(
            payload,
            signature_header,
            &self.webhook_secret,
            OffsetDateTime::now_utc().unix_timestamp(),
        )?;
        parse_event(payload)
    }

    /// Apply a verified event to the membership record.
    pub async fn handle_event(&self, event: &BillingEvent) -> BillingResult<()> {
        match event.event_type.as_str() {
            "checkout.session.completed" => self.handle_checkout_completed(event).await,
            "customer.subscription.updated" => self.handle_subscription_updated(event).await,
            "customer.subscription.deleted" => self.handle_subscription_deleted(event).await,
            other => {
                tracing::debug!(event_id = %event.id, event_type = %other, "Ignoring webhook event type");
                Ok(())
            }
        }
    }

    async fn handle_checkout_completed(&self, event: &BillingEvent) -> BillingResult<()> {
        let session = &event.object;

        let account_id = normalize::metadata_str(session, "account_id")
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| {
                BillingError::InvalidEvent(format!(
                    "checkout session {} has no account_id metadata",
                    event.id
                ))
            })?;

        let subscription_id = normalize::checkout_subscription_id(session).ok_or_else(|| {
            BillingError::InvalidEvent(format!(
                "checkout session {} has no subscription reference",
                event.id
            ))
        })?;

        let price_id = normalize::metadata_str(session, "price_id").map(str::to_owned);
        let course_id =
            normalize::metadata_str(session, "course_id").and_then(|s| Uuid::parse_str(s).ok());

        // The session payload never carries a period end; read it back from
        // the subscription itself.
        let period_end = match self.gateway.subscription_period_end(&subscription_id).await? {
            Some(end) => end,
            None => return Err(BillingError::PeriodEndUnavailable(subscription_id)),
        };

        self.apply_with_retry(account_id, |record| {
            record.tier = MembershipTier::Pro;
            record.stripe_subscription_id = Some(subscription_id.clone());
            record.stripe_price_id = price_id.clone();
            record.current_period_end = Some(period_end);
            record.cancel_at_period_end = false;
        })
        .await?;

        tracing::info!(
            event_id = %event.id,
            account_id = %account_id,
            subscription_id = %subscription_id,
            "Activated Pro membership from completed checkout"
        );

        if let Some(course_id) = course_id {
            let created = self.enrollments.create_if_absent(account_id, course_id).await?;
            if created {
                tracing::info!(
                    account_id = %account_id,
                    course_id = %course_id,
                    "Enrolled account in checkout target course"
                );
            }
        }

        Ok(())
    }

    async fn handle_subscription_updated(&self, event: &BillingEvent) -> BillingResult<()> {
        let subscription = &event.object;
        let subscription_id = normalize::object_id(subscription).ok_or_else(|| {
            BillingError::InvalidEvent(format!("subscription event {} has no object id", event.id))
        })?;

        let record = self
            .store
            .find_by_subscription(&subscription_id)
            .await?
            .ok_or_else(|| BillingError::SubscriptionNotFound(subscription_id.clone()))?;

        let active = normalize::status(subscription) == Some("active");
        let price_id = normalize::price_id(subscription);
        let period_end = normalize::period_end(subscription)
            .map(OffsetDateTime::from_unix_timestamp)
            .transpose()
            .map_err(|e| BillingError::InvalidEvent(format!("bad period end: {e}")))?;
        let cancel = normalize::cancel_at_period_end(subscription).unwrap_or(false);

        self.apply_with_retry(record.account_id, |record| {
            record.tier = if active {
                MembershipTier::Pro
            } else {
                MembershipTier::Free
            };
            record.stripe_price_id = price_id.clone();
            record.current_period_end = period_end;
            // A dropped tier cannot keep a scheduled cancellation.
            record.cancel_at_period_end = cancel && active;
        })
        .await?;

        tracing::info!(
            event_id = %event.id,
            account_id = %record.account_id,
            subscription_id = %subscription_id,
            active,
            cancel_at_period_end = cancel,
            "Synced membership from subscription update"
        );

        Ok(())
    }

    async fn handle_subscription_deleted(&self, event: &BillingEvent) -> BillingResult<()> {
        let subscription_id = normalize::object_id(&event.object).ok_or_else(|| {
            BillingError::InvalidEvent(format!("subscription event {} has no object id", event.id))
        })?;

        let record = self
            .store
            .find_by_subscription(&subscription_id)
            .await?
            .ok_or_else(|| BillingError::SubscriptionNotFound(subscription_id.clone()))?;

        self.apply_with_retry(record.account_id, |record| {
            record.tier = MembershipTier::Free;
            record.stripe_subscription_id = None;
            record.stripe_price_id = None;
            record.current_period_end = None;
            record.cancel_at_period_end = false;
        })
        .await?;

        tracing::info!(
            event_id = %event.id,
            account_id = %record.account_id,
            subscription_id = %subscription_id,
            "Cleared membership after subscription deletion"
        );

        Ok(())
    }

    async fn apply_with_retry<F>(&self, account_id: Uuid, apply: F) -> BillingResult<MembershipRecord>
    where
        F: Fn(&mut MembershipRecord),
    {
        let mut attempt = 0;
        loop {
            let mut record = self.store.get(account_id).await?;
            apply(&mut record);
            match self.store.replace(&record).await {
                Ok(stored) => return Ok(stored),
                Err(BillingError::ConcurrentModification(detail)) => {
                    attempt += 1;
                    if attempt >= CAS_RETRY_LIMIT {
                        return Err(BillingError::ConcurrentModification(detail));
                    }
                    tracing::debug!(
                        account_id = %account_id,
                        attempt,
                        "Lost membership write race, re-reading"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Verify a `t=..,v1=..` signature header against the payload.
fn verify_signature(
    payload: &str,
    header: &str,
    secret: &str,
    now_unix: i64,
) -> BillingResult<()> {
    let mut timestamp: Option<i64> = None;
    let mut candidates: Vec<&str> = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => candidates.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(BillingError::WebhookSignatureInvalid)?;
    if candidates.is_empty() {
        return Err(BillingError::WebhookSignatureInvalid);
    }
    if (now_unix - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(BillingError::WebhookSignatureInvalid);
    }

    let signed_payload = format!("{timestamp}.{payload}");
    for candidate in candidates {
        let Ok(expected) = hex::decode(candidate) else {
            continue;
        };
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .map_err(|_| BillingError::WebhookSignatureInvalid)?;
        mac.update(signed_payload.as_bytes());
        if mac.verify_slice(&expected).is_ok() {
            return Ok(());
        }
    }

    Err(BillingError::WebhookSignatureInvalid)
}

fn parse_event(payload: &str) -> BillingResult<BillingEvent> {
    let value: Value = serde_json::from_str(payload)
        .map_err(|e| BillingError::InvalidEvent(format!("malformed event payload: {e}")))?;

    let id = value
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| BillingError::InvalidEvent("event has no id".to_string()))?
        .to_string();
    let event_type = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| BillingError::InvalidEvent("event has no type".to_string()))?
        .to_string();
    let object = value
        .get("data")
        .and_then(|d| d.get("object"))
        .cloned()
        .ok_or_else(|| BillingError::InvalidEvent("event has no data.object".to_string()))?;

    Ok(BillingEvent {
        id,
        event_type,
        object,
    })
}
