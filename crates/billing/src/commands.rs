//! Membership command service
//!
//! Synchronous, user-initiated tier operations. These never flip the tier to
//! Pro themselves: an upgrade only produces a checkout redirect, and payment
//! confirmation arrives later on the webhook path. Every provider call happens
//! before the local write, so an adapter failure leaves the record untouched.

use std::sync::Arc;

use campus_shared::types::MembershipTier;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::checkout::CheckoutService;
use crate::customer::CustomerService;
use crate::error::{BillingError, BillingResult};
use crate::gateway::BillingGateway;
use crate::store::MembershipStore;

/// Result of an upgrade request. The caller owns navigation.
#[derive(Debug, Clone)]
pub enum UpgradeOutcome {
    /// Send the user to the provider-hosted checkout.
    Redirect { checkout_url: String },
}

/// Result of a downgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DowngradeOutcome {
    /// No external subscription existed; the tier was dropped on the spot.
    Immediate,
    /// Cancellation is scheduled with the provider; Pro access continues
    /// until the returned period end.
    Scheduled { period_end: OffsetDateTime },
}

pub struct MembershipCommands {
    store: Arc<dyn MembershipStore>,
    gateway: Arc<dyn BillingGateway>,
    customers: CustomerService,
    checkout: CheckoutService,
}

impl MembershipCommands {
    pub fn new(
        store: Arc<dyn MembershipStore>,
        gateway: Arc<dyn BillingGateway>,
        customers: CustomerService,
        checkout: CheckoutService,
    ) -> Self {
        Self {
            store,
            gateway,
            customers,
            checkout,
        }
    }

    /// Start an upgrade to Pro by creating a checkout session.
    ///
    /// Re-selecting Pro while already Pro is an error unless a downgrade is
    /// pending, in which case buying again is a legitimate way back in.
    pub async fn request_upgrade(
        &self,
        account_id: Uuid,
        email: &str,
        course_id: Option<Uuid>,
    ) -> BillingResult<UpgradeOutcome> {
        let record = self.store.get(account_id).await?;

        if record.tier == MembershipTier::Pro && !record.cancel_at_period_end {
            return Err(BillingError::AlreadySubscribed(account_id.to_string()));
        }

        let customer_id = self.customers.ensure_customer(account_id, email).await?;
        let session = self
            .checkout
            .create_upgrade_session(account_id, &customer_id, course_id)
            .await?;

        Ok(UpgradeOutcome::Redirect {
            checkout_url: session.url,
        })
    }

    /// Downgrade to Free.
    ///
    /// With no external subscription (manually granted Pro) the tier drops
    /// immediately. Otherwise cancellation is scheduled with the provider and
    /// only recorded locally once the provider confirms the period end. If the
    /// provider toggled but the period-end read-back failed, the operation
    /// reports failure with the local record untouched; a later
    /// subscription-updated event re-syncs the record.
    pub async fn request_downgrade(&self, account_id: Uuid) -> BillingResult<DowngradeOutcome> {
        let mut record = self.store.get(account_id).await?;

        if record.tier == MembershipTier::Free {
            return Err(BillingError::NotSubscribed(account_id.to_string()));
        }

        let Some(subscription_id) = record.stripe_subscription_id.clone() else {
            record.tier = MembershipTier::Free;
            record.stripe_price_id = None;
            record.current_period_end = None;
            record.cancel_at_period_end = false;
            self.store.replace(&record).await?;

            tracing::info!(account_id = %account_id, "Downgraded manually granted Pro membership");
            return Ok(DowngradeOutcome::Immediate);
        };

        self.gateway
            .set_cancel_at_period_end(&subscription_id, true)
            .await?;

        let period_end = match self.gateway.subscription_period_end(&subscription_id).await {
            Ok(Some(end)) => end,
            Ok(None) => {
                tracing::warn!(
                    account_id = %account_id,
                    subscription_id = %subscription_id,
                    "Cancellation scheduled with provider but period end unavailable; local record left unchanged"
                );
                return Err(BillingError::PeriodEndUnavailable(subscription_id));
            }
            Err(e) => {
                tracing::warn!(
                    account_id = %account_id,
                    subscription_id = %subscription_id,
                    error = %e,
                    "Cancellation scheduled with provider but period end read-back failed; local record left unchanged"
                );
                return Err(e);
            }
        };

        record.cancel_at_period_end = true;
        record.current_period_end = Some(period_end);
        self.store.replace(&record).await?;

        tracing::info!(
            account_id = %account_id,
            subscription_id = %subscription_id,
            period_end = %period_end,
            "Scheduled downgrade at period end"
        );

        Ok(DowngradeOutcome::Scheduled { period_end })
    }

    /// Undo a scheduled downgrade, resuming auto-renewal.
    pub async fn cancel_scheduled_downgrade(&self, account_id: Uuid) -> BillingResult<()> {
        let mut record = self.store.get(account_id).await?;

        let Some(subscription_id) = record.stripe_subscription_id.clone() else {
            return Err(BillingError::SubscriptionNotFound(account_id.to_string()));
        };

        self.gateway
            .set_cancel_at_period_end(&subscription_id, false)
            .await?;

        record.cancel_at_period_end = false;
        self.store.replace(&record).await?;

        tracing::info!(
            account_id = %account_id,
            subscription_id = %subscription_id,
            "Resumed subscription, scheduled downgrade cancelled"
        );

        Ok(())
    }
}
