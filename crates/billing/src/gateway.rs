//! External billing gateway adapter
//!
//! Thin typed wrappers over the provider API. Each operation surfaces errors
//! explicitly; none of them touch the local membership record.

use std::collections::HashMap;

use async_trait::async_trait;
use stripe::{
    CheckoutSession, CheckoutSessionMode, CreateCheckoutSession, CreateCheckoutSessionLineItems,
    CreateCustomer, Customer, CustomerId, Subscription, SubscriptionId, UpdateSubscription,
};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};
use crate::normalize;

/// Parameters for a provider-hosted checkout session.
#[derive(Debug, Clone)]
pub struct CheckoutParams {
    pub customer_id: String,
    pub price_id: String,
    pub success_url: String,
    pub cancel_url: String,
    /// Must carry enough context (account id, optional course) for the
    /// webhook path to finish without another client round-trip.
    pub metadata: HashMap<String, String>,
}

/// Created checkout session
#[derive(Debug, Clone)]
pub struct CheckoutSessionInfo {
    pub session_id: String,
    pub url: String,
}

/// Port over the external billing provider.
#[async_trait]
pub trait BillingGateway: Send + Sync {
    /// Create a provider customer for the account. Callers are responsible for
    /// caching the returned id; see `CustomerService::ensure_customer`.
    async fn create_customer(&self, account_id: Uuid, email: &str) -> BillingResult<String>;

    async fn create_checkout_session(
        &self,
        params: CheckoutParams,
    ) -> BillingResult<CheckoutSessionInfo>;

    /// Toggle the provider's auto-renew flag. Does not change tier.
    async fn set_cancel_at_period_end(
        &self,
        subscription_id: &str,
        cancel: bool,
    ) -> BillingResult<()>;

    /// Read the current billing-period end. `None` means the provider did not
    /// report one anywhere; callers must treat that as fatal, not guess.
    async fn subscription_period_end(
        &self,
        subscription_id: &str,
    ) -> BillingResult<Option<OffsetDateTime>>;
}

/// Stripe-backed gateway
pub struct StripeGateway {
    stripe: StripeClient,
}

impl StripeGateway {
    pub fn new(stripe: StripeClient) -> Self {
        Self { stripe }
    }

    fn parse_customer_id(customer_id: &str) -> BillingResult<CustomerId> {
        customer_id
            .parse::<CustomerId>()
            .map_err(|e| BillingError::StripeApi(format!("Invalid customer ID: {}", e)))
    }

    fn parse_subscription_id(subscription_id: &str) -> BillingResult<SubscriptionId> {
        subscription_id
            .parse::<SubscriptionId>()
            .map_err(|e| BillingError::StripeApi(format!("Invalid subscription ID: {}", e)))
    }
}

#[async_trait]
impl BillingGateway for StripeGateway {
    async fn create_customer(&self, account_id: Uuid, email: &str) -> BillingResult<String> {
        let mut metadata = HashMap::new();
        metadata.insert("account_id".to_string(), account_id.to_string());
        metadata.insert("platform".to_string(), "campus".to_string());

        let params = CreateCustomer {
            email: Some(email),
            metadata: Some(metadata),
            ..Default::default()
        };

        let customer = Customer::create(self.stripe.inner(), params).await?;

        tracing::info!(
            account_id = %account_id,
            customer_id = %customer.id,
            "Created Stripe customer"
        );

        Ok(customer.id.to_string())
    }

    async fn create_checkout_session(
        &self,
        params: CheckoutParams,
    ) -> BillingResult<CheckoutSessionInfo> {
        let customer_id = Self::parse_customer_id(&params.customer_id)?;

        let create = CreateCheckoutSession {
            customer: Some(customer_id),
            mode: Some(CheckoutSessionMode::Subscription),
            line_items: Some(vec![CreateCheckoutSessionLineItems {
                price: Some(params.price_id.clone()),
                quantity: Some(1),
                ..Default::default()
            }]),
            success_url: Some(&params.success_url),
            cancel_url: Some(&params.cancel_url),
            metadata: Some(params.metadata.clone()),
            allow_promotion_codes: Some(true),
            ..Default::default()
        };

        let session = CheckoutSession::create(self.stripe.inner(), create).await?;

        let url = session
            .url
            .ok_or_else(|| BillingError::StripeApi("Checkout session has no URL".to_string()))?;

        tracing::info!(
            session_id = %session.id,
            price_id = %params.price_id,
            "Created checkout session"
        );

        Ok(CheckoutSessionInfo {
            session_id: session.id.to_string(),
            url,
        })
    }

    async fn set_cancel_at_period_end(
        &self,
        subscription_id: &str,
        cancel: bool,
    ) -> BillingResult<()> {
        let sub_id = Self::parse_subscription_id(subscription_id)?;

        Subscription::update(
            self.stripe.inner(),
            &sub_id,
            UpdateSubscription {
                cancel_at_period_end: Some(cancel),
                ..Default::default()
            },
        )
        .await?;

        tracing::info!(
            subscription_id = %subscription_id,
            cancel_at_period_end = cancel,
            "Updated subscription auto-renew flag"
        );

        Ok(())
    }

    async fn subscription_period_end(
        &self,
        subscription_id: &str,
    ) -> BillingResult<Option<OffsetDateTime>> {
        let sub_id = Self::parse_subscription_id(subscription_id)?;

        let subscription = Subscription::retrieve(self.stripe.inner(), &sub_id, &[]).await?;

        // The period end has lived at the subscription level and inside the
        // first billed item depending on API version; normalize over the raw
        // shape rather than trusting one field path.
        let raw = serde_json::to_value(&subscription)
            .map_err(|e| BillingError::Internal(format!("serialize subscription: {}", e)))?;

        match normalize::period_end(&raw) {
            Some(ts) => {
                let end = OffsetDateTime::from_unix_timestamp(ts).map_err(|e| {
                    BillingError::StripeApi(format!("Invalid period end timestamp {ts}: {e}"))
                })?;
                Ok(Some(end))
            }
            None => Ok(None),
        }
    }
}
