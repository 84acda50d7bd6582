//! Provider customer management

use std::sync::Arc;

use uuid::Uuid;

use crate::error::BillingResult;
use crate::gateway::BillingGateway;
use crate::store::MembershipStore;

/// Customer service for managing provider customers
pub struct CustomerService {
    store: Arc<dyn MembershipStore>,
    gateway: Arc<dyn BillingGateway>,
}

impl CustomerService {
    pub fn new(store: Arc<dyn MembershipStore>, gateway: Arc<dyn BillingGateway>) -> Self {
        Self { store, gateway }
    }

    /// Return the account's provider customer id, creating one on first use.
    ///
    /// Idempotent: a cached id is returned without a provider call, and a
    /// newly created id is persisted before this returns so a retry can never
    /// create a duplicate customer.
    pub async fn ensure_customer(&self, account_id: Uuid, email: &str) -> BillingResult<String> {
        let record = self.store.get(account_id).await?;

        if let Some(customer_id) = record.stripe_customer_id {
            return Ok(customer_id);
        }

        let customer_id = self.gateway.create_customer(account_id, email).await?;
        self.store.set_customer_id(account_id, &customer_id).await?;

        tracing::info!(
            account_id = %account_id,
            customer_id = %customer_id,
            "Assigned billing customer to account"
        );

        Ok(customer_id)
    }
}
