//! Checkout session construction

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::error::BillingResult;
use crate::gateway::{BillingGateway, CheckoutParams, CheckoutSessionInfo};

/// Builds provider checkout sessions for Pro upgrades.
pub struct CheckoutService {
    gateway: Arc<dyn BillingGateway>,
    price_pro: String,
    app_base_url: String,
}

impl CheckoutService {
    pub fn new(gateway: Arc<dyn BillingGateway>, price_pro: String, app_base_url: String) -> Self {
        Self {
            gateway,
            price_pro,
            app_base_url,
        }
    }

    /// Create a subscription checkout for the Pro tier.
    ///
    /// Metadata carries the account id, the price, and the optional target
    /// course so the webhook path can flip the tier and auto-enroll without a
    /// second round-trip to the client. The success URL carries the explicit
    /// marker the reconciliation poller requires.
    pub async fn create_upgrade_session(
        &self,
        account_id: Uuid,
        customer_id: &str,
        course_id: Option<Uuid>,
    ) -> BillingResult<CheckoutSessionInfo> {
        let mut success_url = format!(
            "{}/billing/success?checkout=success&session_id={{CHECKOUT_SESSION_ID}}",
            self.app_base_url
        );
        if let Some(course) = course_id {
            success_url.push_str(&format!("&course={course}"));
        }
        let cancel_url = format!("{}/pricing", self.app_base_url);

        let mut metadata = HashMap::new();
        metadata.insert("account_id".to_string(), account_id.to_string());
        metadata.insert("price_id".to_string(), self.price_pro.clone());
        if let Some(course) = course_id {
            metadata.insert("course_id".to_string(), course.to_string());
        }

        let session = self
            .gateway
            .create_checkout_session(CheckoutParams {
                customer_id: customer_id.to_string(),
                price_id: self.price_pro.clone(),
                success_url,
                cancel_url,
                metadata,
            })
            .await?;

        tracing::info!(
            account_id = %account_id,
            session_id = %session.session_id,
            course_id = ?course_id,
            "Created upgrade checkout session"
        );

        Ok(session)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::testing::MockGateway;

    #[tokio::test]
    async fn test_checkout_metadata_carries_webhook_context() {
        let gateway = Arc::new(MockGateway::new());
        let service = CheckoutService::new(
            gateway.clone(),
            "price_pro".to_string(),
            "https://campus.test".to_string(),
        );

        let account_id = Uuid::new_v4();
        let course_id = Uuid::new_v4();
        service
            .create_upgrade_session(account_id, "cus_1", Some(course_id))
            .await
            .unwrap();

        let params = gateway.last_checkout_params().unwrap();
        assert_eq!(
            params.metadata.get("account_id"),
            Some(&account_id.to_string())
        );
        assert_eq!(params.metadata.get("course_id"), Some(&course_id.to_string()));
        assert_eq!(params.metadata.get("price_id"), Some(&"price_pro".to_string()));
        assert!(params.success_url.contains("checkout=success"));
        assert!(params.success_url.contains(&format!("course={course_id}")));
    }

    #[tokio::test]
    async fn test_checkout_without_course_omits_course_param() {
        let gateway = Arc::new(MockGateway::new());
        let service = CheckoutService::new(
            gateway.clone(),
            "price_pro".to_string(),
            "https://campus.test".to_string(),
        );

        service
            .create_upgrade_session(Uuid::new_v4(), "cus_1", None)
            .await
            .unwrap();

        let params = gateway.last_checkout_params().unwrap();
        assert!(!params.success_url.contains("course="));
        assert!(!params.metadata.contains_key("course_id"));
    }
}
