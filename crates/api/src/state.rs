//! Shared application state

use std::sync::Arc;

use sqlx::PgPool;

use campus_billing::{
    BillingGateway, CheckoutService, CustomerService, EnrollmentStore, MembershipCommands,
    MembershipStore, PgEnrollmentStore, PgMembershipStore, StripeClient, StripeConfig,
    StripeGateway, WebhookService,
};

use crate::auth::JwtManager;
use crate::config::Config;

/// Billing services, present only when billing is configured.
pub struct BillingState {
    pub commands: MembershipCommands,
    pub webhooks: WebhookService,
}

/// Application state shared across request handlers
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
    pub jwt: JwtManager,
    pub membership: Arc<dyn MembershipStore>,
    pub enrollments: Arc<dyn EnrollmentStore>,
    pub billing: Option<Arc<BillingState>>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> Self {
        let jwt = JwtManager::new(&config.jwt_secret, config.jwt_expiry_hours);
        let membership: Arc<dyn MembershipStore> = Arc::new(PgMembershipStore::new(pool.clone()));
        let enrollments: Arc<dyn EnrollmentStore> = Arc::new(PgEnrollmentStore::new(pool.clone()));

        let billing = if config.enable_billing && !config.stripe_secret_key.is_empty() {
            let stripe_config = StripeConfig {
                secret_key: config.stripe_secret_key.clone(),
                webhook_secret: config.stripe_webhook_secret.clone(),
                price_pro: config.stripe_price_pro.clone(),
                app_base_url: config.public_url.clone(),
            };
            let gateway: Arc<dyn BillingGateway> =
                Arc::new(StripeGateway::new(StripeClient::new(&stripe_config)));

            let commands = MembershipCommands::new(
                membership.clone(),
                gateway.clone(),
                CustomerService::new(membership.clone(), gateway.clone()),
                CheckoutService::new(
                    gateway.clone(),
                    stripe_config.price_pro.clone(),
                    stripe_config.app_base_url.clone(),
                ),
            );
            let webhooks = WebhookService::new(
                membership.clone(),
                enrollments.clone(),
                gateway,
                stripe_config.webhook_secret,
            );

            Some(Arc::new(BillingState { commands, webhooks }))
        } else {
            tracing::warn!("Billing disabled: no provider credentials configured");
            None
        };

        Self {
            pool,
            config: Arc::new(config),
            jwt,
            membership,
            enrollments,
            billing,
        }
    }
}
