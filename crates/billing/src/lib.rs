//! Campus billing: subscription state reconciliation.
//!
//! Keeps a student's membership tier consistent across the external billing
//! provider (webhook-driven, asynchronous), the local membership record, and
//! the session-cached view used for access control. The pieces:
//!
//! - [`store`] — durable membership records with compare-and-swap updates
//! - [`gateway`] — typed adapter over the billing provider's API
//! - [`webhooks`] — verifies and applies provider events to the record
//! - [`commands`] — synchronous user-initiated upgrade/downgrade operations
//! - [`enrollment`] — conditional-insert enrollment store (webhook side effect)
//! - [`normalize`] — tolerant extraction from provider payload shapes

pub mod checkout;
pub mod client;
pub mod commands;
pub mod customer;
pub mod enrollment;
pub mod error;
pub mod gateway;
pub mod normalize;
pub mod store;
pub mod webhooks;

#[cfg(test)]
pub mod testing;

pub use checkout::CheckoutService;
pub use client::{StripeClient, StripeConfig};
pub use commands::{DowngradeOutcome, MembershipCommands, UpgradeOutcome};
pub use customer::CustomerService;
pub use enrollment::{EnrollmentStore, PgEnrollmentStore};
pub use error::{BillingError, BillingResult};
pub use gateway::{BillingGateway, CheckoutParams, CheckoutSessionInfo, StripeGateway};
pub use store::{MembershipStore, PgMembershipStore};
pub use webhooks::{BillingEvent, WebhookService};
