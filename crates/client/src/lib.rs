//! Campus client-side reconciliation
//!
//! After a provider checkout redirects back, the membership flip happens
//! asynchronously on the webhook path. This crate polls the API until the
//! paid state and its dependent enrollment have materialized, then tells the
//! caller where to navigate.

pub mod api;
pub mod reconcile;

pub use api::{ClientError, ClientResult, HttpStatusApi, MembershipStatus, StatusApi};
pub use reconcile::{CheckoutReconciler, Outcome, ReconcileParams, ReconcileState};
