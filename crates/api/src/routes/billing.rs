//! Billing routes: webhook ingestion, checkout, downgrade and status

use axum::{
    extract::{Extension, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

use campus_billing::{DowngradeOutcome, MembershipStore, UpgradeOutcome};

use crate::{auth::AuthUser, error::ApiError, state::AppState};

/// Request to create a checkout session
#[derive(Debug, Deserialize)]
pub struct CreateCheckoutRequest {
    /// Course to auto-enroll in after payment succeeds
    pub course_id: Option<Uuid>,
}

/// Response from creating a checkout session
#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub redirect_url: String,
}

/// Response for a downgrade request
#[derive(Debug, Serialize)]
pub struct DowngradeResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_at: Option<String>,
}

/// Membership status response
#[derive(Debug, Serialize)]
pub struct MembershipStatus {
    pub active: bool,
    pub tier: String,
    pub cancel_at_period_end: bool,
    pub current_period_end: Option<String>,
}

/// Provider webhook endpoint.
///
/// An invalid signature is the only client error; once the delivery is
/// verified, handler failures are logged and acknowledged with 200 anyway so
/// the provider does not keep redelivering an event we cannot apply. Failed
/// events are recovered out of band, or by the next subscription-updated
/// delivery for the same subscription.
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<StatusCode, ApiError> {
    let billing = state.billing.as_ref().ok_or(ApiError::ServiceUnavailable)?;

    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Webhook missing signature header");
            ApiError::BadRequest("Missing signature".to_string())
        })?;

    let event = billing.webhooks.verify_event(&body, signature).map_err(|e| {
        tracing::warn!(error = %e, "Webhook signature verification failed");
        ApiError::BadRequest("Invalid webhook signature".to_string())
    })?;

    if let Err(e) = billing.webhooks.handle_event(&event).await {
        tracing::error!(
            event_id = %event.id,
            event_type = %event.event_type,
            error = %e,
            "Webhook event processing failed; acknowledging anyway"
        );
    }

    Ok(StatusCode::OK)
}

/// Start a Pro upgrade by creating a provider checkout session.
pub async fn checkout(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<CreateCheckoutRequest>,
) -> Result<Json<CheckoutResponse>, ApiError> {
    let billing = state.billing.as_ref().ok_or(ApiError::ServiceUnavailable)?;

    let outcome = billing
        .commands
        .request_upgrade(auth_user.account_id, &auth_user.email, req.course_id)
        .await?;

    let UpgradeOutcome::Redirect { checkout_url } = outcome;
    Ok(Json(CheckoutResponse {
        redirect_url: checkout_url,
    }))
}

/// Downgrade to Free, immediately or at period end.
pub async fn downgrade(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<DowngradeResponse>, ApiError> {
    let billing = state.billing.as_ref().ok_or(ApiError::ServiceUnavailable)?;

    let response = match billing.commands.request_downgrade(auth_user.account_id).await? {
        DowngradeOutcome::Immediate => DowngradeResponse {
            status: "downgraded".to_string(),
            effective_at: None,
        },
        DowngradeOutcome::Scheduled { period_end } => DowngradeResponse {
            status: "scheduled".to_string(),
            effective_at: period_end.format(&Rfc3339).ok(),
        },
    };

    Ok(Json(response))
}

/// Cancel a scheduled downgrade.
pub async fn resume(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<StatusCode, ApiError> {
    let billing = state.billing.as_ref().ok_or(ApiError::ServiceUnavailable)?;

    billing
        .commands
        .cancel_scheduled_downgrade(auth_user.account_id)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Current membership status, read from the record rather than the token.
pub async fn status(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<MembershipStatus>, ApiError> {
    let record = state.membership.get(auth_user.account_id).await?;

    Ok(Json(MembershipStatus {
        active: record.pro_active(),
        tier: record.tier.to_string(),
        cancel_at_period_end: record.cancel_at_period_end,
        current_period_end: record
            .current_period_end
            .and_then(|end| end.format(&Rfc3339).ok()),
    }))
}
