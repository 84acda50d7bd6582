//! Session routes

use axum::{
    extract::{Extension, State},
    Json,
};
use serde::Serialize;

use campus_billing::MembershipStore;

use crate::{auth::AuthUser, error::ApiError, state::AppState};

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub token: String,
    pub tier: String,
}

/// Reissue the session token with the currently stored membership tier.
///
/// The tier in the token is a cached view; clients call this after any
/// membership change they observe (a command result or a successful
/// reconciliation poll) to pull the new tier into their session.
pub async fn refresh_session(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<SessionResponse>, ApiError> {
    let record = state.membership.get(auth_user.account_id).await?;

    let token = state.jwt.issue_token(
        auth_user.account_id,
        &auth_user.email,
        auth_user.role,
        record.tier,
    )?;

    tracing::debug!(
        account_id = %auth_user.account_id,
        tier = %record.tier,
        "Session refreshed"
    );

    Ok(Json(SessionResponse {
        token,
        tier: record.tier.to_string(),
    }))
}
