//! Enrollment routes

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

use campus_billing::{EnrollmentStore, MembershipStore};
use campus_shared::types::UserRole;

use crate::{auth::AuthUser, error::ApiError, state::AppState};

#[derive(Debug, Serialize)]
pub struct EnrollmentResponse {
    pub id: Uuid,
    pub course_id: Uuid,
    pub enrolled_at: Option<String>,
}

/// Enrollment existence check, polled by clients reconciling a checkout.
pub async fn check(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(course_id): Path<Uuid>,
) -> Result<Json<EnrollmentResponse>, ApiError> {
    if auth_user.role != UserRole::Student {
        return Err(ApiError::Forbidden);
    }

    let enrollment = state
        .enrollments
        .find(auth_user.account_id, course_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    Ok(Json(EnrollmentResponse {
        id: enrollment.id,
        course_id: enrollment.course_id,
        enrolled_at: enrollment.created_at.format(&Rfc3339).ok(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct EnrollRequest {
    pub course_id: Uuid,
}

/// Enroll the caller in a course.
///
/// Pro-gated courses check the stored tier, not the token's cached one, so a
/// freshly expired membership cannot enroll with a stale token.
pub async fn enroll(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<EnrollRequest>,
) -> Result<(StatusCode, Json<EnrollmentResponse>), ApiError> {
    if auth_user.role != UserRole::Student {
        return Err(ApiError::Forbidden);
    }

    let requires_pro: Option<(bool,)> =
        sqlx::query_as("SELECT requires_pro FROM courses WHERE id = $1")
            .bind(req.course_id)
            .fetch_optional(&state.pool)
            .await?;
    let (requires_pro,) = requires_pro.ok_or(ApiError::NotFound)?;

    if requires_pro {
        let record = state.membership.get(auth_user.account_id).await?;
        if !record.pro_active() {
            return Err(ApiError::SubscriptionRequired);
        }
    }

    let created = state
        .enrollments
        .create_if_absent(auth_user.account_id, req.course_id)
        .await?;
    if !created {
        return Err(ApiError::Conflict("Already enrolled".to_string()));
    }

    let enrollment = state
        .enrollments
        .find(auth_user.account_id, req.course_id)
        .await?
        .ok_or(ApiError::Internal)?;

    tracing::info!(
        account_id = %auth_user.account_id,
        course_id = %req.course_id,
        "Account enrolled in course"
    );

    Ok((
        StatusCode::CREATED,
        Json(EnrollmentResponse {
            id: enrollment.id,
            course_id: enrollment.course_id,
            enrolled_at: enrollment.created_at.format(&Rfc3339).ok(),
        }),
    ))
}
