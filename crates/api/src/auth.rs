//! Session tokens and auth middleware
//!
//! JWTs carry the account id, role and the membership tier at issuance time.
//! The tier claim is a cached view: it only changes when a new token is issued
//! through `POST /api/auth/session/refresh` after a membership change.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use campus_shared::types::{MembershipTier, UserRole};

use crate::error::ApiError;
use crate::state::AppState;

/// JWT claims for Campus-issued session tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (account ID)
    pub sub: Uuid,
    /// Email
    pub email: String,
    /// Account role
    pub role: String,
    /// Membership tier at issuance time
    pub tier: String,
    /// Issued at
    pub iat: i64,
    /// Expiration
    pub exp: i64,
}

/// JWT manager for token operations
#[derive(Clone)]
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiry_hours: i64,
}

impl JwtManager {
    pub fn new(secret: &str, expiry_hours: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            expiry_hours,
        }
    }

    /// Issue a session token carrying the current membership tier.
    pub fn issue_token(
        &self,
        account_id: Uuid,
        email: &str,
        role: UserRole,
        tier: MembershipTier,
    ) -> Result<String, ApiError> {
        let now = OffsetDateTime::now_utc();
        let exp = now + Duration::hours(self.expiry_hours);

        let claims = Claims {
            sub: account_id,
            email: email.to_string(),
            role: role.as_str().to_string(),
            tier: tier.as_str().to_string(),
            iat: now.unix_timestamp(),
            exp: exp.unix_timestamp(),
        };

        // Explicit algorithm prevents algorithm confusion attacks
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key).map_err(|e| {
            tracing::error!("Token encoding failed: {}", e);
            ApiError::Internal
        })
    }

    pub fn validate_token(&self, token: &str) -> Result<Claims, ApiError> {
        let validation = Validation::new(Algorithm::HS256);
        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|_| ApiError::InvalidToken)
    }
}

/// Authenticated caller, inserted as a request extension by `require_auth`.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub account_id: Uuid,
    pub email: String,
    pub role: UserRole,
    /// The tier as cached in the token, not necessarily the stored tier.
    pub tier: MembershipTier,
}

/// Middleware requiring a valid bearer token.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)?;

    let claims = state.jwt.validate_token(token)?;

    let role = UserRole::parse(&claims.role).ok_or(ApiError::InvalidToken)?;
    let tier = MembershipTier::parse(&claims.tier).ok_or(ApiError::InvalidToken)?;

    request.extensions_mut().insert(AuthUser {
        account_id: claims.sub,
        email: claims.email,
        role,
        tier,
    });

    Ok(next.run(request).await)
}
