//! HTTP client for the status endpoints the poller reads.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Unexpected status {0}")]
    UnexpectedStatus(StatusCode),
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Membership status as reported by `GET /api/billing/status`.
#[derive(Debug, Clone, Deserialize)]
pub struct MembershipStatus {
    pub active: bool,
    pub tier: String,
    pub cancel_at_period_end: bool,
    pub current_period_end: Option<String>,
}

/// The read surface the reconciler polls.
#[async_trait]
pub trait StatusApi: Send + Sync {
    /// `None` means no membership record exists yet.
    async fn membership_status(&self) -> ClientResult<Option<MembershipStatus>>;

    async fn enrollment_exists(&self, course_id: Uuid) -> ClientResult<bool>;

    /// Pull the stored tier into the session token.
    async fn refresh_session(&self) -> ClientResult<()>;
}

/// Status API over the Campus HTTP endpoints.
pub struct HttpStatusApi {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

/// Per-request cap so a single hung poll cannot outlive the reconciler's
/// own deadline.
const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

impl HttpStatusApi {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.into(),
            token: token.into(),
        }
    }
}

#[async_trait]
impl StatusApi for HttpStatusApi {
    async fn membership_status(&self) -> ClientResult<Option<MembershipStatus>> {
        let response = self
            .http
            .get(format!("{}/api/billing/status", self.base_url))
            .bearer_auth(&self.token)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(Some(response.json().await?)),
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(ClientError::UnexpectedStatus(status)),
        }
    }

    async fn enrollment_exists(&self, course_id: Uuid) -> ClientResult<bool> {
        let response = self
            .http
            .get(format!("{}/api/enrollments/{}", self.base_url, course_id))
            .bearer_auth(&self.token)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(ClientError::UnexpectedStatus(status)),
        }
    }

    async fn refresh_session(&self) -> ClientResult<()> {
        let response = self
            .http
            .post(format!("{}/api/auth/session/refresh", self.base_url))
            .bearer_auth(&self.token)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(ClientError::UnexpectedStatus(response.status()))
        }
    }
}
