//! Storyloom — API error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use storyloom_core::capability::CapabilityError;
use storyloom_core::error::{ConflictError, DomainError, NotFoundError, QuotaError};
use thiserror::Error;

/// Startup and runtime errors for the API server.
#[derive(Debug, Error)]
pub enum AppError {
    /// A required environment variable is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Database connection, pool, or migration error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// The configured Redis cache is unreachable.
    #[error("cache error: {0}")]
    Cache(#[from] CapabilityError),

    /// Network binding or I/O error.
    #[error("server error: {0}")]
    Server(#[from] std::io::Error),
}

/// JSON body returned for error responses.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code.
    pub error: &'static str,
    /// Human-readable error message.
    pub message: String,
}

/// HTTP-layer wrapper around `DomainError` that implements `IntoResponse`.
#[derive(Debug)]
pub struct ApiError(pub DomainError);

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        Self(err)
    }
}

impl ApiError {
    /// Status code and machine-readable code for the wrapped error.
    #[must_use]
    pub fn classify(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            DomainError::Quota(QuotaError::BalanceExceeded { .. }) => {
                (StatusCode::TOO_MANY_REQUESTS, "token_balance_exceeded")
            }
            DomainError::Quota(QuotaError::DailyQuotaExceeded { .. }) => {
                (StatusCode::TOO_MANY_REQUESTS, "daily_quota_exceeded")
            }
            DomainError::NotFound(e) => (StatusCode::NOT_FOUND, not_found_code(e)),
            DomainError::Conflict(e) => (StatusCode::CONFLICT, conflict_code(e)),
            DomainError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            DomainError::Infrastructure(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "infrastructure_error")
            }
        }
    }
}

fn not_found_code(err: &NotFoundError) -> &'static str {
    match err {
        NotFoundError::Tenant(_) => "tenant_not_found",
        NotFoundError::Project(_) => "project_not_found",
        NotFoundError::Session(_) => "session_not_found",
        NotFoundError::CreationSession(_) => "creation_session_not_found",
        NotFoundError::Artifact(_) => "artifact_not_found",
        NotFoundError::Version(_) => "version_not_found",
        NotFoundError::Job(_) => "job_not_found",
    }
}

fn conflict_code(err: &ConflictError) -> &'static str {
    match err {
        ConflictError::VersionNotInArtifact { .. } => "version_not_in_artifact",
        ConflictError::StaleBranchBase { .. } => "stale_branch_base",
        ConflictError::JobTerminal { .. } => "job_terminal",
        ConflictError::IdempotencyKeyMismatch { .. } => "idempotency_key_mismatch",
        ConflictError::CreationSessionClosed(_) => "creation_session_closed",
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code) = self.classify();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }

        let body = ErrorBody {
            error: error_code,
            message: self.0.to_string(),
        };

        (status, Json(body)).into_response()
    }
}
