//! Request extractors.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use storyloom_core::error::DomainError;
use uuid::Uuid;

use crate::error::ApiError;

/// Header naming the calling tenant. Set by the authenticating gateway.
pub const TENANT_HEADER: &str = "x-tenant-id";

/// The tenant a request acts for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TenantId(pub Uuid);

impl<S> FromRequestParts<S> for TenantId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(TENANT_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                ApiError(DomainError::Validation(format!("missing {TENANT_HEADER} header")))
            })?;
        Uuid::parse_str(raw.trim()).map(Self).map_err(|_| {
            ApiError(DomainError::Validation(format!("invalid {TENANT_HEADER} header")))
        })
    }
}
