// Shared extractors for the API routes

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

use crate::error::ApiError;

pub const ORGANIZATION_HEADER: &str = "x-organization-id";

/// Tenant scope for a request, taken from the `x-organization-id` header.
/// The caller (an API gateway or the owning application) authenticates the
/// tenant; this service only requires the id to be present and well-formed.
#[derive(Debug, Clone, Copy)]
pub struct OrgId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for OrgId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(ORGANIZATION_HEADER)
            .ok_or_else(|| ApiError::bad_request(format!("{ORGANIZATION_HEADER} header required")))?
            .to_str()
            .map_err(|_| ApiError::bad_request(format!("{ORGANIZATION_HEADER} must be ASCII")))?;

        let id = raw
            .parse()
            .map_err(|_| ApiError::bad_request(format!("{ORGANIZATION_HEADER} must be a UUID")))?;

        Ok(OrgId(id))
    }
}
