//! Tenant scope extraction.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use db::TenantScope;

use crate::ApiError;

pub const TENANT_HEADER: &str = "x-tenant-scope";

/// The caller's tenant scope, taken verbatim from the `x-tenant-scope` header.
#[derive(Debug, Clone)]
pub struct Tenant(pub TenantScope);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Tenant {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(TENANT_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(ApiError::MissingTenant)?;
        Ok(Tenant(TenantScope::new(token)))
    }
}
