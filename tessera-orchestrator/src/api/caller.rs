//! Caller identity
//!
//! Authentication happens upstream; the gateway forwards the authenticated
//! owner in the `x-owner-id` header.

use axum::{extract::FromRequestParts, http::request::Parts};

use crate::api::error::ApiError;

pub const OWNER_HEADER: &str = "x-owner-id";

/// Owner on whose behalf the request is made
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller(pub String);

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let owner = parts
            .headers
            .get(OWNER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| ApiError::Unauthorized(format!("missing {} header", OWNER_HEADER)))?;

        Ok(Caller(owner.to_string()))
    }
}
