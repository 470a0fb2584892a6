//! Shared-secret authentication for mutating endpoints.

use axum::{
    body::Body,
    extract::State,
    http::{header::AUTHORIZATION, HeaderValue, Request},
    middleware::Next,
    response::Response,
};

use crate::http::server::AppState;
use crate::http::types::ApiError;

const BEARER_PREFIX: &str = "Bearer ";

pub const MISSING_HEADER: &str = "Missing Authorization header";
pub const INVALID_FORMAT: &str = "Invalid Authorization header format";
pub const INVALID_SECRET: &str = "Invalid service discovery secret";

/// Check an `Authorization` header against the configured secret.
pub fn verify_secret(header: Option<&HeaderValue>, secret: &str) -> Result<(), ApiError> {
    let header = header.ok_or(ApiError::Unauthorized(MISSING_HEADER))?;
    let value = header
        .to_str()
        .map_err(|_| ApiError::Unauthorized(INVALID_FORMAT))?;
    let presented = value
        .strip_prefix(BEARER_PREFIX)
        .ok_or(ApiError::Unauthorized(INVALID_FORMAT))?;

    if presented != secret {
        return Err(ApiError::Unauthorized(INVALID_SECRET));
    }
    Ok(())
}

pub async fn require_secret(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    if let Err(e) = verify_secret(request.headers().get(AUTHORIZATION), &state.secret) {
        tracing::warn!(
            method = %request.method(),
            path = %request.uri().path(),
            reason = %e,
            "Rejected unauthenticated request"
        );
        return Err(e);
    }
    Ok(next.run(request).await)
}
