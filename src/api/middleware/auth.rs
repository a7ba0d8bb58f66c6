//! Shared secret authentication middleware

use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::api::error::ApiError;

/// Header carrying the shared secret
pub const API_KEY_HEADER: &str = "X-Api-Key";

/// Rejects every request whose `X-Api-Key` header does not match the
/// configured key.
pub async fn auth_middleware(
    State(expected_key): State<String>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let key = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Forbidden)?;

    if key != expected_key {
        return Err(ApiError::Forbidden);
    }

    Ok(next.run(request).await)
}
