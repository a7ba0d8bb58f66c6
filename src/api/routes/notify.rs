//! Notification endpoint

use axum::{Json, body::Bytes, extract::State};
use tracing::debug;

use super::parse_body;
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::ApiState;
use crate::api::types::{NotifyRequest, StatusResponse};

/// POST /notify
///
/// Routes a message to every sink of the given channel.
pub async fn notify(State(state): State<ApiState>, body: Bytes) -> ApiResult<Json<StatusResponse>> {
    let request: NotifyRequest = parse_body(&body)?;
    if request.channel.trim().is_empty() {
        return Err(ApiError::BadRequest("channel must not be empty".to_string()));
    }
    if request.message.trim().is_empty() {
        return Err(ApiError::BadRequest("message must not be empty".to_string()));
    }

    debug!(channel = %request.channel, severity = %request.severity, "notification requested");
    state
        .notifier
        .notify(request.severity, request.channel.trim(), request.message)?;
    Ok(Json(StatusResponse::ok()))
}
