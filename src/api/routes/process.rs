//! Process watch list endpoints

use axum::{Json, body::Bytes, extract::State};
use tracing::debug;

use super::parse_body;
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::ApiState;
use crate::api::types::{StatusResponse, UnwatchProcessRequest, WatchProcessRequest};
use crate::monitors::process::MAX_PID;

fn validate_pid(pid: i64) -> ApiResult<u32> {
    u32::try_from(pid)
        .ok()
        .filter(|pid| (1..=MAX_PID).contains(pid))
        .ok_or_else(|| ApiError::BadRequest(format!("invalid pid {pid}")))
}

fn validate_channel(channel: &str) -> ApiResult<&str> {
    let channel = channel.trim();
    if channel.is_empty() {
        return Err(ApiError::BadRequest("channel must not be empty".to_string()));
    }
    Ok(channel)
}

/// POST /process/watch
pub async fn watch(State(state): State<ApiState>, body: Bytes) -> ApiResult<Json<StatusResponse>> {
    let request: WatchProcessRequest = parse_body(&body)?;
    let pid = validate_pid(request.pid)?;
    let channel = validate_channel(&request.channel)?;

    let added = state
        .processes
        .add_process(pid, request.name, request.severity, channel)
        .await?;
    debug!(pid, added, "watch requested");
    Ok(Json(StatusResponse::ok()))
}

/// POST /process/unwatch
///
/// Succeeds whether or not the process was being watched.
pub async fn unwatch(State(state): State<ApiState>, body: Bytes) -> ApiResult<Json<StatusResponse>> {
    let request: UnwatchProcessRequest = parse_body(&body)?;
    let pid = validate_pid(request.pid)?;
    let channel = validate_channel(&request.channel)?;

    let removed = state.processes.remove_process(pid, channel).await;
    debug!(pid, removed, "unwatch requested");
    Ok(Json(StatusResponse::ok()))
}
