pub mod health;
pub mod notify;
pub mod process;

use axum::body::Bytes;
use serde::de::DeserializeOwned;

use crate::api::error::ApiResult;

/// Decode a JSON body. Any syntax, type or missing field error is a bad
/// request.
pub(crate) fn parse_body<T: DeserializeOwned>(body: &Bytes) -> ApiResult<T> {
    Ok(serde_json::from_slice(body)?)
}
