//! Request and response bodies of the control API

use serde::{Deserialize, Serialize};

use crate::notify::Severity;

/// POST /notify
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifyRequest {
    pub channel: String,
    pub message: String,
    #[serde(default)]
    pub severity: Severity,
}

/// POST /process/watch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchProcessRequest {
    pub channel: String,
    /// Signed so out-of-range values are reported as such instead of as a
    /// type mismatch
    pub pid: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub severity: Severity,
}

/// POST /process/unwatch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnwatchProcessRequest {
    pub channel: String,
    pub pid: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

impl StatusResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}
