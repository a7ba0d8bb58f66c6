use std::fmt;
use std::str::FromStr;

use chrono::{Local, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::NotifyError;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Alert level of a notification.
///
/// Parsing accepts the long forms `warning` and `information`, and an empty
/// string means [`Severity::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Severity {
    #[default]
    Error,
    Warn,
    Info,
    Debug,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warn => "warn",
            Severity::Info => "info",
            Severity::Debug => "debug",
        }
    }

    /// Upper-case label used in log lines and message titles.
    pub fn label(self) -> &'static str {
        match self {
            Severity::Error => "ERROR",
            Severity::Warn => "WARN",
            Severity::Info => "INFO",
            Severity::Debug => "DEBUG",
        }
    }
}

impl FromStr for Severity {
    type Err = NotifyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "error" => Ok(Severity::Error),
            "warn" | "warning" => Ok(Severity::Warn),
            "info" | "information" => Ok(Severity::Info),
            "debug" => Ok(Severity::Debug),
            _ => Err(NotifyError::InvalidSeverity(s.to_string())),
        }
    }
}

impl TryFrom<String> for Severity {
    type Error = NotifyError;

    fn try_from(value: String) -> Result<Self, NotifyError> {
        value.parse()
    }
}

impl From<Severity> for String {
    fn from(value: Severity) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single notification, shared read-only by every sink it is fanned out to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEvent {
    pub channel: String,
    pub severity: Severity,
    pub timestamp: NaiveDateTime,
    pub message: String,
}

impl NotificationEvent {
    pub fn new(
        channel: impl Into<String>,
        severity: Severity,
        timestamp: NaiveDateTime,
        message: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            severity,
            timestamp,
            message: message.into(),
        }
    }

    /// Build an event stamped with the current time, either UTC or local.
    pub fn now(
        channel: impl Into<String>,
        severity: Severity,
        message: impl Into<String>,
        use_local_time: bool,
    ) -> Self {
        let timestamp = if use_local_time {
            Local::now().naive_local()
        } else {
            Utc::now().naive_utc()
        };
        Self::new(channel, severity, timestamp, message)
    }

    pub fn formatted_timestamp(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }

    pub fn formatted_date(&self) -> String {
        self.timestamp.format(DATE_FORMAT).to_string()
    }

    /// `[<timestamp>] [<LEVEL>] - <message>`
    pub fn log_line(&self) -> String {
        format!(
            "[{}] [{}] - {}",
            self.formatted_timestamp(),
            self.severity.label(),
            self.message
        )
    }
}
