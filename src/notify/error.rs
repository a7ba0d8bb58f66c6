//! Error types for notification routing and delivery

use thiserror::Error;

/// Errors raised while routing a notification to its channel.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("unknown channel '{0}'")]
    UnknownChannel(String),

    #[error("invalid severity '{0}'")]
    InvalidSeverity(String),
}

/// Errors raised by a single sink while delivering a notification.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("email delivery failed: {0}")]
    Email(String),

    #[error("delivery cancelled by shutdown")]
    Cancelled,
}
