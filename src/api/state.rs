//! Shared state of the API handlers

use std::sync::Arc;

use crate::monitors::ProcessMonitor;
use crate::notify::NotificationDispatcher;

#[derive(Clone)]
pub struct ApiState {
    pub notifier: Arc<NotificationDispatcher>,
    pub processes: ProcessMonitor,
}

impl ApiState {
    pub fn new(notifier: Arc<NotificationDispatcher>, processes: ProcessMonitor) -> Self {
        Self {
            notifier,
            processes,
        }
    }
}
