//! Monitoring engine primitives
//!
//! - [`RundownGuard`]: drains in-flight background work on stop
//! - [`Shutdown`]: broadcast stop signal
//! - [`Monitor`]: generic check scheduler with persistence and alerting

pub mod rundown;
pub mod scheduler;
pub mod shutdown;
pub mod status;

use std::sync::Arc;

use crate::notify::NotificationDispatcher;
use crate::state::StateStore;

pub use rundown::{RundownGuard, RundownToken};
pub use scheduler::{CheckOutcome, CheckTarget, Monitor, ScheduledItem};
pub use shutdown::Shutdown;
pub use status::{AtomicCheckState, AtomicHealth, CheckState, Health};

/// Shared collaborators every monitor is started with.
#[derive(Clone)]
pub struct MonitorContext {
    pub store: Arc<StateStore>,
    pub notifier: Arc<NotificationDispatcher>,
}

impl MonitorContext {
    pub fn new(store: Arc<StateStore>, notifier: Arc<NotificationDispatcher>) -> Self {
        Self { store, notifier }
    }
}
