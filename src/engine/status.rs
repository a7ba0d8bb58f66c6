//! Per-item status flags
//!
//! Small enums backed by atomics so the scheduler can flip them without
//! taking a lock on the hot path.

use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

/// Last observed health of a monitored item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Health {
    #[default]
    Healthy,
    Unhealthy,
}

impl Health {
    pub fn from_ok(ok: bool) -> Self {
        if ok { Health::Healthy } else { Health::Unhealthy }
    }

    pub fn is_healthy(self) -> bool {
        self == Health::Healthy
    }

    fn as_u8(self) -> u8 {
        match self {
            Health::Healthy => 0,
            Health::Unhealthy => 1,
        }
    }

    fn from_u8(value: u8) -> Self {
        if value == 0 {
            Health::Healthy
        } else {
            Health::Unhealthy
        }
    }
}

impl std::fmt::Display for Health {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Health::Healthy => write!(f, "healthy"),
            Health::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

#[derive(Debug)]
pub struct AtomicHealth(AtomicU8);

impl AtomicHealth {
    pub fn new(health: Health) -> Self {
        Self(AtomicU8::new(health.as_u8()))
    }

    pub fn load(&self) -> Health {
        Health::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, health: Health) {
        self.0.store(health.as_u8(), Ordering::Release);
    }

    /// Store `health` and return the previous value.
    pub fn swap(&self, health: Health) -> Health {
        Health::from_u8(self.0.swap(health.as_u8(), Ordering::AcqRel))
    }
}

impl Default for AtomicHealth {
    fn default() -> Self {
        Self::new(Health::Healthy)
    }
}

/// Whether an item currently has a check running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckState {
    Idle,
    InProgress,
}

#[derive(Debug, Default)]
pub struct AtomicCheckState(AtomicU8);

const IDLE: u8 = 0;
const IN_PROGRESS: u8 = 1;

impl AtomicCheckState {
    /// Move from `Idle` to `InProgress`. Returns `false` if a check is
    /// already running.
    pub fn try_begin(&self) -> bool {
        self.0
            .compare_exchange(IDLE, IN_PROGRESS, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn finish(&self) {
        self.0.store(IDLE, Ordering::Release);
    }

    pub fn load(&self) -> CheckState {
        match self.0.load(Ordering::Acquire) {
            IDLE => CheckState::Idle,
            _ => CheckState::InProgress,
        }
    }
}
