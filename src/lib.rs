pub mod api;
pub mod config;
pub mod engine;
pub mod monitors;
pub mod notify;
pub mod state;
pub mod util;
pub mod watchdog;

pub use watchdog::{Probes, Watchdog};
