//! Monitors watching the host and remote services
//!
//! Disk, web and TCP checks share the scheduled [`Monitor`](crate::engine::Monitor)
//! engine. Process watching polls on its own fixed cadence.

pub mod disk;
pub mod process;
pub mod tcp;
pub mod web;

pub use disk::{DiskSpaceMonitor, DiskSpaceProbe, SysinfoDisks};
pub use process::{ProcessError, ProcessMonitor, ProcessProbe, SysinfoProcesses};
pub use tcp::TcpPortGroupMonitor;
pub use web::WebMonitor;
