//! Cgroup integration for the Docker task driver.
//!
//! Tracks the driver's running tasks and keeps the cgroup scopes Docker
//! creates for their containers on the cpusets the orchestrator computed.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod driver;
pub mod reconcile;
pub mod tasks;

pub use driver::Driver;
pub use reconcile::CpusetFixer;
pub use tasks::{TaskHandle, TaskStore, TaskTracker};
