//! Vigil Runner
//!
//! Bootstrap and control loop for the position risk engine:
//! - [`Scheduler`] drives decision cycles across all tracked positions at a
//!   bounded cadence, with a worker pool, per-position fault isolation and
//!   graceful shutdown
//! - [`RunnerConfig`] is the single configuration surface, validated once
//!   at startup
//! - [`InMemoryPositionStore`], [`SimulatedFeed`] and [`SimulatedExecutor`]
//!   are in-process collaborators for tests and demo runs

mod config;
mod error;
mod scheduler;
mod session;
mod sim;
mod store;

pub use config::RunnerConfig;
pub use error::{RunnerError, RunnerResult};
pub use scheduler::Scheduler;
pub use session::{MonitoringSession, SessionConfig, SessionResults};
pub use sim::{SimulatedExecutor, SimulatedFeed};
pub use store::InMemoryPositionStore;
