//! Shared application service layer for foilflow.
//!
//! Binds the external-process proxies to the incremental result readers
//! and runs the polling coordinator that turns file-level changes into
//! discrete notifications a frontend (CLI or GUI) subscribes to.

pub mod error;
pub mod polar_service;
pub mod run_service;
pub mod watcher;

// Re-export key types for convenience
pub use error::{AppError, AppResult};
pub use polar_service::{PolarQueue, PolarTask, TaskState};
pub use run_service::{OptimizerRun, RunSnapshot};
pub use watcher::{WatchEvent, Watcher, WatcherConfig};
