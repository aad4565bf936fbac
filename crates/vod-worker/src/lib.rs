//! Media processing worker.
//!
//! Workers lease jobs from the queue broker, keep their leases alive
//! with heartbeats while ffmpeg runs, and report outcomes to the
//! catalog and status hub before acking or nacking.

pub mod config;
pub mod error;
pub mod runner;
pub mod task;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use runner::{Worker, WorkerPool};
pub use task::{ProcessTask, ProgressReporter, TranscodeTask};
