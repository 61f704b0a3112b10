//! # mpi-jobs
//!
//! Matching job workers for the MPI registry.
//!
//! This crate provides:
//! - The job handler contract and the matching handler
//! - A "next job" feed abstraction with a polling implementation
//! - A pool of independent workers with lifecycle events
//! - The write-pipeline trigger that enqueues matching jobs
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use mpi_jobs::{MatchingJobHandler, PollingFeed, WorkerConfig, WorkerPool};
//!
//! let config = WorkerConfig::from_env();
//! let feed = Arc::new(PollingFeed::new(queue, config.poll_interval()));
//! let handler = Arc::new(MatchingJobHandler::new(store, registry));
//!
//! let handle = WorkerPool::new(feed, handler, config).start();
//!
//! // Listen for events
//! let mut events = handle.events();
//! while let Ok(event) = events.recv().await {
//!     println!("Event: {:?}", event);
//! }
//!
//! // Stop all workers, abandoning in-flight jobs
//! handle.shutdown().await;
//! ```

pub mod feed;
pub mod handler;
pub mod matching_handler;
pub mod trigger;
pub mod worker;

// Re-export core types
pub use mpi_core::*;

pub use feed::{JobFeed, PollingFeed};
pub use handler::{JobContext, JobHandler, JobResult, NoOpHandler};
pub use matching_handler::MatchingJobHandler;
pub use trigger::MatchTrigger;
pub use worker::{WorkerConfig, WorkerEvent, WorkerPool, WorkerPoolHandle};

/// Default polling interval for job processing (milliseconds).
pub const DEFAULT_POLL_INTERVAL_MS: u64 = mpi_core::defaults::JOB_POLL_INTERVAL_MS;
