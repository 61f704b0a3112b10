//! "Next job" abstraction consumed by workers.
//!
//! Workers only ever call [`JobFeed::next_job`] and [`JobFeed::ack`]; how
//! jobs arrive (polling, push notification) stays behind the trait.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::sleep;
use tracing::{error, trace};
use uuid::Uuid;

use mpi_core::{MatchJob, MatchQueue, Result};

/// Source of claimed jobs.
#[async_trait]
pub trait JobFeed: Send + Sync {
    /// Wait until a job has been claimed for the caller.
    ///
    /// Dropping the future mid-claim can abandon a claimed job; it becomes
    /// visible again once its visibility window expires.
    async fn next_job(&self) -> MatchJob;

    /// Acknowledge a processed job.
    async fn ack(&self, ack_token: Uuid) -> Result<bool>;
}

/// Feed that sleeps the poll interval, then claims.
///
/// When the queue exposes a wake handle the sleep ends early on enqueue;
/// the poll interval stays the upper bound on latency either way.
pub struct PollingFeed {
    queue: Arc<dyn MatchQueue>,
    poll_interval: Duration,
    wake: Option<Arc<Notify>>,
}

impl PollingFeed {
    pub fn new(queue: Arc<dyn MatchQueue>, poll_interval: Duration) -> Self {
        let wake = queue.wake_handle();
        Self {
            queue,
            poll_interval,
            wake,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    async fn wait(&self) {
        match &self.wake {
            Some(notify) => {
                tokio::select! {
                    _ = sleep(self.poll_interval) => {}
                    _ = notify.notified() => {}
                }
            }
            None => sleep(self.poll_interval).await,
        }
    }
}

#[async_trait]
impl JobFeed for PollingFeed {
    async fn next_job(&self) -> MatchJob {
        loop {
            self.wait().await;
            match self.queue.claim().await {
                Ok(Some(job)) => return job,
                Ok(None) => trace!(subsystem = "jobs", component = "feed", "Queue empty"),
                Err(e) => error!(
                    subsystem = "jobs",
                    component = "feed",
                    op = "claim",
                    error = %e,
                    "Failed to claim job"
                ),
            }
        }
    }

    async fn ack(&self, ack_token: Uuid) -> Result<bool> {
        self.queue.ack(ack_token).await
    }
}
