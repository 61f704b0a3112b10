//! Job handler contract.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use mpi_core::{MatchJob, MatchJobPayload};

/// Context provided to job handlers.
pub struct JobContext {
    /// The claimed job.
    pub job: MatchJob,
    /// Index of the worker processing it.
    pub worker: usize,
}

impl JobContext {
    pub fn new(job: MatchJob, worker: usize) -> Self {
        Self { job, worker }
    }

    pub fn job_id(&self) -> Uuid {
        self.job.id
    }

    pub fn payload(&self) -> &MatchJobPayload {
        &self.job.payload
    }

    /// 1 on first delivery, higher on redelivery.
    pub fn delivery_count(&self) -> i32 {
        self.job.delivery_count
    }
}

/// Result of job execution.
#[derive(Debug)]
pub enum JobResult {
    /// Job completed; the worker acks it.
    Success(Option<JsonValue>),
    /// Job failed; the worker leaves it unacked for redelivery.
    Failed(String),
}

/// Trait for job handlers.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Execute the job.
    async fn execute(&self, ctx: JobContext) -> JobResult;
}

/// No-op handler for testing.
pub struct NoOpHandler;

#[async_trait]
impl JobHandler for NoOpHandler {
    fn name(&self) -> &'static str {
        "noop"
    }

    async fn execute(&self, _ctx: JobContext) -> JobResult {
        JobResult::Success(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mpi_core::Resource;
    use serde_json::json;

    fn job() -> MatchJob {
        let resource = Resource::new("Patient", "p1", json!({}));
        MatchJob {
            id: Uuid::new_v4(),
            payload: MatchJobPayload::for_resource(&resource),
            ack_token: Uuid::new_v4(),
            delivery_count: 2,
            enqueued_at: Utc::now(),
            visible_at: Utc::now(),
        }
    }

    #[test]
    fn test_job_context_accessors() {
        let job = job();
        let id = job.id;
        let ctx = JobContext::new(job, 3);

        assert_eq!(ctx.job_id(), id);
        assert_eq!(ctx.worker, 3);
        assert_eq!(ctx.delivery_count(), 2);
        assert_eq!(ctx.payload().resource_type, "Patient");
    }

    #[tokio::test]
    async fn test_noop_handler() {
        let handler = NoOpHandler;
        assert_eq!(handler.name(), "noop");
        assert!(matches!(
            handler.execute(JobContext::new(job(), 0)).await,
            JobResult::Success(None)
        ));
    }
}
