//! Worker pool behaviour against the in-memory queue.
//!
//! Covers exactly-once acking under concurrency, redelivery after a stuck
//! worker, failed jobs staying queued, and shutdown semantics.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{broadcast, Mutex};
use tokio::time::timeout;
use uuid::Uuid;

use mpi_db::{InMemoryMatchQueue, QueueConfig};
use mpi_jobs::{
    JobContext, JobHandler, JobResult, MatchJobPayload, MatchQueue, NoOpHandler, PollingFeed,
    Resource, WorkerConfig, WorkerEvent, WorkerPool,
};

// ============================================================================
// HELPERS
// ============================================================================

/// What a recording handler does with a given delivery.
#[derive(Clone, Copy)]
enum Behaviour {
    Succeed,
    FailFirstDelivery,
    HangFirstDelivery,
    HangAlways,
}

/// Handler that records every delivery it sees, keyed by job id.
struct RecordingHandler {
    behaviour: Behaviour,
    deliveries: Mutex<HashMap<Uuid, Vec<(usize, i32)>>>,
}

impl RecordingHandler {
    fn new(behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            behaviour,
            deliveries: Mutex::new(HashMap::new()),
        })
    }
}

#[async_trait]
impl JobHandler for RecordingHandler {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        let delivery = ctx.delivery_count();
        self.deliveries
            .lock()
            .await
            .entry(ctx.job_id())
            .or_default()
            .push((ctx.worker, delivery));

        match self.behaviour {
            Behaviour::Succeed => JobResult::Success(None),
            Behaviour::FailFirstDelivery if delivery == 1 => {
                JobResult::Failed("transient failure".into())
            }
            Behaviour::FailFirstDelivery => JobResult::Success(None),
            Behaviour::HangFirstDelivery if delivery == 1 => std::future::pending().await,
            Behaviour::HangFirstDelivery => JobResult::Success(None),
            Behaviour::HangAlways => std::future::pending().await,
        }
    }
}

fn payload(id: &str) -> MatchJobPayload {
    MatchJobPayload::for_resource(&Resource::new("Patient", id, json!({})))
}

fn queue_with_visibility(ms: u64) -> Arc<InMemoryMatchQueue> {
    Arc::new(InMemoryMatchQueue::new(
        QueueConfig::default().with_visibility_timeout(Duration::from_millis(ms)),
    ))
}

fn pool(
    queue: Arc<InMemoryMatchQueue>,
    handler: Arc<dyn JobHandler>,
    workers: usize,
) -> WorkerPool {
    let config = WorkerConfig::default()
        .with_poll_interval(5)
        .with_worker_count(workers);
    let feed = Arc::new(PollingFeed::new(queue, config.poll_interval()));
    WorkerPool::new(feed, handler, config)
}

async fn wait_for<F>(rx: &mut broadcast::Receiver<WorkerEvent>, mut pred: F) -> WorkerEvent
where
    F: FnMut(&WorkerEvent) -> bool,
{
    timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for worker event")
}

// ============================================================================
// DELIVERY
// ============================================================================

#[tokio::test]
async fn test_ten_jobs_five_workers_each_acked_once() {
    let queue = queue_with_visibility(30_000);
    let mut job_ids = Vec::new();
    for i in 0..10 {
        job_ids.push(queue.enqueue(payload(&format!("p{}", i))).await.unwrap());
    }

    let handler = RecordingHandler::new(Behaviour::Succeed);
    let pool = pool(queue.clone(), handler.clone(), 5);
    let mut events = pool.events();
    let handle = pool.start();
    assert_eq!(handle.worker_count(), 5);

    let mut acked = Vec::new();
    while acked.len() < 10 {
        if let WorkerEvent::JobAcked { job_id, .. } =
            wait_for(&mut events, |e| matches!(e, WorkerEvent::JobAcked { .. })).await
        {
            acked.push(job_id);
        }
    }
    handle.shutdown().await;

    acked.sort();
    job_ids.sort();
    assert_eq!(acked, job_ids);

    let deliveries = handler.deliveries.lock().await;
    assert_eq!(deliveries.len(), 10);
    for (job_id, seen) in deliveries.iter() {
        assert_eq!(seen.len(), 1, "job {} processed {} times", job_id, seen.len());
    }
    assert_eq!(queue.stats().await.unwrap().total(), 0);
}

#[tokio::test]
async fn test_stuck_worker_job_is_redelivered_to_another_worker() {
    let queue = queue_with_visibility(100);
    let job_id = queue.enqueue(payload("p1")).await.unwrap();

    let handler = RecordingHandler::new(Behaviour::HangFirstDelivery);
    let pool = pool(queue.clone(), handler.clone(), 2);
    let mut events = pool.events();
    let handle = pool.start();

    let first = wait_for(&mut events, |e| {
        matches!(e, WorkerEvent::JobStarted { delivery_count: 1, .. })
    })
    .await;
    let acked = wait_for(&mut events, |e| matches!(e, WorkerEvent::JobAcked { .. })).await;

    let (WorkerEvent::JobStarted { worker: stuck, .. }, WorkerEvent::JobAcked { worker, job_id: acked_id }) =
        (first, acked)
    else {
        unreachable!()
    };
    assert_eq!(acked_id, job_id);
    assert_ne!(worker, stuck);

    handle.shutdown().await;

    let deliveries = handler.deliveries.lock().await;
    let seen = &deliveries[&job_id];
    assert_eq!(seen.iter().map(|(_, d)| *d).collect::<Vec<_>>(), vec![1, 2]);
    assert_eq!(queue.stats().await.unwrap().total(), 0);
}

#[tokio::test]
async fn test_failed_job_stays_queued_and_retries() {
    let queue = queue_with_visibility(100);
    let job_id = queue.enqueue(payload("p1")).await.unwrap();

    let handler = RecordingHandler::new(Behaviour::FailFirstDelivery);
    let pool = pool(queue.clone(), handler.clone(), 1);
    let mut events = pool.events();
    let handle = pool.start();

    let failed = wait_for(&mut events, |e| matches!(e, WorkerEvent::JobFailed { .. })).await;
    assert!(matches!(failed, WorkerEvent::JobFailed { job_id: id, .. } if id == job_id));
    // Still queued, inside its visibility window.
    assert_eq!(queue.stats().await.unwrap().total(), 1);

    wait_for(&mut events, |e| matches!(e, WorkerEvent::JobAcked { .. })).await;
    handle.shutdown().await;

    assert_eq!(handler.deliveries.lock().await[&job_id].len(), 2);
    assert_eq!(queue.stats().await.unwrap().total(), 0);
}

// ============================================================================
// LIFECYCLE
// ============================================================================

#[tokio::test]
async fn test_shutdown_abandons_in_flight_job() {
    let queue = queue_with_visibility(30_000);
    queue.enqueue(payload("p1")).await.unwrap();

    let pool = pool(queue.clone(), RecordingHandler::new(Behaviour::HangAlways), 1);
    let mut events = pool.events();
    let handle = pool.start();

    wait_for(&mut events, |e| matches!(e, WorkerEvent::JobStarted { .. })).await;
    timeout(Duration::from_secs(5), handle.shutdown())
        .await
        .expect("shutdown should not wait for in-flight jobs");

    wait_for(&mut events, |e| matches!(e, WorkerEvent::WorkerStopped { .. })).await;
    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.in_flight, 1);
    assert_eq!(stats.visible, 0);
}

#[tokio::test]
async fn test_workers_emit_lifecycle_events() {
    let queue = queue_with_visibility(30_000);
    let pool = pool(queue, Arc::new(NoOpHandler), 3);
    let mut events = pool.events();
    let handle = pool.start();

    for _ in 0..3 {
        wait_for(&mut events, |e| matches!(e, WorkerEvent::WorkerStarted { .. })).await;
    }
    handle.shutdown().await;
    for _ in 0..3 {
        wait_for(&mut events, |e| matches!(e, WorkerEvent::WorkerStopped { .. })).await;
    }
}

#[tokio::test]
async fn test_disabled_pool_starts_no_workers() {
    let queue = queue_with_visibility(30_000);
    queue.enqueue(payload("p1")).await.unwrap();

    let config = WorkerConfig::default().with_enabled(false);
    let feed = Arc::new(PollingFeed::new(queue.clone(), Duration::from_millis(5)));
    let handle = WorkerPool::new(feed, Arc::new(NoOpHandler), config).start();
    assert_eq!(handle.worker_count(), 0);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(queue.stats().await.unwrap().visible, 1);
    handle.shutdown().await;
}
