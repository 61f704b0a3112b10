//! Worker pool for processing matching jobs.
//!
//! Each worker is an independent tokio task running the loop
//! `next_job -> execute -> ack`. Workers share no state beyond the feed;
//! the queue's atomic claim is the only coordination point.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use mpi_core::defaults::{EVENT_BUS_CAPACITY, WORKER_COUNT};
use mpi_core::MatchJob;

use crate::feed::JobFeed;
use crate::handler::{JobContext, JobHandler, JobResult};
use crate::DEFAULT_POLL_INTERVAL_MS;

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Sleep between claim attempts, in milliseconds.
    pub poll_interval_ms: u64,
    /// Number of independent workers.
    pub worker_count: usize,
    /// Whether to process jobs at all.
    pub enabled: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            worker_count: WORKER_COUNT,
            enabled: true,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `MPI_WORKER_ENABLED` | `true` | Enable/disable job processing |
    /// | `MPI_WORKER_COUNT` | `4` | Number of workers |
    /// | `MPI_POLL_INTERVAL_MS` | `1000` | Sleep between claims |
    pub fn from_env() -> Self {
        let enabled = std::env::var("MPI_WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let worker_count = std::env::var("MPI_WORKER_COUNT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(WORKER_COUNT)
            .max(1);

        let poll_interval_ms = std::env::var("MPI_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_POLL_INTERVAL_MS);

        Self {
            poll_interval_ms,
            worker_count,
            enabled,
        }
    }

    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Event emitted by the pool.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    WorkerStarted {
        worker: usize,
    },
    JobStarted {
        worker: usize,
        job_id: Uuid,
        delivery_count: i32,
    },
    /// The job was processed and its ack removed it from the queue.
    JobAcked {
        worker: usize,
        job_id: Uuid,
    },
    /// The job was left unacked and will be redelivered.
    JobFailed {
        worker: usize,
        job_id: Uuid,
        error: String,
    },
    WorkerStopped {
        worker: usize,
    },
}

/// Handle for controlling a running pool.
pub struct WorkerPoolHandle {
    shutdown_tx: watch::Sender<bool>,
    event_tx: broadcast::Sender<WorkerEvent>,
    tasks: Vec<JoinHandle<()>>,
}

impl WorkerPoolHandle {
    /// Subscribe to pool events from now on.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    /// Number of running workers.
    pub fn worker_count(&self) -> usize {
        self.tasks.len()
    }

    /// Stop every worker and wait for the loops to exit.
    ///
    /// In-flight jobs are abandoned without ack; the queue redelivers them
    /// after their visibility window.
    pub async fn shutdown(self) {
        self.shutdown_tx.send_replace(true);

        for task in self.tasks {
            if let Err(e) = task.await {
                error!(subsystem = "jobs", component = "worker_pool", error = ?e, "Worker task panicked");
            }
        }
        info!(subsystem = "jobs", component = "worker_pool", "Worker pool stopped");
    }
}

/// Pool of workers sharing one feed and one handler.
pub struct WorkerPool {
    feed: Arc<dyn JobFeed>,
    handler: Arc<dyn JobHandler>,
    config: WorkerConfig,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl WorkerPool {
    pub fn new(feed: Arc<dyn JobFeed>, handler: Arc<dyn JobHandler>, config: WorkerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self {
            feed,
            handler,
            config,
            event_tx,
        }
    }

    /// Subscribe before [`start`](Self::start) to observe every event.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    /// Spawn the workers and return a handle for control.
    pub fn start(self) -> WorkerPoolHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        if !self.config.enabled {
            info!(subsystem = "jobs", component = "worker_pool", "Job processing disabled, not starting workers");
            return WorkerPoolHandle {
                shutdown_tx,
                event_tx: self.event_tx,
                tasks: Vec::new(),
            };
        }

        info!(
            subsystem = "jobs",
            component = "worker_pool",
            worker_count = self.config.worker_count,
            poll_interval_ms = self.config.poll_interval_ms,
            handler = self.handler.name(),
            "Worker pool started"
        );

        let tasks = (0..self.config.worker_count)
            .map(|worker| {
                let w = Worker {
                    worker,
                    feed: self.feed.clone(),
                    handler: self.handler.clone(),
                    event_tx: self.event_tx.clone(),
                };
                tokio::spawn(w.run(shutdown_rx.clone()))
            })
            .collect();

        WorkerPoolHandle {
            shutdown_tx,
            event_tx: self.event_tx,
            tasks,
        }
    }
}

/// One worker's share of the pool, owned by its task.
#[derive(Clone)]
struct Worker {
    worker: usize,
    feed: Arc<dyn JobFeed>,
    handler: Arc<dyn JobHandler>,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl Worker {
    async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let worker = self.worker;
        debug!(subsystem = "jobs", component = "worker", worker, "Worker started");
        let _ = self.event_tx.send(WorkerEvent::WorkerStarted { worker });

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let job = tokio::select! {
                biased;
                _ = shutdown_rx.changed() => break,
                job = self.feed.next_job() => job,
            };
            let job_id = job.id;

            // Processing runs in its own task so a panic is contained and
            // shutdown can abandon it.
            let mut task = tokio::spawn(self.clone().process(job));
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    task.abort();
                    warn!(
                        subsystem = "jobs",
                        component = "worker",
                        worker,
                        job_id = %job_id,
                        "Shutdown with job in flight, left for redelivery"
                    );
                    break;
                }
                joined = &mut task => {
                    if let Err(e) = joined {
                        error!(
                            subsystem = "jobs",
                            component = "worker",
                            worker,
                            job_id = %job_id,
                            error = ?e,
                            "Job task panicked, left for redelivery"
                        );
                    }
                }
            }
        }

        let _ = self.event_tx.send(WorkerEvent::WorkerStopped { worker });
        debug!(subsystem = "jobs", component = "worker", worker, "Worker stopped");
    }

    async fn process(self, job: MatchJob) {
        let start = Instant::now();
        let worker = self.worker;
        let job_id = job.id;
        let ack_token = job.ack_token;
        let delivery_count = job.delivery_count;

        debug!(
            subsystem = "jobs",
            component = "worker",
            worker,
            job_id = %job_id,
            delivery_count,
            resource_type = %job.payload.resource_type,
            "Processing job"
        );
        let _ = self.event_tx.send(WorkerEvent::JobStarted {
            worker,
            job_id,
            delivery_count,
        });

        match self.handler.execute(JobContext::new(job, worker)).await {
            JobResult::Success(_) => match self.feed.ack(ack_token).await {
                Ok(true) => {
                    info!(
                        subsystem = "jobs",
                        component = "worker",
                        worker,
                        job_id = %job_id,
                        delivery_count,
                        duration_ms = start.elapsed().as_millis() as u64,
                        "Job completed"
                    );
                    let _ = self.event_tx.send(WorkerEvent::JobAcked { worker, job_id });
                }
                // The queue already warned; the job belongs to another delivery now.
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        subsystem = "jobs",
                        component = "worker",
                        worker,
                        job_id = %job_id,
                        error = %e,
                        "Failed to ack job, left for redelivery"
                    );
                    let _ = self.event_tx.send(WorkerEvent::JobFailed {
                        worker,
                        job_id,
                        error: e.to_string(),
                    });
                }
            },
            JobResult::Failed(error) => {
                warn!(
                    subsystem = "jobs",
                    component = "worker",
                    worker,
                    job_id = %job_id,
                    delivery_count,
                    %error,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Job failed, left for redelivery"
                );
                let _ = self.event_tx.send(WorkerEvent::JobFailed {
                    worker,
                    job_id,
                    error,
                });
            }
        }
    }
}
