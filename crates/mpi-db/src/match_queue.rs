//! Matching job queue backed by the `match_queue` table.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres, Row};
use tokio::sync::Notify;
use tracing::{debug, warn};
use uuid::Uuid;

use mpi_core::defaults::QUEUE_VISIBILITY_TIMEOUT_SECS;
use mpi_core::{Error, MatchJob, MatchJobPayload, MatchQueue, QueueStats, Result};

/// Queue behaviour shared by the PostgreSQL and in-memory queues.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// How long a claimed job stays hidden before it can be claimed again.
    pub visibility_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(QUEUE_VISIBILITY_TIMEOUT_SECS),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `MPI_VISIBILITY_TIMEOUT_SECS` | `30` | Visibility window for claimed jobs |
    pub fn from_env() -> Self {
        let secs = std::env::var("MPI_VISIBILITY_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(QUEUE_VISIBILITY_TIMEOUT_SECS)
            .max(1);
        Self {
            visibility_timeout: Duration::from_secs(secs),
        }
    }

    /// Set the visibility window.
    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }
}

/// PostgreSQL implementation of MatchQueue.
pub struct PgMatchQueue {
    pool: Pool<Postgres>,
    config: QueueConfig,
    /// Wakes in-process feeds on enqueue.
    notify: Arc<Notify>,
}

impl PgMatchQueue {
    /// Create a new PgMatchQueue with the given connection pool.
    pub fn new(pool: Pool<Postgres>, config: QueueConfig) -> Self {
        Self {
            pool,
            config,
            notify: Arc::new(Notify::new()),
        }
    }

    /// Create a new PgMatchQueue sharing an existing notify handle.
    pub fn with_notify(pool: Pool<Postgres>, config: QueueConfig, notify: Arc<Notify>) -> Self {
        Self {
            pool,
            config,
            notify,
        }
    }

    /// Queue configuration in effect.
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Parse a claimed row into a MatchJob.
    fn parse_job_row(row: sqlx::postgres::PgRow) -> Result<MatchJob> {
        let id: Uuid = row.get("id");
        let payload: JsonValue = row.get("payload");
        let payload: MatchJobPayload = serde_json::from_value(payload).map_err(|e| {
            Error::Serialization(format!("match job {} has an invalid payload: {}", id, e))
        })?;
        let ack_token: Option<Uuid> = row.get("ack_token");
        let ack_token =
            ack_token.ok_or_else(|| Error::Job(format!("claimed job {} has no ack token", id)))?;

        Ok(MatchJob {
            id,
            payload,
            ack_token,
            delivery_count: row.get("delivery_count"),
            enqueued_at: row.get("created_at"),
            visible_at: row.get("visible_at"),
        })
    }
}

#[async_trait]
impl MatchQueue for PgMatchQueue {
    async fn enqueue(&self, payload: MatchJobPayload) -> Result<Uuid> {
        let job_id = Uuid::now_v7();
        let body = serde_json::to_value(&payload)?;

        sqlx::query(
            "INSERT INTO match_queue (id, payload, visible_at, ack_token, delivery_count, created_at)
             VALUES ($1, $2, now(), NULL, 0, now())",
        )
        .bind(job_id)
        .bind(&body)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        debug!(
            subsystem = "db",
            component = "match_queue",
            op = "enqueue",
            job_id = %job_id,
            resource_type = %payload.resource_type,
            "Match job enqueued"
        );

        self.notify.notify_waiters();
        Ok(job_id)
    }

    async fn claim(&self) -> Result<Option<MatchJob>> {
        let ack_token = Uuid::new_v4();
        let visibility_secs = self.config.visibility_timeout.as_secs_f64();

        // FOR UPDATE SKIP LOCKED: concurrent claimers never block on, or
        // receive, the same row.
        let row = sqlx::query(
            "UPDATE match_queue
             SET visible_at = now() + make_interval(secs => $1),
                 ack_token = $2,
                 delivery_count = delivery_count + 1
             WHERE id = (
                 SELECT id FROM match_queue
                 WHERE visible_at <= now()
                 ORDER BY created_at ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING id, payload, ack_token, delivery_count, created_at, visible_at",
        )
        .bind(visibility_secs)
        .bind(ack_token)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_job_row).transpose()
    }

    async fn ack(&self, ack_token: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM match_queue WHERE ack_token = $1")
            .bind(ack_token)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        let acked = result.rows_affected() > 0;
        if !acked {
            warn!(
                subsystem = "db",
                component = "match_queue",
                op = "ack",
                ack_token = %ack_token,
                "Ack token no longer owns a job (visibility window expired)"
            );
        }
        Ok(acked)
    }

    async fn stats(&self) -> Result<QueueStats> {
        let row = sqlx::query(
            "SELECT
                 COUNT(*) FILTER (WHERE visible_at <= now()) AS visible,
                 COUNT(*) FILTER (WHERE visible_at > now()) AS in_flight
             FROM match_queue",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(QueueStats {
            visible: row.get("visible"),
            in_flight: row.get("in_flight"),
        })
    }

    fn wake_handle(&self) -> Option<Arc<Notify>> {
        Some(self.notify.clone())
    }
}
