//! # mpi-db
//!
//! PostgreSQL storage layer for the MPI registry.
//!
//! This crate provides:
//! - A connection pool sized for the matching workers
//! - The durable matching job queue (`match_queue` table)
//! - Versioned resource collections with history archiving
//! - In-memory implementations of the same contracts for tests
//!
//! ## Example
//!
//! ```rust,ignore
//! use mpi_db::{Database, PoolConfig, QueueConfig};
//! use mpi_core::{MatchJobPayload, MatchQueue, Resource};
//!
//! let pool_config = PoolConfig::for_workers(4);
//! let db = Database::connect("postgres://localhost/mpi", &pool_config, QueueConfig::from_env()).await?;
//! db.migrate().await?;
//!
//! let patient = Resource::new("Patient", "123", serde_json::json!({"gender": "female"}));
//! let job_id = db.queue.enqueue(MatchJobPayload::for_resource(&patient)).await?;
//! ```

pub mod match_queue;
pub mod memory;
pub mod pool;
pub mod resources;

// Test fixtures for integration tests
// Note: Always compiled so integration tests in other crates can share them
pub mod test_fixtures;

// Re-export core types
pub use mpi_core::*;

pub use match_queue::{PgMatchQueue, QueueConfig};
pub use memory::{InMemoryMatchQueue, InMemoryResourceStore};
pub use pool::{connect_pool, log_pool_metrics, PoolConfig};
pub use resources::{lax_jsonpath, PgResourceStore};

/// Combined database context with all repositories.
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Matching job queue.
    pub queue: PgMatchQueue,
    /// Resource collections and history.
    pub resources: PgResourceStore,
    queue_config: QueueConfig,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>, queue_config: QueueConfig) -> Self {
        Self {
            queue: PgMatchQueue::new(pool.clone(), queue_config.clone()),
            resources: PgResourceStore::new(pool.clone()),
            queue_config,
            pool,
        }
    }

    /// Connect to the given URL with the given pool sizing.
    pub async fn connect(
        url: &str,
        pool_config: &PoolConfig,
        queue_config: QueueConfig,
    ) -> Result<Self> {
        let pool = connect_pool(url, pool_config).await?;
        Ok(Self::new(pool, queue_config))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }

    /// Release every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            // Share the wake handle so clones observe each other's enqueues.
            queue: PgMatchQueue::with_notify(
                self.pool.clone(),
                self.queue_config.clone(),
                self.queue.wake_handle().unwrap_or_default(),
            ),
            resources: PgResourceStore::new(self.pool.clone()),
            queue_config: self.queue_config.clone(),
        }
    }
}
