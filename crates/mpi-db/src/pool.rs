//! Connection pool sized for the matching workers.
//!
//! A match run queries each exact field and the shared similarity scan
//! concurrently, so a busy worker can hold more than one connection. The
//! feed's claim polling and startup bookkeeping draw from a small reserve.

use std::time::{Duration, Instant};

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info, warn};

use mpi_core::{Error, Result};

/// Connections budgeted for each worker.
pub const CONNECTIONS_PER_WORKER: u32 = 2;

/// Connections kept for queue polling, stats and migrations.
pub const RESERVED_CONNECTIONS: u32 = 2;

/// Seconds a storage call waits for a free connection.
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Pool sizing for one worker process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl PoolConfig {
    /// Size the pool for `worker_count` concurrent matching workers.
    pub fn for_workers(worker_count: usize) -> Self {
        let workers = u32::try_from(worker_count).unwrap_or(u32::MAX);
        Self {
            max_connections: workers
                .saturating_mul(CONNECTIONS_PER_WORKER)
                .saturating_add(RESERVED_CONNECTIONS),
            acquire_timeout: Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS),
        }
    }

    /// Worker-sized pool unless `DATABASE_MAX_CONNECTIONS` sets an explicit size.
    pub fn from_env(worker_count: usize) -> Self {
        Self::with_override(
            worker_count,
            std::env::var("DATABASE_MAX_CONNECTIONS").ok().as_deref(),
        )
    }

    fn with_override(worker_count: usize, max_connections: Option<&str>) -> Self {
        let config = Self::for_workers(worker_count);
        match max_connections.and_then(|v| v.trim().parse::<u32>().ok()) {
            Some(n) => config.max_connections(n),
            None => config,
        }
    }

    pub fn max_connections(mut self, n: u32) -> Self {
        self.max_connections = n.max(1);
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }
}

/// Open a PostgreSQL pool with the given sizing.
pub async fn connect_pool(database_url: &str, config: &PoolConfig) -> Result<PgPool> {
    let start = Instant::now();

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect(database_url)
        .await
        .map_err(Error::Database)?;

    info!(
        subsystem = "db",
        component = "pool",
        op = "established",
        max_connections = config.max_connections,
        pool_size = pool.size(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Database connection pool established"
    );
    Ok(pool)
}

/// Log current pool usage.
///
/// Warns when no idle connections remain: every worker blocks on storage
/// calls, so an exhausted pool stalls the whole worker pool.
pub fn log_pool_metrics(pool: &PgPool) {
    let size = pool.size();
    let idle = pool.num_idle();

    debug!(
        subsystem = "db",
        component = "pool",
        op = "metrics",
        pool_size = size,
        pool_idle = idle,
        "Pool health check"
    );

    if idle == 0 && size > 0 {
        warn!(
            subsystem = "db",
            component = "pool",
            pool_size = size,
            "Connection pool has no idle connections, workers may stall"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_scales_with_workers() {
        assert_eq!(PoolConfig::for_workers(4).max_connections, 10);
        assert_eq!(PoolConfig::for_workers(1).max_connections, 4);
    }

    #[test]
    fn test_disabled_workers_keep_reserve() {
        assert_eq!(
            PoolConfig::for_workers(0).max_connections,
            RESERVED_CONNECTIONS
        );
    }

    #[test]
    fn test_huge_worker_count_saturates() {
        assert_eq!(PoolConfig::for_workers(usize::MAX).max_connections, u32::MAX);
    }

    #[test]
    fn test_explicit_size_overrides_worker_sizing() {
        assert_eq!(
            PoolConfig::with_override(4, Some("25")).max_connections,
            25
        );
        assert_eq!(PoolConfig::with_override(4, Some("0")).max_connections, 1);
        assert_eq!(
            PoolConfig::with_override(4, Some("lots")),
            PoolConfig::for_workers(4)
        );
        assert_eq!(PoolConfig::with_override(4, None), PoolConfig::for_workers(4));
    }
}
