//! Storage abstractions shared by the matching pipeline.
//!
//! Both traits have a PostgreSQL implementation in `mpi-db` and an
//! in-memory implementation used by tests.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::defaults::CANDIDATE_PAGE_SIZE;
use crate::models::{MatchJob, MatchJobPayload, QueueStats, Resource};
use crate::Result;

/// Durable, ack-based job store.
///
/// Delivery is at-least-once: a claimed job that is not acked within the
/// visibility window is handed out again. There is no de-duplication and
/// no dead-letter path.
#[async_trait]
pub trait MatchQueue: Send + Sync {
    /// Append a job. Returns the job id.
    async fn enqueue(&self, payload: MatchJobPayload) -> Result<Uuid>;

    /// Atomically take the oldest visible job and hide it for the
    /// visibility window. Two callers never receive the same visible job.
    async fn claim(&self) -> Result<Option<MatchJob>>;

    /// Permanently remove the job that was handed out with `ack_token`.
    ///
    /// Returns `false` when the token no longer owns a job, which happens
    /// when the visibility window expired and the job was claimed again.
    async fn ack(&self, ack_token: Uuid) -> Result<bool>;

    /// Current queue depth.
    async fn stats(&self) -> Result<QueueStats>;

    /// Handle signalled on every enqueue made through this instance.
    fn wake_handle(&self) -> Option<Arc<Notify>> {
        None
    }
}

/// Candidate documents must intersect `values` at `path`.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueClause {
    pub path: String,
    pub values: Vec<JsonValue>,
}

impl ValueClause {
    pub fn new(path: impl Into<String>, values: Vec<JsonValue>) -> Self {
        Self {
            path: path.into(),
            values,
        }
    }
}

/// Filter for fetching match candidates from one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateQuery {
    pub resource_type: String,
    /// Id of the querying resource, never returned.
    pub exclude_id: Option<String>,
    /// Every clause must match.
    pub clauses: Vec<ValueClause>,
    /// Keyset cursor: only ids strictly greater are returned.
    pub after_id: Option<String>,
    /// Page size. Results are ordered by id ascending.
    pub limit: i64,
}

impl CandidateQuery {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            exclude_id: None,
            clauses: Vec::new(),
            after_id: None,
            limit: CANDIDATE_PAGE_SIZE,
        }
    }

    pub fn excluding(mut self, id: impl Into<String>) -> Self {
        self.exclude_id = Some(id.into());
        self
    }

    pub fn with_clause(mut self, clause: ValueClause) -> Self {
        self.clauses.push(clause);
        self
    }

    pub fn with_clauses(mut self, clauses: impl IntoIterator<Item = ValueClause>) -> Self {
        self.clauses.extend(clauses);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    /// Continue after the last id of the previous page.
    pub fn after(mut self, id: impl Into<String>) -> Self {
        self.after_id = Some(id.into());
        self
    }
}

/// Result of a conditional version write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceOutcome {
    /// The expected version was archived and replaced.
    Replaced,
    /// Another writer got there first; nothing was written.
    Conflict { stored_version: i64 },
    /// The document no longer exists.
    NotFound,
}

/// Versioned resource collections plus their `_history` archives.
///
/// Each call is atomic on its own; callers that touch several documents
/// get no cross-document atomicity.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Store a new resource as-is.
    async fn insert(&self, resource: &Resource) -> Result<()>;

    /// Latest version of a resource.
    async fn get(&self, resource_type: &str, id: &str) -> Result<Option<Resource>>;

    /// Documents satisfying every clause of `query`.
    async fn find_candidates(&self, query: &CandidateQuery) -> Result<Vec<Resource>>;

    /// Documents of `resource_type` whose `link` array references `reference`.
    async fn find_linked_to(&self, resource_type: &str, reference: &str) -> Result<Vec<Resource>>;

    /// Archive the stored document and overwrite it with `next`, atomically,
    /// but only while the stored version is still `expected_version`.
    ///
    /// The archived copy is the one actually overwritten, so every
    /// superseded version reaches history exactly once.
    async fn replace_version(&self, next: &Resource, expected_version: i64)
        -> Result<ReplaceOutcome>;

    /// Archived versions, oldest first.
    async fn history(&self, resource_type: &str, id: &str) -> Result<Vec<Resource>>;

    /// Remove the latest version. Returns `false` if nothing was deleted.
    async fn delete(&self, resource_type: &str, id: &str) -> Result<bool>;
}
