//! Structured logging schema and field name constants for the MPI registry.
//!
//! All crates use these constants for consistent structured logging fields,
//! so log aggregation can query by the same field names across the queue,
//! matching engine, linking manager and workers.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Requires operator attention (configuration bugs, storage down) |
//! | WARN  | Job left for redelivery, stale ack, recoverable fallback |
//! | INFO  | Lifecycle events (startup, shutdown), job completions |
//! | DEBUG | Decision points, per-field scores, ranking results |
//! | TRACE | Per-candidate iteration |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "db", "matching", "linking", "jobs"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "pool", "match_queue", "resource_store", "engine", "worker"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "claim", "ack", "find_matches", "remove_previous_links"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Queue job UUID being processed.
pub const JOB_ID: &str = "job_id";

/// Worker index within the pool.
pub const WORKER: &str = "worker";

/// Resource type (collection) being operated on.
pub const RESOURCE_TYPE: &str = "resource_type";

/// Resource id being operated on.
pub const RESOURCE_ID: &str = "resource_id";

/// Configured field path being scored.
pub const FIELD_PATH: &str = "path";

/// Matching algorithm identifier.
pub const ALGORITHM: &str = "algorithm";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of scored candidates returned by a match run.
pub const CANDIDATE_COUNT: &str = "candidate_count";

/// Number of documents rewritten by a linking step.
pub const UPDATED_COUNT: &str = "updated_count";

/// Number of times a job has been handed out.
pub const DELIVERY_COUNT: &str = "delivery_count";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
