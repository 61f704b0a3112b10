//! Centralized default constants for the MPI registry.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates and the worker binary reference these constants instead of
//! defining their own magic numbers.
//!
//! Organized by domain area. When adding new constants, place them in the
//! appropriate section.

// =============================================================================
// DATABASE
// =============================================================================

/// Default database URL used by the worker binary.
pub const DATABASE_URL: &str = "postgres://localhost/mpi";

/// Documents fetched per page when scanning candidates.
pub const CANDIDATE_PAGE_SIZE: i64 = 10_000;

/// Optimistic write attempts before a link update gives up.
pub const LINK_SAVE_ATTEMPTS: u32 = 5;

// =============================================================================
// MATCHING
// =============================================================================

/// Default location of the static matching configuration.
pub const MATCHING_CONFIG_PATH: &str = "config/matching.json";

/// Default `maxResults` for one match run.
pub const MATCH_MAX_RESULTS: usize = 10;

/// Scores above this are `probable` (exclusive bound).
pub const PROBABLE_THRESHOLD: f64 = 0.9;

/// Scores above this are `possible` (exclusive bound).
pub const POSSIBLE_THRESHOLD: f64 = 0.5;

/// Decimal places kept when reducing accumulated scores.
pub const SCORE_PRECISION: i32 = 6;

/// Root under which precomputed matching representations are stored.
pub const TRANSFORMS_ROOT: &str = "_transforms.matching";

/// Extension URL carrying the numeric score on a link edge.
pub const LINK_MATCHING_SCORE_URL: &str = "http://hearth.org/link-matching-score";

/// Extension URL carrying the classification code on a search result.
pub const MPI_MATCH_URL: &str = "http://hl7.org/fhir/StructureDefinition/patient-mpi-match";

// =============================================================================
// JOB PROCESSING
// =============================================================================

/// Default worker poll interval in milliseconds.
pub const JOB_POLL_INTERVAL_MS: u64 = 1_000;

/// Default number of independent workers.
pub const WORKER_COUNT: usize = 4;

/// Default queue visibility window in seconds.
///
/// A claimed job that is not acked within this window becomes claimable again.
pub const QUEUE_VISIBILITY_TIMEOUT_SECS: u64 = 30;

/// Capacity of the worker event broadcast channel.
pub const EVENT_BUS_CAPACITY: usize = 256;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_are_ordered() {
        assert!(POSSIBLE_THRESHOLD < PROBABLE_THRESHOLD);
        assert!(PROBABLE_THRESHOLD < 1.0);
    }

    #[test]
    fn transforms_root_is_dotted_path() {
        assert!(!TRANSFORMS_ROOT.starts_with('.'));
        assert!(!TRANSFORMS_ROOT.ends_with('.'));
    }
}
