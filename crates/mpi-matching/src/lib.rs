//! # mpi-matching
//!
//! Probabilistic record matching and duplicate linking for the MPI registry.
//!
//! This crate provides:
//! - The matching configuration registry (JSON or YAML)
//! - Similarity and phonetic algorithms
//! - The before-write hook that precomputes matching representations
//! - The matching engine (per-field scoring, accumulation, classification)
//! - The resource linker that maintains symmetric duplicate links
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use mpi_matching::{MatchingEngine, MatchingRegistry, ResourceLinker};
//!
//! let registry = Arc::new(MatchingRegistry::load("config/matching.json".as_ref())?);
//! let engine = MatchingEngine::new(store.clone(), registry);
//! let linker = ResourceLinker::new(store);
//!
//! let outcome = engine.find_matches("Patient", &patient, 10).await?;
//! linker.apply_matches(&outcome.candidates, &patient).await?;
//! ```

pub mod algorithms;
pub mod config;
pub mod engine;
pub mod linking;
pub mod representations;

// Re-export core types
pub use mpi_core::*;

pub use algorithms::{best_similarity, normalize, similarity, soundex};
pub use config::{
    Algorithm, AlgorithmFamily, FieldMatchConfig, MatchingRegistry, ResourceMatchConfig,
    ScoreAccumulation,
};
pub use engine::{accumulate, discriminator_clauses, rank, round_score, FieldScores, MatchingEngine};
pub use linking::{strip_duplicate_links_to, strip_matching_links, ResourceLinker};
pub use representations::{field_representations, precompute_representations};
