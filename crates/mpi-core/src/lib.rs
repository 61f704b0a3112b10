//! # mpi-core
//!
//! Core types, traits, and abstractions for the MPI registry.
//!
//! This crate provides the resource and link models, the queue and resource
//! store contracts, and the dotted-path walker that the matching and job
//! crates build on.

pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod traits;
pub mod walker;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use models::*;
pub use traits::*;
pub use walker::{walk, walk_owned, walk_strings};
