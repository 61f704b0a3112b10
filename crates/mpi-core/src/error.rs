//! Error types for the MPI registry.

use thiserror::Error;

/// Result type alias using the registry's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for matching, linking and queue operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Generic lookup miss
    #[error("Not found: {0}")]
    NotFound(String),

    /// A resource document disappeared between read and write
    #[error("Resource not found: {resource_type}/{id}")]
    ResourceNotFound { resource_type: String, id: String },

    /// Concurrent writers kept moving the stored version
    #[error("Version conflict on {resource_type}/{id} after {attempts} attempts")]
    VersionConflict {
        resource_type: String,
        id: String,
        attempts: u32,
    },

    /// Static matching configuration is malformed or missing
    #[error("Configuration error: {0}")]
    Config(String),

    /// Job queue error
    #[error("Job error: {0}")]
    Job(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for [`Error::ResourceNotFound`].
    pub fn resource_not_found(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Error::ResourceNotFound {
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }

    /// Configuration bugs won't go away on redelivery and need an operator.
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Config(e.to_string())
    }
}
