//! Error types for HearthLink

use thiserror::Error;

/// Main error type for HearthLink operations
///
/// The HTTP layer maps each variant to a status code uniformly. The
/// `Authentication` variant deliberately carries no detail: the reason a
/// credential was rejected is logged at the failure site and never surfaced
/// to the caller.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("{0} not found")]
    NotFound(String),

    #[error("authentication failed")]
    Authentication,

    #[error("{0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using HearthLink's Error
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a validation error for a named field
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a not-found error for a named entity
    pub fn not_found(entity: impl Into<String>) -> Self {
        Error::NotFound(entity.into())
    }

    /// Create a conflict error (entity not in the required state)
    pub fn conflict(message: impl Into<String>) -> Self {
        Error::Conflict(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal(message.into())
    }
}
