//! Unified error types for the portal cache layers.

use crate::EntityType;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for the Scholara portal cache.
///
/// Errors are `Clone` because a single settled lookup may be shared by every
/// caller that joined the same in-flight request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScholaraError {
    // ============ Lookup Errors ============
    /// Both identifier paths confirmed the entity does not exist
    #[error("Resource not found: {entity_type} with id {id}")]
    NotFound {
        entity_type: EntityType,
        id: String,
    },

    // ============ Mutation Errors ============
    /// Mutation payload rejected
    #[error("Validation error: {0}")]
    Validation(String),

    /// Caller is not authenticated
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Caller lacks permission
    #[error("Forbidden: {0}")]
    Forbidden(String),

    // ============ Transport Errors ============
    /// Network or server failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Call exceeded its deadline
    #[error("Operation timed out: {0}")]
    Timeout(String),

    // ============ Infrastructure Errors ============
    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ScholaraError {
    /// Returns the HTTP status code this error corresponds to.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::Validation(_) => 422,
            Self::Unauthorized(_) => 401,
            Self::Forbidden(_) => 403,
            Self::Transport(_) => 502,
            Self::Timeout(_) => 504,
            Self::Configuration(_) | Self::Internal(_) => 500,
        }
    }

    /// Returns a machine-readable error code.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Creates a not found error for an entity.
    #[must_use]
    pub fn not_found<T: ToString>(entity_type: EntityType, id: T) -> Self {
        Self::NotFound {
            entity_type,
            id: id.to_string(),
        }
    }

    /// Creates a validation error.
    #[must_use]
    pub fn validation<T: Into<String>>(message: T) -> Self {
        Self::Validation(message.into())
    }

    /// Creates an unauthorized error.
    #[must_use]
    pub fn unauthorized<T: Into<String>>(message: T) -> Self {
        Self::Unauthorized(message.into())
    }

    /// Creates a forbidden error.
    #[must_use]
    pub fn forbidden<T: Into<String>>(message: T) -> Self {
        Self::Forbidden(message.into())
    }

    /// Creates a transport error.
    #[must_use]
    pub fn transport<T: Into<String>>(message: T) -> Self {
        Self::Transport(message.into())
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal<T: Into<String>>(message: T) -> Self {
        Self::Internal(message.into())
    }

    /// Checks if this is a confirmed absence rather than a failure.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Checks if this error came from the network or the remote server.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_))
    }

    /// Checks if the caller lacks credentials or permission.
    #[must_use]
    pub const fn is_authorization(&self) -> bool {
        matches!(self, Self::Unauthorized(_) | Self::Forbidden(_))
    }

    /// Checks if this error is retriable.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        self.is_transport()
    }
}

impl From<serde_json::Error> for ScholaraError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("JSON serialization error: {}", err))
    }
}

/// Serializable error response handed to the presentation layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable error code
    pub code: String,
    /// Human-readable error message
    pub message: String,
}

impl ErrorResponse {
    /// Creates a new error response from a `ScholaraError`.
    #[must_use]
    pub fn from_error(error: &ScholaraError) -> Self {
        Self {
            code: error.error_code().to_string(),
            message: error.to_string(),
        }
    }
}

impl From<&ScholaraError> for ErrorResponse {
    fn from(error: &ScholaraError) -> Self {
        Self::from_error(error)
    }
}
