//! Result type alias for Scholara.

use crate::ScholaraError;

/// A specialized `Result` type for Scholara operations.
pub type ScholaraResult<T> = Result<T, ScholaraError>;
