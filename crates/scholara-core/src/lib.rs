//! # Scholara Core
//!
//! Core types, identifiers, and error definitions for the Scholara portal
//! cache. Every other crate in the workspace builds on these.

pub mod entity;
pub mod error;
pub mod id;
pub mod pagination;
pub mod result;
pub mod telemetry;

pub use entity::*;
pub use error::*;
pub use id::*;
pub use pagination::*;
pub use result::*;
pub use telemetry::*;

// Re-export shaku for dependency injection
pub use shaku::Interface;
