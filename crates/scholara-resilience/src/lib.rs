//! # Scholara Resilience
//!
//! Resilience patterns for the Scholara portal cache.
//! Every data access call runs under a caller-specified deadline.

pub mod timeout;

pub use timeout::*;
