//! # Scholara Cache
//!
//! Dual-identifier resolution and cache coordination for the Scholara portal.
//!
//! Every portal entity can be addressed by a legacy sequential id or by its
//! canonical code. This crate resolves either form to one cache entry keyed by
//! the canonical code, shares in-flight lookups, drops results of superseded
//! resolves and invalidates dependent entries after writes.

pub mod client;
pub mod context;
mod flight;
pub mod generation;
pub mod invalidation;
pub mod keys;
pub mod metrics;
pub mod resolution;
pub mod resolver;
pub mod slot;
pub mod store;

pub use client::*;
pub use context::*;
pub use generation::*;
pub use invalidation::*;
pub use keys::{derive_key, CacheKey, KeyParams, KeyPattern, Operation, ParamValue, Scalar};
pub use self::metrics::{register_metrics, CacheMetrics};
pub use resolution::*;
pub use resolver::*;
pub use slot::*;
pub use store::*;
