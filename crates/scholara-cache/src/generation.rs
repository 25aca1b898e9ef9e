//! Generation tokens for discarding superseded resolves.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Issues monotonically increasing generations for one logical slot.
#[derive(Debug, Clone, Default)]
pub struct GenerationTracker {
    counter: Arc<AtomicU64>,
}

impl GenerationTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new generation, superseding every earlier one.
    #[must_use]
    pub fn begin(&self) -> Generation {
        let value = self.counter.fetch_add(1, Ordering::AcqRel) + 1;
        Generation {
            counter: Arc::clone(&self.counter),
            value,
        }
    }

    /// Supersedes the current generation without starting a new request.
    pub fn abandon(&self) {
        self.counter.fetch_add(1, Ordering::AcqRel);
    }

    #[must_use]
    pub fn current(&self) -> u64 {
        self.counter.load(Ordering::Acquire)
    }
}

/// A token captured when a resolve starts.
#[derive(Debug, Clone)]
pub struct Generation {
    counter: Arc<AtomicU64>,
    value: u64,
}

impl Generation {
    /// A generation nobody else can supersede, for one-shot resolves.
    #[must_use]
    pub fn detached() -> Self {
        GenerationTracker::new().begin()
    }

    #[must_use]
    pub const fn value(&self) -> u64 {
        self.value
    }

    /// Returns true while no later generation has started.
    #[must_use]
    pub fn is_current(&self) -> bool {
        self.counter.load(Ordering::Acquire) == self.value
    }
}
