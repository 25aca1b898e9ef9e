//! Page requests for collection queries.

use serde::{Deserialize, Serialize};

/// A request for a page of results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageRequest {
    /// The page number (0-indexed).
    pub page: usize,
    /// The number of items per page.
    pub size: usize,
}

impl PageRequest {
    /// The default page size.
    pub const DEFAULT_SIZE: usize = 20;
    /// The maximum allowed page size.
    pub const MAX_SIZE: usize = 100;

    /// Creates a new page request.
    #[must_use]
    pub fn new(page: usize, size: usize) -> Self {
        Self {
            page,
            size: size.min(Self::MAX_SIZE),
        }
    }

    /// Creates a page request for the first page with default size.
    #[must_use]
    pub fn first() -> Self {
        Self::new(0, Self::DEFAULT_SIZE)
    }

    /// Returns the offset of the first item.
    #[must_use]
    pub const fn offset(&self) -> usize {
        self.page * self.size
    }

    /// Returns true if the page number is the default.
    #[must_use]
    pub const fn is_first_page(&self) -> bool {
        self.page == 0
    }

    /// Returns true if the page size is the default.
    #[must_use]
    pub const fn has_default_size(&self) -> bool {
        self.size == Self::DEFAULT_SIZE
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::first()
    }
}
