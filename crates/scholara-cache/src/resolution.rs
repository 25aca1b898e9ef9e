//! Caller-visible resolve state.

use scholara_core::ScholaraError;

/// Tri-state result handed to callers: data, loading flag and error.
///
/// Stale data is kept in `data` while a refetch is pending so it can be shown
/// immediately. `not_found` is set when every identifier path confirmed the
/// entity does not exist; that is not an error.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution<T> {
    pub data: Option<T>,
    pub is_loading: bool,
    pub error: Option<ScholaraError>,
    pub not_found: bool,
}

impl<T> Default for Resolution<T> {
    fn default() -> Self {
        Self::idle()
    }
}

impl<T> Resolution<T> {
    /// Nothing requested yet.
    #[must_use]
    pub const fn idle() -> Self {
        Self {
            data: None,
            is_loading: false,
            error: None,
            not_found: false,
        }
    }

    /// A lookup is pending; `data` is whatever stale value can be shown meanwhile.
    #[must_use]
    pub fn loading(data: Option<T>) -> Self {
        Self {
            data,
            is_loading: true,
            error: None,
            not_found: false,
        }
    }

    #[must_use]
    pub fn ready(data: T) -> Self {
        Self {
            data: Some(data),
            is_loading: false,
            error: None,
            not_found: false,
        }
    }

    #[must_use]
    pub const fn not_found() -> Self {
        Self {
            data: None,
            is_loading: false,
            error: None,
            not_found: true,
        }
    }

    /// The lookup failed; `data` keeps the last known value, if any.
    #[must_use]
    pub fn failed(error: ScholaraError, data: Option<T>) -> Self {
        Self {
            data,
            is_loading: false,
            error: Some(error),
            not_found: false,
        }
    }

    /// Returns true once nothing is pending.
    #[must_use]
    pub const fn is_settled(&self) -> bool {
        !self.is_loading
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Resolution<U> {
        Resolution {
            data: self.data.map(f),
            is_loading: self.is_loading,
            error: self.error,
            not_found: self.not_found,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_states() {
        let idle: Resolution<u8> = Resolution::default();
        assert!(idle.is_settled() && idle.data.is_none());

        let loading = Resolution::loading(Some(1));
        assert!(!loading.is_settled());
        assert_eq!(loading.data, Some(1));

        let missing: Resolution<u8> = Resolution::not_found();
        assert!(missing.not_found && missing.error.is_none());

        let failed = Resolution::failed(ScholaraError::transport("down"), Some(2));
        assert_eq!(failed.data, Some(2));
        assert!(failed.error.is_some());
    }

    #[test]
    fn test_map() {
        let mapped = Resolution::ready(2).map(|v| v * 10);
        assert_eq!(mapped.data, Some(20));
    }
}
