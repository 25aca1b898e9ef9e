//! Timeout wrapper for async operations.

use scholara_core::ScholaraError;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Wraps an async operation with a timeout.
///
/// An elapsed deadline becomes [`ScholaraError::Timeout`], which callers treat
/// as a transport failure of that one operation.
pub async fn with_timeout<F, Fut, T>(operation: &str, duration: Duration, f: F) -> Result<T, ScholaraError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, ScholaraError>>,
{
    match tokio::time::timeout(duration, f()).await {
        Ok(result) => result,
        Err(_) => {
            warn!(operation = %operation, timeout = ?duration, "Operation timed out");
            Err(ScholaraError::Timeout(format!(
                "{} timed out after {:?}",
                operation, duration
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_timeout_success() {
        let result = with_timeout("lookup", Duration::from_secs(1), || async { Ok::<_, ScholaraError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_timeout_exceeded() {
        let result = with_timeout("lookup", Duration::from_millis(10), || async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok::<_, ScholaraError>(42)
        })
        .await;

        match result {
            Err(ScholaraError::Timeout(msg)) => assert!(msg.starts_with("lookup")),
            other => panic!("Expected Timeout error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_inner_error_passes_through() {
        let result: Result<i32, _> = with_timeout("mutate", Duration::from_secs(1), || async {
            Err(ScholaraError::validation("rejected"))
        })
        .await;

        assert_eq!(result.unwrap_err(), ScholaraError::validation("rejected"));
    }
}
