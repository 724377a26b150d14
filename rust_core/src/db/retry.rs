//! Database retry logic for transient failures
//!
//! Provides automatic retry with exponential backoff for database operations.

use anyhow::Result;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Execute a database operation with automatic retry on transient failures
///
/// # Example
/// ```ignore
/// use pick4_core::db::retry::execute_with_retry;
///
/// let result = execute_with_retry(
///     || async {
///         sqlx::query("UPDATE picks SET result_status = $1 WHERE id = $2")
///             .bind("hit")
///             .bind(pick_id)
///             .execute(&pool)
///             .await
///             .map_err(Into::into)
///     },
///     3 // max attempts
/// ).await?;
/// ```
pub async fn execute_with_retry<F, Fut, T>(mut f: F, max_attempts: u32) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if attempt < max_attempts && is_retriable_error(&e) => {
                let backoff_ms = 100_u64 * 2_u64.pow(attempt - 1);
                warn!(
                    "Database operation failed (attempt {}/{}): {}. Retrying in {}ms",
                    attempt, max_attempts, e, backoff_ms
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Check if a database error is retriable
fn is_retriable_error(e: &anyhow::Error) -> bool {
    let err_str = e.to_string().to_lowercase();

    // Connection-related errors that are likely transient
    err_str.contains("connection")
        || err_str.contains("timeout")
        || err_str.contains("broken pipe")
        || err_str.contains("connection reset")
        || err_str.contains("connection refused")
        // PostgreSQL specific transient errors
        || err_str.contains("could not serialize")
        || err_str.contains("deadlock detected")
        || err_str.contains("too many clients")
        || err_str.contains("server closed the connection")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_is_retriable_error() {
        assert!(is_retriable_error(&anyhow::anyhow!("connection timeout")));
        assert!(is_retriable_error(&anyhow::anyhow!("connection refused")));
        assert!(is_retriable_error(&anyhow::anyhow!("deadlock detected")));
        assert!(is_retriable_error(&anyhow::anyhow!("too many clients")));

        // Application errors (not retriable)
        assert!(!is_retriable_error(&anyhow::anyhow!(
            "unique constraint violation"
        )));
        assert!(!is_retriable_error(&anyhow::anyhow!(
            "invalid input syntax"
        )));
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failure() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result: Result<u32> = execute_with_retry(
            || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(anyhow::anyhow!("connection reset"))
                    } else {
                        Ok(n)
                    }
                }
            },
            5,
        )
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_on_permanent_error() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result: Result<u32> = execute_with_retry(
            || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(anyhow::anyhow!("invalid input syntax"))
                }
            },
            5,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
