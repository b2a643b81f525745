//! Bounded store calls.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::StoreError;

/// Run a store call, failing with [`StoreError::Unavailable`] once `limit` elapses.
///
/// A timed-out call is dropped, so it never reports success after the caller
/// has already seen the failure.
pub async fn bounded<T, F>(limit: Duration, operation: &'static str, call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => {
            let millis = limit.as_millis();
            warn!(operation, timeout_ms = millis as u64, "store call timed out");
            Err(StoreError::Unavailable(format!("{operation} timed out after {millis}ms")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn slow_calls_become_unavailable() {
        let result: Result<(), StoreError> = bounded(Duration::from_millis(10), "slow", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(StoreError::Unavailable(msg)) if msg.contains("slow")));
    }

    #[tokio::test]
    async fn fast_calls_pass_through() {
        let result = bounded(Duration::from_secs(1), "fast", async { Ok::<_, StoreError>(7) }).await;
        assert_eq!(result, Ok(7));
    }
}
