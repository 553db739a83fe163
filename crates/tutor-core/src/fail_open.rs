//! Fail-open helper for infrastructure side effects
//!
//! Activity logging and similar bookkeeping must never abort a refinement
//! run. Agent calls, judging and stop decisions do NOT go through here;
//! their failures are handled explicitly by the caller.

use std::future::Future;
use tracing::warn;

use crate::Result;

/// Run an infrastructure operation, logging and swallowing its failure
///
/// ```no_run
/// use tutor_core::fail_open::fail_open;
/// use tutor_core::Result;
///
/// async fn append_log() -> Result<()> {
///     Ok(())
/// }
///
/// async fn example() {
///     let written = fail_open("activity_log", || append_log()).await;
///     assert!(written.is_some());
/// }
/// ```
pub async fn fail_open<F, Fut, T>(operation_name: &str, f: F) -> Option<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match f().await {
        Ok(val) => Some(val),
        Err(e) => {
            warn!("{} failed (fail-open): {}", operation_name, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TutorError;

    #[tokio::test]
    async fn test_fail_open_success() {
        let result = fail_open("test_op", || async { Ok::<_, TutorError>(42) }).await;
        assert_eq!(result, Some(42));
    }

    #[tokio::test]
    async fn test_fail_open_swallows_error() {
        let result = fail_open("test_op", || async {
            Err::<i32, _>(TutorError::Io("disk full".to_string()))
        })
        .await;
        assert_eq!(result, None);
    }
}
