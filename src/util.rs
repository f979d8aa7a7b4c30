use std::{future::Future, time::Duration};

use anyhow::{Context, Result, anyhow};
use tokio::time::timeout;

/// Wraps `tokio::time::timeout`, converting elapsed deadlines and inner errors into contextual
/// `anyhow::Error` values for consistent diagnostics.
pub async fn timeout_with_context<F, T, E>(
    duration: Duration,
    future: F,
    context: impl Into<String>,
) -> Result<T>
where
    F: Future<Output = Result<T, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    let context = context.into();
    timeout(duration, future)
        .await
        .map_err(|_| anyhow!("timed out {context}"))?
        .with_context(|| format!("failed while {context}"))
}

/// Formats a socket-ish target for log fields, keeping empty values visible.
pub fn display_or_dash(value: &str) -> &str {
    if value.is_empty() { "-" } else { value }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[tokio::test]
    async fn passes_through_successful_results() {
        let value = timeout_with_context(
            Duration::from_secs(1),
            async { Ok::<_, io::Error>(7u8) },
            "computing",
        )
        .await
        .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn reports_elapsed_deadline_with_context() {
        let err = timeout_with_context(
            Duration::from_millis(10),
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, io::Error>(())
            },
            "waiting for origin",
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "timed out waiting for origin");
    }

    #[tokio::test]
    async fn wraps_inner_errors() {
        let err = timeout_with_context(
            Duration::from_secs(1),
            async { Err::<(), _>(io::Error::other("boom")) },
            "reading cache file",
        )
        .await
        .unwrap_err();
        assert!(
            err.to_string().contains("failed while reading cache file"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn dash_for_empty_values() {
        assert_eq!(display_or_dash(""), "-");
        assert_eq!(display_or_dash("a.txt"), "a.txt");
    }
}
