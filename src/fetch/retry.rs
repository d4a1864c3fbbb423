use bytes::Bytes;
use std::time::Duration;
use tracing::{error, info, warn};

use super::{HttpClient, fetch_bytes};

/// Bounded exponential backoff for the feed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(1500),
        }
    }
}

impl RetryPolicy {
    /// Wait after the failed `attempt` (1-based): `base * 2^(attempt-1)`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

/// Fetches the feed, retrying transient failures.
///
/// Never fails: when every attempt is used up, or the failure is permanent,
/// the error is logged and an empty buffer is returned. Callers treat empty
/// input as "no data this cycle".
#[tracing::instrument(skip(client, policy), fields(url = %url, max_attempts = policy.max_attempts))]
pub async fn fetch_with_retry<C: HttpClient>(client: &C, url: &str, policy: &RetryPolicy) -> Bytes {
    let max_attempts = policy.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        match fetch_bytes(client, url).await {
            Ok(bytes) => {
                info!(attempt, bytes = bytes.len(), "Feed fetched");
                return bytes;
            }
            Err(e) if !e.is_transient() => {
                error!(attempt, error = %e, "Feed fetch failed permanently; no data this cycle");
                return Bytes::new();
            }
            Err(e) if attempt == max_attempts => {
                error!(attempt, error = %e, "Feed fetch retries exhausted; no data this cycle");
            }
            Err(e) => {
                let delay = policy.delay_after(attempt);
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Feed fetch failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }

    Bytes::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::testing::ScriptedClient;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_delay_doubles_per_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_millis(1500));
        assert_eq!(policy.delay_after(2), Duration::from_millis(3000));
        assert_eq!(policy.delay_after(3), Duration::from_millis(6000));
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let client = ScriptedClient::new(vec![(503, vec![]), (502, vec![]), (200, vec![7, 8])]);
        let bytes = fetch_with_retry(&client, "https://example.com/vp", &fast_policy(4)).await;
        assert_eq!(&bytes[..], &[7, 8]);
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_empty() {
        let client = ScriptedClient::new(vec![(503, vec![]); 6]);
        let bytes = fetch_with_retry(&client, "https://example.com/vp", &fast_policy(4)).await;
        assert!(bytes.is_empty());
        assert_eq!(client.calls(), 4);
    }

    #[tokio::test]
    async fn test_permanent_failure_stops_immediately() {
        let client = ScriptedClient::new(vec![(403, vec![]), (200, vec![1])]);
        let bytes = fetch_with_retry(&client, "https://example.com/vp", &fast_policy(4)).await;
        assert!(bytes.is_empty());
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_tries_once() {
        let client = ScriptedClient::new(vec![(200, vec![1])]);
        let bytes = fetch_with_retry(&client, "https://example.com/vp", &fast_policy(0)).await;
        assert_eq!(&bytes[..], &[1]);
    }
}
