//! HTTP plumbing shared by the feed fetch and the store client.

mod basic;
mod retry;
pub mod auth;

pub use basic::{BasicClient, ClientOptions};
pub use retry::{RetryPolicy, fetch_with_retry};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::FetchFailure;

/// Sends a prepared request. Both the feed fetch and the store client go
/// through this seam; [`auth::ApiKey`] decorates requests before handing them
/// to an inner client.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: reqwest::Request) -> reqwest::Result<reqwest::Response>;
}

/// Issues a single GET and returns the body of a `2xx` response.
pub async fn fetch_bytes<C: HttpClient>(client: &C, url: &str) -> Result<Bytes, FetchFailure> {
    let parsed = url.parse::<reqwest::Url>().map_err(|e| FetchFailure::InvalidUrl {
        url: url.to_string(),
        reason: format!("{e}"),
    })?;
    let req = reqwest::Request::new(reqwest::Method::GET, parsed);

    let resp = client.execute(req).await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(FetchFailure::Status { status });
    }
    Ok(resp.bytes().await?)
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedClient;
    use super::*;

    #[tokio::test]
    async fn test_fetch_bytes_returns_body() {
        let client = ScriptedClient::new(vec![(200, vec![1, 2, 3])]);
        let bytes = fetch_bytes(&client, "https://example.com/feed").await.unwrap();
        assert_eq!(&bytes[..], &[1, 2, 3]);
    }

    #[tokio::test]
    async fn test_fetch_bytes_rejects_non_success() {
        let client = ScriptedClient::new(vec![(404, Vec::new())]);
        let err = fetch_bytes(&client, "https://example.com/feed").await.unwrap_err();
        assert!(matches!(err, FetchFailure::Status { status } if status.as_u16() == 404));
    }

    #[tokio::test]
    async fn test_fetch_bytes_invalid_url() {
        let client = ScriptedClient::new(vec![]);
        let err = fetch_bytes(&client, "not a url").await.unwrap_err();
        assert!(matches!(err, FetchFailure::InvalidUrl { .. }));
        assert_eq!(client.calls(), 0);
    }
}
