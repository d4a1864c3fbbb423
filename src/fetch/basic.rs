use super::HttpClient;
use anyhow::Result;
use async_trait::async_trait;
use reqwest::tls;
use std::time::Duration;

/// Connection settings shared by every outbound request.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub user_agent: String,
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

/// Plain [`HttpClient`] over a pooled `reqwest` client.
///
/// Certificates are verified against the platform trust store and TLS below
/// 1.2 is refused.
pub struct BasicClient(reqwest::Client);

impl BasicClient {
    pub fn new(options: &ClientOptions) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(options.user_agent.clone())
            .timeout(options.timeout)
            .connect_timeout(options.connect_timeout)
            .min_tls_version(tls::Version::TLS_1_2)
            .build()?;
        Ok(Self(client))
    }
}

#[async_trait]
impl HttpClient for BasicClient {
    async fn execute(&self, req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        self.0.execute(req).await
    }
}
