//! HTTP request helper producing typed upstream errors.

use std::time::Duration;

use serde_json::Value;

use super::{FailureCategory, UpstreamError};

/// Longest error body kept in an `UpstreamError` message.
const MAX_ERROR_BODY: usize = 256;

/// JSON-over-HTTP client for one provider.
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: reqwest::Client,
    base_url: String,
}

impl HttpUpstream {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("market-gateway/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET `{base_url}{path}` and decode the body as JSON.
    pub async fn get_json(&self, path: &str) -> Result<Value, UpstreamError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(&url).send().await?;
        let status = response.status();

        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            tracing::debug!(url = %url, status = %status, "Upstream returned error status");
            return Err(UpstreamError::from_status(status.as_u16(), body));
        }

        response.json::<Value>().await.map_err(|e| {
            UpstreamError::new(
                FailureCategory::Unknown,
                format!("invalid JSON from {}: {}", url, e),
            )
        })
    }
}
