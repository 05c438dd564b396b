//! Polling client for a running bridge.
//!
//! The bridge never blocks waiting for mail; callers poll `/code` until a
//! passcode shows up. [`BridgeClient::wait_for_code`] is that loop.
//!
//! # Example
//!
//! ```no_run
//! use passcode_bridge::poller::{BridgeClient, PollingConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> passcode_bridge::Result<()> {
//! let client = BridgeClient::new("http://127.0.0.1:8787")?.with_polling(PollingConfig {
//!     interval: Duration::from_secs(3),
//!     max_wait: Duration::from_secs(120),
//! });
//!
//! let requested_at = chrono::Utc::now();
//! // ... trigger the passcode email ...
//! let code = client
//!     .wait_for_code(Some("me@icloud.com"), Some(requested_at))
//!     .await?;
//! println!("Got passcode: {code}");
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, Result};
use crate::web::error::ErrorBody;
use crate::web::handlers::CodeResponse;
use chrono::{DateTime, Utc};
use reqwest::Client;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, instrument};

/// Polling configuration for wait operations.
#[derive(Debug, Clone)]
pub struct PollingConfig {
    /// Interval between `/code` requests.
    pub interval: Duration,
    /// Maximum time to wait for a passcode.
    pub max_wait: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_wait: Duration::from_secs(180),
        }
    }
}

/// HTTP client for the bridge's `/code` endpoint.
#[derive(Debug, Clone)]
pub struct BridgeClient {
    http: Client,
    base_url: String,
    polling: PollingConfig,
}

impl BridgeClient {
    /// Creates a client for the bridge at `base_url` (e.g. `http://127.0.0.1:8787`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::BridgeRequest`] if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let http = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|source| Error::BridgeRequest {
                url: base_url.clone(),
                source,
            })?;
        Ok(Self {
            http,
            base_url,
            polling: PollingConfig::default(),
        })
    }

    /// Replaces the polling configuration.
    #[must_use]
    pub fn with_polling(mut self, polling: PollingConfig) -> Self {
        self.polling = polling;
        self
    }

    /// Asks the bridge once for the newest passcode.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BridgeRequest`] on transport failure and
    /// [`Error::BridgeStatus`] when the bridge reports a failure.
    pub async fn fetch_code(
        &self,
        to: Option<&str>,
        after: Option<DateTime<Utc>>,
    ) -> Result<CodeResponse> {
        let url = format!("{}/code", self.base_url);

        let mut query = Vec::new();
        if let Some(to) = to {
            query.push(("to", to.to_string()));
        }
        if let Some(after) = after {
            query.push(("after", after.timestamp_millis().to_string()));
        }

        let response = self
            .http
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(|source| Error::BridgeRequest {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&text)
                .map(|body| body.error)
                .unwrap_or(text);
            return Err(Error::BridgeStatus {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<CodeResponse>()
            .await
            .map_err(|source| Error::BridgeRequest { url, source })
    }

    /// Polls `/code` until a passcode is found.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WaitTimeout`] after `max_wait`; request failures are
    /// returned immediately.
    #[instrument(
        name = "BridgeClient::wait_for_code",
        skip(self),
        fields(base_url = %self.base_url)
    )]
    pub async fn wait_for_code(
        &self,
        to: Option<&str>,
        after: Option<DateTime<Utc>>,
    ) -> Result<String> {
        let timeout = self.polling.max_wait;
        let deadline = Instant::now() + timeout;

        loop {
            if Instant::now() > deadline {
                return Err(Error::WaitTimeout { timeout });
            }

            let reply = self.fetch_code(to, after).await?;
            if let (true, Some(code)) = (reply.found, reply.code) {
                return Ok(code);
            }

            debug!(
                reason = reply.reason.as_deref().unwrap_or(""),
                "Passcode not available yet"
            );

            tokio::time::sleep(self.polling.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_slash_trimmed() {
        let client = BridgeClient::new("http://127.0.0.1:8787/").unwrap();
        assert_eq!(client.base_url, "http://127.0.0.1:8787");
    }

    #[tokio::test]
    async fn test_unreachable_bridge_is_request_error() {
        let client = BridgeClient::new("http://127.0.0.1:9").unwrap();
        let err = client.fetch_code(None, None).await.unwrap_err();
        assert!(matches!(err, Error::BridgeRequest { .. }));
        assert!(err.is_retryable());
    }
}
