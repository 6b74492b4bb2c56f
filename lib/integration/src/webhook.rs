//! HTTP webhook delivery.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, instrument};
use waypoint_workflow::{WebhookError, WebhookPayload, WebhookSink};

/// Request timeout used by [`HttpWebhookSink::new`].
pub const DEFAULT_WEBHOOK_TIMEOUT: Duration = Duration::from_secs(5);

/// Posts [`WebhookPayload`]s as JSON to a fixed URL.
#[derive(Debug, Clone)]
pub struct HttpWebhookSink {
    client: Client,
    url: String,
}

impl HttpWebhookSink {
    /// Creates a sink with [`DEFAULT_WEBHOOK_TIMEOUT`].
    ///
    /// # Errors
    ///
    /// Returns [`WebhookError::RequestFailed`] if the HTTP client cannot be
    /// built.
    pub fn new(url: impl Into<String>) -> Result<Self, WebhookError> {
        Self::with_timeout(url, DEFAULT_WEBHOOK_TIMEOUT)
    }

    /// Creates a sink whose requests give up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`WebhookError::RequestFailed`] if the HTTP client cannot be
    /// built.
    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Result<Self, WebhookError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WebhookError::RequestFailed {
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl WebhookSink for HttpWebhookSink {
    #[instrument(skip(self, payload), fields(url = %self.url, from = %payload.from, to = %payload.to))]
    async fn deliver(&self, payload: &WebhookPayload) -> Result<(), WebhookError> {
        let response = self
            .client
            .post(&self.url)
            .json(payload)
            .send()
            .await
            .map_err(|e| WebhookError::RequestFailed {
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(WebhookError::Rejected {
                status: status.as_u16(),
            });
        }

        debug!(status = status.as_u16(), "webhook delivered");
        Ok(())
    }
}
