//! Notify action - HTTP POST of event data to an external URL.
//!
//! The [`HttpNotifyAction`] delivers the event data to an HTTP endpoint
//! taken from the handler options, enabling integration with external
//! services without code changes.
//!
//! # Options
//!
//! - `url` (string, required): target endpoint; supports `{{field}}`
//!   interpolation upstream like every other option
//!
//! # Example
//!
//! ```rust,ignore
//! use axon::actions::HttpNotifyAction;
//! use std::time::Duration;
//!
//! let action = HttpNotifyAction::new()
//!     .with_timeout(Duration::from_secs(10))
//!     .with_retries(2);
//! ```

use super::{Action, ActionError, ActionOutcome};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Default timeout for notification requests
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of retries on 5xx errors
const DEFAULT_RETRIES: u32 = 1;

/// An action that POSTs event data to an HTTP endpoint.
///
/// Retries on 5xx responses and transport errors; 4xx responses fail
/// immediately since retrying a rejected payload cannot help.
#[derive(Debug, Clone)]
pub struct HttpNotifyAction {
    /// HTTP client (reused for connection pooling)
    client: Client,

    /// Request timeout
    timeout: Duration,

    /// Number of retries on 5xx errors
    retries: u32,
}

impl HttpNotifyAction {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            timeout: DEFAULT_TIMEOUT,
            retries: DEFAULT_RETRIES,
        }
    }

    /// Set custom timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set number of retries on 5xx errors
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Execute the request with retries on server errors.
    async fn send_request(
        &self,
        url: &str,
        payload: &Value,
    ) -> Result<reqwest::Response, ActionError> {
        let mut last_error = None;
        let mut attempts = 0;

        while attempts <= self.retries {
            if attempts > 0 {
                debug!(
                    attempt = attempts,
                    max_retries = self.retries,
                    "Retrying notification request"
                );
            }

            let result = self
                .client
                .post(url)
                .timeout(self.timeout)
                .json(payload)
                .send()
                .await;

            match result {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return Ok(response);
                    }

                    // Client error: the payload was rejected, retrying
                    // cannot change the outcome
                    if status.is_client_error() {
                        warn!(
                            status = %status,
                            url = %url,
                            "Notification endpoint rejected request"
                        );
                        return Ok(response);
                    }

                    if status.is_server_error() {
                        warn!(
                            status = %status,
                            url = %url,
                            attempt = attempts,
                            "Notification endpoint returned server error, will retry"
                        );
                        last_error =
                            Some(ActionError::Failed(format!("Server error: {}", status)));
                    }
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        url = %url,
                        attempt = attempts,
                        "Notification request failed"
                    );
                    last_error = Some(ActionError::Http(e));
                }
            }

            attempts += 1;
        }

        Err(last_error.unwrap_or_else(|| ActionError::Failed("Unknown error".into())))
    }
}

impl Default for HttpNotifyAction {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Action for HttpNotifyAction {
    fn name(&self) -> &str {
        "notify/http"
    }

    async fn execute(
        &self,
        data: &Value,
        options: &Map<String, Value>,
    ) -> Result<ActionOutcome, ActionError> {
        let url = options
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ActionError::Failed("Missing required option 'url'".into()))?;

        debug!(url = %url, "Sending notification");

        let response = self.send_request(url, data).await?;
        let status = response.status();

        if status.is_success() {
            info!(
                url = %url,
                status = %status,
                "Notification delivered"
            );

            Ok(ActionOutcome::with_metadata(
                self.name(),
                format!("Notification delivered to {} ({})", url, status),
                json!({
                    "url": url,
                    "status": status.as_u16(),
                }),
            ))
        } else {
            error!(
                url = %url,
                status = %status,
                "Notification delivery failed"
            );

            Err(ActionError::Failed(format!(
                "Notification endpoint returned status {}",
                status
            )))
        }
    }
}
