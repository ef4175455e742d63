//! Thin client for the remote business API.
//!
//! Carries the base URL and injected application credentials, and exposes
//! the two calls the entity stream is built on: a paginated collection GET
//! and a single-entity POST. Connection pooling comes from the shared
//! `reqwest::Client`.

use crate::config::{AppCredentials, RuntimeConfig};
use crate::entities::StreamError;
use reqwest::header::CONTENT_RANGE;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

/// One fetched slice of a remote collection.
#[derive(Debug, Clone)]
pub struct CollectionPage {
    pub items: Vec<Value>,

    /// Total collection size from the `Content-Range` header, when present
    pub total: Option<u64>,
}

/// Authenticated client for one remote API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    base: String,
    key: String,
    secret: String,
    http: Client,
}

impl ApiClient {
    /// Create a client for the given base URL and credentials.
    pub fn new(base: impl Into<String>, creds: &AppCredentials) -> Self {
        let mut base = base.into();
        while base.ends_with('/') {
            base.pop();
        }
        Self {
            base,
            key: creds.key.clone(),
            secret: creds.secret.clone(),
            http: Client::new(),
        }
    }

    /// Build a client from the worker configuration (`cwrx.api.root` plus
    /// the injected app credentials).
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(&config.cwrx.api.root, &config.creds)
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base, path)
        } else {
            format!("{}/{}", self.base, path)
        }
    }

    /// GET one page of a collection endpoint.
    ///
    /// The server responds with a JSON array body; a `Content-Range`
    /// header of the form `<start>-<end>/<total>` yields the total.
    pub async fn get_collection(
        &self,
        path: &str,
        query: &[(String, String)],
    ) -> Result<CollectionPage, StreamError> {
        let url = self.url(path);
        debug!(url = %url, "Fetching collection page");

        let response = self
            .http
            .get(&url)
            .header("x-app-key", &self.key)
            .header("x-app-secret", &self.secret)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(StreamError::Status {
                status: status.as_u16(),
                endpoint: path.to_string(),
            });
        }

        let total = response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total);

        let items: Vec<Value> = response.json().await?;
        Ok(CollectionPage { items, total })
    }

    /// POST one entity to a collection endpoint, returning the created
    /// entity as echoed by the server.
    pub async fn post_entity(&self, path: &str, body: &Value) -> Result<Value, StreamError> {
        let url = self.url(path);
        debug!(url = %url, "Posting entity");

        let response = self
            .http
            .post(&url)
            .header("x-app-key", &self.key)
            .header("x-app-secret", &self.secret)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(StreamError::Status {
                status: status.as_u16(),
                endpoint: path.to_string(),
            });
        }

        Ok(response.json().await?)
    }
}

/// Parse the total out of `Content-Range: <start>-<end>/<total>`.
fn parse_content_range_total(value: &str) -> Option<u64> {
    value.rsplit('/').next()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_range_total() {
        assert_eq!(parse_content_range_total("0-49/200"), Some(200));
        assert_eq!(parse_content_range_total("50-99/120"), Some(120));
        assert_eq!(parse_content_range_total("0-0/0"), Some(0));
        assert_eq!(parse_content_range_total("garbage"), None);
        assert_eq!(parse_content_range_total("0-49/*"), None);
    }

    #[test]
    fn test_url_join() {
        let creds = AppCredentials {
            key: "k".into(),
            secret: "s".into(),
        };
        let client = ApiClient::new("http://localhost:3300/", &creds);
        assert_eq!(
            client.url("/api/account/orgs"),
            "http://localhost:3300/api/account/orgs"
        );
        assert_eq!(
            client.url("api/account/orgs"),
            "http://localhost:3300/api/account/orgs"
        );
    }
}
