//! Paginated entity streaming over a remote collection endpoint.
//!
//! [`EntityStream`] adapts one remote paginated collection into a
//! pull-driven source of pages and a push-driven sink of individual
//! records. Actions use it to walk large collections with bounded memory:
//! at most one remote call is in flight per instance on either side, and
//! the buffered [`EntityStream::pages`] pump holds a small, constant
//! number of pages regardless of collection size.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut orgs = EntityStream::new(client, "/api/account/orgs")
//!     .with_query("status", "active")
//!     .with_page_size(50);
//!
//! while let Some(org) = orgs.pull_item().await? {
//!     // ...
//! }
//! ```

use crate::api::ApiClient;
use serde_json::Value;
use std::collections::VecDeque;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

/// Default page size for collection reads.
pub const DEFAULT_PAGE_SIZE: u64 = 50;

/// Default high-water mark, in pages, for the buffered page pump.
pub const DEFAULT_PAGE_BUFFER: usize = 2;

/// Errors that terminate one stream instance.
///
/// A failed stream is not retried; callers that want to retry construct a
/// new instance.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Transport-level HTTP failure (connect, timeout, body decode)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success HTTP status from the remote endpoint
    #[error("endpoint '{endpoint}' returned status {status}")]
    Status { status: u16, endpoint: String },
}

/// Skip/limit state for the next page fetch.
///
/// Mutated only by the stream itself after each successful fetch; `skip`
/// only increases and never exceeds the last known total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PageCursor {
    skip: u64,
    limit: u64,
}

impl PageCursor {
    fn advance(&mut self, fetched: u64, total: Option<u64>) {
        self.skip += fetched;
        if let Some(total) = total {
            self.skip = self.skip.min(total);
        }
    }
}

/// Bidirectional adapter over one remote paginated collection.
pub struct EntityStream {
    client: ApiClient,
    endpoint: String,
    query: Vec<(String, String)>,
    sort_field: String,
    sort_ascending: bool,
    cursor: PageCursor,
    total: Option<u64>,
    done: bool,
    buffer: VecDeque<Value>,
}

impl EntityStream {
    /// Create a stream over `endpoint` with default page size and sort.
    pub fn new(client: ApiClient, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            query: Vec::new(),
            sort_field: "created".to_string(),
            sort_ascending: true,
            cursor: PageCursor {
                skip: 0,
                limit: DEFAULT_PAGE_SIZE,
            },
            total: None,
            done: false,
            buffer: VecDeque::new(),
        }
    }

    /// Add a static query parameter merged into every fetch.
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Set the page size (the `limit` query parameter).
    pub fn with_page_size(mut self, limit: u64) -> Self {
        self.cursor.limit = limit.max(1);
        self
    }

    /// Set the fixed sort order for the collection walk.
    pub fn with_sort(mut self, field: impl Into<String>, ascending: bool) -> Self {
        self.sort_field = field.into();
        self.sort_ascending = ascending;
        self
    }

    /// Total collection size, once reported via `Content-Range`.
    pub fn total(&self) -> Option<u64> {
        self.total
    }

    /// Pull the next whole page.
    ///
    /// Issues one GET with `limit`, `skip`, and the fixed sort merged with
    /// the static query parameters. Returns `Ok(None)` at end of
    /// collection: after an empty result page, or once `skip` reaches the
    /// total reported by the server. Any error ends this instance.
    pub async fn pull_page(&mut self) -> Result<Option<Vec<Value>>, StreamError> {
        if self.done {
            return Ok(None);
        }

        let mut query = self.query.clone();
        query.push(("limit".to_string(), self.cursor.limit.to_string()));
        query.push(("skip".to_string(), self.cursor.skip.to_string()));
        query.push((
            "sort".to_string(),
            format!(
                "{},{}",
                self.sort_field,
                if self.sort_ascending { 1 } else { -1 }
            ),
        ));

        let page = match self.client.get_collection(&self.endpoint, &query).await {
            Ok(page) => page,
            Err(e) => {
                self.done = true;
                return Err(e);
            }
        };

        if page.total.is_some() {
            self.total = page.total;
        }

        if page.items.is_empty() {
            self.done = true;
            return Ok(None);
        }

        self.cursor.advance(page.items.len() as u64, self.total);
        if let Some(total) = self.total {
            if self.cursor.skip >= total {
                self.done = true;
            }
        }

        debug!(
            endpoint = %self.endpoint,
            fetched = page.items.len(),
            skip = self.cursor.skip,
            total = ?self.total,
            "Fetched collection page"
        );

        Ok(Some(page.items))
    }

    /// Pull the next single item, flattening pages through an internal
    /// buffer.
    pub async fn pull_item(&mut self) -> Result<Option<Value>, StreamError> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                return Ok(Some(item));
            }
            match self.pull_page().await? {
                Some(page) => self.buffer.extend(page),
                None => return Ok(None),
            }
        }
    }

    /// Spawn a demand-driven pump delivering whole pages through a bounded
    /// channel.
    ///
    /// The channel capacity is the high-water mark in pages; the next fetch
    /// is only issued once the previous page has been accepted, so memory
    /// stays bounded to `buffer_pages` pages however large the collection.
    pub fn pages(self, buffer_pages: usize) -> mpsc::Receiver<Result<Vec<Value>, StreamError>> {
        let (tx, rx) = mpsc::channel(buffer_pages.max(1));

        tokio::spawn(async move {
            let mut stream = self;
            loop {
                match stream.pull_page().await {
                    Ok(Some(page)) => {
                        if tx.send(Ok(page)).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        break;
                    }
                }
            }
        });

        rx
    }

    /// Push one item to the collection endpoint.
    ///
    /// The `&mut self` receiver makes the write side strictly sequential:
    /// the next push is only accepted after the remote call resolves.
    pub async fn push(&mut self, item: &Value) -> Result<Value, StreamError> {
        self.client.post_entity(&self.endpoint, item).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppCredentials;
    use axum::extract::{Query, State};
    use axum::http::{header, HeaderMap};
    use axum::response::Json;
    use axum::routing::{get, post};
    use axum::Router;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::Mutex;

    struct Fixture {
        items: Vec<Value>,
        send_total: bool,
        gets: AtomicUsize,
        posted: Mutex<Vec<Value>>,
        fail_with: Option<u16>,
    }

    async fn list(
        State(fx): State<Arc<Fixture>>,
        Query(params): Query<HashMap<String, String>>,
    ) -> (HeaderMap, Json<Value>) {
        fx.gets.fetch_add(1, Ordering::SeqCst);

        let limit: usize = params
            .get("limit")
            .and_then(|v| v.parse().ok())
            .unwrap_or(50);
        let skip: usize = params
            .get("skip")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        let total = fx.items.len();
        let slice: Vec<Value> = fx
            .items
            .iter()
            .skip(skip)
            .take(limit)
            .cloned()
            .collect();

        let mut headers = HeaderMap::new();
        if fx.send_total {
            let end = (skip + slice.len()).saturating_sub(1);
            headers.insert(
                header::CONTENT_RANGE,
                format!("{}-{}/{}", skip, end, total).parse().unwrap(),
            );
        }

        (headers, Json(Value::Array(slice)))
    }

    async fn create(
        State(fx): State<Arc<Fixture>>,
        Json(body): Json<Value>,
    ) -> (axum::http::StatusCode, Json<Value>) {
        if let Some(status) = fx.fail_with {
            return (
                axum::http::StatusCode::from_u16(status).unwrap(),
                Json(json!({})),
            );
        }
        fx.posted.lock().await.push(body.clone());
        (axum::http::StatusCode::CREATED, Json(body))
    }

    async fn serve(fixture: Arc<Fixture>) -> SocketAddr {
        let app = Router::new()
            .route("/api/things", get(list).post(create))
            .with_state(fixture);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn fixture(count: usize, send_total: bool) -> Arc<Fixture> {
        let items = (0..count).map(|i| json!({"id": format!("e-{}", i)})).collect();
        Arc::new(Fixture {
            items,
            send_total,
            gets: AtomicUsize::new(0),
            posted: Mutex::new(Vec::new()),
            fail_with: None,
        })
    }

    fn client(addr: SocketAddr) -> ApiClient {
        let creds = AppCredentials {
            key: "k".into(),
            secret: "s".into(),
        };
        ApiClient::new(format!("http://{}", addr), &creds)
    }

    #[tokio::test]
    async fn test_read_side_issues_ceil_n_over_p_calls() {
        // 120 items, pages of 50, total advertised: 3 fetches, no empty probe
        let fx = fixture(120, true);
        let addr = serve(fx.clone()).await;

        let mut stream = EntityStream::new(client(addr), "/api/things").with_page_size(50);

        let mut delivered = 0;
        while let Some(_item) = stream.pull_item().await.unwrap() {
            delivered += 1;
        }

        assert_eq!(delivered, 120);
        assert_eq!(fx.gets.load(Ordering::SeqCst), 3);
        assert_eq!(stream.total(), Some(120));
    }

    #[tokio::test]
    async fn test_read_side_terminates_on_empty_page_without_total() {
        // Without Content-Range, a full final page forces one empty probe
        let fx = fixture(100, false);
        let addr = serve(fx.clone()).await;

        let mut stream = EntityStream::new(client(addr), "/api/things").with_page_size(50);

        let mut pages = Vec::new();
        while let Some(page) = stream.pull_page().await.unwrap() {
            pages.push(page.len());
        }

        assert_eq!(pages, vec![50, 50]);
        assert_eq!(fx.gets.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_skip_advances_by_previous_page_length() {
        let fx = fixture(70, true);
        let addr = serve(fx.clone()).await;

        let mut stream = EntityStream::new(client(addr), "/api/things").with_page_size(30);

        let first = stream.pull_page().await.unwrap().unwrap();
        assert_eq!(first.len(), 30);
        assert_eq!(first[0]["id"], "e-0");

        let second = stream.pull_page().await.unwrap().unwrap();
        assert_eq!(second[0]["id"], "e-30");

        let third = stream.pull_page().await.unwrap().unwrap();
        assert_eq!(third.len(), 10);
        assert_eq!(third[0]["id"], "e-60");

        assert!(stream.pull_page().await.unwrap().is_none());
        // Total was known, so no fourth fetch happened
        assert_eq!(fx.gets.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_pages_pump_delivers_all_pages() {
        let fx = fixture(120, true);
        let addr = serve(fx.clone()).await;

        let stream = EntityStream::new(client(addr), "/api/things").with_page_size(50);
        let mut rx = stream.pages(DEFAULT_PAGE_BUFFER);

        let mut counts = Vec::new();
        while let Some(page) = rx.recv().await {
            counts.push(page.unwrap().len());
        }
        assert_eq!(counts, vec![50, 50, 20]);
    }

    #[tokio::test]
    async fn test_http_error_terminates_stream() {
        // No server listening: transport error surfaces, instance is dead
        let creds = AppCredentials {
            key: "k".into(),
            secret: "s".into(),
        };
        let dead = ApiClient::new("http://127.0.0.1:1", &creds);
        let mut stream = EntityStream::new(dead, "/api/things");

        assert!(stream.pull_page().await.is_err());
        // A dead instance yields end-of-collection, never retries
        assert!(stream.pull_page().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_status_error_surfaces_endpoint() {
        let fx = fixture(0, false);
        let addr = serve(fx).await;
        let mut stream = EntityStream::new(client(addr), "/api/missing");

        let err = stream.pull_page().await.unwrap_err();
        match err {
            StreamError::Status { status, endpoint } => {
                assert_eq!(status, 404);
                assert_eq!(endpoint, "/api/missing");
            }
            other => panic!("expected status error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_write_side_push_round_trips() {
        let fx = fixture(0, false);
        let addr = serve(fx.clone()).await;

        let mut stream = EntityStream::new(client(addr), "/api/things");
        let created = stream.push(&json!({"id": "new-1"})).await.unwrap();
        assert_eq!(created["id"], "new-1");

        let second = stream.push(&json!({"id": "new-2"})).await.unwrap();
        assert_eq!(second["id"], "new-2");

        let posted = fx.posted.lock().await;
        assert_eq!(posted.len(), 2);
    }
}
