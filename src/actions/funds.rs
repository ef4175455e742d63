//! Funds check action - balance sweep over all active organizations.
//!
//! The [`CheckAvailableFunds`] action walks every active organization,
//! looks up account balances in batches, and for each organization that is
//! out of funds emits one `campaignOutOfFunds` event per active campaign
//! that carries a budget. Downstream handlers react to those derived events
//! (pausing campaigns, notifying owners); this action only detects and
//! emits.
//!
//! An organization is out of funds when its balance is negative while
//! budget is still outstanding. Campaigns without a numeric top-level
//! `budget` are not spending and are never flagged.
//!
//! Balance lookups are batched at [`BALANCE_BATCH`] org ids per call, so a
//! sweep over N organizations issues `ceil(N / 50)` balance requests
//! however many organizations are underfunded.

use super::{Action, ActionError, ActionOutcome};
use crate::api::ApiClient;
use crate::config::{ApiConfig, RuntimeConfig};
use crate::entities::EntityStream;
use crate::event::EventEnvelope;
use crate::producer::{EventProducer, KinesisEventProducer};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Number of org ids per balance-lookup call.
pub const BALANCE_BATCH: usize = 50;

/// Page size for the organization and campaign walks.
const PAGE_SIZE: u64 = 50;

/// Action that detects out-of-funds organizations and emits
/// `campaignOutOfFunds` events for their budgeted campaigns.
pub struct CheckAvailableFunds {
    client: ApiClient,
    orgs_endpoint: String,
    campaigns_endpoint: String,
    balances_endpoint: String,
    producer: Arc<dyn EventProducer>,
}

impl CheckAvailableFunds {
    pub fn new(client: ApiClient, api: &ApiConfig, producer: Arc<dyn EventProducer>) -> Self {
        Self {
            client,
            orgs_endpoint: api.orgs.clone(),
            campaigns_endpoint: api.campaigns.clone(),
            balances_endpoint: api.balances.clone(),
            producer,
        }
    }

    /// Build from the worker configuration: API client from `cwrx.api` and
    /// the injected credentials, producer onto the configured stream.
    pub fn from_config(config: &Arc<RuntimeConfig>) -> Result<Self, ActionError> {
        let client = ApiClient::from_config(config);
        let producer = Arc::new(KinesisEventProducer::from_config(config));
        Ok(Self::new(client, &config.cwrx.api, producer))
    }

    /// Replace the event producer (tests use an in-memory recorder).
    pub fn with_producer(mut self, producer: Arc<dyn EventProducer>) -> Self {
        self.producer = producer;
        self
    }

    /// Look up balances for a batch of org ids.
    ///
    /// Returns the subset of ids that are out of funds: negative balance
    /// with outstanding budget. Records missing either number are treated
    /// as funded.
    async fn out_of_funds_orgs(&self, org_ids: &[String]) -> Result<Vec<String>, ActionError> {
        let page = self
            .client
            .get_collection(
                &self.balances_endpoint,
                &[("orgs".to_string(), org_ids.join(","))],
            )
            .await?;

        let mut flagged = Vec::new();
        for record in &page.items {
            let org = match record.get("org").and_then(|v| v.as_str()) {
                Some(org) => org,
                None => continue,
            };
            let balance = record.get("balance").and_then(|v| v.as_f64()).unwrap_or(0.0);
            let outstanding = record
                .get("outstandingBudget")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0);

            if balance < 0.0 && outstanding > 0.0 {
                debug!(
                    org = %org,
                    balance = balance,
                    outstanding_budget = outstanding,
                    "Organization is out of funds"
                );
                flagged.push(org.to_string());
            }
        }

        Ok(flagged)
    }

    /// Emit one `campaignOutOfFunds` event per budgeted active campaign of
    /// the given org.
    async fn flag_campaigns(&self, org: &str) -> Result<usize, ActionError> {
        let mut campaigns = EntityStream::new(self.client.clone(), &self.campaigns_endpoint)
            .with_query("org", org)
            .with_query("statuses", "active")
            .with_page_size(PAGE_SIZE);

        let mut emitted = 0;
        while let Some(campaign) = campaigns.pull_item().await? {
            // Only campaigns actively spending a budget can run out of funds
            if !campaign.get("budget").map(Value::is_number).unwrap_or(false) {
                continue;
            }

            let envelope = EventEnvelope::new(
                "campaignOutOfFunds",
                json!({
                    "campaign": campaign,
                    "org": org,
                }),
            );
            self.producer.emit(&envelope).await?;
            emitted += 1;
        }

        Ok(emitted)
    }
}

#[async_trait]
impl Action for CheckAvailableFunds {
    fn name(&self) -> &str {
        "check_available_funds"
    }

    async fn execute(
        &self,
        _data: &Value,
        _options: &Map<String, Value>,
    ) -> Result<ActionOutcome, ActionError> {
        let orgs = EntityStream::new(self.client.clone(), &self.orgs_endpoint)
            .with_query("status", "active")
            .with_page_size(PAGE_SIZE);

        let mut scanned = 0usize;
        let mut flagged_orgs = 0usize;
        let mut emitted = 0usize;

        // Org pages are 50 wide, matching the balance batch, so each page
        // resolves with one balance call.
        let mut pages = orgs.pages(crate::entities::DEFAULT_PAGE_BUFFER);
        while let Some(page) = pages.recv().await {
            let page = page?;
            scanned += page.len();

            let ids: Vec<String> = page
                .iter()
                .filter_map(|org| org.get("id").and_then(|v| v.as_str()))
                .map(String::from)
                .collect();

            for batch in ids.chunks(BALANCE_BATCH) {
                for org in self.out_of_funds_orgs(batch).await? {
                    match self.flag_campaigns(&org).await {
                        Ok(count) => {
                            flagged_orgs += 1;
                            emitted += count;
                        }
                        Err(e) => {
                            // One org's campaign walk failing must not
                            // abort the sweep over the rest
                            warn!(org = %org, error = %e, "Campaign sweep failed for org");
                        }
                    }
                }
            }
        }

        info!(
            orgs_scanned = scanned,
            orgs_out_of_funds = flagged_orgs,
            events_emitted = emitted,
            "Funds check complete"
        );

        Ok(ActionOutcome::with_metadata(
            self.name(),
            format!(
                "Scanned {} orgs, emitted {} campaignOutOfFunds events",
                scanned, emitted
            ),
            json!({
                "orgsScanned": scanned,
                "orgsOutOfFunds": flagged_orgs,
                "eventsEmitted": emitted,
            }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppCredentials;
    use crate::producer::testing::RecordingProducer;
    use axum::extract::{Query, State};
    use axum::response::Json;
    use axum::routing::get;
    use axum::Router;
    use serde_json::json;
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    struct Fixture {
        orgs: Vec<Value>,
        balances: Vec<Value>,
        campaigns_by_org: HashMap<String, Vec<Value>>,
        balance_calls: AtomicUsize,
        balance_batch_sizes: Mutex<Vec<usize>>,
    }

    async fn list_orgs(
        State(fx): State<Arc<Fixture>>,
        Query(params): Query<HashMap<String, String>>,
    ) -> Json<Value> {
        let limit: usize = params
            .get("limit")
            .and_then(|v| v.parse().ok())
            .unwrap_or(50);
        let skip: usize = params.get("skip").and_then(|v| v.parse().ok()).unwrap_or(0);
        let slice: Vec<Value> = fx.orgs.iter().skip(skip).take(limit).cloned().collect();
        Json(Value::Array(slice))
    }

    async fn list_balances(
        State(fx): State<Arc<Fixture>>,
        Query(params): Query<HashMap<String, String>>,
    ) -> Json<Value> {
        fx.balance_calls.fetch_add(1, Ordering::SeqCst);
        let requested: Vec<&str> = params
            .get("orgs")
            .map(|v| v.split(',').collect())
            .unwrap_or_default();
        fx.balance_batch_sizes.lock().await.push(requested.len());

        let matching: Vec<Value> = fx
            .balances
            .iter()
            .filter(|b| {
                b.get("org")
                    .and_then(|v| v.as_str())
                    .map(|org| requested.contains(&org))
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        Json(Value::Array(matching))
    }

    async fn list_campaigns(
        State(fx): State<Arc<Fixture>>,
        Query(params): Query<HashMap<String, String>>,
    ) -> Json<Value> {
        let skip: usize = params.get("skip").and_then(|v| v.parse().ok()).unwrap_or(0);
        let campaigns = params
            .get("org")
            .and_then(|org| fx.campaigns_by_org.get(org))
            .cloned()
            .unwrap_or_default();
        let slice: Vec<Value> = campaigns.into_iter().skip(skip).collect();
        Json(Value::Array(slice))
    }

    async fn serve(fixture: Arc<Fixture>) -> SocketAddr {
        let app = Router::new()
            .route("/api/account/orgs", get(list_orgs))
            .route("/api/accounting/balances", get(list_balances))
            .route("/api/campaigns", get(list_campaigns))
            .with_state(fixture);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn action(addr: SocketAddr, producer: Arc<RecordingProducer>) -> CheckAvailableFunds {
        let creds = AppCredentials {
            key: "k".into(),
            secret: "s".into(),
        };
        let client = ApiClient::new(format!("http://{}", addr), &creds);
        CheckAvailableFunds::new(client, &ApiConfig::default(), producer)
    }

    #[tokio::test]
    async fn test_underfunded_org_flags_only_budgeted_campaigns() {
        // o-1 is out of funds with two budgeted campaigns and one without
        let fixture = Arc::new(Fixture {
            orgs: vec![json!({"id": "o-1"}), json!({"id": "o-2"})],
            balances: vec![
                json!({"org": "o-1", "balance": -300.12, "outstandingBudget": 500.45}),
                json!({"org": "o-2", "balance": 1000.0, "outstandingBudget": 20.0}),
            ],
            campaigns_by_org: HashMap::from([(
                "o-1".to_string(),
                vec![
                    json!({"id": "cam-1", "budget": 100}),
                    json!({"id": "cam-2", "budget": 200}),
                    json!({"id": "cam-3"}),
                ],
            )]),
            balance_calls: AtomicUsize::new(0),
            balance_batch_sizes: Mutex::new(Vec::new()),
        });
        let addr = serve(fixture.clone()).await;

        let producer = Arc::new(RecordingProducer::default());
        let action = action(addr, producer.clone());

        let outcome = action.execute(&Value::Null, &Map::new()).await.unwrap();

        let emitted = producer.emitted.lock().await;
        assert_eq!(emitted.len(), 2);
        for envelope in emitted.iter() {
            assert_eq!(envelope.event_type, "campaignOutOfFunds");
            assert_eq!(envelope.data["org"], "o-1");
        }
        let flagged: Vec<&str> = emitted
            .iter()
            .map(|e| e.data["campaign"]["id"].as_str().unwrap())
            .collect();
        assert!(flagged.contains(&"cam-1"));
        assert!(flagged.contains(&"cam-2"));

        assert_eq!(outcome.metadata.unwrap()["eventsEmitted"], 2);
    }

    #[tokio::test]
    async fn test_balance_lookups_are_batched_fifty_wide() {
        // 200 funded orgs: 4 balance calls of 50 ids, zero emissions
        let orgs: Vec<Value> = (0..200).map(|i| json!({"id": format!("o-{}", i)})).collect();
        let balances: Vec<Value> = (0..200)
            .map(|i| json!({"org": format!("o-{}", i), "balance": 50.0, "outstandingBudget": 10.0}))
            .collect();

        let fixture = Arc::new(Fixture {
            orgs,
            balances,
            campaigns_by_org: HashMap::new(),
            balance_calls: AtomicUsize::new(0),
            balance_batch_sizes: Mutex::new(Vec::new()),
        });
        let addr = serve(fixture.clone()).await;

        let producer = Arc::new(RecordingProducer::default());
        let action = action(addr, producer.clone());

        action.execute(&Value::Null, &Map::new()).await.unwrap();

        assert_eq!(fixture.balance_calls.load(Ordering::SeqCst), 4);
        assert_eq!(*fixture.balance_batch_sizes.lock().await, vec![50; 4]);
        assert!(producer.emitted.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_balance_record_means_funded() {
        let fixture = Arc::new(Fixture {
            orgs: vec![json!({"id": "o-1"})],
            balances: Vec::new(),
            campaigns_by_org: HashMap::new(),
            balance_calls: AtomicUsize::new(0),
            balance_batch_sizes: Mutex::new(Vec::new()),
        });
        let addr = serve(fixture).await;

        let producer = Arc::new(RecordingProducer::default());
        let action = action(addr, producer.clone());

        action.execute(&Value::Null, &Map::new()).await.unwrap();
        assert!(producer.emitted.lock().await.is_empty());
    }
}
