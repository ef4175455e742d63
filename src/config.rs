//! Configuration for axon workers and the supervisor.
//!
//! Configuration files are JSON objects. Loading is all-or-nothing: the raw
//! value is validated against the declarative rule set first (see
//! [`crate::validator`]), only then deserialized into typed structs, and the
//! referenced `secrets` and `appCreds` files are read and injected. A value
//! that fails any step is never installed.
//!
//! # Example
//!
//! ```json
//! {
//!   "log": { "level": "info" },
//!   "secrets": "/opt/axon/secrets.json",
//!   "appCreds": "/opt/axon/app-creds.json",
//!   "eventHandlers": {
//!     "paymentMade": {
//!       "actions": [
//!         { "name": "log", "options": { "prefix": "billing" } }
//!       ]
//!     }
//!   }
//! }
//! ```

use crate::actions::ActionRegistry;
use crate::validator::{self, ValidationError};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Validation(#[from] ValidationError),
}

/// One configured action in an event's chain.
///
/// Accepts either a bare name string or a full object:
///
/// ```json
/// "log"
/// { "name": "notify/http",
///   "options": { "url": "{{callback}}" },
///   "ifData": { "payment.status": "^settled$" } }
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(from = "RawActionSpec")]
pub struct ActionSpec {
    /// Registry key, optionally namespaced with `/`
    pub name: String,

    /// Options passed to the action; string values may contain `{{field}}`
    /// placeholders resolved from the event data's top-level fields
    pub options: Map<String, Value>,

    /// Optional condition: dotted data-path to matcher (regex for strings,
    /// literal equality otherwise). Absent condition means "always run".
    pub if_data: Option<Map<String, Value>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawActionSpec {
    Name(String),
    Full {
        name: String,
        #[serde(default)]
        options: Map<String, Value>,
        #[serde(default, rename = "ifData")]
        if_data: Option<Map<String, Value>>,
    },
}

impl From<RawActionSpec> for ActionSpec {
    fn from(raw: RawActionSpec) -> Self {
        match raw {
            RawActionSpec::Name(name) => Self {
                name,
                options: Map::new(),
                if_data: None,
            },
            RawActionSpec::Full {
                name,
                options,
                if_data,
            } => Self {
                name,
                options,
                if_data,
            },
        }
    }
}

/// Ordered action chain configured for one event type.
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct HandlerSpec {
    pub actions: Vec<ActionSpec>,
}

/// Log sink configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Remote business API section (`cwrx.api`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    /// Base URL of the API
    #[serde(default = "default_api_root")]
    pub root: String,

    /// Collection endpoint for organizations
    #[serde(default = "default_orgs_endpoint")]
    pub orgs: String,

    /// Collection endpoint for campaigns
    #[serde(default = "default_campaigns_endpoint")]
    pub campaigns: String,

    /// Balance-lookup endpoint
    #[serde(default = "default_balances_endpoint")]
    pub balances: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            root: default_api_root(),
            orgs: default_orgs_endpoint(),
            campaigns: default_campaigns_endpoint(),
            balances: default_balances_endpoint(),
        }
    }
}

fn default_api_root() -> String {
    "http://localhost".to_string()
}

fn default_orgs_endpoint() -> String {
    "/api/account/orgs".to_string()
}

fn default_campaigns_endpoint() -> String {
    "/api/campaigns".to_string()
}

fn default_balances_endpoint() -> String {
    "/api/accounting/balances".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CwrxConfig {
    #[serde(default)]
    pub api: ApiConfig,
}

/// The partition-consumer this worker serves.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerConfig {
    pub app_name: String,

    /// Path to the event-processor executable referenced by the daemon's
    /// properties file; validated for existence at load time
    #[serde(default)]
    pub processor: PathBuf,
}

/// Where derived events are produced.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ProducerConfig {
    pub stream: String,
    pub region: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct KinesisConfig {
    #[serde(default)]
    pub consumer: ConsumerConfig,
    #[serde(default)]
    pub producer: ProducerConfig,
}

/// CloudWatch metrics reporting section.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CloudWatchConfig {
    pub namespace: String,
    pub region: String,
    /// Reporting interval in milliseconds
    pub send_interval: u64,
    #[serde(default)]
    pub dimensions: Value,
}

/// Application credentials injected from the `appCreds` file.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppCredentials {
    pub key: String,
    pub secret: String,
}

/// The fully validated, in-memory worker configuration.
///
/// Owned exclusively by the host and replaced wholesale on reload; the
/// previous value is discarded only after the new one validates.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    #[serde(default)]
    pub log: LogConfig,

    /// Path to the secrets file (injected below after load)
    #[serde(default)]
    pub secrets: PathBuf,

    /// Path to the application-credentials file (injected below after load)
    #[serde(default)]
    pub app_creds: PathBuf,

    #[serde(default)]
    pub cwrx: CwrxConfig,

    #[serde(default)]
    pub pid_path: PathBuf,

    #[serde(default)]
    pub kinesis: KinesisConfig,

    #[serde(default)]
    pub event_handlers: HashMap<String, HandlerSpec>,

    #[serde(default)]
    pub cloud_watch: CloudWatchConfig,

    #[serde(default)]
    pub emails: Value,

    #[serde(default)]
    pub payment_plans: Value,

    #[serde(default)]
    pub promotions: Value,

    /// Contents of the secrets file, injected after validation
    #[serde(skip)]
    pub secrets_data: Value,

    /// Contents of the appCreds file, injected after validation
    #[serde(skip)]
    pub creds: AppCredentials,
}

/// Load, validate, and hydrate a host configuration file.
///
/// Fails without side effects; the caller decides whether that is fatal
/// (startup) or recoverable (reload).
pub fn load_host_config(
    path: &Path,
    registry: &ActionRegistry,
) -> Result<RuntimeConfig, ConfigError> {
    let raw: Value = serde_json::from_str(&fs::read_to_string(path)?)?;
    validator::validate_host(&raw, registry)?;

    let mut config: RuntimeConfig = serde_json::from_value(raw)?;
    config.secrets_data = serde_json::from_str(&fs::read_to_string(&config.secrets)?)?;
    config.creds = serde_json::from_str(&fs::read_to_string(&config.app_creds)?)?;

    info!(
        path = %path.display(),
        app_name = %config.kinesis.consumer.app_name,
        event_types = config.event_handlers.len(),
        "Configuration loaded"
    );

    Ok(config)
}

/// One partition-consumer entry in the supervisor configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerSpec {
    pub app_name: String,

    /// MultiLangDaemon properties file launched for this consumer
    pub properties: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JavaConfig {
    /// Classpath entry holding the consumer daemon and its dependencies
    pub jar_path: PathBuf,
}

/// Supervisor-level (process/launch) configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupervisorConfig {
    pub pid_path: PathBuf,
    pub java: JavaConfig,
    pub consumers: Vec<ConsumerSpec>,
}

/// Load and validate a supervisor configuration file.
pub fn load_supervisor_config(path: &Path) -> Result<SupervisorConfig, ConfigError> {
    let raw: Value = serde_json::from_str(&fs::read_to_string(path)?)?;
    validator::validate_supervisor(&raw)?;
    Ok(serde_json::from_value(raw)?)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ActionRegistry;
    use serde_json::json;

    #[test]
    fn test_action_spec_bare_name() {
        let spec: ActionSpec = serde_json::from_value(json!("log")).unwrap();
        assert_eq!(spec.name, "log");
        assert!(spec.options.is_empty());
        assert!(spec.if_data.is_none());
    }

    #[test]
    fn test_action_spec_full_form() {
        let spec: ActionSpec = serde_json::from_value(json!({
            "name": "notify/http",
            "options": { "url": "{{callback}}" },
            "ifData": { "payment.status": "^settled$" }
        }))
        .unwrap();

        assert_eq!(spec.name, "notify/http");
        assert_eq!(spec.options["url"], "{{callback}}");
        let if_data = spec.if_data.unwrap();
        assert_eq!(if_data["payment.status"], "^settled$");
    }

    #[test]
    fn test_load_host_config_injects_referenced_files() {
        let (_dir, _raw, path) = fixtures::host_config_on_disk();
        let registry = ActionRegistry::builtin();

        let config = load_host_config(&path, &registry).unwrap();
        assert_eq!(config.kinesis.consumer.app_name, "devTimeStreamApplication");
        assert_eq!(config.kinesis.producer.stream, "devWatchmanStream");
        assert_eq!(config.creds.key, "app-key");
        assert_eq!(config.secrets_data["mailer"]["token"], "t0ps3cret");
        assert_eq!(config.log.level, "debug");
        assert!(config.event_handlers.contains_key("paymentMade"));
    }

    #[test]
    fn test_load_host_config_rejects_invalid_shape() {
        let (dir, mut raw, _path) = fixtures::host_config_on_disk();
        raw.as_object_mut().unwrap().remove("cloudWatch");
        let path = dir.path().join("broken.json");
        std::fs::write(&path, serde_json::to_string(&raw).unwrap()).unwrap();

        let registry = ActionRegistry::builtin();
        let err = load_host_config(&path, &registry).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("cloudWatch: Missing value"));
    }

    #[test]
    fn test_load_host_config_rejects_unknown_action() {
        let (dir, mut raw, _path) = fixtures::host_config_on_disk();
        raw["eventHandlers"]["paymentMade"]["actions"] = json!(["does_not_exist"]);
        let path = dir.path().join("broken.json");
        std::fs::write(&path, serde_json::to_string(&raw).unwrap()).unwrap();

        let registry = ActionRegistry::builtin();
        let err = load_host_config(&path, &registry).unwrap_err();
        assert!(err
            .to_string()
            .contains("eventHandlers: paymentMade: actions: 0: Invalid action"));
    }

    #[test]
    fn test_load_supervisor_config() {
        let dir = tempfile::tempdir().unwrap();
        let jar = dir.path().join("daemon.jar");
        let props = dir.path().join("app.properties");
        std::fs::write(&jar, "").unwrap();
        std::fs::write(&props, "").unwrap();

        let raw = json!({
            "pidPath": dir.path().to_str().unwrap(),
            "java": { "jarPath": jar.to_str().unwrap() },
            "consumers": [
                { "appName": "devTimeStream", "properties": props.to_str().unwrap() }
            ]
        });
        let path = dir.path().join("supervisor.json");
        std::fs::write(&path, serde_json::to_string(&raw).unwrap()).unwrap();

        let config = load_supervisor_config(&path).unwrap();
        assert_eq!(config.consumers.len(), 1);
        assert_eq!(config.consumers[0].app_name, "devTimeStream");
        assert_eq!(config.java.jar_path, jar);
    }
}
