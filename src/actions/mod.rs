//! Action system for axon.
//!
//! Actions are pluggable side effects triggered by dispatched events. The
//! [`Action`] trait defines the contract every plugin implements, and the
//! [`ActionRegistry`] maps configured action names to constructor functions,
//! so config validation is a registry lookup rather than a filesystem probe.
//!
//! ## Built-in actions
//!
//! - [`LogAction`] (`log`): structured logging of events
//! - [`HttpNotifyAction`] (`notify/http`): HTTP POST notification delivery
//! - [`CheckAvailableFunds`] (`check_available_funds`): balance sweep that
//!   emits `campaignOutOfFunds` events for underfunded organizations
//!
//! ## Creating custom actions
//!
//! ```rust,ignore
//! use axon::actions::{Action, ActionOutcome, ActionError};
//! use async_trait::async_trait;
//! use serde_json::{Map, Value};
//!
//! struct MyAction;
//!
//! #[async_trait]
//! impl Action for MyAction {
//!     fn name(&self) -> &str {
//!         "my-action"
//!     }
//!
//!     async fn execute(
//!         &self,
//!         data: &Value,
//!         options: &Map<String, Value>,
//!     ) -> Result<ActionOutcome, ActionError> {
//!         Ok(ActionOutcome::success("my-action", "Did the thing"))
//!     }
//! }
//!
//! let mut registry = axon::actions::ActionRegistry::builtin();
//! registry.register("my-action", |_config| Ok(std::sync::Arc::new(MyAction)));
//! ```

pub mod funds;
pub mod log;
pub mod notify;

use crate::config::RuntimeConfig;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

// Re-export built-in actions
pub use funds::CheckAvailableFunds;
pub use log::LogAction;
pub use notify::HttpNotifyAction;

/// Errors that can occur while constructing or executing an action.
#[derive(Error, Debug)]
pub enum ActionError {
    /// The configured action name is not present in the registry
    #[error("unknown action '{0}'")]
    Unknown(String),

    /// The action factory could not build an instance from the config
    #[error("action '{name}' failed to initialize: {reason}")]
    Init { name: String, reason: String },

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A paginated entity stream failed mid-iteration
    #[error("entity stream error: {0}")]
    Stream(#[from] crate::entities::StreamError),

    /// Emitting a derived event failed
    #[error("producer error: {0}")]
    Producer(#[from] crate::producer::ProducerError),

    /// Generic action failure
    #[error("action failed: {0}")]
    Failed(String),
}

/// Result of a successful action execution.
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    /// Name of the action that produced this outcome
    pub action_name: String,

    /// Human-readable message describing what happened
    pub message: String,

    /// Optional metadata from the execution
    pub metadata: Option<Value>,
}

impl ActionOutcome {
    /// Create a success outcome with a message
    pub fn success(action_name: &str, message: impl Into<String>) -> Self {
        Self {
            action_name: action_name.to_string(),
            message: message.into(),
            metadata: None,
        }
    }

    /// Create a success outcome with metadata
    pub fn with_metadata(action_name: &str, message: impl Into<String>, metadata: Value) -> Self {
        Self {
            action_name: action_name.to_string(),
            message: message.into(),
            metadata: Some(metadata),
        }
    }
}

/// The core Action trait.
///
/// Instances are built once per configuration generation by their factory
/// and reused across records; anything expensive (HTTP clients, credentials)
/// belongs in the instance, not in `execute`.
///
/// # Thread Safety
///
/// Actions must be `Send + Sync`; sibling actions for one event run
/// concurrently and must only touch external systems, never shared
/// worker-local state.
#[async_trait]
pub trait Action: Send + Sync {
    /// Registry key of this action (e.g. "log", "notify/http")
    fn name(&self) -> &str;

    /// Execute the action for one event.
    ///
    /// # Arguments
    ///
    /// * `data` - the envelope's `data` payload
    /// * `options` - the configured options, with `{{field}}` placeholders
    ///   already interpolated by the dispatch engine
    async fn execute(
        &self,
        data: &Value,
        options: &Map<String, Value>,
    ) -> Result<ActionOutcome, ActionError>;
}

/// Constructor function for an action, invoked once per config generation.
pub type ActionFactory =
    Arc<dyn Fn(&Arc<RuntimeConfig>) -> Result<Arc<dyn Action>, ActionError> + Send + Sync>;

/// Registry mapping configured action names to factories.
///
/// Names may carry a namespace segment separated by `/` (e.g.
/// `"notify/http"`); the registry treats the full string as the key.
pub struct ActionRegistry {
    factories: HashMap<String, ActionFactory>,
}

impl ActionRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Create a registry pre-populated with the built-in actions.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("log", |_config| Ok(Arc::new(LogAction::new())));
        registry.register("notify/http", |_config| {
            Ok(Arc::new(HttpNotifyAction::new()))
        });
        registry.register("check_available_funds", |config| {
            Ok(Arc::new(CheckAvailableFunds::from_config(config)?))
        });
        registry
    }

    /// Register a factory under the given name.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&Arc<RuntimeConfig>) -> Result<Arc<dyn Action>, ActionError>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(name.to_string(), Arc::new(factory));
    }

    /// Whether a name resolves to a registered action.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Build an action instance for the given config generation.
    pub fn resolve(
        &self,
        name: &str,
        config: &Arc<RuntimeConfig>,
    ) -> Result<Arc<dyn Action>, ActionError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| ActionError::Unknown(name.to_string()))?;
        factory(config)
    }

    /// List all registered action names.
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(|s| s.as_str()).collect()
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;

    struct TestAction;

    #[async_trait]
    impl Action for TestAction {
        fn name(&self) -> &str {
            "test"
        }

        async fn execute(
            &self,
            _data: &Value,
            _options: &Map<String, Value>,
        ) -> Result<ActionOutcome, ActionError> {
            Ok(ActionOutcome::success("test", "Test executed"))
        }
    }

    #[test]
    fn test_registry_contains_builtins() {
        let registry = ActionRegistry::builtin();
        assert!(registry.contains("log"));
        assert!(registry.contains("notify/http"));
        assert!(registry.contains("check_available_funds"));
        assert!(!registry.contains("nonexistent"));
    }

    #[tokio::test]
    async fn test_register_and_resolve() {
        let mut registry = ActionRegistry::new();
        registry.register("test", |_config| Ok(Arc::new(TestAction)));

        let config = Arc::new(RuntimeConfig::default());
        let action = registry.resolve("test", &config).unwrap();
        assert_eq!(action.name(), "test");

        let outcome = action
            .execute(&Value::Null, &Map::new())
            .await
            .unwrap();
        assert_eq!(outcome.action_name, "test");
    }

    #[test]
    fn test_resolve_unknown_is_an_error() {
        let registry = ActionRegistry::new();
        let config = Arc::new(RuntimeConfig::default());
        assert!(matches!(
            registry.resolve("missing", &config),
            Err(ActionError::Unknown(_))
        ));
    }

    #[test]
    fn test_outcome_helpers() {
        let outcome = ActionOutcome::success("test", "Done");
        assert_eq!(outcome.action_name, "test");
        assert!(outcome.metadata.is_none());

        let with_meta =
            ActionOutcome::with_metadata("test", "Done", serde_json::json!({"count": 2}));
        assert!(with_meta.metadata.is_some());
    }
}
