//! Log action - structured logging of record data.
//!
//! The [`LogAction`] writes the event data to the structured log. It is
//! useful for debugging handler chains, auditing, and as a placeholder
//! action while wiring up new event types.
//!
//! # Options
//!
//! - `prefix` (string, optional): tag included in the log line, useful for
//!   distinguishing several log actions (e.g. `"audit"`, `"debug"`)

use super::{Action, ActionError, ActionOutcome};
use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::info;

/// An action that logs event data using structured logging.
#[derive(Debug, Clone, Default)]
pub struct LogAction;

impl LogAction {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Action for LogAction {
    fn name(&self) -> &str {
        "log"
    }

    async fn execute(
        &self,
        data: &Value,
        options: &Map<String, Value>,
    ) -> Result<ActionOutcome, ActionError> {
        let prefix = options
            .get("prefix")
            .and_then(|v| v.as_str())
            .unwrap_or("event");

        info!(
            prefix = %prefix,
            data = %data,
            "[{}] Processed record",
            prefix
        );

        Ok(ActionOutcome::success(
            self.name(),
            format!("Logged record with prefix '{}'", prefix),
        ))
    }
}
