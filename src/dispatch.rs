//! Action dispatch engine - the brain of axon.
//!
//! The [`Dispatcher`] routes each arriving [`EventEnvelope`] to the ordered
//! action chain configured for its event type, gating each action on its
//! optional `ifData` condition and interpolating `{{field}}` placeholders in
//! its options from the event data.
//!
//! # Semantics
//!
//! - Unknown event types are not an error: the dispatch succeeds with zero
//!   actions invoked.
//! - Matching actions are invoked concurrently and independently; a failure
//!   in one never prevents, delays, or rolls back another.
//! - Every failure is caught and logged with the action name and event
//!   type; [`Dispatcher::handle`] reports once all actions have settled, and
//!   the caller advances the stream checkpoint regardless of individual
//!   outcomes (at-least-once, best-effort).
//!
//! # Conditions
//!
//! ```text
//! Matcher            | Semantics
//! -------------------|------------------------------------------
//! "^settled$"        | regex over the stringified resolved value
//! true, 42, null     | strict JSON equality
//! (path missing)     | action skipped
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use axon::dispatch::Dispatcher;
//! use axon::actions::ActionRegistry;
//!
//! let registry = ActionRegistry::builtin();
//! let dispatcher = Dispatcher::from_config(&config, &registry);
//! let report = dispatcher.handle(&envelope).await;
//! assert!(report.is_success());
//! ```

use crate::actions::{Action, ActionError, ActionOutcome, ActionRegistry};
use crate::config::{ActionSpec, RuntimeConfig};
use crate::event::EventEnvelope;
use futures::future::join_all;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::{debug, trace, warn};

/// Result of dispatching one event.
#[derive(Debug)]
pub struct DispatchReport {
    /// Event type that was dispatched
    pub event_type: String,

    /// Number of actions whose condition passed and which were invoked
    pub actions_invoked: usize,

    /// Number of actions skipped by their condition
    pub actions_skipped: usize,

    /// Outcomes from successful actions
    pub outcomes: Vec<ActionOutcome>,

    /// (action name, error) for each failed action
    pub failures: Vec<(String, ActionError)>,
}

impl DispatchReport {
    fn empty(event_type: &str) -> Self {
        Self {
            event_type: event_type.to_string(),
            actions_invoked: 0,
            actions_skipped: 0,
            outcomes: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// Returns true if every invoked action succeeded
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Returns the number of failed actions
    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }
}

/// A compiled `ifData` matcher.
enum Matcher {
    /// String matchers are regular expressions over the stringified value
    Pattern(Regex),
    /// Non-string matchers use strict JSON equality
    Literal(Value),
}

struct Condition {
    path: String,
    matcher: Matcher,
}

/// An action slot bound into a chain at generation-build time.
///
/// Resolution failures are kept as poisoned slots: invoking one is an
/// action failure for that slot only, never a dispatch error.
enum Slot {
    Ready(Arc<dyn Action>),
    Poisoned(String),
}

struct BoundAction {
    spec: ActionSpec,
    conditions: Vec<Condition>,
    slot: Slot,
}

/// Event dispatcher for one configuration generation.
///
/// Built once per (re)load; action instances are resolved through the
/// registry at build time and reused across records until the next reload.
pub struct Dispatcher {
    handlers: HashMap<String, Vec<BoundAction>>,
}

impl Dispatcher {
    /// Build the dispatcher for a validated configuration.
    pub fn from_config(config: &Arc<RuntimeConfig>, registry: &ActionRegistry) -> Self {
        let mut handlers = HashMap::new();

        for (event_type, handler) in &config.event_handlers {
            let mut chain = Vec::with_capacity(handler.actions.len());

            for spec in &handler.actions {
                let slot = match registry.resolve(&spec.name, config) {
                    Ok(action) => Slot::Ready(action),
                    Err(e) => {
                        warn!(
                            action = %spec.name,
                            event_type = %event_type,
                            error = %e,
                            "Action failed to resolve; will report as failure on dispatch"
                        );
                        Slot::Poisoned(e.to_string())
                    }
                };

                chain.push(BoundAction {
                    conditions: compile_conditions(spec),
                    spec: spec.clone(),
                    slot,
                });
            }

            handlers.insert(event_type.clone(), chain);
        }

        debug!(event_types = handlers.len(), "Dispatcher built");
        Self { handlers }
    }

    /// Number of configured event types.
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// List all configured event types.
    pub fn event_types(&self) -> Vec<&str> {
        self.handlers.keys().map(|s| s.as_str()).collect()
    }

    /// Dispatch one envelope to its configured action chain.
    ///
    /// Never returns an error: per-action failures are collected in the
    /// report, and an unconfigured event type yields an empty success.
    pub async fn handle(&self, envelope: &EventEnvelope) -> DispatchReport {
        let event_type = &envelope.event_type;
        let mut report = DispatchReport::empty(event_type);

        let chain = match self.handlers.get(event_type) {
            Some(chain) => chain,
            None => {
                trace!(event_type = %event_type, "No handlers configured, ignoring event");
                return report;
            }
        };

        let mut invocations = Vec::new();
        for bound in chain {
            if !conditions_pass(&bound.conditions, &envelope.data) {
                trace!(
                    action = %bound.spec.name,
                    event_type = %event_type,
                    "Condition not met, skipping action"
                );
                report.actions_skipped += 1;
                continue;
            }

            let options = interpolate_options(&bound.spec.options, &envelope.data);
            let name = bound.spec.name.clone();
            let data = &envelope.data;

            invocations.push(async move {
                let result = match &bound.slot {
                    Slot::Ready(action) => action.execute(data, &options).await,
                    Slot::Poisoned(reason) => Err(ActionError::Init {
                        name: name.clone(),
                        reason: reason.clone(),
                    }),
                };
                (name, result)
            });
        }

        report.actions_invoked = invocations.len();

        // Concurrent, best-effort fan-out: all actions settle before the
        // report is returned, and no failure propagates to a sibling.
        for (name, result) in join_all(invocations).await {
            match result {
                Ok(outcome) => {
                    debug!(
                        action = %name,
                        event_type = %event_type,
                        message = %outcome.message,
                        "Action succeeded"
                    );
                    report.outcomes.push(outcome);
                }
                Err(e) => {
                    warn!(
                        action = %name,
                        event_type = %event_type,
                        error = %e,
                        "Action failed"
                    );
                    report.failures.push((name, e));
                }
            }
        }

        report
    }
}

/// Compile an ActionSpec's `ifData` map into matchers.
///
/// An invalid regex degrades to literal string equality rather than
/// failing the whole generation.
fn compile_conditions(spec: &ActionSpec) -> Vec<Condition> {
    let Some(if_data) = &spec.if_data else {
        return Vec::new();
    };

    if_data
        .iter()
        .map(|(path, matcher)| {
            let matcher = match matcher {
                Value::String(pattern) => match Regex::new(pattern) {
                    Ok(re) => Matcher::Pattern(re),
                    Err(e) => {
                        warn!(
                            action = %spec.name,
                            pattern = %pattern,
                            error = %e,
                            "Invalid condition regex, falling back to literal comparison"
                        );
                        Matcher::Literal(Value::String(pattern.clone()))
                    }
                },
                other => Matcher::Literal(other.clone()),
            };
            Condition {
                path: path.clone(),
                matcher,
            }
        })
        .collect()
}

/// Resolve a dotted path against the event data.
fn resolve_path<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = data;
    for key in path.split('.') {
        current = current.get(key)?;
    }
    Some(current)
}

/// String form of a resolved value: strings bare, everything else as JSON.
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// An absent path or any failed matcher skips the action.
fn conditions_pass(conditions: &[Condition], data: &Value) -> bool {
    conditions.iter().all(|condition| {
        let Some(actual) = resolve_path(data, &condition.path) else {
            return false;
        };
        match &condition.matcher {
            Matcher::Pattern(re) => re.is_match(&stringify(actual)),
            Matcher::Literal(expected) => expected == actual,
        }
    })
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{(\w+)\}\}").expect("valid placeholder pattern"))
}

/// Interpolate `{{field}}` placeholders from top-level event-data fields.
///
/// A string that is exactly one placeholder takes the raw JSON value of the
/// field (missing fields become null); embedded placeholders take the
/// field's string form and are left verbatim when the field is missing.
fn interpolate_options(options: &Map<String, Value>, data: &Value) -> Map<String, Value> {
    options
        .iter()
        .map(|(key, value)| (key.clone(), interpolate_value(value, data)))
        .collect()
}

fn interpolate_value(value: &Value, data: &Value) -> Value {
    match value {
        Value::String(s) => interpolate_string(s, data),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), interpolate_value(v, data)))
                .collect(),
        ),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| interpolate_value(v, data)).collect())
        }
        other => other.clone(),
    }
}

fn interpolate_string(input: &str, data: &Value) -> Value {
    let re = placeholder_re();

    // Whole-string placeholder substitutes the raw JSON value
    if let Some(caps) = re.captures(input) {
        if caps.get(0).map(|m| m.as_str()) == Some(input) {
            let field = &caps[1];
            return match data.get(field) {
                Some(value) => value.clone(),
                None => {
                    warn!(field = %field, "Interpolation field missing from event data");
                    Value::Null
                }
            };
        }
    }

    let replaced = re.replace_all(input, |caps: &regex::Captures| {
        match data.get(&caps[1]) {
            Some(value) => stringify(value),
            None => caps[0].to_string(),
        }
    });

    Value::String(replaced.into_owned())
}
