//! Declarative configuration validation.
//!
//! A [`RuleSet`] describes the expected shape of a configuration object as an
//! ordered list of dotted key paths, each with a required kind and an
//! optional filesystem check. [`validate`] walks the rules in order and
//! returns the *first* violation, formatted as the dotted path joined by
//! `": "` followed by a fixed message:
//!
//! ```text
//! kinesis: consumer: appName: Missing value
//! pidPath: Not a valid absolute directory path
//! eventHandlers: paymentMade: Must contain actions
//! ```
//!
//! The same evaluator serves both the supervisor (process/launch
//! configuration) and the host (dispatch configuration); only the rule set
//! differs.

use crate::actions::ActionRegistry;
use serde_json::Value;
use std::path::Path;
use thiserror::Error;

/// A single configuration violation, already formatted for operators.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    fn at(path: &str, message: &str) -> Self {
        Self(format!("{}: {}", path.replace('.', ": "), message))
    }
}

/// Expected primitive kind of a configuration value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Object,
    String,
    Number,
    Array,
}

impl Kind {
    fn name(self) -> &'static str {
        match self {
            Kind::Object => "object",
            Kind::String => "string",
            Kind::Number => "number",
            Kind::Array => "array",
        }
    }

    fn matches(self, value: &Value) -> bool {
        match self {
            Kind::Object => value.is_object(),
            Kind::String => value.is_string(),
            Kind::Number => value.is_number(),
            Kind::Array => value.is_array(),
        }
    }
}

/// Domain-specific check applied after the kind check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Check {
    None,
    /// Value must be an absolute path to an existing regular file
    FilePath,
    /// Value must be an absolute path to an existing directory
    DirPath,
}

/// One rule: a required dotted path with its expected kind.
#[derive(Debug, Clone, Copy)]
pub struct Rule {
    pub path: &'static str,
    pub kind: Kind,
    pub check: Check,
}

impl Rule {
    const fn new(path: &'static str, kind: Kind) -> Self {
        Self {
            path,
            kind,
            check: Check::None,
        }
    }

    const fn file(path: &'static str) -> Self {
        Self {
            path,
            kind: Kind::String,
            check: Check::FilePath,
        }
    }

    const fn dir(path: &'static str) -> Self {
        Self {
            path,
            kind: Kind::String,
            check: Check::DirPath,
        }
    }
}

/// An ordered rule list; evaluation stops at the first violation.
pub type RuleSet = &'static [Rule];

/// Rules for the host-level (dispatch) configuration file.
pub const HOST_RULES: RuleSet = &[
    Rule::new("log", Kind::Object),
    Rule::file("secrets"),
    Rule::file("appCreds"),
    Rule::new("cwrx", Kind::Object),
    Rule::new("cwrx.api", Kind::Object),
    Rule::dir("pidPath"),
    Rule::new("kinesis", Kind::Object),
    Rule::new("kinesis.consumer", Kind::Object),
    Rule::new("kinesis.consumer.appName", Kind::String),
    Rule::file("kinesis.consumer.processor"),
    Rule::new("kinesis.producer", Kind::Object),
    Rule::new("kinesis.producer.stream", Kind::String),
    Rule::new("kinesis.producer.region", Kind::String),
    Rule::new("eventHandlers", Kind::Object),
    Rule::new("cloudWatch", Kind::Object),
    Rule::new("cloudWatch.namespace", Kind::String),
    Rule::new("cloudWatch.region", Kind::String),
    Rule::new("cloudWatch.sendInterval", Kind::Number),
    Rule::new("cloudWatch.dimensions", Kind::Object),
    Rule::new("emails", Kind::Object),
    Rule::new("emails.sender", Kind::String),
    Rule::new("emails.manageLink", Kind::String),
    Rule::new("emails.reviewLink", Kind::String),
    Rule::new("emails.supportAddress", Kind::String),
    Rule::new("emails.dashboardLinks", Kind::Object),
    Rule::new("emails.activationTargets", Kind::Object),
    Rule::new("emails.passwordResetPages", Kind::Object),
    Rule::new("emails.forgotTargets", Kind::Object),
    Rule::new("paymentPlans", Kind::Object),
    Rule::new("promotions", Kind::Object),
];

/// Rules for the supervisor-level (process/launch) configuration file.
pub const SUPERVISOR_RULES: RuleSet = &[
    Rule::dir("pidPath"),
    Rule::new("java", Kind::Object),
    Rule::file("java.jarPath"),
    Rule::new("consumers", Kind::Array),
];

/// Resolve a dotted path inside a JSON value.
fn resolve<'a>(config: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = config;
    for key in path.split('.') {
        current = current.get(key)?;
    }
    Some(current)
}

/// Validate a configuration value against a rule set.
///
/// Returns the first violation in rule order, or `Ok(())`. Pure apart from
/// filesystem existence probes for [`Check::FilePath`] / [`Check::DirPath`].
pub fn validate(config: &Value, rules: RuleSet) -> Result<(), ValidationError> {
    for rule in rules {
        let value = match resolve(config, rule.path) {
            Some(v) if !v.is_null() => v,
            _ => return Err(ValidationError::at(rule.path, "Missing value")),
        };

        if !rule.kind.matches(value) {
            return Err(ValidationError::at(
                rule.path,
                &format!("Not a {}", rule.kind.name()),
            ));
        }

        match rule.check {
            Check::None => {}
            Check::FilePath => {
                let path = value.as_str().unwrap_or_default();
                if !Path::new(path).is_absolute() || !Path::new(path).is_file() {
                    return Err(ValidationError::at(
                        rule.path,
                        "Not a valid absolute file path",
                    ));
                }
            }
            Check::DirPath => {
                let path = value.as_str().unwrap_or_default();
                if !Path::new(path).is_absolute() || !Path::new(path).is_dir() {
                    return Err(ValidationError::at(
                        rule.path,
                        "Not a valid absolute directory path",
                    ));
                }
            }
        }
    }

    Ok(())
}

/// Extract the action name from a handler entry.
///
/// Entries may be a bare name string or a full ActionSpec object with a
/// `name` field (optionally namespaced, e.g. `"notify/http"`).
fn action_name(entry: &Value) -> Option<&str> {
    match entry {
        Value::String(name) => Some(name),
        Value::Object(map) => map.get("name").and_then(Value::as_str),
        _ => None,
    }
}

/// Validate the `eventHandlers` section against the action registry.
///
/// Every handler entry must carry a non-empty `actions` array, and every
/// referenced action name must resolve to a registered plugin.
pub fn validate_event_handlers(
    config: &Value,
    registry: &ActionRegistry,
) -> Result<(), ValidationError> {
    let handlers = match resolve(config, "eventHandlers").and_then(Value::as_object) {
        Some(h) => h,
        None => return Err(ValidationError::at("eventHandlers", "Missing value")),
    };

    for (event_type, entry) in handlers {
        let actions = entry.get("actions").and_then(Value::as_array);
        let actions = match actions {
            Some(list) if !list.is_empty() => list,
            _ => {
                return Err(ValidationError(format!(
                    "eventHandlers: {}: Must contain actions",
                    event_type
                )))
            }
        };

        for (index, action) in actions.iter().enumerate() {
            let known = action_name(action)
                .map(|name| registry.contains(name))
                .unwrap_or(false);
            if !known {
                return Err(ValidationError(format!(
                    "eventHandlers: {}: actions: {}: Invalid action",
                    event_type, index
                )));
            }
        }
    }

    Ok(())
}

/// Full host-side validation: shape rules plus handler/registry checks.
pub fn validate_host(config: &Value, registry: &ActionRegistry) -> Result<(), ValidationError> {
    validate(config, HOST_RULES)?;
    validate_event_handlers(config, registry)
}

/// Full supervisor-side validation: shape rules plus per-consumer checks.
pub fn validate_supervisor(config: &Value) -> Result<(), ValidationError> {
    validate(config, SUPERVISOR_RULES)?;

    // Rule set above guarantees an array is present
    let consumers = match resolve(config, "consumers").and_then(Value::as_array) {
        Some(list) => list,
        None => return Ok(()),
    };

    // An empty fleet is a misconfiguration, not something to discover at
    // launch time through an out-of-range index
    if consumers.is_empty() {
        return Err(ValidationError::at("consumers", "Must contain consumers"));
    }

    for (index, consumer) in consumers.iter().enumerate() {
        let at = |field: &str, message: &str| {
            ValidationError(format!("consumers: {}: {}: {}", index, field, message))
        };

        match consumer.get("appName") {
            None | Some(Value::Null) => return Err(at("appName", "Missing value")),
            Some(v) if !v.is_string() => return Err(at("appName", "Not a string")),
            _ => {}
        }

        match consumer.get("properties").and_then(Value::as_str) {
            None => return Err(at("properties", "Missing value")),
            Some(path) if !Path::new(path).is_absolute() || !Path::new(path).is_file() => {
                return Err(at("properties", "Not a valid absolute file path"))
            }
            _ => {}
        }
    }

    Ok(())
}
