//! # Axon Event Dispatch Runtime
//!
//! Event-driven automation layer for an advertising platform: records
//! arrive from a partitioned stream, are matched against configured
//! handler chains, and trigger pluggable actions that talk to the
//! platform's business API and may emit derived events back onto the
//! stream.
//!
//! ## Architecture
//!
//! ```text
//! Supervisor -> consumer daemon -> Worker (Host) -> Dispatcher -> Actions
//!                                                                  |
//!                                            business API <--------+--> event stream
//! ```
//!
//! ## Modules
//!
//! - [`event`]: The `{type, data}` envelope shared across the runtime
//! - [`validator`]: Declarative configuration validation
//! - [`config`]: Typed runtime configuration with credential injection
//! - [`actions`]: Action trait, registry, and built-in actions
//! - [`dispatch`]: Condition-gated, concurrent action dispatch
//! - [`entities`]: Paginated entity streaming over remote collections
//! - [`api`]: Authenticated client for the business API
//! - [`producer`]: Derived-event production onto the stream platform
//! - [`bridge`]: Stdio protocol bridge to the consumer daemon
//! - [`host`]: Worker lifecycle: load, dispatch, hot reload
//! - [`supervisor`]: Privileged daemon launcher and watcher

pub mod actions;
pub mod api;
pub mod bridge;
pub mod config;
pub mod dispatch;
pub mod entities;
pub mod event;
pub mod host;
pub mod producer;
pub mod supervisor;
pub mod validator;

// Re-export commonly used types at crate root
pub use actions::{Action, ActionError, ActionOutcome, ActionRegistry};
pub use config::RuntimeConfig;
pub use dispatch::{DispatchReport, Dispatcher};
pub use event::EventEnvelope;
