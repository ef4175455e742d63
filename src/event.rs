//! Core event types for axon.
//!
//! The [`EventEnvelope`] struct is the unit of work delivered by the stream
//! platform: one envelope per record. Envelopes are immutable once received,
//! and derived events produced by actions follow the identical wire shape.
//!
//! # Wire format
//!
//! ```json
//! {
//!   "type": "paymentMade",
//!   "data": {
//!     "payment": { "amount": 49.99 },
//!     "org": { "id": "o-1" }
//!   }
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An event flowing through the dispatch runtime.
///
/// # Fields
///
/// - `event_type`: the routing key (e.g. "campaignStateChange", "paymentMade")
/// - `data`: arbitrary structured payload; conditions and option
///   interpolation resolve against its top-level fields
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct EventEnvelope {
    /// Event type used to look up the configured action chain
    #[serde(rename = "type")]
    pub event_type: String,

    /// Arbitrary JSON payload
    #[serde(default)]
    pub data: Value,
}

impl EventEnvelope {
    /// Create a new envelope with the given type and data
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
        }
    }
}
