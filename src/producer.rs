//! Derived-event production back onto the stream platform.
//!
//! Actions that derive new events (e.g. `campaignOutOfFunds`) emit them
//! through the [`EventProducer`] trait; produced records use the same
//! `{type, data}` wire shape as inbound ones. The concrete implementation
//! puts records onto the configured Kinesis stream, keyed by event type.

use crate::config::RuntimeConfig;
use crate::event::EventEnvelope;
use async_trait::async_trait;
use aws_sdk_kinesis::primitives::Blob;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::debug;

/// Errors emitting a derived event.
#[derive(Debug, Error)]
pub enum ProducerError {
    #[error("failed to put record on stream '{stream}': {reason}")]
    Put { stream: String, reason: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Sink for derived events.
#[async_trait]
pub trait EventProducer: Send + Sync {
    async fn emit(&self, envelope: &EventEnvelope) -> Result<(), ProducerError>;
}

/// Kinesis-backed producer.
///
/// The AWS client is built lazily on first emission so that construction
/// stays synchronous for action factories.
pub struct KinesisEventProducer {
    stream: String,
    region: String,
    client: OnceCell<aws_sdk_kinesis::Client>,
}

impl KinesisEventProducer {
    pub fn new(stream: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            stream: stream.into(),
            region: region.into(),
            client: OnceCell::new(),
        }
    }

    /// Build from `kinesis.producer.{stream, region}`.
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(
            &config.kinesis.producer.stream,
            &config.kinesis.producer.region,
        )
    }

    async fn client(&self) -> &aws_sdk_kinesis::Client {
        self.client
            .get_or_init(|| async {
                let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
                    .region(aws_config::Region::new(self.region.clone()))
                    .load()
                    .await;
                aws_sdk_kinesis::Client::new(&shared)
            })
            .await
    }
}

#[async_trait]
impl EventProducer for KinesisEventProducer {
    async fn emit(&self, envelope: &EventEnvelope) -> Result<(), ProducerError> {
        let bytes = serde_json::to_vec(envelope)?;

        self.client()
            .await
            .put_record()
            .stream_name(&self.stream)
            .partition_key(&envelope.event_type)
            .data(Blob::new(bytes))
            .send()
            .await
            .map_err(|e| ProducerError::Put {
                stream: self.stream.clone(),
                reason: e.to_string(),
            })?;

        debug!(
            stream = %self.stream,
            event_type = %envelope.event_type,
            "Emitted derived event"
        );

        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingProducer;
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_recording_producer_captures_envelopes() {
        let producer = RecordingProducer::default();
        let envelope = EventEnvelope::new("campaignOutOfFunds", json!({"campaign": "cam-1"}));

        producer.emit(&envelope).await.unwrap();

        let emitted = producer.emitted.lock().await;
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].event_type, "campaignOutOfFunds");
    }

    #[test]
    fn test_kinesis_producer_from_config() {
        let mut config = RuntimeConfig::default();
        config.kinesis.producer.stream = "devWatchmanStream".to_string();
        config.kinesis.producer.region = "us-east-1".to_string();

        let producer = KinesisEventProducer::from_config(&config);
        assert_eq!(producer.stream, "devWatchmanStream");
        assert_eq!(producer.region, "us-east-1");
    }
}
