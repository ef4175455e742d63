//! Stdio bridge to the external stream-consumer daemon.
//!
//! The consumer library runs as a separate daemon process that owns shard
//! leases and delivers records to this worker over a newline-delimited JSON
//! protocol on stdin/stdout. One JSON object per line arrives from the
//! daemon; the bridge decodes it, drives the [`PartitionSession`] callbacks,
//! and writes the mandatory `status` reply for every action it handles.
//!
//! Checkpoints are initiated by the worker: the bridge writes a
//! `checkpoint` line and then reads the daemon's `checkpoint`
//! acknowledgement before replying `status` for the enclosing action.
//!
//! ```text
//! daemon -> {"action":"initialize","shardId":"shardId-000000000000"}
//! worker -> {"action":"status","responseFor":"initialize"}
//! daemon -> {"action":"processRecords","records":[{"data":"<base64>",...}]}
//! worker -> {"action":"checkpoint","sequenceNumber":"49590..."}
//! daemon -> {"action":"checkpoint","sequenceNumber":"49590...","error":null}
//! worker -> {"action":"status","responseFor":"processRecords"}
//! ```
//!
//! Record payloads are base64 inside the protocol line; decoded bytes must
//! be a `{type, data}` envelope. Malformed records are logged and skipped
//! without blocking checkpoint advancement.

use crate::event::EventEnvelope;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

/// Errors that end the bridge run loop.
///
/// Per-record problems never surface here; only protocol or IO corruption
/// between the worker and the daemon is fatal.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("IO error on daemon pipe: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed protocol line: {0}")]
    Protocol(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Callbacks for one partition-consumer session.
///
/// The bridge owns the protocol; implementations own what a record means.
#[async_trait]
pub trait PartitionSession: Send + Sync {
    /// One decoded record envelope. Must not panic; the caller advances
    /// the checkpoint regardless of how the record was handled.
    async fn on_record(&self, envelope: EventEnvelope);

    /// The daemon is taking the lease away (`reason` is `TERMINATE` when
    /// the shard is ending, `ZOMBIE` when the lease was lost).
    async fn on_shutdown(&self, reason: &str);
}

/// Protocol adapter between a line-delimited daemon pipe and a
/// [`PartitionSession`].
///
/// Generic over the transport so tests can drive it with an in-memory
/// script instead of real stdio.
pub struct MultiLangBridge<R, W, S> {
    reader: R,
    writer: W,
    session: S,
    shard_id: Option<String>,
    last_sequence: Option<String>,
}

impl<R, W, S> MultiLangBridge<R, W, S>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    S: PartitionSession,
{
    pub fn new(reader: R, writer: W, session: S) -> Self {
        Self {
            reader,
            writer,
            session,
            shard_id: None,
            last_sequence: None,
        }
    }

    /// Drive the protocol until the daemon closes the pipe or sends
    /// `shutdown`.
    pub async fn run(&mut self) -> Result<(), BridgeError> {
        loop {
            let line = match self.read_line().await? {
                Some(line) => line,
                None => {
                    info!("Daemon closed the pipe, ending session");
                    return Ok(());
                }
            };

            let message: Value = serde_json::from_str(&line)
                .map_err(|e| BridgeError::Protocol(format!("{}: {}", e, line)))?;
            let action = message
                .get("action")
                .and_then(|v| v.as_str())
                .ok_or_else(|| BridgeError::Protocol(format!("missing action: {}", line)))?
                .to_string();

            match action.as_str() {
                "initialize" => self.handle_initialize(&message).await?,
                "processRecords" => self.handle_process_records(&message).await?,
                "shutdownRequested" => {
                    // Graceful lease handoff: checkpoint where we are
                    self.checkpoint(self.last_sequence.clone()).await?;
                }
                "shutdown" => {
                    self.handle_shutdown(&message).await?;
                    self.write_status(&action).await?;
                    return Ok(());
                }
                other => {
                    warn!(action = %other, "Unknown daemon action, acknowledging");
                }
            }

            self.write_status(&action).await?;
        }
    }

    async fn handle_initialize(&mut self, message: &Value) -> Result<(), BridgeError> {
        let shard_id = message
            .get("shardId")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        info!(shard_id = %shard_id, "Partition session initialized");
        self.shard_id = Some(shard_id);
        Ok(())
    }

    async fn handle_process_records(&mut self, message: &Value) -> Result<(), BridgeError> {
        let records = message
            .get("records")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        debug!(count = records.len(), "Processing record batch");

        for record in &records {
            if let Some(sequence) = record.get("sequenceNumber").and_then(|v| v.as_str()) {
                self.last_sequence = Some(sequence.to_string());
            }

            let envelope = match decode_record(record) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(error = %e, "Skipping malformed record");
                    continue;
                }
            };

            self.session.on_record(envelope).await;
        }

        // At-least-once: checkpoint after the batch, not per record
        self.checkpoint(self.last_sequence.clone()).await?;
        Ok(())
    }

    async fn handle_shutdown(&mut self, message: &Value) -> Result<(), BridgeError> {
        let reason = message
            .get("reason")
            .and_then(|v| v.as_str())
            .unwrap_or("ZOMBIE")
            .to_string();
        info!(shard_id = ?self.shard_id, reason = %reason, "Daemon requested shutdown");

        // TERMINATE means the shard is done; the final checkpoint releases
        // it. A ZOMBIE lease is already lost and must not checkpoint.
        if reason == "TERMINATE" {
            self.checkpoint(None).await?;
        }

        self.session.on_shutdown(&reason).await;
        Ok(())
    }

    /// Write a checkpoint request and wait for the daemon's acknowledgement.
    ///
    /// A checkpoint with no sequence number means "latest". A rejected
    /// checkpoint is logged, not fatal: the daemon retries delivery from
    /// the last accepted position.
    async fn checkpoint(&mut self, sequence: Option<String>) -> Result<(), BridgeError> {
        let request = json!({
            "action": "checkpoint",
            "sequenceNumber": sequence.as_deref(),
        });
        self.write_line(&request).await?;

        let line = self.read_line().await?.ok_or_else(|| {
            BridgeError::Protocol("pipe closed awaiting checkpoint acknowledgement".into())
        })?;
        let ack: Value = serde_json::from_str(&line)
            .map_err(|e| BridgeError::Protocol(format!("{}: {}", e, line)))?;

        if ack.get("action").and_then(|v| v.as_str()) != Some("checkpoint") {
            return Err(BridgeError::Protocol(format!(
                "expected checkpoint acknowledgement, got: {}",
                line
            )));
        }

        match ack.get("error") {
            None | Some(Value::Null) => {
                debug!(sequence = ?sequence, "Checkpoint accepted");
            }
            Some(error) => {
                warn!(sequence = ?sequence, error = %error, "Checkpoint rejected by daemon");
            }
        }

        Ok(())
    }

    async fn read_line(&mut self) -> Result<Option<String>, BridgeError> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }

    async fn write_line(&mut self, message: &Value) -> Result<(), BridgeError> {
        let mut bytes = serde_json::to_vec(message)?;
        bytes.push(b'\n');
        self.writer.write_all(&bytes).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn write_status(&mut self, response_for: &str) -> Result<(), BridgeError> {
        self.write_line(&json!({
            "action": "status",
            "responseFor": response_for,
        }))
        .await
    }
}

/// Decode one protocol record into an envelope: base64 payload, then the
/// `{type, data}` wire shape.
fn decode_record(record: &Value) -> Result<EventEnvelope, BridgeError> {
    let data = record
        .get("data")
        .and_then(|v| v.as_str())
        .ok_or_else(|| BridgeError::Protocol("record missing data field".into()))?;

    let bytes = BASE64
        .decode(data)
        .map_err(|e| BridgeError::Protocol(format!("invalid base64 payload: {}", e)))?;

    Ok(serde_json::from_slice(&bytes)?)
}
