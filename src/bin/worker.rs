//! Worker binary: one record-processing host per consumer daemon slot.
//!
//! Spawned by the consumer daemon (not by an operator): the daemon runs
//! this executable per shard lease and speaks its stdio protocol. The only
//! flag is the configuration file path; everything else comes from there.
//!
//! ```text
//! worker -c /opt/axon/worker.json
//! ```
//!
//! `SIGHUP` reloads the configuration in place without giving up the
//! partition lease; an invalid new file leaves the running configuration
//! untouched.

use axon::actions::ActionRegistry;
use axon::host::{init_logging, Host, WorkerArgs};
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::error;

#[tokio::main]
async fn main() -> ExitCode {
    let args = WorkerArgs::parse();
    let log_handle = init_logging("info");

    let registry = ActionRegistry::builtin();
    let host = match Host::new(args.config, registry) {
        Ok(host) => Arc::new(host.with_log_handle(log_handle)),
        Err(e) => {
            error!(error = %e, "Fatal configuration error");
            return ExitCode::FAILURE;
        }
    };

    match host.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Worker session failed");
            ExitCode::FAILURE
        }
    }
}
