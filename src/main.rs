//! Supervisor binary: launches and watches one consumer daemon.
//!
//! ```text
//! axon -c /opt/axon/supervisor.json -i 0 -u axon -g axon
//! ```
//!
//! Exits 0 never in practice: a healthy daemon runs until signaled, and
//! any daemon exit or configuration problem maps to exit status 1 so the
//! outer process manager notices and applies its restart policy.

use axon::host::init_logging;
use axon::supervisor::{self, SupervisorArgs};
use clap::Parser;
use std::process::ExitCode;
use tracing::error;

#[tokio::main]
async fn main() -> ExitCode {
    let args = SupervisorArgs::parse();
    let _log_handle = init_logging("info");

    match supervisor::run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Supervisor exiting");
            ExitCode::FAILURE
        }
    }
}
