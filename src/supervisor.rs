//! Process supervisor: launches and watches one consumer daemon.
//!
//! The supervisor is the privileged entry point of a worker fleet. For the
//! consumer selected by `--index` it validates the launch configuration,
//! drops process privileges (group first, then user), and spawns the
//! stream platform's language-bridge daemon with inherited stdio so the
//! per-record protocol passes through unmodified.
//!
//! Termination signals (`SIGINT`, `SIGTERM`) are forwarded to the child
//! before the supervisor itself exits. A child exit of *any* kind, clean
//! or not, makes the supervisor exit with status 1 - restart policy
//! belongs to the outer process manager, and a silent respawn loop would
//! only mask daemon crashes.
//!
//! ```text
//! axon -c /opt/axon/supervisor.json -i 0 -u axon -g axon
//! ```

use crate::config::{self, ConfigError, ConsumerSpec};
use clap::builder::NonEmptyStringValueParser;
use clap::Parser;
use nix::sys::signal::{kill, Signal};
use nix::unistd::{setgid, setuid, Group, Pid, User};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

/// Entry class of the consumer daemon inside the configured classpath.
const DAEMON_CLASS: &str = "software.amazon.kinesis.multilang.MultiLangDaemon";

/// Supervisor failures. All of them are fatal; main maps any error to
/// exit status 1.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("consumer index {index} out of range, {count} consumers configured")]
    BadIndex { index: usize, count: usize },

    #[error("failed to drop privileges: {0}")]
    Privileges(String),

    #[error("failed to launch consumer daemon: {0}")]
    Launch(String),

    #[error("consumer daemon for '{app_name}' exited: {status}")]
    ChildExit { app_name: String, status: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Command-line arguments of the supervisor binary.
#[derive(Debug, Parser)]
#[command(name = "axon", about = "Consumer-daemon supervisor")]
pub struct SupervisorArgs {
    /// Path to the supervisor configuration file
    #[arg(short = 'c', long = "config")]
    pub config: PathBuf,

    /// Zero-based index of the consumer to launch
    #[arg(short = 'i', long = "index")]
    pub index: usize,

    /// Unprivileged user to run the daemon as
    #[arg(short = 'u', long = "user", value_parser = NonEmptyStringValueParser::new())]
    pub user: String,

    /// Unprivileged group to run the daemon as
    #[arg(short = 'g', long = "group", value_parser = NonEmptyStringValueParser::new())]
    pub group: String,
}

/// Run the supervisor to completion.
///
/// Returns only on error; a healthy daemon keeps this future pending until
/// a forwarded signal or the child's own exit ends it.
pub async fn run(args: SupervisorArgs) -> Result<(), SupervisorError> {
    let config = config::load_supervisor_config(&args.config)?;

    let consumer = config
        .consumers
        .get(args.index)
        .cloned()
        .ok_or(SupervisorError::BadIndex {
            index: args.index,
            count: config.consumers.len(),
        })?;

    drop_privileges(&args.user, &args.group)?;
    write_pid_file(&config.pid_path, &consumer.app_name);

    let child = launch_daemon(&config.java.jar_path, &consumer)?;
    supervise(child, consumer.app_name).await
}

/// Drop to the configured group, then user. Group must go first: once the
/// user id is dropped, `setgid` is no longer permitted.
///
/// Any failure is fatal: a supervisor that cannot shed privileges must not
/// launch the daemon. Running already as the target identity succeeds (the
/// set calls are no-ops there), so unprivileged development runs work when
/// started as that user.
fn drop_privileges(user: &str, group: &str) -> Result<(), SupervisorError> {
    let group = Group::from_name(group)
        .map_err(|e| SupervisorError::Privileges(e.to_string()))?
        .ok_or_else(|| SupervisorError::Privileges(format!("unknown group '{}'", group)))?;
    setgid(group.gid).map_err(|e| SupervisorError::Privileges(e.to_string()))?;

    let user = User::from_name(user)
        .map_err(|e| SupervisorError::Privileges(e.to_string()))?
        .ok_or_else(|| SupervisorError::Privileges(format!("unknown user '{}'", user)))?;
    setuid(user.uid).map_err(|e| SupervisorError::Privileges(e.to_string()))?;

    info!(uid = %user.uid, gid = %group.gid, "Dropped process privileges");
    Ok(())
}

/// Advisory pid file under the configured directory; failure is logged,
/// not fatal.
fn write_pid_file(pid_dir: &Path, app_name: &str) {
    let pid_file = pid_dir.join(format!("{}-supervisor.pid", app_name));
    if let Err(e) = fs::write(&pid_file, std::process::id().to_string()) {
        warn!(path = %pid_file.display(), error = %e, "Could not write pid file");
    }
}

/// Spawn the consumer daemon with inherited stdio.
fn launch_daemon(jar_path: &Path, consumer: &ConsumerSpec) -> Result<Child, SupervisorError> {
    info!(
        app_name = %consumer.app_name,
        properties = %consumer.properties.display(),
        "Launching consumer daemon"
    );

    // Stdio is inherited so the daemon's stdio protocol reaches the worker
    // processes it spawns unmodified
    Command::new("java")
        .arg("-cp")
        .arg(jar_path)
        .arg(DAEMON_CLASS)
        .arg(&consumer.properties)
        .spawn()
        .map_err(|e| SupervisorError::Launch(e.to_string()))
}

/// Watch the child: forward termination signals into it, and treat its
/// exit, with any status, as fatal.
async fn supervise(mut child: Child, app_name: String) -> Result<(), SupervisorError> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    loop {
        tokio::select! {
            status = child.wait() => {
                let status = status?;
                return Err(SupervisorError::ChildExit {
                    app_name,
                    status: status.to_string(),
                });
            }
            _ = interrupt.recv() => forward_signal(&child, Signal::SIGINT),
            _ = terminate.recv() => forward_signal(&child, Signal::SIGTERM),
        }
    }
}

fn forward_signal(child: &Child, sig: Signal) {
    let Some(pid) = child.id() else {
        return;
    };
    info!(pid = pid, signal = %sig, "Forwarding signal to consumer daemon");
    if let Err(e) = kill(Pid::from_raw(pid as i32), sig) {
        warn!(pid = pid, signal = %sig, error = %e, "Failed to forward signal");
    }
}
