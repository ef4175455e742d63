//! Record-processing host: one worker process, one partition consumer.
//!
//! The host owns the lifecycle of a worker: it loads and validates the
//! configuration, builds the action dispatcher, bridges the consumer
//! daemon's stdio protocol into dispatches, and reloads configuration in
//! place on `SIGHUP` without giving up the partition lease.
//!
//! # Hot reload
//!
//! Configuration lives in a [`Generation`]: the typed config plus the
//! dispatcher built from it, swapped atomically as one unit. Reload is
//! all-or-nothing; if the new file fails validation or hydration the error
//! is logged and the previous generation keeps serving records. In-flight
//! records finish under the generation they started with.

use crate::actions::ActionRegistry;
use crate::bridge::{BridgeError, MultiLangBridge, PartitionSession};
use crate::config::{self, ConfigError, RuntimeConfig};
use crate::dispatch::Dispatcher;
use crate::event::EventEnvelope;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter, Registry};

/// Command-line arguments of the worker binary.
#[derive(Debug, Parser)]
#[command(name = "worker", about = "Stream-consumer worker process")]
pub struct WorkerArgs {
    /// Path to the worker configuration file
    #[arg(short = 'c', long = "config")]
    pub config: PathBuf,
}

/// Install the global log subscriber and return a handle for runtime
/// level changes.
///
/// `RUST_LOG` wins over the configured default so operators can override
/// per process.
pub fn init_logging(default_level: &str) -> reload::Handle<EnvFilter, Registry> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));
    let (layer, handle) = reload::Layer::new(filter);

    tracing_subscriber::registry()
        .with(layer)
        .with(tracing_subscriber::fmt::layer())
        .init();

    handle
}

/// One loaded configuration and everything derived from it.
pub struct Generation {
    pub config: Arc<RuntimeConfig>,
    pub dispatcher: Dispatcher,
}

impl Generation {
    /// Load, validate, and hydrate a config file, then build the
    /// dispatcher for it. Side-effect free on failure.
    pub fn load(path: &Path, registry: &ActionRegistry) -> Result<Self, ConfigError> {
        let config = Arc::new(config::load_host_config(path, registry)?);
        let dispatcher = Dispatcher::from_config(&config, registry);
        Ok(Self { config, dispatcher })
    }
}

/// The worker host.
pub struct Host {
    config_path: PathBuf,
    registry: ActionRegistry,
    current: ArcSwap<Generation>,
    log_handle: Option<reload::Handle<EnvFilter, Registry>>,
}

impl Host {
    /// Build a host from a configuration file. The initial load is fatal
    /// on error; nothing has been installed yet.
    pub fn new(config_path: PathBuf, registry: ActionRegistry) -> Result<Self, ConfigError> {
        let generation = Generation::load(&config_path, &registry)?;
        Ok(Self {
            config_path,
            registry,
            current: ArcSwap::from_pointee(generation),
            log_handle: None,
        })
    }

    /// Attach the log-filter handle so `log.level` takes effect now and on
    /// every reload.
    pub fn with_log_handle(mut self, handle: reload::Handle<EnvFilter, Registry>) -> Self {
        self.log_handle = Some(handle);
        let level = self.current().config.log.level.clone();
        self.apply_log_level(&level);
        self
    }

    fn apply_log_level(&self, level: &str) {
        // An explicit RUST_LOG override outranks the config file
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let Some(handle) = &self.log_handle else {
            return;
        };
        match EnvFilter::try_new(level) {
            Ok(filter) => {
                if let Err(e) = handle.reload(filter) {
                    warn!(error = %e, "Failed to apply log level");
                }
            }
            Err(e) => warn!(level = %level, error = %e, "Invalid configured log level"),
        }
    }

    /// The generation currently serving records.
    pub fn current(&self) -> Arc<Generation> {
        self.current.load_full()
    }

    /// Reload the configuration file and swap in a new generation.
    ///
    /// On any failure the previous generation stays installed and keeps
    /// serving; the error is returned for logging at the call site.
    pub fn reload(&self) -> Result<(), ConfigError> {
        let generation = Generation::load(&self.config_path, &self.registry)?;
        let level = generation.config.log.level.clone();

        info!(
            path = %self.config_path.display(),
            event_types = generation.dispatcher.handler_count(),
            "Installing new configuration generation"
        );
        self.current.store(Arc::new(generation));
        self.apply_log_level(&level);

        Ok(())
    }

    /// Record this worker's pid under the configured `pidPath` directory.
    ///
    /// Failure is logged but not fatal; the pid file is advisory.
    fn write_pid_file(&self) {
        let generation = self.current();
        let pid_file = generation.config.pid_path.join(format!(
            "{}.pid",
            generation.config.kinesis.consumer.app_name
        ));
        if let Err(e) = fs::write(&pid_file, std::process::id().to_string()) {
            warn!(path = %pid_file.display(), error = %e, "Could not write pid file");
        }
    }

    /// Run the worker: reload on `SIGHUP`, serve the daemon protocol on
    /// stdio until the daemon ends the session.
    pub async fn run(self: Arc<Self>) -> Result<(), BridgeError> {
        self.write_pid_file();

        let reloader = self.clone();
        let mut hangup = signal(SignalKind::hangup())?;
        tokio::spawn(async move {
            while hangup.recv().await.is_some() {
                info!("Reload signal received");
                if let Err(e) = reloader.reload() {
                    error!(error = %e, "Reload failed, keeping previous configuration");
                }
            }
        });

        let session = DispatchSession { host: self.clone() };
        let stdin = BufReader::new(tokio::io::stdin());
        let stdout = tokio::io::stdout();
        MultiLangBridge::new(stdin, stdout, session).run().await
    }
}

/// Session that hands every record to the current generation's dispatcher.
pub struct DispatchSession {
    host: Arc<Host>,
}

impl DispatchSession {
    pub fn new(host: Arc<Host>) -> Self {
        Self { host }
    }
}

#[async_trait]
impl PartitionSession for DispatchSession {
    async fn on_record(&self, envelope: EventEnvelope) {
        // Pin the generation for the whole dispatch; a concurrent reload
        // affects the next record, not this one
        let generation = self.host.current();
        let report = generation.dispatcher.handle(&envelope).await;

        if !report.is_success() {
            warn!(
                event_type = %report.event_type,
                failed = report.failure_count(),
                invoked = report.actions_invoked,
                "Record dispatched with action failures"
            );
        }
    }

    async fn on_shutdown(&self, reason: &str) {
        info!(reason = %reason, "Partition session ending");
    }
}
