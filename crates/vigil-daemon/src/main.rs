// crates/vigil-daemon/src/main.rs
//
// Binary entrypoint for the Vigil uptime daemon.
//
// Parses CLI arguments, loads configuration, initializes tracing, resumes
// the engine from the data directory, spawns the epoch and sampler loops,
// and flushes state on Ctrl-C.

mod config;
mod events;
mod scheduler;
mod shared;
mod state;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use config::DaemonConfig;
use scheduler::LoopSettings;
use shared::DaemonSharedState;
use state::{DaemonState, DaemonStateMachine};

use vigil_core::AvailabilityEvent;
use vigil_engine::{
    AvailabilitySampler, ChainEpochObserver, EngineContext, HttpHelperProbe, JsonRpcLedger,
};
use vigil_store::SnapshotStore;

/// Vigil daemon: epoch-bounded helper availability accounting for validators.
#[derive(Parser, Debug)]
#[command(name = "vigil-daemon", version = "0.1.0", about = "Validator availability accounting daemon")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "~/.vigil/config.toml")]
    config: String,

    /// Data directory; overrides `data_dir` from the config file.
    #[arg(long)]
    data_dir: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Config is read before tracing starts so its log level can apply;
    // the outcome is logged right after.
    let config_path = expand_tilde(&args.config);
    let loaded = DaemonConfig::load(&config_path);
    let log_level = loaded
        .as_ref()
        .map(|cfg| cfg.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .init();

    let mut daemon_config = match loaded {
        Ok(cfg) => {
            tracing::info!("Loaded configuration from {}", config_path);
            cfg
        }
        Err(e) => {
            tracing::warn!(
                "Could not load config from {}: {}. Using defaults.",
                config_path,
                e
            );
            DaemonConfig::default()
        }
    };

    // CLI --data-dir overrides the config file value.
    if let Some(data_dir) = args.data_dir {
        daemon_config.data_dir = data_dir;
    }

    let mut state_machine = DaemonStateMachine::new();

    tracing::info!("Vigil Daemon v0.1.0");
    tracing::info!("Data directory: {}", daemon_config.data_dir);
    tracing::info!("Ledger endpoint: {}", daemon_config.ledger_endpoint);
    tracing::info!(
        "Phrases: first starts at epoch {}, {} epochs each",
        daemon_config.first_phrase_start_epoch,
        daemon_config.phrase_length_epochs
    );
    tracing::info!(
        "Fail threshold: {}s inactive per epoch",
        daemon_config.epoch_fail_threshold_secs
    );

    // The only fatal path: the data directory must exist.
    let data_dir = expand_tilde(&daemon_config.data_dir);
    let store = SnapshotStore::open(&data_dir).map_err(|e| {
        tracing::error!("Cannot create data directory {}: {}", data_dir, e);
        e
    })?;

    state_machine.transition(DaemonState::Resuming)?;
    let context = EngineContext::resume(daemon_config.engine_config(), store)?;

    let ledger = Arc::new(JsonRpcLedger::new(
        daemon_config.ledger_endpoint.clone(),
        daemon_config.ledger_progress_method.clone(),
        daemon_config.ledger_validators_method.clone(),
        daemon_config.probe_timeout_secs,
    ));
    let probe = Arc::new(HttpHelperProbe::new(daemon_config.probe_timeout_secs));

    let (event_tx, event_rx) =
        tokio::sync::broadcast::channel::<AvailabilityEvent>(events::EVENT_CHANNEL_CAPACITY);
    let logger_handle = tokio::spawn(events::run_event_logger(event_rx));

    let shared = DaemonSharedState::new(context, event_tx);

    let settings = LoopSettings::from_config(
        &daemon_config,
        PathBuf::from(expand_tilde(&daemon_config.roster_path)),
    );
    tracing::info!("Roster: {}", settings.roster_path.display());

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let epoch_handle = tokio::spawn(scheduler::run_epoch_loop(
        shared.clone(),
        ChainEpochObserver::new(ledger.clone(), daemon_config.avg_block_time_secs),
        settings.clone(),
        shutdown_rx.clone(),
    ));
    let sampler_handle = tokio::spawn(scheduler::run_sampler_loop(
        shared.clone(),
        AvailabilitySampler::new(ledger, probe),
        settings,
        shutdown_rx,
    ));

    state_machine.transition(DaemonState::Monitoring)?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal");
    state_machine.transition(DaemonState::ShuttingDown)?;

    let _ = shutdown_tx.send(true);
    for (name, handle) in [("epoch", epoch_handle), ("sampler", sampler_handle)] {
        if let Err(e) = handle.await {
            tracing::error!("The {} loop ended abnormally: {}", name, e);
        }
    }

    scheduler::shutdown_flush(&shared).await;

    // Closing the last sender lets the event logger drain and exit.
    drop(shared);
    if let Err(e) = logger_handle.await {
        tracing::error!("Event logger ended abnormally: {}", e);
    }

    tracing::info!("Vigil daemon stopped");
    Ok(())
}

/// Expand a leading `~/` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return format!("{}/{}", home.display(), rest);
        }
    }
    path.to_string()
}
