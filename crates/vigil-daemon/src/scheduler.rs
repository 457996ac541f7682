// crates/vigil-daemon/src/scheduler.rs
//
// The two self-rescheduling loops of the daemon.
//
//   epoch loop   (coarse): poll the ledger, run the transition handler.
//   sampler loop (fine):   probe every roster contact, apply the samples.
//
// Each loop sleeps only after its tick has fully completed, so a loop never
// overlaps with itself. A tick triggered while the previous one is still
// running is logged and dropped rather than queued.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;

use vigil_core::ValidatorKey;
use vigil_engine::{
    handle_epoch_observation, load_roster, AvailabilitySampler, ChainEpochObserver,
};

use crate::config::DaemonConfig;
use crate::events::publish;
use crate::shared::DaemonSharedState;

/// Loop intervals and roster location. Roster and sampling options live
/// here rather than in the engine config; only the loops read them.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub roster_path: PathBuf,
    pub probe_path: String,
    pub track_active_set: bool,
    pub epoch_interval: Duration,
    pub sampler_interval: Duration,
}

impl LoopSettings {
    /// `roster_path` is passed in already tilde-expanded.
    pub fn from_config(config: &DaemonConfig, roster_path: PathBuf) -> Self {
        Self {
            roster_path,
            probe_path: config.probe_path.clone(),
            track_active_set: config.track_active_set,
            epoch_interval: Duration::from_secs(config.epoch_check_interval_secs),
            sampler_interval: Duration::from_secs(config.sampler_interval_secs),
        }
    }
}

/// In-progress marker for one loop. Released on drop.
pub struct TickGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> TickGuard<'a> {
    /// Claim the loop. Returns `None` (and logs) if a tick is already running.
    pub fn try_acquire(flag: &'a AtomicBool, name: &str) -> Option<Self> {
        if flag.swap(true, Ordering::AcqRel) {
            tracing::warn!("{} tick already in progress; skipping", name);
            None
        } else {
            Some(Self { flag })
        }
    }
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

fn roster_keys(settings: &LoopSettings) -> BTreeSet<ValidatorKey> {
    load_roster(&settings.roster_path, &settings.probe_path)
        .into_iter()
        .map(|c| c.key)
        .collect()
}

/// One run of the epoch loop.
pub async fn epoch_tick(
    shared: &DaemonSharedState,
    observer: &ChainEpochObserver,
    settings: &LoopSettings,
) {
    let Some(_guard) = TickGuard::try_acquire(&shared.epoch_tick_running, "Epoch") else {
        return;
    };

    let now = Utc::now();
    let Some(progress) = observer.poll(now).await else {
        return;
    };

    let eta = progress.eta(now);
    tracing::info!(
        "Epoch {}: block {}/{} ({:.1}%), {} blocks left, ends ~{} ({}h {}m)",
        progress.epoch,
        progress.session_progress,
        progress.session_length,
        progress.percentage,
        progress.remaining_blocks,
        progress.estimated_end.format("%Y-%m-%d %H:%M:%S UTC"),
        eta.num_hours(),
        eta.num_minutes() % 60
    );

    let roster = roster_keys(settings);
    let report = {
        let mut ctx = shared.context.lock().await;
        handle_epoch_observation(&mut ctx, &progress, &roster, now)
    };

    if !report.finalized_epochs.is_empty() {
        tracing::info!("Finalized epochs {:?}", report.finalized_epochs);
    }
    publish(&shared.events, report.events);
}

/// One run of the sampler loop.
pub async fn sampler_tick(
    shared: &DaemonSharedState,
    sampler: &AvailabilitySampler,
    settings: &LoopSettings,
) {
    let Some(_guard) = TickGuard::try_acquire(&shared.sampler_tick_running, "Sampler") else {
        return;
    };

    let roster = load_roster(&settings.roster_path, &settings.probe_path);
    let known = {
        let ctx = shared.context.lock().await;
        match ctx.last_known_epoch() {
            Some(epoch) => ctx
                .state()
                .validators_in_phrase(ctx.calculator().phrase_of(epoch)),
            None => BTreeSet::new(),
        }
    };

    let samples = sampler
        .collect(&roster, &known, settings.track_active_set)
        .await;

    let events = {
        let mut ctx = shared.context.lock().await;
        AvailabilitySampler::apply(&mut ctx, &samples, Utc::now())
    };
    tracing::debug!("Sampler tick: {} samples, {} transitions", samples.len(), events.len());
    publish(&shared.events, events);
}

/// Run the epoch loop until shutdown is signalled.
pub async fn run_epoch_loop(
    shared: DaemonSharedState,
    observer: ChainEpochObserver,
    settings: LoopSettings,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!(
        "Epoch loop started (interval={}s)",
        settings.epoch_interval.as_secs()
    );

    loop {
        epoch_tick(&shared, &observer, &settings).await;

        tokio::select! {
            _ = shutdown.changed() => {
                tracing::info!("Epoch loop received shutdown signal");
                break;
            }
            _ = tokio::time::sleep(settings.epoch_interval) => {}
        }
    }
}

/// Run the sampler loop until shutdown is signalled.
pub async fn run_sampler_loop(
    shared: DaemonSharedState,
    sampler: AvailabilitySampler,
    settings: LoopSettings,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!(
        "Sampler loop started (interval={}s)",
        settings.sampler_interval.as_secs()
    );

    loop {
        sampler_tick(&shared, &sampler, &settings).await;

        tokio::select! {
            _ = shutdown.changed() => {
                tracing::info!("Sampler loop received shutdown signal");
                break;
            }
            _ = tokio::time::sleep(settings.sampler_interval) => {}
        }
    }
}

/// Final accumulation and save. Called once both loops have stopped.
pub async fn shutdown_flush(shared: &DaemonSharedState) {
    let mut ctx = shared.context.lock().await;
    let touched = ctx.flush_on_shutdown(Utc::now());
    tracing::info!(
        "Shutdown flush complete ({} records accumulated, uptime {}s)",
        touched,
        shared.start_time.elapsed().as_secs()
    );
}
