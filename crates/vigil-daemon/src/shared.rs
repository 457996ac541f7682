// crates/vigil-daemon/src/shared.rs
//
// DaemonSharedState: the engine context and plumbing shared by both loops.
//
// Constructed once in main.rs and cloned into the epoch loop, the sampler
// loop, and the shutdown path.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{broadcast, Mutex};

use vigil_core::AvailabilityEvent;
use vigil_engine::EngineContext;

#[derive(Clone)]
pub struct DaemonSharedState {
    /// The single owned engine context. Each loop holds the lock only for
    /// the synchronous part of a tick, never across network I/O.
    pub context: Arc<Mutex<EngineContext>>,
    /// Availability events for notification collaborators.
    pub events: broadcast::Sender<AvailabilityEvent>,
    /// Set while an epoch tick is in progress.
    pub epoch_tick_running: Arc<AtomicBool>,
    /// Set while a sampler tick is in progress.
    pub sampler_tick_running: Arc<AtomicBool>,
    /// Daemon start time for uptime calculation.
    pub start_time: Instant,
}

impl DaemonSharedState {
    pub fn new(context: EngineContext, events: broadcast::Sender<AvailabilityEvent>) -> Self {
        Self {
            context: Arc::new(Mutex::new(context)),
            events,
            epoch_tick_running: Arc::new(AtomicBool::new(false)),
            sampler_tick_running: Arc::new(AtomicBool::new(false)),
            start_time: Instant::now(),
        }
    }
}
