// crates/vigil-engine/src/lib.rs
//
// vigil-engine: The availability accounting engine for Vigil.
//
// Two entry points drive everything, both operating on one `EngineContext`:
//   - `handle_epoch_observation` after each `ChainEpochObserver::poll`
//     (coarse loop): finalizes elapsed epochs and opens the current one.
//   - `AvailabilitySampler::collect` + `AvailabilitySampler::apply`
//     (fine loop): feeds helper reachability into the current epoch.
//
// The ledger and the helper probe sit behind the `LedgerSource` and
// `ReachabilityProbe` traits; `JsonRpcLedger` and `HttpHelperProbe` are the
// production implementations.

pub mod context;
pub mod ledger;
pub mod observer;
pub mod probe;
pub mod roster;
pub mod sampler;
pub mod transition;

// Re-export key types for ergonomic access from the daemon.
pub use context::{EngineConfig, EngineContext};
pub use ledger::JsonRpcLedger;
pub use observer::{ChainEpochObserver, EpochProgress};
pub use probe::HttpHelperProbe;
pub use roster::{load_roster, parse_roster, RosterContact, RosterEntry};
pub use sampler::{AvailabilitySampler, Sample};
pub use transition::{handle_epoch_observation, TransitionReport};
