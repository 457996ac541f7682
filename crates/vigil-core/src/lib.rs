// crates/vigil-core/src/lib.rs
//
// vigil-core: Core types, phrase arithmetic, and the availability state store
// for the Vigil uptime engine.
//
// This is the leaf crate that all other crates in the workspace depend on.
// It defines the epoch record state machine, the phrase calculator, the
// structured events handed to notification collaborators, the error type,
// and the trait seams for the ledger and the helper reachability probe.

pub mod error;
pub mod events;
pub mod phrase;
pub mod record;
pub mod state;
pub mod traits;
pub mod validator;

// Re-export key types for ergonomic access from downstream crates.
// Usage: `use vigil_core::EpochRecord;`

// Phrase types
pub use phrase::{Phrase, PhraseCalculator};

// Record types
pub use record::{EpochRecord, EpochStatus, ObservedState, Transition, Verdict};

// State store
pub use state::{AvailabilityStateStore, ValidatorPhraseEntry};

// Events
pub use events::{AvailabilityEvent, AvailabilityEventKind, EventDetail, SignalSource};

// Identity
pub use validator::ValidatorKey;

// Error type
pub use error::VigilError;

// Traits
pub use traits::{LedgerSource, ReachabilityProbe, SessionProgress};

/// Ledger epoch (session) index.
pub type EpochIndex = u64;

/// Phrase number. Valid phrases start at 1; 0 means "before the first phrase".
pub type PhraseNumber = u64;
