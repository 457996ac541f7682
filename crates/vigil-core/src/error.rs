// crates/vigil-core/src/error.rs

use thiserror::Error;

/// Engine-wide error types for Vigil.
///
/// Every variant is contained at the component boundary that produces it:
/// callers log and fall back to a sentinel, an empty state, or a no-op.
#[derive(Debug, Error)]
pub enum VigilError {
    /// Ledger RPC connect or query failure.
    #[error("Ledger unreachable: {0}")]
    LedgerUnreachable(String),

    /// A persisted snapshot file exists but cannot be parsed or migrated.
    #[error("Malformed snapshot: {0}")]
    MalformedSnapshot(String),

    /// The helper reachability check itself errored (not a genuine INACTIVE report).
    #[error("Probe failure: {0}")]
    ProbeFailure(String),

    /// A roster entry is missing required fields.
    #[error("Invalid roster entry: {0}")]
    InvalidRosterEntry(String),

    /// A state store primitive was called with arguments that break an invariant.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Filesystem error while reading or writing persisted state.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration value.
    #[error("Config error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for VigilError {
    fn from(e: serde_json::Error) -> Self {
        VigilError::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for VigilError {
    fn from(e: std::io::Error) -> Self {
        VigilError::Storage(e.to_string())
    }
}
