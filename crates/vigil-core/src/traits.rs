// crates/vigil-core/src/traits.rs

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::VigilError;
use crate::EpochIndex;

/// Raw session progress as reported by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionProgress {
    /// Current epoch (session) index.
    pub current_index: EpochIndex,
    /// Number of blocks in the current session.
    pub session_length: u64,
    /// Blocks already produced in the current session.
    pub session_progress: u64,
}

/// Read-only view of the ledger.
///
/// Implemented by vigil-engine (JSON-RPC gateway client). The engine treats
/// the ledger as an opaque source of epoch progress and the active set.
#[async_trait]
pub trait LedgerSource: Send + Sync {
    /// Current epoch index with within-epoch progress.
    async fn session_progress(&self) -> Result<SessionProgress, VigilError>;

    /// Addresses of the validators in the current active set.
    async fn active_validators(&self) -> Result<Vec<String>, VigilError>;
}

/// Boolean reachability check of a validator's helper process.
///
/// Implemented by vigil-engine (HTTP probe). `Err` means the check itself
/// failed; callers treat that as INACTIVE but log the cause.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    /// Probe the helper at `url`. Returns `true` if it reports itself active.
    async fn probe(&self, url: &str) -> Result<bool, VigilError>;
}
