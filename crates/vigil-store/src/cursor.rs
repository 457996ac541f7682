// crates/vigil-store/src/cursor.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use vigil_core::EpochIndex;

use crate::schema::CURRENT_SCHEMA_VERSION;

/// Engine progress marker persisted next to the phrase snapshots.
///
/// Lets a restarted engine finalize epochs that elapsed while it was down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineCursor {
    #[serde(default = "default_schema_version")]
    pub schema_version: u64,
    /// Last ledger epoch the transition handler processed.
    pub last_known_epoch: Option<EpochIndex>,
    pub updated_at: DateTime<Utc>,
}

fn default_schema_version() -> u64 {
    CURRENT_SCHEMA_VERSION
}

impl EngineCursor {
    pub fn new(last_known_epoch: Option<EpochIndex>, updated_at: DateTime<Utc>) -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            last_known_epoch,
            updated_at,
        }
    }
}
