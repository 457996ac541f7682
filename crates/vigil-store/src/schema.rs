// crates/vigil-store/src/schema.rs
//
// On-disk schema of a phrase snapshot file.
//
// File layout (one file per phrase N):
//
//   { "<validatorKey>": { "phrase_<N>": {
//       "schemaVersion": 2,
//       "phraseStartEpoch": int, "phraseEndEpoch": int, "phraseStartTime": string|null,
//       "epochs": { "<epoch>": {
//           "status": "RUNNING"|"PASS"|"FAIL"|"SKIP_HISTORICAL",
//           "totalInactiveSeconds": int, "epochStartTime": string|null,
//           "failThresholdExceeded": bool,
//           "lastObservedState": ..., "lastStateChangeTime": ...   (running only)
//       } } } } }
//
// Version history:
//   1 - no "schemaVersion"; fields "inactiveSeconds", "lastState",
//       "lastStateChange"; lowercase statuses running|pass|fail|skipped.
//   2 - current.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use vigil_core::record::{EpochRecord, EpochStatus, ObservedState};
use vigil_core::state::ValidatorPhraseEntry;
use vigil_core::{EpochIndex, VigilError};

/// Schema version written by this build.
pub const CURRENT_SCHEMA_VERSION: u64 = 2;

/// Key of a phrase inside a validator object: `phrase_<N>`.
pub fn phrase_key(phrase: u64) -> String {
    format!("phrase_{}", phrase)
}

/// Serialized form of one validator's phrase entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhraseEntryDoc {
    pub schema_version: u64,
    pub phrase_start_epoch: EpochIndex,
    pub phrase_end_epoch: EpochIndex,
    #[serde(default)]
    pub phrase_start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub epochs: BTreeMap<EpochIndex, EpochDoc>,
}

/// Serialized form of one epoch record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpochDoc {
    pub status: EpochStatus,
    #[serde(default)]
    pub total_inactive_seconds: u64,
    #[serde(default)]
    pub epoch_start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub fail_threshold_exceeded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_observed_state: Option<ObservedState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_state_change_time: Option<DateTime<Utc>>,
}

impl EpochDoc {
    pub fn from_record(record: &EpochRecord) -> Self {
        // Transient sampling fields only matter while the epoch is open.
        let (last_observed_state, last_state_change_time) = if record.is_running() {
            (
                Some(record.last_observed_state),
                record.last_state_change_time,
            )
        } else {
            (None, None)
        };

        Self {
            status: record.status,
            total_inactive_seconds: record.accumulated_inactive_seconds,
            epoch_start_time: record.epoch_start_time,
            fail_threshold_exceeded: record.fail_threshold_exceeded,
            last_observed_state,
            last_state_change_time,
        }
    }

    pub fn into_record(self, epoch: EpochIndex) -> EpochRecord {
        let running = self.status == EpochStatus::Running;
        EpochRecord {
            epoch,
            status: self.status,
            accumulated_inactive_seconds: self.total_inactive_seconds,
            last_observed_state: if running {
                self.last_observed_state.unwrap_or(ObservedState::Unknown)
            } else {
                ObservedState::Unknown
            },
            last_state_change_time: if running {
                self.last_state_change_time
            } else {
                None
            },
            epoch_start_time: self.epoch_start_time,
            fail_threshold_exceeded: self.fail_threshold_exceeded,
        }
    }
}

impl PhraseEntryDoc {
    pub fn from_entry(entry: &ValidatorPhraseEntry) -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            phrase_start_epoch: entry.phrase_start_epoch,
            phrase_end_epoch: entry.phrase_end_epoch,
            phrase_start_time: entry.phrase_start_time,
            epochs: entry
                .epochs
                .iter()
                .map(|(epoch, record)| (*epoch, EpochDoc::from_record(record)))
                .collect(),
        }
    }

    /// Convert into the in-memory entry. Epochs outside the entry's own
    /// bounds are dropped.
    pub fn into_entry(self) -> ValidatorPhraseEntry {
        let mut entry = ValidatorPhraseEntry::new(self.phrase_start_epoch, self.phrase_end_epoch);
        entry.phrase_start_time = self.phrase_start_time;
        for (epoch, doc) in self.epochs {
            if epoch < self.phrase_start_epoch || epoch > self.phrase_end_epoch {
                tracing::warn!(
                    "Dropping epoch {} outside phrase bounds {}-{}",
                    epoch,
                    self.phrase_start_epoch,
                    self.phrase_end_epoch
                );
                continue;
            }
            entry.epochs.insert(epoch, doc.into_record(epoch));
        }
        entry
    }
}

/// Upgrade a version-1 phrase entry to version 2. Pure; never fails.
///
/// Values that are not objects are returned unchanged.
pub fn migrate_v1_to_v2(entry: Value) -> Value {
    let Value::Object(mut entry) = entry else {
        return entry;
    };

    if let Some(Value::Object(epochs)) = entry.get_mut("epochs") {
        for epoch in epochs.values_mut() {
            if let Value::Object(fields) = epoch {
                migrate_epoch_v1(fields);
            }
        }
    }

    entry.insert("schemaVersion".to_string(), Value::from(2u64));
    Value::Object(entry)
}

fn migrate_epoch_v1(fields: &mut Map<String, Value>) {
    rename_field(fields, "inactiveSeconds", "totalInactiveSeconds");
    rename_field(fields, "lastStateChange", "lastStateChangeTime");
    rename_field(fields, "lastState", "lastObservedState");

    if let Some(Value::String(status)) = fields.get_mut("status") {
        let upgraded = match status.as_str() {
            "running" => "RUNNING",
            "pass" => "PASS",
            "fail" => "FAIL",
            "skipped" => "SKIP_HISTORICAL",
            other => other,
        };
        *status = upgraded.to_string();
    }

    if let Some(Value::String(state)) = fields.get_mut("lastObservedState") {
        *state = state.to_uppercase();
    }
}

fn rename_field(fields: &mut Map<String, Value>, from: &str, to: &str) {
    if let Some(value) = fields.remove(from) {
        fields.entry(to.to_string()).or_insert(value);
    }
}

/// Bring a raw phrase entry up to the current schema version.
///
/// A missing `schemaVersion` means version 1. Versions newer than this
/// build understands are rejected as malformed.
pub fn upgrade_phrase_entry(entry: Value) -> Result<Value, VigilError> {
    let version = match entry.get("schemaVersion") {
        None => 1,
        Some(v) => v.as_u64().ok_or_else(|| {
            VigilError::MalformedSnapshot(format!("schemaVersion is not an integer: {}", v))
        })?,
    };

    match version {
        1 => Ok(migrate_v1_to_v2(entry)),
        CURRENT_SCHEMA_VERSION => Ok(entry),
        other => Err(VigilError::MalformedSnapshot(format!(
            "unsupported schemaVersion {} (this build writes {})",
            other, CURRENT_SCHEMA_VERSION
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_v1_entry_is_migrated() {
        let v1 = json!({
            "phraseStartEpoch": 100,
            "phraseEndEpoch": 109,
            "phraseStartTime": null,
            "epochs": {
                "100": { "status": "skipped", "inactiveSeconds": 0 },
                "101": { "status": "fail", "inactiveSeconds": 9000, "failThresholdExceeded": true },
                "102": {
                    "status": "running",
                    "inactiveSeconds": 30,
                    "lastState": "inactive",
                    "lastStateChange": "2025-03-01T12:00:00Z"
                }
            }
        });

        let v2 = migrate_v1_to_v2(v1);
        assert_eq!(v2["schemaVersion"], 2);
        assert_eq!(v2["epochs"]["100"]["status"], "SKIP_HISTORICAL");
        assert_eq!(v2["epochs"]["101"]["totalInactiveSeconds"], 9000);
        assert_eq!(v2["epochs"]["102"]["lastObservedState"], "INACTIVE");
        assert!(v2["epochs"]["102"].get("lastStateChange").is_none());

        let doc: PhraseEntryDoc = serde_json::from_value(v2).unwrap();
        let entry = doc.into_entry();
        let running = &entry.epochs[&102];
        assert_eq!(running.last_observed_state, ObservedState::Inactive);
        assert_eq!(
            running.last_state_change_time,
            Some(Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_current_version_passes_through() {
        let v2 = json!({ "schemaVersion": 2, "phraseStartEpoch": 1, "phraseEndEpoch": 2, "epochs": {} });
        assert_eq!(upgrade_phrase_entry(v2.clone()).unwrap(), v2);
    }

    #[test]
    fn test_future_version_rejected() {
        let v9 = json!({ "schemaVersion": 9 });
        assert!(matches!(
            upgrade_phrase_entry(v9),
            Err(VigilError::MalformedSnapshot(_))
        ));
    }

    #[test]
    fn test_terminal_records_drop_transient_fields() {
        let mut record = EpochRecord::running(5, Utc::now());
        record.finalize(Utc::now(), 7200);
        let doc = EpochDoc::from_record(&record);
        assert!(doc.last_observed_state.is_none());
        assert!(doc.last_state_change_time.is_none());
        let json = serde_json::to_value(&doc).unwrap();
        assert!(json.get("lastObservedState").is_none());
    }

    #[test]
    fn test_out_of_bounds_epochs_dropped() {
        let doc: PhraseEntryDoc = serde_json::from_value(json!({
            "schemaVersion": 2,
            "phraseStartEpoch": 100,
            "phraseEndEpoch": 109,
            "epochs": {
                "99": { "status": "PASS" },
                "105": { "status": "PASS" }
            }
        }))
        .unwrap();
        let entry = doc.into_entry();
        assert_eq!(entry.epochs.keys().copied().collect::<Vec<_>>(), vec![105]);
    }
}
