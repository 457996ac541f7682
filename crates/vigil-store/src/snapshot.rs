// crates/vigil-store/src/snapshot.rs
//
// File-backed persistence of the availability state.
//
// Directory layout under the data root:
//   - `phrases/phrase_{N}.json`            -> every validator's entry for phrase N
//   - `metadata/phrase_{N}_metadata.json`  -> phrase bounds and start time
//   - `engine_cursor.json`                 -> last epoch the engine processed
//
// Writes go to a `.tmp` sibling first and are renamed into place, so a
// crash mid-write leaves the previous snapshot intact.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{Map, Value};

use vigil_core::phrase::Phrase;
use vigil_core::state::{AvailabilityStateStore, ValidatorPhraseEntry};
use vigil_core::{PhraseNumber, ValidatorKey, VigilError};

use crate::cursor::EngineCursor;
use crate::schema::{phrase_key, upgrade_phrase_entry, PhraseEntryDoc};

const CURSOR_FILE: &str = "engine_cursor.json";

/// Snapshot files rooted at one data directory.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    /// Open (and create if missing) the data directory.
    ///
    /// Failing to create the directory is fatal to the caller.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, VigilError> {
        let root = root.into();
        for dir in [root.join("phrases"), root.join("metadata")] {
            fs::create_dir_all(&dir).map_err(|e| {
                VigilError::Storage(format!("Failed to create {}: {}", dir.display(), e))
            })?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn phrase_path(&self, phrase: PhraseNumber) -> PathBuf {
        self.root.join("phrases").join(format!("phrase_{}.json", phrase))
    }

    pub fn metadata_path(&self, phrase: PhraseNumber) -> PathBuf {
        self.root
            .join("metadata")
            .join(format!("phrase_{}_metadata.json", phrase))
    }

    pub fn cursor_path(&self) -> PathBuf {
        self.root.join(CURSOR_FILE)
    }

    /// Load every validator's entry for `phrase`.
    ///
    /// A missing file yields an empty map. An unreadable or malformed file is
    /// logged and also yields an empty map; the engine carries on with
    /// fresh state for that phrase.
    pub fn load(&self, phrase: PhraseNumber) -> BTreeMap<ValidatorKey, ValidatorPhraseEntry> {
        let path = self.phrase_path(phrase);
        if !path.exists() {
            tracing::info!("No snapshot for phrase {} at {}", phrase, path.display());
            return BTreeMap::new();
        }

        match self.read_snapshot(&path, phrase) {
            Ok(entries) => {
                tracing::info!(
                    "Loaded {} validator entries for phrase {} from {}",
                    entries.len(),
                    phrase,
                    path.display()
                );
                entries
            }
            Err(e) => {
                tracing::error!(
                    "Failed to load snapshot {}: {}. Starting phrase {} with empty state",
                    path.display(),
                    e,
                    phrase
                );
                BTreeMap::new()
            }
        }
    }

    fn read_snapshot(
        &self,
        path: &Path,
        phrase: PhraseNumber,
    ) -> Result<BTreeMap<ValidatorKey, ValidatorPhraseEntry>, VigilError> {
        let raw = fs::read_to_string(path)?;
        parse_snapshot(&raw, phrase)
    }

    /// Persist every validator's entry for `phrase`.
    ///
    /// Only entries of the requested phrase are written. With no entries
    /// this is a no-op and no file is created. Returns the number of
    /// validators written.
    pub fn save(
        &self,
        phrase: PhraseNumber,
        state: &AvailabilityStateStore,
    ) -> Result<usize, VigilError> {
        let entries = state.phrase_entries(phrase);
        if entries.is_empty() {
            tracing::debug!("No entries for phrase {}; skipping save", phrase);
            return Ok(0);
        }

        let key = phrase_key(phrase);
        let mut doc = Map::new();
        for (validator, entry) in &entries {
            let mut phrases = Map::new();
            phrases.insert(
                key.clone(),
                serde_json::to_value(PhraseEntryDoc::from_entry(entry))?,
            );
            doc.insert(validator.to_string(), Value::Object(phrases));
        }

        write_json_atomic(&self.phrase_path(phrase), &Value::Object(doc))?;
        tracing::debug!("Saved {} validator entries for phrase {}", entries.len(), phrase);
        Ok(entries.len())
    }

    /// Load the metadata of `phrase`, if any was recorded.
    pub fn load_phrase_metadata(&self, phrase: PhraseNumber) -> Option<Phrase> {
        let path = self.metadata_path(phrase);
        if !path.exists() {
            return None;
        }
        match read_json::<Phrase>(&path) {
            Ok(meta) if meta.number == phrase => Some(meta),
            Ok(meta) => {
                tracing::warn!(
                    "Metadata file {} describes phrase {}, expected {}; ignoring",
                    path.display(),
                    meta.number,
                    phrase
                );
                None
            }
            Err(e) => {
                tracing::warn!("Failed to read phrase metadata {}: {}", path.display(), e);
                None
            }
        }
    }

    pub fn save_phrase_metadata(&self, phrase: &Phrase) -> Result<(), VigilError> {
        write_json_atomic(&self.metadata_path(phrase.number), phrase)
    }

    /// Load the engine cursor. Missing or unreadable cursors yield `None`.
    pub fn load_cursor(&self) -> Option<EngineCursor> {
        let path = self.cursor_path();
        if !path.exists() {
            return None;
        }
        match read_json::<EngineCursor>(&path) {
            Ok(cursor) => Some(cursor),
            Err(e) => {
                tracing::warn!("Failed to read engine cursor {}: {}", path.display(), e);
                None
            }
        }
    }

    pub fn save_cursor(&self, cursor: &EngineCursor) -> Result<(), VigilError> {
        write_json_atomic(&self.cursor_path(), cursor)
    }
}

/// Parse the contents of a phrase snapshot file.
///
/// Each validator entry is upgraded to the current schema before being
/// decoded. Validators without an entry for `phrase` are skipped.
pub fn parse_snapshot(
    raw: &str,
    phrase: PhraseNumber,
) -> Result<BTreeMap<ValidatorKey, ValidatorPhraseEntry>, VigilError> {
    let doc: Value = serde_json::from_str(raw)
        .map_err(|e| VigilError::MalformedSnapshot(format!("invalid JSON: {}", e)))?;
    let Value::Object(validators) = doc else {
        return Err(VigilError::MalformedSnapshot(
            "top level is not an object".to_string(),
        ));
    };

    let key = phrase_key(phrase);
    let mut entries = BTreeMap::new();
    for (validator, mut phrases) in validators {
        let Some(raw_entry) = phrases.get_mut(&key).map(Value::take) else {
            tracing::warn!("Snapshot validator {} has no {} entry; skipping", validator, key);
            continue;
        };
        let upgraded = upgrade_phrase_entry(raw_entry)?;
        let doc: PhraseEntryDoc = serde_json::from_value(upgraded).map_err(|e| {
            VigilError::MalformedSnapshot(format!("validator {}: {}", validator, e))
        })?;
        entries.insert(ValidatorKey::new(validator), doc.into_entry());
    }
    Ok(entries)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, VigilError> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), VigilError> {
    let json = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)
        .map_err(|e| VigilError::Storage(format!("Failed to write {}: {}", tmp.display(), e)))?;
    fs::rename(&tmp, path).map_err(|e| {
        VigilError::Storage(format!("Failed to move {} into place: {}", path.display(), e))
    })?;
    Ok(())
}
