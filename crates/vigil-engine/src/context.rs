// crates/vigil-engine/src/context.rs
//
// EngineContext: the single owned context both loops operate on.
//
// Holds the in-memory state store, the snapshot store, the last epoch the
// transition handler processed, and the current phrase. Loops receive it
// explicitly (behind the daemon's mutex); nothing here is global.

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Utc};

use vigil_core::phrase::{Phrase, PhraseCalculator};
use vigil_core::state::AvailabilityStateStore;
use vigil_core::{EpochIndex, PhraseNumber, ValidatorKey, VigilError};
use vigil_store::{EngineCursor, SnapshotStore};

use crate::observer::EpochProgress;

/// Engine tunables. Defaults match the production ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub first_phrase_start_epoch: EpochIndex,
    pub phrase_length_epochs: u64,
    pub epoch_fail_threshold_secs: u64,
    pub avg_block_time_secs: u64,
    pub nominal_epoch_duration_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            first_phrase_start_epoch: 5450,
            phrase_length_epochs: 84,
            epoch_fail_threshold_secs: 7200,
            avg_block_time_secs: 6,
            nominal_epoch_duration_secs: 4 * 60 * 60,
        }
    }
}

impl EngineConfig {
    pub fn calculator(&self) -> Result<PhraseCalculator, VigilError> {
        PhraseCalculator::new(self.first_phrase_start_epoch, self.phrase_length_epochs)
    }
}

/// Owned engine state shared by the epoch loop and the sampler loop.
#[derive(Debug)]
pub struct EngineContext {
    pub(crate) config: EngineConfig,
    pub(crate) state: AvailabilityStateStore,
    pub(crate) store: SnapshotStore,
    pub(crate) last_known_epoch: Option<EpochIndex>,
    pub(crate) current_phrase: Option<Phrase>,
    pub(crate) latest_progress: Option<EpochProgress>,
    loaded_phrases: HashSet<PhraseNumber>,
}

impl EngineContext {
    /// Build a context from persisted state.
    ///
    /// Restores `last_known_epoch` from the cursor file and loads the
    /// snapshot and metadata of that epoch's phrase.
    pub fn resume(config: EngineConfig, store: SnapshotStore) -> Result<Self, VigilError> {
        let calculator = config.calculator()?;
        let mut ctx = Self {
            state: AvailabilityStateStore::new(calculator),
            config,
            store,
            last_known_epoch: None,
            current_phrase: None,
            latest_progress: None,
            loaded_phrases: HashSet::new(),
        };

        match ctx.store.load_cursor() {
            Some(cursor) => {
                ctx.last_known_epoch = cursor.last_known_epoch;
                tracing::info!(
                    "Resuming from cursor: last known epoch {:?} (saved {})",
                    cursor.last_known_epoch,
                    cursor.updated_at
                );
            }
            None => tracing::info!("No engine cursor found; starting fresh"),
        }

        if let Some(epoch) = ctx.last_known_epoch {
            let phrase = calculator.phrase_of(epoch);
            if phrase >= 1 {
                ctx.ensure_phrase_loaded(phrase);
                ctx.current_phrase = ctx
                    .store
                    .load_phrase_metadata(phrase)
                    .or_else(|| calculator.phrase(phrase));
            }
        }

        Ok(ctx)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> &AvailabilityStateStore {
        &self.state
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn calculator(&self) -> &PhraseCalculator {
        self.state.calculator()
    }

    pub fn last_known_epoch(&self) -> Option<EpochIndex> {
        self.last_known_epoch
    }

    pub fn current_phrase(&self) -> Option<&Phrase> {
        self.current_phrase.as_ref()
    }

    pub fn latest_progress(&self) -> Option<&EpochProgress> {
        self.latest_progress.as_ref()
    }

    /// Merge the snapshot of `phrase` into memory, once per process.
    pub fn ensure_phrase_loaded(&mut self, phrase: PhraseNumber) {
        if phrase < 1 || !self.loaded_phrases.insert(phrase) {
            return;
        }
        let loaded = self.store.load(phrase);
        let merged = self.state.merge_phrase(phrase, loaded);
        tracing::debug!("Merged {} stored entries for phrase {}", merged, phrase);
    }

    /// Write the snapshot of `phrase`. Failures are logged, never raised.
    pub fn persist_phrase(&self, phrase: PhraseNumber) {
        if let Err(e) = self.store.save(phrase, &self.state) {
            tracing::error!("Failed to save phrase {}: {}", phrase, e);
        }
    }

    pub fn persist_cursor(&self, now: DateTime<Utc>) {
        let cursor = EngineCursor::new(self.last_known_epoch, now);
        if let Err(e) = self.store.save_cursor(&cursor) {
            tracing::error!("Failed to save engine cursor: {}", e);
        }
    }

    /// Validators tracked in `phrase`: the given roster plus every validator
    /// that already has an entry in that phrase.
    pub fn tracked_in_phrase(
        &self,
        phrase: PhraseNumber,
        roster: &BTreeSet<ValidatorKey>,
    ) -> BTreeSet<ValidatorKey> {
        let mut tracked = self.state.validators_in_phrase(phrase);
        tracked.extend(roster.iter().cloned());
        tracked
    }

    /// Final accumulation and save before exit.
    ///
    /// Captures the INACTIVE tail of every running record in the current
    /// epoch, then writes the phrase and the cursor. Returns the number of
    /// records touched.
    pub fn flush_on_shutdown(&mut self, now: DateTime<Utc>) -> usize {
        let Some(epoch) = self.last_known_epoch else {
            return 0;
        };
        let phrase = self.calculator().phrase_of(epoch);
        if phrase < 1 {
            self.persist_cursor(now);
            return 0;
        }

        let mut touched = 0;
        for validator in self.state.validators_in_phrase(phrase) {
            let added = self.state.accumulate(&validator, phrase, epoch, now);
            if added > 0 {
                tracing::debug!(
                    "Shutdown flush: +{}s inactive for {} in epoch {}",
                    added,
                    validator,
                    epoch
                );
                touched += 1;
            }
        }

        self.persist_phrase(phrase);
        self.persist_cursor(now);
        touched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use uuid::Uuid;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn temp_store() -> SnapshotStore {
        let dir = std::env::temp_dir().join(format!("vigil_context_test_{}", Uuid::now_v7()));
        SnapshotStore::open(dir).unwrap()
    }

    fn config() -> EngineConfig {
        EngineConfig {
            first_phrase_start_epoch: 100,
            phrase_length_epochs: 10,
            ..EngineConfig::default()
        }
    }

    #[test]
    fn test_zero_phrase_length_rejected() {
        let cfg = EngineConfig {
            phrase_length_epochs: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(
            EngineContext::resume(cfg, temp_store()),
            Err(VigilError::Config(_))
        ));
    }

    #[test]
    fn test_fresh_context_has_no_cursor() {
        let ctx = EngineContext::resume(config(), temp_store()).unwrap();
        assert_eq!(ctx.last_known_epoch(), None);
        assert!(ctx.current_phrase().is_none());
    }

    #[test]
    fn test_resume_restores_cursor_and_phrase() {
        let store = temp_store();
        let key = ValidatorKey::from("hmpA");
        {
            let mut ctx = EngineContext::resume(config(), store.clone()).unwrap();
            ctx.state.initialize(&key, 1, 104, t0(), false);
            ctx.last_known_epoch = Some(104);
            ctx.persist_phrase(1);
            ctx.persist_cursor(t0());
        }

        let ctx = EngineContext::resume(config(), store).unwrap();
        assert_eq!(ctx.last_known_epoch(), Some(104));
        assert_eq!(ctx.current_phrase().map(|p| p.number), Some(1));
        assert!(ctx.state().record(&key, 1, 104).is_some());
    }

    #[test]
    fn test_shutdown_flush_captures_inactive_tail() {
        let store = temp_store();
        let key = ValidatorKey::from("hmpA");
        let mut ctx = EngineContext::resume(config(), store.clone()).unwrap();
        ctx.state.initialize(&key, 1, 104, t0(), false);
        ctx.state.observe(&key, 1, 104, false, t0());
        ctx.last_known_epoch = Some(104);

        assert_eq!(ctx.flush_on_shutdown(t0() + Duration::seconds(300)), 1);

        let loaded = store.load(1);
        assert_eq!(loaded[&key].epochs[&104].accumulated_inactive_seconds, 300);
        assert_eq!(store.load_cursor().and_then(|c| c.last_known_epoch), Some(104));
    }

    #[test]
    fn test_tracked_includes_known_and_roster() {
        let mut ctx = EngineContext::resume(config(), temp_store()).unwrap();
        ctx.state.initialize(&ValidatorKey::from("known"), 1, 101, t0(), false);
        let roster: BTreeSet<ValidatorKey> = [ValidatorKey::from("new")].into_iter().collect();
        let tracked = ctx.tracked_in_phrase(1, &roster);
        assert_eq!(tracked.len(), 2);
    }
}
