// crates/vigil-core/src/state.rs
//
// AvailabilityStateStore: in-memory per-(validator, phrase, epoch) records.
//
// The store owns every record and exposes the mutation primitives
// (initialize, accumulate, observe, finalize) that enforce the record state
// machine. Calls that would break a structural invariant (phrase number
// below 1, epoch outside the phrase's bounds) are logged and ignored.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use crate::error::VigilError;
use crate::phrase::PhraseCalculator;
use crate::record::{EpochRecord, Transition, Verdict};
use crate::validator::ValidatorKey;
use crate::{EpochIndex, PhraseNumber};

/// One validator's records within one phrase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorPhraseEntry {
    pub phrase_start_epoch: EpochIndex,
    pub phrase_end_epoch: EpochIndex,
    pub phrase_start_time: Option<DateTime<Utc>>,
    pub epochs: BTreeMap<EpochIndex, EpochRecord>,
}

impl ValidatorPhraseEntry {
    pub fn new(phrase_start_epoch: EpochIndex, phrase_end_epoch: EpochIndex) -> Self {
        Self {
            phrase_start_epoch,
            phrase_end_epoch,
            phrase_start_time: None,
            epochs: BTreeMap::new(),
        }
    }
}

/// Owned in-memory state: validator -> phrase -> entry.
#[derive(Debug, Clone)]
pub struct AvailabilityStateStore {
    calculator: PhraseCalculator,
    validators: BTreeMap<ValidatorKey, BTreeMap<PhraseNumber, ValidatorPhraseEntry>>,
}

impl AvailabilityStateStore {
    pub fn new(calculator: PhraseCalculator) -> Self {
        Self {
            calculator,
            validators: BTreeMap::new(),
        }
    }

    pub fn calculator(&self) -> &PhraseCalculator {
        &self.calculator
    }

    /// Reject calls whose (phrase, epoch) pair cannot exist.
    fn check_bounds(&self, phrase: PhraseNumber, epoch: EpochIndex) -> Result<(), VigilError> {
        if phrase < 1 {
            return Err(VigilError::InvariantViolation(format!(
                "phrase number must be >= 1 (got {} for epoch {})",
                phrase, epoch
            )));
        }
        if !self.calculator.contains(phrase, epoch) {
            return Err(VigilError::InvariantViolation(format!(
                "epoch {} is outside phrase {}",
                epoch, phrase
            )));
        }
        Ok(())
    }

    fn record_mut(
        &mut self,
        validator: &ValidatorKey,
        phrase: PhraseNumber,
        epoch: EpochIndex,
    ) -> Option<&mut EpochRecord> {
        self.validators
            .get_mut(validator)?
            .get_mut(&phrase)?
            .epochs
            .get_mut(&epoch)
    }

    /// Create the record if missing, or flip `SkipHistorical` <-> `Running`
    /// on a conflicting call.
    ///
    /// Returns `true` if a record was created or changed.
    pub fn initialize(
        &mut self,
        validator: &ValidatorKey,
        phrase: PhraseNumber,
        epoch: EpochIndex,
        now: DateTime<Utc>,
        historical: bool,
    ) -> bool {
        if let Err(e) = self.check_bounds(phrase, epoch) {
            tracing::error!("initialize({}, {}): {}", validator, epoch, e);
            return false;
        }

        let (start, end) = match (
            self.calculator.start_epoch_of(phrase),
            self.calculator.end_epoch_of(phrase),
        ) {
            (Some(start), Some(end)) => (start, end),
            _ => return false,
        };

        let entry = self
            .validators
            .entry(validator.clone())
            .or_default()
            .entry(phrase)
            .or_insert_with(|| ValidatorPhraseEntry::new(start, end));

        match entry.epochs.get_mut(&epoch) {
            Some(existing) => existing.reinitialize(historical, now),
            None => {
                let record = if historical {
                    EpochRecord::historical(epoch)
                } else {
                    EpochRecord::running(epoch, now)
                };
                entry.epochs.insert(epoch, record);
                true
            }
        }
    }

    /// Accumulate inactive time on a running record. Returns seconds added.
    pub fn accumulate(
        &mut self,
        validator: &ValidatorKey,
        phrase: PhraseNumber,
        epoch: EpochIndex,
        now: DateTime<Utc>,
    ) -> u64 {
        self.record_mut(validator, phrase, epoch)
            .map_or(0, |record| record.accumulate(now))
    }

    /// Apply one reachability sample to a running record.
    pub fn observe(
        &mut self,
        validator: &ValidatorKey,
        phrase: PhraseNumber,
        epoch: EpochIndex,
        reachable: bool,
        now: DateTime<Utc>,
    ) -> Option<Transition> {
        self.record_mut(validator, phrase, epoch)?
            .observe(reachable, now)
    }

    /// Finalize a running record into PASS/FAIL.
    ///
    /// Idempotent: terminal and historical records are left untouched.
    pub fn finalize(
        &mut self,
        validator: &ValidatorKey,
        phrase: PhraseNumber,
        epoch: EpochIndex,
        now: DateTime<Utc>,
        threshold_seconds: u64,
    ) -> Option<Verdict> {
        if let Err(e) = self.check_bounds(phrase, epoch) {
            tracing::error!("finalize({}, {}): {}", validator, epoch, e);
            return None;
        }
        self.record_mut(validator, phrase, epoch)?
            .finalize(now, threshold_seconds)
    }

    /// Set the advisory epoch start time if it is still unset.
    pub fn set_epoch_start_time_if_unset(
        &mut self,
        validator: &ValidatorKey,
        phrase: PhraseNumber,
        epoch: EpochIndex,
        start_time: DateTime<Utc>,
    ) -> bool {
        match self.record_mut(validator, phrase, epoch) {
            Some(record) if record.epoch_start_time.is_none() => {
                record.epoch_start_time = Some(start_time);
                true
            }
            _ => false,
        }
    }

    /// Copy the phrase start time onto every validator entry of `phrase` that lacks it.
    pub fn set_phrase_start_time(&mut self, phrase: PhraseNumber, start_time: DateTime<Utc>) {
        for phrases in self.validators.values_mut() {
            if let Some(entry) = phrases.get_mut(&phrase) {
                if entry.phrase_start_time.is_none() {
                    entry.phrase_start_time = Some(start_time);
                }
            }
        }
    }

    pub fn record(
        &self,
        validator: &ValidatorKey,
        phrase: PhraseNumber,
        epoch: EpochIndex,
    ) -> Option<&EpochRecord> {
        self.phrase_entry(validator, phrase)?.epochs.get(&epoch)
    }

    pub fn phrase_entry(
        &self,
        validator: &ValidatorKey,
        phrase: PhraseNumber,
    ) -> Option<&ValidatorPhraseEntry> {
        self.validators.get(validator)?.get(&phrase)
    }

    /// Validators that have an entry in `phrase`.
    pub fn validators_in_phrase(&self, phrase: PhraseNumber) -> BTreeSet<ValidatorKey> {
        self.validators
            .iter()
            .filter(|(_, phrases)| phrases.contains_key(&phrase))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// All entries belonging to `phrase`, keyed by validator.
    pub fn phrase_entries(&self, phrase: PhraseNumber) -> BTreeMap<&ValidatorKey, &ValidatorPhraseEntry> {
        self.validators
            .iter()
            .filter_map(|(key, phrases)| phrases.get(&phrase).map(|entry| (key, entry)))
            .collect()
    }

    /// Epochs of (validator, phrase) currently in the Running state.
    pub fn running_epochs(&self, validator: &ValidatorKey, phrase: PhraseNumber) -> Vec<EpochIndex> {
        self.phrase_entry(validator, phrase)
            .map(|entry| {
                entry
                    .epochs
                    .values()
                    .filter(|r| r.is_running())
                    .map(|r| r.epoch)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Merge entries loaded from disk for `phrase`. Entries already held in
    /// memory win; loaded entries only fill gaps.
    ///
    /// Returns the number of entries inserted.
    pub fn merge_phrase(
        &mut self,
        phrase: PhraseNumber,
        loaded: BTreeMap<ValidatorKey, ValidatorPhraseEntry>,
    ) -> usize {
        let mut inserted = 0;
        for (key, entry) in loaded {
            let phrases = self.validators.entry(key).or_default();
            if let std::collections::btree_map::Entry::Vacant(slot) = phrases.entry(phrase) {
                slot.insert(entry);
                inserted += 1;
            }
        }
        inserted
    }

    pub fn validator_count(&self) -> usize {
        self.validators.len()
    }
}
