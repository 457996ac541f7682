// crates/vigil-core/src/phrase.rs
//
// Phrase arithmetic for Vigil.
//
// A phrase is a fixed number of consecutive ledger epochs treated as one
// reward/accounting cycle. Phrase 1 starts at a configured epoch; every
// later phrase follows contiguously with no overlap:
//
//   phrase_of(e)        = 0                                  if e < first_start
//                       = (e - first_start) / length + 1     otherwise
//   start_epoch_of(n)   = first_start + (n - 1) * length     for n >= 1

use std::ops::RangeInclusive;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::VigilError;
use crate::{EpochIndex, PhraseNumber};

/// Maps epoch indices to phrase numbers and phrase bounds.
///
/// Pure arithmetic over two constants; no side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhraseCalculator {
    /// Epoch at which phrase 1 starts.
    first_phrase_start_epoch: EpochIndex,
    /// Number of epochs in every phrase.
    phrase_length: u64,
}

impl PhraseCalculator {
    /// Create a calculator. A zero phrase length is rejected.
    pub fn new(first_phrase_start_epoch: EpochIndex, phrase_length: u64) -> Result<Self, VigilError> {
        if phrase_length == 0 {
            return Err(VigilError::Config(
                "phrase length must be at least one epoch".to_string(),
            ));
        }
        Ok(Self {
            first_phrase_start_epoch,
            phrase_length,
        })
    }

    pub fn first_phrase_start_epoch(&self) -> EpochIndex {
        self.first_phrase_start_epoch
    }

    pub fn phrase_length(&self) -> u64 {
        self.phrase_length
    }

    /// Phrase containing `epoch`, or 0 if the epoch precedes the first phrase.
    pub fn phrase_of(&self, epoch: EpochIndex) -> PhraseNumber {
        if epoch < self.first_phrase_start_epoch {
            return 0;
        }
        (epoch - self.first_phrase_start_epoch) / self.phrase_length + 1
    }

    /// First epoch of `phrase`, or `None` for phrase numbers below 1.
    pub fn start_epoch_of(&self, phrase: PhraseNumber) -> Option<EpochIndex> {
        if phrase < 1 {
            return None;
        }
        Some(self.first_phrase_start_epoch + (phrase - 1) * self.phrase_length)
    }

    /// Last epoch of `phrase`, or `None` for phrase numbers below 1.
    pub fn end_epoch_of(&self, phrase: PhraseNumber) -> Option<EpochIndex> {
        self.start_epoch_of(phrase)
            .map(|start| start + self.phrase_length - 1)
    }

    /// Inclusive epoch range of `phrase`.
    pub fn bounds(&self, phrase: PhraseNumber) -> Option<RangeInclusive<EpochIndex>> {
        let start = self.start_epoch_of(phrase)?;
        Some(start..=start + self.phrase_length - 1)
    }

    /// Whether `epoch` lies within the bounds of `phrase`.
    pub fn contains(&self, phrase: PhraseNumber, epoch: EpochIndex) -> bool {
        self.bounds(phrase)
            .map_or(false, |range| range.contains(&epoch))
    }

    /// Build a fresh `Phrase` (no start time yet) for a valid phrase number.
    pub fn phrase(&self, number: PhraseNumber) -> Option<Phrase> {
        let start_epoch = self.start_epoch_of(number)?;
        Some(Phrase {
            number,
            start_epoch,
            end_epoch: start_epoch + self.phrase_length - 1,
            start_time: None,
        })
    }
}

/// One accounting cycle of consecutive epochs.
///
/// Invariant: `end_epoch = start_epoch + phrase_length - 1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Phrase {
    /// Phrase number (>= 1).
    pub number: PhraseNumber,
    /// First epoch of the phrase.
    pub start_epoch: EpochIndex,
    /// Last epoch of the phrase (inclusive).
    pub end_epoch: EpochIndex,
    /// Advisory start time, set once when the first epoch of the phrase is observed.
    pub start_time: Option<DateTime<Utc>>,
}

impl Phrase {
    pub fn contains(&self, epoch: EpochIndex) -> bool {
        epoch >= self.start_epoch && epoch <= self.end_epoch
    }

    /// Set the start time if it has never been set. Returns `true` if it changed.
    pub fn set_start_time_once(&mut self, start_time: DateTime<Utc>) -> bool {
        if self.start_time.is_some() {
            return false;
        }
        self.start_time = Some(start_time);
        true
    }
}
