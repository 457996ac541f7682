// crates/vigil-core/src/record.rs
//
// Per-(validator, phrase, epoch) availability record and its state machine.
//
// Status lifecycle:
//
//   (none) --initialize--> Running --finalize--> Pass | Fail
//   (none) --initialize(historical)--> SkipHistorical
//   SkipHistorical <--initialize--> Running   (conflicting initialize calls)
//
// Observed helper state while Running:
//
//   Unknown --> Active | Inactive,   then Active <--> Inactive per sample.
//
// Every sample on a Running record accumulates first: if the previous
// observed state was Inactive, the seconds since the last state change are
// added to the counter; the change timestamp is then refreshed to `now`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::EpochIndex;

/// Status of one epoch for one validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EpochStatus {
    /// The epoch is the ledger's current epoch and is being sampled.
    Running,
    /// Finalized with accumulated downtime at or below the threshold.
    Pass,
    /// Finalized with accumulated downtime above the threshold.
    Fail,
    /// The epoch elapsed without ever being sampled. Never evaluated.
    SkipHistorical,
}

impl EpochStatus {
    /// Terminal records are immune to accumulation and finalization.
    pub fn is_terminal(&self) -> bool {
        match self {
            EpochStatus::Running => false,
            EpochStatus::Pass | EpochStatus::Fail | EpochStatus::SkipHistorical => true,
        }
    }
}

/// Last observed helper reachability for a running record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObservedState {
    Unknown,
    Active,
    Inactive,
}

impl ObservedState {
    pub fn from_reachable(reachable: bool) -> Self {
        if reachable {
            ObservedState::Active
        } else {
            ObservedState::Inactive
        }
    }
}

/// A change of observed state produced by a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: ObservedState,
    pub to: ObservedState,
    /// Seconds added to the inactive counter by the accumulation that preceded the change.
    pub accumulated_seconds: u64,
}

/// Outcome of finalizing a running record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub status: EpochStatus,
    pub inactive_seconds: u64,
    pub threshold_seconds: u64,
}

/// Availability accounting for one validator in one epoch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpochRecord {
    pub epoch: EpochIndex,
    pub status: EpochStatus,
    /// Non-decreasing while `status == Running`.
    pub accumulated_inactive_seconds: u64,
    pub last_observed_state: ObservedState,
    pub last_state_change_time: Option<DateTime<Utc>>,
    /// Advisory estimate; never ground truth.
    pub epoch_start_time: Option<DateTime<Utc>>,
    pub fail_threshold_exceeded: bool,
}

impl EpochRecord {
    /// A freshly opened record for the ledger's current epoch.
    pub fn running(epoch: EpochIndex, now: DateTime<Utc>) -> Self {
        Self {
            epoch,
            status: EpochStatus::Running,
            accumulated_inactive_seconds: 0,
            last_observed_state: ObservedState::Active,
            last_state_change_time: Some(now),
            epoch_start_time: None,
            fail_threshold_exceeded: false,
        }
    }

    /// A record for an epoch that elapsed without being sampled.
    pub fn historical(epoch: EpochIndex) -> Self {
        Self {
            epoch,
            status: EpochStatus::SkipHistorical,
            accumulated_inactive_seconds: 0,
            last_observed_state: ObservedState::Unknown,
            last_state_change_time: None,
            epoch_start_time: None,
            fail_threshold_exceeded: false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == EpochStatus::Running
    }

    /// Re-initialize an existing record.
    ///
    /// Only flips `SkipHistorical` <-> `Running` on conflicting calls; the
    /// inactive counter is never reset. Returns `true` if the record changed.
    pub fn reinitialize(&mut self, historical: bool, now: DateTime<Utc>) -> bool {
        match (self.status, historical) {
            (EpochStatus::SkipHistorical, false) => {
                self.status = EpochStatus::Running;
                self.last_observed_state = ObservedState::Active;
                self.last_state_change_time = Some(now);
                true
            }
            (EpochStatus::Running, true) => {
                self.status = EpochStatus::SkipHistorical;
                self.last_observed_state = ObservedState::Unknown;
                self.last_state_change_time = None;
                true
            }
            _ => false,
        }
    }

    /// Add the inactive time since the last state change, then refresh the
    /// change timestamp. No-op unless the record is running.
    ///
    /// Returns the number of seconds added.
    pub fn accumulate(&mut self, now: DateTime<Utc>) -> u64 {
        if !self.is_running() {
            return 0;
        }

        let mut added = 0;
        if self.last_observed_state == ObservedState::Inactive {
            if let Some(since) = self.last_state_change_time {
                let elapsed_ms = (now - since).num_milliseconds();
                let seconds = (elapsed_ms as f64 / 1000.0).round();
                if seconds > 0.0 {
                    added = seconds as u64;
                    self.accumulated_inactive_seconds += added;
                }
            }
        }
        self.last_state_change_time = Some(now);
        added
    }

    /// Apply one reachability sample.
    ///
    /// Returns the transition if the observed state changed. Samples on
    /// terminal records are ignored.
    pub fn observe(&mut self, reachable: bool, now: DateTime<Utc>) -> Option<Transition> {
        if !self.is_running() {
            return None;
        }

        let from = self.last_observed_state;
        let to = ObservedState::from_reachable(reachable);
        let accumulated_seconds = self.accumulate(now);
        self.last_observed_state = to;

        (from != to).then_some(Transition {
            from,
            to,
            accumulated_seconds,
        })
    }

    /// Close the epoch: capture a still-inactive tail, then classify.
    ///
    /// No-op (returns `None`) on terminal or historical records, which makes
    /// repeated calls idempotent.
    pub fn finalize(&mut self, now: DateTime<Utc>, threshold_seconds: u64) -> Option<Verdict> {
        if self.status.is_terminal() {
            return None;
        }

        self.accumulate(now);
        let failed = self.accumulated_inactive_seconds > threshold_seconds;
        self.status = if failed {
            EpochStatus::Fail
        } else {
            EpochStatus::Pass
        };
        self.fail_threshold_exceeded = failed;
        self.last_observed_state = ObservedState::Unknown;
        self.last_state_change_time = None;

        Some(Verdict {
            status: self.status,
            inactive_seconds: self.accumulated_inactive_seconds,
            threshold_seconds,
        })
    }
}
