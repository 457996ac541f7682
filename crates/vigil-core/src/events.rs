// crates/vigil-core/src/events.rs
//
// Structured state-change events handed to notification collaborators.
//
// The engine never formats human-readable text; a collaborator subscribes
// to these and decides how (and whether) to tell anyone.

use serde::{Deserialize, Serialize};

use crate::record::{EpochStatus, ObservedState};
use crate::validator::ValidatorKey;
use crate::{EpochIndex, PhraseNumber};

/// Where a reachability sample came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    /// Membership in the ledger's active validator set.
    ActiveSet,
    /// HTTP probe of the validator's helper health-check address.
    HttpProbe,
    /// Explicit `status` field on the roster entry.
    RosterStatus,
}

/// Tag of an event, for consumers that only route on kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AvailabilityEventKind {
    Transition,
    Verdict,
}

/// Payload of an availability event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventDetail {
    /// The observed helper state of a running epoch changed.
    Transition {
        from: ObservedState,
        to: ObservedState,
        source: SignalSource,
        /// Probe error text when the INACTIVE reading came from a failed check.
        probe_failure: Option<String>,
    },
    /// An epoch was finalized.
    Verdict {
        status: EpochStatus,
        inactive_seconds: u64,
        threshold_seconds: u64,
    },
}

/// One state-change event for one validator in one epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityEvent {
    pub validator: ValidatorKey,
    pub epoch: EpochIndex,
    pub phrase: PhraseNumber,
    pub detail: EventDetail,
}

impl AvailabilityEvent {
    pub fn kind(&self) -> AvailabilityEventKind {
        match self.detail {
            EventDetail::Transition { .. } => AvailabilityEventKind::Transition,
            EventDetail::Verdict { .. } => AvailabilityEventKind::Verdict,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_detail() {
        let event = AvailabilityEvent {
            validator: ValidatorKey::from("hmpA"),
            epoch: 5460,
            phrase: 1,
            detail: EventDetail::Verdict {
                status: EpochStatus::Fail,
                inactive_seconds: 7300,
                threshold_seconds: 7200,
            },
        };
        assert_eq!(event.kind(), AvailabilityEventKind::Verdict);
    }

    #[test]
    fn test_detail_is_tagged_by_kind() {
        let detail = EventDetail::Transition {
            from: ObservedState::Active,
            to: ObservedState::Inactive,
            source: SignalSource::HttpProbe,
            probe_failure: None,
        };
        let value = serde_json::to_value(&detail).unwrap();
        assert_eq!(value["kind"], "TRANSITION");
        assert_eq!(value["source"], "http_probe");
    }
}
