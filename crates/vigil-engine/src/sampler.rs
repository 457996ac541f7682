// crates/vigil-engine/src/sampler.rs
//
// AvailabilitySampler: turns roster contacts into reachability samples and
// feeds them into the current epoch's records.
//
// Signal resolution per roster contact, first match wins:
//   1. HTTP probe of the helper health-check URL (a failed probe is INACTIVE)
//   2. explicit `status` field on the entry
//   3. membership in the ledger's active set
// A contact with none of these is skipped with a warning.
//
// Collection does network I/O and touches no engine state; application is
// synchronous and only ever mutates the current epoch.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use vigil_core::{
    AvailabilityEvent, EventDetail, LedgerSource, ReachabilityProbe, SignalSource, ValidatorKey,
};

use crate::context::EngineContext;
use crate::roster::RosterContact;
use crate::transition::open_epoch_for;

/// One reachability reading for one validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub validator: ValidatorKey,
    pub reachable: bool,
    pub source: SignalSource,
    /// Set when the reading is INACTIVE because the probe itself failed.
    pub probe_failure: Option<String>,
}

pub struct AvailabilitySampler {
    ledger: Arc<dyn LedgerSource>,
    probe: Arc<dyn ReachabilityProbe>,
}

impl AvailabilitySampler {
    pub fn new(ledger: Arc<dyn LedgerSource>, probe: Arc<dyn ReachabilityProbe>) -> Self {
        Self { ledger, probe }
    }

    /// Fetch the active set. `None` if the ledger is unreachable.
    async fn active_set(&self) -> Option<HashSet<String>> {
        match self.ledger.active_validators().await {
            Ok(validators) => Some(validators.into_iter().collect()),
            Err(e) => {
                tracing::error!("Failed to fetch active validator set: {}", e);
                None
            }
        }
    }

    /// Collect one sample per resolvable contact.
    ///
    /// With `track_active_set`, members of the active set missing from the
    /// roster are sampled ACTIVE, and `known` validators outside the roster
    /// that have left the active set are sampled INACTIVE.
    pub async fn collect(
        &self,
        roster: &[RosterContact],
        known: &BTreeSet<ValidatorKey>,
        track_active_set: bool,
    ) -> Vec<Sample> {
        let needs_active_set = track_active_set
            || roster
                .iter()
                .any(|c| c.health_url.is_none() && c.status.is_none());
        let active = if needs_active_set {
            self.active_set().await
        } else {
            None
        };

        let mut samples = Vec::with_capacity(roster.len());
        for contact in roster {
            if let Some(sample) = self.sample_contact(contact, active.as_ref()).await {
                samples.push(sample);
            }
        }

        if let (true, Some(active)) = (track_active_set, active.as_ref()) {
            let in_roster: HashSet<&ValidatorKey> = roster.iter().map(|c| &c.key).collect();

            let mut extra: BTreeSet<ValidatorKey> = active
                .iter()
                .map(|address| ValidatorKey::new(address.as_str()))
                .filter(|key| !in_roster.contains(key))
                .collect();
            extra.extend(known.iter().filter(|k| !in_roster.contains(k)).cloned());

            for key in extra {
                let reachable = active.contains(key.as_str());
                samples.push(Sample {
                    validator: key,
                    reachable,
                    source: SignalSource::ActiveSet,
                    probe_failure: None,
                });
            }
        }

        samples
    }

    async fn sample_contact(
        &self,
        contact: &RosterContact,
        active: Option<&HashSet<String>>,
    ) -> Option<Sample> {
        let sample = |reachable: bool, source: SignalSource, probe_failure: Option<String>| Sample {
            validator: contact.key.clone(),
            reachable,
            source,
            probe_failure,
        };

        if let Some(url) = &contact.health_url {
            return Some(match self.probe.probe(url).await {
                Ok(reachable) => sample(reachable, SignalSource::HttpProbe, None),
                Err(e) => {
                    tracing::warn!("Probe of {} failed, counting as inactive: {}", contact.key, e);
                    sample(false, SignalSource::HttpProbe, Some(e.to_string()))
                }
            });
        }

        if let Some(status) = &contact.status {
            let reachable = status == "active";
            if !reachable && status != "inactive" {
                tracing::warn!(
                    "Roster status '{}' for {} is not active/inactive; counting as inactive",
                    status,
                    contact.key
                );
            }
            return Some(sample(reachable, SignalSource::RosterStatus, None));
        }

        match active {
            Some(active) => Some(sample(
                active.contains(contact.key.as_str()),
                SignalSource::ActiveSet,
                None,
            )),
            None => {
                tracing::warn!(
                    "No reachability signal for {} (no health-check address, no status, no active set); skipping",
                    contact.key
                );
                None
            }
        }
    }

    /// Apply samples to the current epoch. Returns transition events.
    ///
    /// Validators without a record in the current epoch are opened first.
    /// Nothing happens until the epoch loop has observed an epoch inside a
    /// phrase.
    pub fn apply(
        ctx: &mut EngineContext,
        samples: &[Sample],
        now: DateTime<Utc>,
    ) -> Vec<AvailabilityEvent> {
        let mut events = Vec::new();
        let Some(epoch) = ctx.last_known_epoch else {
            tracing::debug!("No epoch observed yet; dropping {} samples", samples.len());
            return events;
        };
        let phrase = ctx.calculator().phrase_of(epoch);
        if phrase < 1 {
            tracing::debug!("Epoch {} precedes the first phrase; dropping samples", epoch);
            return events;
        }

        for sample in samples {
            if ctx.state.record(&sample.validator, phrase, epoch).is_none() {
                tracing::info!("Opening epoch {} for newly tracked {}", epoch, sample.validator);
                open_epoch_for(ctx, &sample.validator, phrase, epoch, now, &mut events);
            }

            match ctx
                .state
                .observe(&sample.validator, phrase, epoch, sample.reachable, now)
            {
                Some(transition) => {
                    tracing::info!(
                        "{} {:?} -> {:?} in epoch {} via {:?}",
                        sample.validator,
                        transition.from,
                        transition.to,
                        epoch,
                        sample.source
                    );
                    events.push(AvailabilityEvent {
                        validator: sample.validator.clone(),
                        epoch,
                        phrase,
                        detail: EventDetail::Transition {
                            from: transition.from,
                            to: transition.to,
                            source: sample.source,
                            probe_failure: sample.probe_failure.clone(),
                        },
                    });
                }
                None => {
                    if let Some(record) = ctx.state.record(&sample.validator, phrase, epoch) {
                        tracing::debug!(
                            "{} still {:?} in epoch {}; {}s inactive so far",
                            sample.validator,
                            record.last_observed_state,
                            epoch,
                            record.accumulated_inactive_seconds
                        );
                    }
                }
            }
        }

        if !samples.is_empty() {
            ctx.persist_phrase(phrase);
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::EngineConfig;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use std::collections::HashMap;
    use uuid::Uuid;
    use vigil_core::{ObservedState, SessionProgress, VigilError};
    use vigil_store::SnapshotStore;

    struct FakeLedger {
        active: Vec<String>,
    }

    #[async_trait]
    impl LedgerSource for FakeLedger {
        async fn session_progress(&self) -> Result<SessionProgress, VigilError> {
            Err(VigilError::LedgerUnreachable("unused".to_string()))
        }
        async fn active_validators(&self) -> Result<Vec<String>, VigilError> {
            Ok(self.active.clone())
        }
    }

    struct FakeProbe {
        answers: HashMap<String, Result<bool, String>>,
    }

    #[async_trait]
    impl ReachabilityProbe for FakeProbe {
        async fn probe(&self, url: &str) -> Result<bool, VigilError> {
            match self.answers.get(url) {
                Some(Ok(b)) => Ok(*b),
                Some(Err(e)) => Err(VigilError::ProbeFailure(e.clone())),
                None => Err(VigilError::ProbeFailure("no route".to_string())),
            }
        }
    }

    fn contact(key: &str, url: Option<&str>, status: Option<&str>) -> RosterContact {
        RosterContact {
            key: ValidatorKey::from(key),
            health_url: url.map(str::to_string),
            status: status.map(str::to_string),
        }
    }

    fn sampler(active: &[&str], answers: &[(&str, Result<bool, String>)]) -> AvailabilitySampler {
        AvailabilitySampler::new(
            Arc::new(FakeLedger {
                active: active.iter().map(|s| s.to_string()).collect(),
            }),
            Arc::new(FakeProbe {
                answers: answers
                    .iter()
                    .map(|(u, r)| (u.to_string(), r.clone()))
                    .collect(),
            }),
        )
    }

    #[tokio::test]
    async fn test_signal_resolution_order() {
        let s = sampler(
            &["c"],
            &[("http://a/cek", Ok(true)), ("http://b/cek", Err("timeout".to_string()))],
        );
        let roster = vec![
            contact("a", Some("http://a/cek"), Some("inactive")),
            contact("b", Some("http://b/cek"), None),
            contact("c", None, None),
            contact("d", None, Some("paused")),
        ];
        let samples = s.collect(&roster, &BTreeSet::new(), false).await;

        assert_eq!(samples.len(), 4);
        assert!(samples[0].reachable);
        assert_eq!(samples[0].source, SignalSource::HttpProbe);
        assert!(!samples[1].reachable);
        assert!(samples[1].probe_failure.is_some());
        assert!(samples[2].reachable);
        assert_eq!(samples[2].source, SignalSource::ActiveSet);
        assert!(!samples[3].reachable);
        assert_eq!(samples[3].source, SignalSource::RosterStatus);
    }

    #[tokio::test]
    async fn test_active_set_tracking_adds_and_drops() {
        let s = sampler(&["x"], &[]);
        let known: BTreeSet<ValidatorKey> = [ValidatorKey::from("gone")].into_iter().collect();
        let samples = s.collect(&[], &known, true).await;

        let by_key: HashMap<&str, bool> = samples
            .iter()
            .map(|s| (s.validator.as_str(), s.reachable))
            .collect();
        assert_eq!(by_key.get("x"), Some(&true));
        assert_eq!(by_key.get("gone"), Some(&false));
    }

    fn context() -> EngineContext {
        let dir = std::env::temp_dir().join(format!("vigil_sampler_test_{}", Uuid::now_v7()));
        let config = EngineConfig {
            first_phrase_start_epoch: 100,
            phrase_length_epochs: 10,
            ..EngineConfig::default()
        };
        EngineContext::resume(config, SnapshotStore::open(dir).unwrap()).unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn sample(key: &str, reachable: bool) -> Sample {
        Sample {
            validator: ValidatorKey::from(key),
            reachable,
            source: SignalSource::HttpProbe,
            probe_failure: None,
        }
    }

    #[test]
    fn test_apply_without_epoch_is_noop() {
        let mut ctx = context();
        assert!(AvailabilitySampler::apply(&mut ctx, &[sample("a", false)], t0()).is_empty());
        assert_eq!(ctx.state().validator_count(), 0);
    }

    #[test]
    fn test_apply_opens_and_accumulates() {
        let mut ctx = context();
        ctx.last_known_epoch = Some(102);
        let key = ValidatorKey::from("a");

        let events = AvailabilitySampler::apply(&mut ctx, &[sample("a", false)], t0());
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0].detail,
            EventDetail::Transition { from: ObservedState::Active, to: ObservedState::Inactive, .. }
        ));

        let events = AvailabilitySampler::apply(&mut ctx, &[sample("a", false)], t0() + Duration::seconds(60));
        assert!(events.is_empty());
        let record = ctx.state().record(&key, 1, 102).unwrap();
        assert_eq!(record.accumulated_inactive_seconds, 60);
        assert_eq!(
            ctx.state().record(&key, 1, 100).unwrap().status,
            vigil_core::EpochStatus::SkipHistorical
        );
    }
}
