// crates/vigil-engine/src/transition.rs
//
// EpochTransitionHandler: reacts to each epoch observation.
//
// Per observation of `current` with `last = last_known_epoch`:
//   1. current < last        -> ledger went backwards; log and ignore.
//   2. last < current        -> finalize every epoch in [last, current) in its
//                               own phrase, recording SKIP_HISTORICAL for
//                               tracked validators with no record; persist.
//   3. phrase_of(current) < 1 -> nothing to open; advance the cursor.
//   4. enter the phrase on first run or rollover (metadata file), finalize any
//      RUNNING record left in the previous phrase, then open
//      `current` for every tracked validator: backfill elapsed epochs as
//      SKIP_HISTORICAL, finalize stale RUNNING records, initialize RUNNING,
//      set the advisory epoch start time.
//   5. set the phrase start time once; persist the phrase and the cursor.
//
// Re-running the handler for the same epoch is a no-op apart from opening
// validators that joined the roster since the last run.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use vigil_core::record::Verdict;
use vigil_core::{AvailabilityEvent, EpochIndex, EventDetail, PhraseNumber, ValidatorKey};

use crate::context::EngineContext;
use crate::observer::EpochProgress;

/// What one observation changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransitionReport {
    /// Epochs finalized in this run, ascending.
    pub finalized_epochs: Vec<EpochIndex>,
    /// The epoch opened as RUNNING, if the current epoch lies in a phrase.
    pub opened_epoch: Option<EpochIndex>,
    /// Set when this run entered a phrase (first run or rollover).
    pub entered_phrase: Option<PhraseNumber>,
    /// Verdict events for every record finalized in this run.
    pub events: Vec<AvailabilityEvent>,
}

pub(crate) fn verdict_event(
    validator: &ValidatorKey,
    phrase: PhraseNumber,
    epoch: EpochIndex,
    verdict: Verdict,
) -> AvailabilityEvent {
    tracing::info!(
        "Epoch {} (phrase {}) for {}: {:?}, {}s inactive (threshold {}s)",
        epoch,
        phrase,
        validator,
        verdict.status,
        verdict.inactive_seconds,
        verdict.threshold_seconds
    );
    AvailabilityEvent {
        validator: validator.clone(),
        epoch,
        phrase,
        detail: EventDetail::Verdict {
            status: verdict.status,
            inactive_seconds: verdict.inactive_seconds,
            threshold_seconds: verdict.threshold_seconds,
        },
    }
}

/// Process one epoch observation.
pub fn handle_epoch_observation(
    ctx: &mut EngineContext,
    progress: &EpochProgress,
    roster: &BTreeSet<ValidatorKey>,
    now: DateTime<Utc>,
) -> TransitionReport {
    let current = progress.epoch;
    let mut report = TransitionReport::default();
    ctx.latest_progress = Some(progress.clone());

    match ctx.last_known_epoch {
        Some(last) if current < last => {
            tracing::warn!(
                "Ledger reports epoch {} below last known epoch {}; ignoring",
                current,
                last
            );
            return report;
        }
        Some(last) if last < current => {
            tracing::info!("Epoch advanced from {} to {}", last, current);
            finalize_elapsed(ctx, last, current, roster, now, &mut report);
        }
        _ => {}
    }

    let phrase_no = ctx.calculator().phrase_of(current);
    if phrase_no < 1 {
        tracing::info!(
            "Epoch {} precedes the first phrase (starts at epoch {})",
            current,
            ctx.calculator().first_phrase_start_epoch()
        );
        ctx.last_known_epoch = Some(current);
        ctx.persist_cursor(now);
        return report;
    }

    report.entered_phrase = enter_phrase(ctx, phrase_no);
    if report.entered_phrase.is_some() && phrase_no > 1 {
        sweep_phrase(ctx, phrase_no - 1, now, &mut report.events);
    }
    ctx.ensure_phrase_loaded(phrase_no);

    let nominal = ctx.config.nominal_epoch_duration_secs;
    let phrase_len = ctx.config.phrase_length_epochs;
    let epoch_start = progress.estimate_epoch_start(current, nominal, phrase_len, now);

    for validator in ctx.tracked_in_phrase(phrase_no, roster) {
        open_epoch_for(ctx, &validator, phrase_no, current, now, &mut report.events);
        if let Some(start) = epoch_start {
            ctx.state
                .set_epoch_start_time_if_unset(&validator, phrase_no, current, start);
        }
    }
    report.opened_epoch = Some(current);

    if let Some(phrase) = ctx.current_phrase.as_mut() {
        if phrase.start_time.is_none() {
            let estimate = if current == phrase.start_epoch {
                epoch_start
            } else {
                progress.estimate_epoch_start(phrase.start_epoch, nominal, phrase_len, now)
            };
            if let Some(start) = estimate {
                if phrase.set_start_time_once(start) {
                    tracing::info!("Phrase {} start time set to {}", phrase.number, start);
                    if let Err(e) = ctx.store.save_phrase_metadata(phrase) {
                        tracing::error!("Failed to save phrase {} metadata: {}", phrase.number, e);
                    }
                }
            }
        }
        if let Some(start) = phrase.start_time {
            ctx.state.set_phrase_start_time(phrase_no, start);
        }
    }

    ctx.persist_phrase(phrase_no);
    ctx.last_known_epoch = Some(current);
    ctx.persist_cursor(now);
    report
}

/// Finalize every epoch in `[from, to)` within its own phrase.
fn finalize_elapsed(
    ctx: &mut EngineContext,
    from: EpochIndex,
    to: EpochIndex,
    roster: &BTreeSet<ValidatorKey>,
    now: DateTime<Utc>,
    report: &mut TransitionReport,
) {
    let calculator = *ctx.calculator();
    let threshold = ctx.config.epoch_fail_threshold_secs;
    let mut touched = BTreeSet::new();

    for epoch in from..to {
        let phrase = calculator.phrase_of(epoch);
        if phrase < 1 || !calculator.contains(phrase, epoch) {
            continue;
        }
        ctx.ensure_phrase_loaded(phrase);

        for validator in ctx.tracked_in_phrase(phrase, roster) {
            if ctx.state.record(&validator, phrase, epoch).is_none() {
                ctx.state.initialize(&validator, phrase, epoch, now, true);
            }
            if let Some(verdict) = ctx.state.finalize(&validator, phrase, epoch, now, threshold) {
                report
                    .events
                    .push(verdict_event(&validator, phrase, epoch, verdict));
            }
        }

        touched.insert(phrase);
        report.finalized_epochs.push(epoch);
    }

    for phrase in touched {
        ctx.persist_phrase(phrase);
    }
}

/// Finalize every RUNNING record left in a phrase that is no longer current.
/// Normally a no-op; it matters when the cursor was lost across a rollover.
fn sweep_phrase(
    ctx: &mut EngineContext,
    phrase: PhraseNumber,
    now: DateTime<Utc>,
    events: &mut Vec<AvailabilityEvent>,
) {
    ctx.ensure_phrase_loaded(phrase);
    let threshold = ctx.config.epoch_fail_threshold_secs;
    let mut swept = 0;

    for validator in ctx.state.validators_in_phrase(phrase) {
        for stale in ctx.state.running_epochs(&validator, phrase) {
            tracing::warn!(
                "Finalizing RUNNING epoch {} for {} left in phrase {}",
                stale,
                validator,
                phrase
            );
            if let Some(verdict) = ctx.state.finalize(&validator, phrase, stale, now, threshold) {
                events.push(verdict_event(&validator, phrase, stale, verdict));
                swept += 1;
            }
        }
    }

    if swept > 0 {
        ctx.persist_phrase(phrase);
    }
}

/// Make `phrase_no` the current phrase. Returns it if this was a change.
fn enter_phrase(ctx: &mut EngineContext, phrase_no: PhraseNumber) -> Option<PhraseNumber> {
    let previous = ctx.current_phrase.as_ref().map(|p| p.number);
    if previous == Some(phrase_no) {
        return None;
    }

    let phrase = match ctx.store.load_phrase_metadata(phrase_no) {
        Some(phrase) => phrase,
        None => {
            let phrase = ctx.calculator().phrase(phrase_no)?;
            if let Err(e) = ctx.store.save_phrase_metadata(&phrase) {
                tracing::error!("Failed to save phrase {} metadata: {}", phrase_no, e);
            }
            phrase
        }
    };

    match previous {
        Some(prev) => tracing::info!(
            "Phrase rollover: {} -> {} (epochs {}-{})",
            prev,
            phrase.number,
            phrase.start_epoch,
            phrase.end_epoch
        ),
        None => tracing::info!(
            "Entered phrase {} (epochs {}-{})",
            phrase.number,
            phrase.start_epoch,
            phrase.end_epoch
        ),
    }

    ctx.current_phrase = Some(phrase);
    Some(phrase_no)
}

/// Open `epoch` as RUNNING for one validator.
///
/// A validator seen for the first time in this epoch gets SKIP_HISTORICAL
/// records for the phrase's earlier epochs it has no record for. Any other
/// RUNNING record it holds in the phrase is stale and gets finalized.
pub(crate) fn open_epoch_for(
    ctx: &mut EngineContext,
    validator: &ValidatorKey,
    phrase: PhraseNumber,
    epoch: EpochIndex,
    now: DateTime<Utc>,
    events: &mut Vec<AvailabilityEvent>,
) {
    if ctx.state.record(validator, phrase, epoch).is_none() {
        if let Some(start) = ctx.calculator().start_epoch_of(phrase) {
            let mut backfilled = 0;
            for elapsed in start..epoch {
                if ctx.state.record(validator, phrase, elapsed).is_none()
                    && ctx.state.initialize(validator, phrase, elapsed, now, true)
                {
                    backfilled += 1;
                }
            }
            if backfilled > 0 {
                tracing::debug!(
                    "Backfilled {} historical epochs for {} in phrase {}",
                    backfilled,
                    validator,
                    phrase
                );
            }
        }
    }

    let threshold = ctx.config.epoch_fail_threshold_secs;
    for stale in ctx.state.running_epochs(validator, phrase) {
        if stale == epoch {
            continue;
        }
        tracing::warn!(
            "Finalizing stale RUNNING epoch {} for {} (current is {})",
            stale,
            validator,
            epoch
        );
        if let Some(verdict) = ctx.state.finalize(validator, phrase, stale, now, threshold) {
            events.push(verdict_event(validator, phrase, stale, verdict));
        }
    }

    if ctx.state.initialize(validator, phrase, epoch, now, false) {
        tracing::debug!("Opened epoch {} for {}", epoch, validator);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::EngineConfig;
    use chrono::{Duration, TimeZone};
    use uuid::Uuid;
    use vigil_core::{EpochStatus, SessionProgress};
    use vigil_store::SnapshotStore;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn context() -> EngineContext {
        context_at(std::env::temp_dir().join(format!("vigil_transition_test_{}", Uuid::now_v7())))
    }

    fn context_at(dir: std::path::PathBuf) -> EngineContext {
        let config = EngineConfig {
            first_phrase_start_epoch: 100,
            phrase_length_epochs: 10,
            ..EngineConfig::default()
        };
        EngineContext::resume(config, SnapshotStore::open(dir).unwrap()).unwrap()
    }

    fn observe(epoch: u64, now: DateTime<Utc>) -> EpochProgress {
        EpochProgress::from_session(
            SessionProgress {
                current_index: epoch,
                session_length: 2400,
                session_progress: 1200,
            },
            6,
            now,
        )
        .unwrap()
    }

    fn roster(keys: &[&str]) -> BTreeSet<ValidatorKey> {
        keys.iter().map(|k| ValidatorKey::from(*k)).collect()
    }

    #[test]
    fn test_first_run_mid_phrase_backfills_history() {
        let mut ctx = context();
        let key = ValidatorKey::from("a");
        let report = handle_epoch_observation(&mut ctx, &observe(103, t0()), &roster(&["a"]), t0());

        assert!(report.finalized_epochs.is_empty());
        assert_eq!(report.entered_phrase, Some(1));
        assert_eq!(report.opened_epoch, Some(103));
        for e in 100..103 {
            assert_eq!(ctx.state().record(&key, 1, e).unwrap().status, EpochStatus::SkipHistorical);
        }
        assert_eq!(ctx.state().record(&key, 1, 103).unwrap().status, EpochStatus::Running);
        assert!(ctx.state().record(&key, 1, 103).unwrap().epoch_start_time.is_some());
        assert_eq!(ctx.last_known_epoch(), Some(103));
        assert!(ctx.current_phrase().unwrap().start_time.is_some());
    }

    #[test]
    fn test_multi_epoch_jump_finalizes_each_epoch() {
        let mut ctx = context();
        let key = ValidatorKey::from("a");
        let r = roster(&["a"]);
        handle_epoch_observation(&mut ctx, &observe(100, t0()), &r, t0());

        let later = t0() + Duration::hours(12);
        let report = handle_epoch_observation(&mut ctx, &observe(103, later), &r, later);

        assert_eq!(report.finalized_epochs, vec![100, 101, 102]);
        assert_eq!(ctx.state().record(&key, 1, 100).unwrap().status, EpochStatus::Pass);
        for e in [101, 102] {
            assert_eq!(ctx.state().record(&key, 1, e).unwrap().status, EpochStatus::SkipHistorical);
        }
        assert_eq!(ctx.state().running_epochs(&key, 1), vec![103]);
        assert_eq!(ctx.last_known_epoch(), Some(103));
        assert_eq!(report.events.len(), 1);
    }

    #[test]
    fn test_same_epoch_is_idempotent() {
        let mut ctx = context();
        let key = ValidatorKey::from("a");
        let r = roster(&["a"]);
        handle_epoch_observation(&mut ctx, &observe(105, t0()), &r, t0());
        ctx.state.observe(&key, 1, 105, false, t0());
        let before = ctx.state().record(&key, 1, 105).cloned();

        let report = handle_epoch_observation(&mut ctx, &observe(105, t0()), &r, t0() + Duration::minutes(1));
        assert!(report.finalized_epochs.is_empty());
        assert_eq!(report.entered_phrase, None);
        assert_eq!(ctx.state().record(&key, 1, 105).cloned(), before);
    }

    #[test]
    fn test_backwards_epoch_ignored() {
        let mut ctx = context();
        let r = roster(&["a"]);
        handle_epoch_observation(&mut ctx, &observe(105, t0()), &r, t0());
        let report = handle_epoch_observation(&mut ctx, &observe(104, t0()), &r, t0());
        assert_eq!(report, TransitionReport::default());
        assert_eq!(ctx.last_known_epoch(), Some(105));
    }

    #[test]
    fn test_phrase_rollover_finalizes_old_phrase() {
        let mut ctx = context();
        let key = ValidatorKey::from("a");
        let r = roster(&["a"]);
        handle_epoch_observation(&mut ctx, &observe(109, t0()), &r, t0());
        ctx.state.observe(&key, 1, 109, false, t0());

        let later = t0() + Duration::seconds(7300);
        let report = handle_epoch_observation(&mut ctx, &observe(110, later), &r, later);

        assert_eq!(report.entered_phrase, Some(2));
        let old = ctx.state().record(&key, 1, 109).unwrap();
        assert_eq!(old.status, EpochStatus::Fail);
        assert!(old.fail_threshold_exceeded);
        assert_eq!(ctx.state().record(&key, 2, 110).unwrap().status, EpochStatus::Running);
        assert!(ctx.store().load_phrase_metadata(2).is_some());
    }

    #[test]
    fn test_before_first_phrase_only_moves_cursor() {
        let mut ctx = context();
        let report = handle_epoch_observation(&mut ctx, &observe(42, t0()), &roster(&["a"]), t0());
        assert_eq!(report.opened_epoch, None);
        assert_eq!(ctx.last_known_epoch(), Some(42));
        assert_eq!(ctx.state().validator_count(), 0);
    }

    #[test]
    fn test_stale_running_record_swept() {
        let mut ctx = context();
        let key = ValidatorKey::from("a");
        // Simulate a lost cursor: epoch 101 RUNNING but nothing remembers it.
        ctx.state.initialize(&key, 1, 101, t0(), false);

        let report = handle_epoch_observation(&mut ctx, &observe(104, t0()), &roster(&["a"]), t0());
        assert_eq!(ctx.state().record(&key, 1, 101).unwrap().status, EpochStatus::Pass);
        assert_eq!(ctx.state().running_epochs(&key, 1), vec![104]);
        assert_eq!(report.events.len(), 1);
    }

    #[test]
    fn test_lost_cursor_across_rollover_sweeps_previous_phrase() {
        let dir = std::env::temp_dir().join(format!("vigil_transition_test_{}", Uuid::now_v7()));
        let key = ValidatorKey::from("a");
        let r = roster(&["a"]);
        {
            let mut ctx = context_at(dir.clone());
            handle_epoch_observation(&mut ctx, &observe(105, t0()), &r, t0());
            std::fs::remove_file(ctx.store().cursor_path()).unwrap();
        }

        let later = t0() + Duration::hours(30);
        let mut ctx = context_at(dir);
        assert_eq!(ctx.last_known_epoch(), None);
        let report = handle_epoch_observation(&mut ctx, &observe(112, later), &r, later);

        assert_eq!(report.entered_phrase, Some(2));
        assert!(report.finalized_epochs.is_empty());
        assert!(report.events.iter().any(|e| e.epoch == 105 && e.phrase == 1));
        assert!(ctx.state().running_epochs(&key, 1).is_empty());

        let on_disk = ctx.store().load(1);
        let record = &on_disk[&key].epochs[&105];
        assert_ne!(record.status, EpochStatus::Running);
        assert_eq!(ctx.state().running_epochs(&key, 2), vec![112]);
    }
}
