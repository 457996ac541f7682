// crates/vigil-engine/src/observer.rs
//
// ChainEpochObserver: polls the ledger for the current epoch and its progress.
//
// Start times are estimated from block counts and are advisory only.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use vigil_core::{EpochIndex, LedgerSource, SessionProgress, VigilError};

/// How far in the future a current-epoch start estimate may land before it
/// is considered implausible.
const START_ESTIMATE_SLACK_SECS: i64 = 5 * 60;

/// One observation of the ledger's current epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochProgress {
    pub epoch: EpochIndex,
    pub session_length: u64,
    pub session_progress: u64,
    pub remaining_blocks: u64,
    /// Progress through the epoch, 0.0 to 100.0.
    pub percentage: f64,
    pub estimated_end: DateTime<Utc>,
    pub observed_at: DateTime<Utc>,
    avg_block_time_secs: u64,
}

/// `blocks * secs_per_block` as a duration, or `None` if it does not fit.
fn block_span(blocks: u64, secs_per_block: u64) -> Option<Duration> {
    let secs = blocks.checked_mul(secs_per_block)?;
    Duration::try_seconds(i64::try_from(secs).ok()?)
}

impl EpochProgress {
    /// Derive progress detail from a ledger session report.
    ///
    /// Fails with `LedgerUnreachable` when the reported block counts cannot
    /// be turned into a time estimate; such a response is treated like no
    /// response at all.
    pub fn from_session(
        session: SessionProgress,
        avg_block_time_secs: u64,
        now: DateTime<Utc>,
    ) -> Result<Self, VigilError> {
        let remaining_blocks = session.session_length.saturating_sub(session.session_progress);
        let percentage = if session.session_length == 0 {
            0.0
        } else {
            (session.session_progress as f64 / session.session_length as f64 * 100.0).min(100.0)
        };
        let estimated_end = block_span(remaining_blocks, avg_block_time_secs)
            .and_then(|left| now.checked_add_signed(left))
            .ok_or_else(|| {
                VigilError::LedgerUnreachable(format!(
                    "implausible session report: {}/{} blocks in epoch {}",
                    session.session_progress, session.session_length, session.current_index
                ))
            })?;

        Ok(Self {
            epoch: session.current_index,
            session_length: session.session_length,
            session_progress: session.session_progress,
            remaining_blocks,
            percentage,
            estimated_end,
            observed_at: now,
            avg_block_time_secs,
        })
    }

    /// Time left until the estimated end of the epoch, never negative.
    pub fn eta(&self, now: DateTime<Utc>) -> Duration {
        (self.estimated_end - now).max(Duration::zero())
    }

    /// Epoch length derived from the session length, or `nominal_secs`
    /// when the ledger reports a zero-length session.
    fn epoch_duration(&self, nominal_secs: u64) -> Option<Duration> {
        let from_blocks = block_span(self.session_length, self.avg_block_time_secs)?;
        if from_blocks == Duration::zero() {
            block_span(nominal_secs, 1)
        } else {
            Some(from_blocks)
        }
    }

    /// Best-effort start time of `epoch`, relative to this observation.
    ///
    /// For the observed epoch: `estimated_end - nominal_epoch_duration`,
    /// unless that lands more than five minutes in the future. Otherwise the
    /// start is extrapolated linearly from the observed epoch's start, and
    /// rejected unless it falls within
    /// `[now - 2 * phrase_length * epoch_duration, now + 2 * epoch_duration]`.
    /// Estimates that overflow the time range are rejected too.
    pub fn estimate_epoch_start(
        &self,
        epoch: EpochIndex,
        nominal_epoch_duration_secs: u64,
        phrase_length_epochs: u64,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        if epoch == self.epoch {
            let candidate = block_span(nominal_epoch_duration_secs, 1)
                .and_then(|nominal| self.estimated_end.checked_sub_signed(nominal));
            let slack = Duration::seconds(START_ESTIMATE_SLACK_SECS);
            if let Some(candidate) = candidate.filter(|c| *c <= now + slack) {
                return Some(candidate);
            }
        }

        let epoch_duration = self.epoch_duration(nominal_epoch_duration_secs)?;
        let current_start = self
            .observed_at
            .checked_sub_signed(block_span(self.session_progress, self.avg_block_time_secs)?)?;
        let offset = i64::try_from(epoch)
            .ok()?
            .checked_sub(i64::try_from(self.epoch).ok()?)?;
        let estimate =
            current_start.checked_add_signed(epoch_duration.checked_mul(i32::try_from(offset).ok()?)?)?;

        let window = i32::try_from(phrase_length_epochs.checked_mul(2)?).ok()?;
        let lower = now.checked_sub_signed(epoch_duration.checked_mul(window)?)?;
        let upper = now.checked_add_signed(epoch_duration.checked_mul(2)?)?;
        if estimate >= lower && estimate <= upper {
            Some(estimate)
        } else {
            tracing::debug!(
                "Discarding implausible start estimate {} for epoch {}",
                estimate,
                epoch
            );
            None
        }
    }
}

/// Polls a `LedgerSource` for epoch progress.
pub struct ChainEpochObserver {
    ledger: Arc<dyn LedgerSource>,
    avg_block_time_secs: u64,
}

impl ChainEpochObserver {
    pub fn new(ledger: Arc<dyn LedgerSource>, avg_block_time_secs: u64) -> Self {
        Self {
            ledger,
            avg_block_time_secs,
        }
    }

    /// Poll the ledger once.
    ///
    /// Returns `None` when the ledger is unreachable or its report is
    /// unusable; the caller reschedules without touching state.
    pub async fn poll(&self, now: DateTime<Utc>) -> Option<EpochProgress> {
        let observed = self
            .ledger
            .session_progress()
            .await
            .and_then(|session| EpochProgress::from_session(session, self.avg_block_time_secs, now));
        match observed {
            Ok(progress) => {
                tracing::trace!(
                    "Observed epoch {} at block {}/{}",
                    progress.epoch,
                    progress.session_progress,
                    progress.session_length
                );
                Some(progress)
            }
            Err(e) => {
                tracing::error!("Epoch observation failed: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn progress(epoch: u64, length: u64, done: u64) -> EpochProgress {
        EpochProgress::from_session(
            SessionProgress {
                current_index: epoch,
                session_length: length,
                session_progress: done,
            },
            6,
            t0(),
        )
        .unwrap()
    }

    #[test]
    fn test_progress_detail() {
        let p = progress(5460, 2400, 600);
        assert_eq!(p.remaining_blocks, 1800);
        assert!((p.percentage - 25.0).abs() < f64::EPSILON);
        assert_eq!(p.estimated_end, t0() + Duration::seconds(10_800));
        assert_eq!(p.eta(t0()), Duration::seconds(10_800));
    }

    #[test]
    fn test_current_epoch_start_from_nominal_duration() {
        let p = progress(5460, 2400, 600);
        let start = p.estimate_epoch_start(5460, 14_400, 84, t0()).unwrap();
        assert_eq!(start, t0() - Duration::seconds(3600));
    }

    #[test]
    fn test_current_epoch_falls_back_to_extrapolation() {
        // Session longer than nominal: end - nominal lands well in the future.
        let p = progress(5460, 4800, 100);
        let start = p.estimate_epoch_start(5460, 14_400, 84, t0()).unwrap();
        assert_eq!(start, t0() - Duration::seconds(600));
    }

    #[test]
    fn test_neighbour_epochs_extrapolated() {
        let p = progress(5460, 2400, 600);
        let prev = p.estimate_epoch_start(5459, 14_400, 84, t0()).unwrap();
        assert_eq!(prev, t0() - Duration::seconds(3600 + 14_400));
        let next = p.estimate_epoch_start(5461, 14_400, 84, t0()).unwrap();
        assert_eq!(next, t0() + Duration::seconds(10_800));
    }

    #[test]
    fn test_far_epochs_rejected() {
        let p = progress(5460, 2400, 600);
        assert!(p.estimate_epoch_start(5460 + 10, 14_400, 84, t0()).is_none());
        assert!(p.estimate_epoch_start(5460 - 200, 14_400, 84, t0()).is_none());
    }

    #[test]
    fn test_oversized_session_is_rejected() {
        let result = EpochProgress::from_session(
            SessionProgress {
                current_index: 5460,
                session_length: 1 << 60,
                session_progress: 0,
            },
            6,
            t0(),
        );
        assert!(matches!(result, Err(VigilError::LedgerUnreachable(_))));
    }

    #[test]
    fn test_extreme_epoch_distance_yields_no_estimate() {
        let p = progress(5460, 2400, 600);
        assert!(p.estimate_epoch_start(u64::MAX, 14_400, 84, t0()).is_none());
        assert!(p.estimate_epoch_start(5459, u64::MAX, u64::MAX, t0()).is_none());
        assert!(p.estimate_epoch_start(5460, u64::MAX, 84, t0()).is_some());
    }

    struct DownLedger;

    #[async_trait]
    impl LedgerSource for DownLedger {
        async fn session_progress(&self) -> Result<SessionProgress, VigilError> {
            Err(VigilError::LedgerUnreachable("connection refused".to_string()))
        }
        async fn active_validators(&self) -> Result<Vec<String>, VigilError> {
            Err(VigilError::LedgerUnreachable("connection refused".to_string()))
        }
    }

    struct GarbledLedger;

    #[async_trait]
    impl LedgerSource for GarbledLedger {
        async fn session_progress(&self) -> Result<SessionProgress, VigilError> {
            Ok(SessionProgress {
                current_index: 5460,
                session_length: u64::MAX,
                session_progress: 1,
            })
        }
        async fn active_validators(&self) -> Result<Vec<String>, VigilError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_garbled_session_yields_none() {
        let observer = ChainEpochObserver::new(Arc::new(GarbledLedger), 6);
        assert!(observer.poll(t0()).await.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_ledger_yields_none() {
        let observer = ChainEpochObserver::new(Arc::new(DownLedger), 6);
        assert!(observer.poll(t0()).await.is_none());
    }
}
