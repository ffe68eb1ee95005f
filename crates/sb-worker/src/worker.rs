use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use sb_store::{LockConfig, ScheduleStore};
use sb_types::{
    ClaimedTrial, LockError, SbError, SbResult, ScheduleError, TrialStatus, WorkerError,
};

use crate::runner::{trial_out_dir, TrialRunner};
use crate::scheduler::{next_trial, ClaimOutcome};

/// Worker loop settings.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub lock: LockConfig,
    /// Sleep between attempts while an earlier round finishes.
    pub wait_backoff: Duration,
    /// Retries before giving up waiting. Lock timeouts during the claim
    /// phase draw from the same budget.
    pub max_repeats: u32,
    /// Identity recorded in the lock sentinel.
    pub worker_id: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            lock: LockConfig::default(),
            wait_backoff: Duration::from_secs(60),
            max_repeats: 4,
            worker_id: format!("worker-{}", Uuid::new_v4()),
        }
    }
}

/// Terminal outcome of one worker invocation. All three are normal exits,
/// not errors.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerOutcome {
    /// A trial was claimed, executed and its metric recorded.
    RanTrial {
        trial_index: usize,
        round: usize,
        metric: f64,
    },
    /// Every trial has reached a terminal outcome; nothing left to run.
    BracketComplete,
    /// Retries exhausted while earlier rounds were still in flight.
    GaveUpWaiting,
}

/// One worker process's orchestration: claim under the lock, run the trial
/// body unlocked, record the result under the lock again.
///
/// The schedule is only ever touched between `acquire` and `release`; each
/// load-modify-save is one atomic unit with respect to every other worker.
pub struct Worker<R: TrialRunner> {
    store: ScheduleStore,
    out_path: PathBuf,
    runner: R,
    config: WorkerConfig,
}

impl<R: TrialRunner> Worker<R> {
    pub fn new(store: ScheduleStore, out_path: PathBuf, runner: R, config: WorkerConfig) -> Self {
        Self {
            store,
            out_path,
            runner,
            config,
        }
    }

    /// Run one worker invocation to a terminal outcome.
    pub fn run(&mut self) -> SbResult<WorkerOutcome> {
        let mut attempts = 0u32;
        loop {
            match self.try_claim() {
                Ok(ClaimOutcome::Claimed(claim)) => return self.execute_and_record(claim),
                Ok(ClaimOutcome::Done) => {
                    info!("Bracket complete, all trials finished or eliminated");
                    return Ok(WorkerOutcome::BracketComplete);
                }
                Ok(ClaimOutcome::WaitForStragglers { round, in_progress }) => {
                    warn!(
                        round,
                        stragglers = ?in_progress,
                        "Earlier round still running; backing off"
                    );
                }
                Err(SbError::Lock(error @ LockError::Timeout { .. })) => {
                    warn!(%error, "Lock acquisition timed out; backing off");
                }
                Err(other) => return Err(other),
            }

            if attempts >= self.config.max_repeats {
                info!(attempts, "Gave up waiting for the bracket to advance");
                return Ok(WorkerOutcome::GaveUpWaiting);
            }
            attempts += 1;
            std::thread::sleep(self.config.wait_backoff);
        }
    }

    /// One claim cycle. The guard's scope covers load, scheduling and save,
    /// so the lock is released on every exit path, error or not.
    fn try_claim(&self) -> SbResult<ClaimOutcome> {
        let guard = self
            .store
            .lock()
            .acquire(&self.config.worker_id, &self.config.lock)?;

        let mut table = self.store.load(&guard)?;
        let outcome = next_trial(&mut table, self.store.bracket());
        if let ClaimOutcome::Claimed(_) = &outcome {
            self.store.save(&table, &guard)?;
        }

        guard.release();
        Ok(outcome)
    }

    fn execute_and_record(&mut self, claim: ClaimedTrial) -> SbResult<WorkerOutcome> {
        let out_dir = trial_out_dir(
            &self.out_path,
            self.store.bracket().bracket,
            claim.trial_index,
            claim.round,
        );
        std::fs::create_dir_all(&out_dir)?;

        info!(
            trial = claim.trial_index,
            round = claim.round,
            out_dir = %out_dir.display(),
            "Beginning trial"
        );

        // On failure the claimed cell stays `p`: visible, never masked as
        // success.
        let metric = self.runner.run(&claim, &out_dir)?;
        if !metric.is_finite() || metric < 0.0 {
            return Err(WorkerError::MetricRejected {
                trial: claim.trial_index,
                round: claim.round,
                metric,
            }
            .into());
        }

        self.record_finished(&claim, metric)?;
        info!(
            trial = claim.trial_index,
            round = claim.round,
            metric,
            "Completed trial"
        );
        Ok(WorkerOutcome::RanTrial {
            trial_index: claim.trial_index,
            round: claim.round,
            metric,
        })
    }

    /// Mark the claimed cell finished and persist its metric. The table may
    /// have advanced since the claim; only this worker's own `p` cell is
    /// touched.
    fn record_finished(&self, claim: &ClaimedTrial, metric: f64) -> SbResult<()> {
        let mut attempts = 0u32;
        let guard = loop {
            match self
                .store
                .lock()
                .acquire(&self.config.worker_id, &self.config.lock)
            {
                Ok(guard) => break guard,
                Err(error @ LockError::Timeout { .. }) if attempts < self.config.max_repeats => {
                    warn!(%error, "Lock timed out while recording a result; backing off");
                    attempts += 1;
                    std::thread::sleep(self.config.wait_backoff);
                }
                Err(error) => return Err(error.into()),
            }
        };

        let mut table = self.store.load(&guard)?;
        if claim.trial_index >= table.trial_count() {
            return Err(ScheduleError::TrialOutOfRange {
                trial: claim.trial_index,
                count: table.trial_count(),
            }
            .into());
        }

        let current = table.status(claim.trial_index, claim.round);
        if current != TrialStatus::InProgress {
            return Err(WorkerError::NotInProgress {
                trial: claim.trial_index,
                round: claim.round,
                found: current.as_code().to_string(),
            }
            .into());
        }

        table.set_status(claim.trial_index, claim.round, TrialStatus::Finished);
        table.set_result(claim.trial_index, claim.round, metric);
        self.store.save(&table, &guard)?;

        guard.release();
        Ok(())
    }
}
