use chrono::{DateTime, Utc};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use sb_types::LockError;

/// Smallest sleep between failed acquisition attempts.
const MIN_JITTER: Duration = Duration::from_millis(10);

/// Lock acquisition settings.
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Give up acquiring once elapsed waiting exceeds this bound.
    pub timeout: Duration,
    /// Upper bound of the jittered sleep between attempts.
    pub retry_interval: Duration,
    /// Seed for the jitter source; `None` draws from OS entropy.
    pub jitter_seed: Option<u64>,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retry_interval: Duration::from_millis(500),
            jitter_seed: None,
        }
    }
}

/// Informational payload written into the lock marker.
///
/// Useful when inspecting a contended or abandoned marker by hand; never
/// read back for correctness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockSentinel {
    pub pid: u32,
    pub worker_id: String,
    pub acquired_at: DateTime<Utc>,
}

/// Advisory lock guarding one schedule file.
///
/// The marker lives at `{schedule_path}.lock`. Exclusivity rests entirely on
/// the atomicity of create-if-absent: whichever process creates the marker
/// holds the lock until the marker is removed. Every process touching the
/// same schedule must honor the same convention.
#[derive(Debug, Clone)]
pub struct ScheduleLock {
    marker_path: PathBuf,
}

impl ScheduleLock {
    pub fn for_schedule(schedule_path: &Path) -> Self {
        let mut name = schedule_path.as_os_str().to_os_string();
        name.push(".lock");
        Self {
            marker_path: PathBuf::from(name),
        }
    }

    pub fn marker_path(&self) -> &Path {
        &self.marker_path
    }

    /// Acquire the lock, blocking with jittered retries.
    ///
    /// Each attempt is a single exclusive create of the marker. On contention
    /// the caller sleeps a uniform duration in `[MIN_JITTER, retry_interval]`
    /// so a fleet of workers polling in lockstep spreads out. Fails with
    /// [`LockError::Timeout`] once elapsed waiting exceeds `config.timeout`,
    /// without having created the marker.
    pub fn acquire(&self, worker_id: &str, config: &LockConfig) -> Result<LockGuard, LockError> {
        let started = Instant::now();
        let mut rng = match config.jitter_seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };

        loop {
            match self.try_create_marker(worker_id) {
                Ok(()) => {
                    debug!(marker = %self.marker_path.display(), "Lock acquired");
                    return Ok(LockGuard {
                        marker_path: self.marker_path.clone(),
                        released: false,
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    // Another worker holds the lock; fall through to retry.
                }
                Err(source) => {
                    return Err(LockError::Create {
                        path: self.marker_path.clone(),
                        source,
                    })
                }
            }

            let waited = started.elapsed();
            if waited > config.timeout {
                return Err(LockError::Timeout {
                    path: self.marker_path.clone(),
                    waited,
                });
            }

            let upper = config.retry_interval.max(MIN_JITTER);
            let sleep_for = rng.gen_range(MIN_JITTER..=upper);
            debug!(
                marker = %self.marker_path.display(),
                ?sleep_for,
                "Waiting for lock"
            );
            std::thread::sleep(sleep_for);
        }
    }

    fn try_create_marker(&self, worker_id: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.marker_path)?;

        // The marker's existence is what matters; the payload is best-effort.
        let sentinel = LockSentinel {
            pid: std::process::id(),
            worker_id: worker_id.to_string(),
            acquired_at: Utc::now(),
        };
        if let Ok(payload) = serde_json::to_string(&sentinel) {
            if let Err(error) = file.write_all(payload.as_bytes()) {
                warn!(
                    marker = %self.marker_path.display(),
                    %error,
                    "Failed to write lock sentinel payload"
                );
            }
        }
        Ok(())
    }
}

/// Proof of holding the lock; removes the marker when released or dropped.
///
/// Store mutations take this by reference, so writing the shared schedule
/// without holding the lock is unrepresentable.
#[derive(Debug)]
pub struct LockGuard {
    marker_path: PathBuf,
    released: bool,
}

impl LockGuard {
    pub fn marker_path(&self) -> &Path {
        &self.marker_path
    }

    /// Remove the marker. A marker that is already absent is reported and
    /// tolerated; release never fails past a caller's cleanup path.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        match std::fs::remove_file(&self.marker_path) {
            Ok(()) => debug!(marker = %self.marker_path.display(), "Lock released"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    marker = %self.marker_path.display(),
                    "Lock marker already absent at release (removed externally?)"
                );
            }
            Err(error) => {
                warn!(
                    marker = %self.marker_path.display(),
                    %error,
                    "Failed to remove lock marker"
                );
            }
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn quick_config() -> LockConfig {
        LockConfig {
            timeout: Duration::from_secs(1),
            retry_interval: Duration::from_millis(50),
            jitter_seed: Some(7),
        }
    }

    #[test]
    fn acquire_creates_marker_and_release_removes_it() {
        let dir = tempdir().unwrap();
        let schedule = dir.path().join("schedule.csv");
        let lock = ScheduleLock::for_schedule(&schedule);

        let guard = lock.acquire("worker-a", &quick_config()).unwrap();
        assert!(lock.marker_path().exists());

        let payload = std::fs::read_to_string(lock.marker_path()).unwrap();
        let sentinel: LockSentinel = serde_json::from_str(&payload).unwrap();
        assert_eq!(sentinel.worker_id, "worker-a");
        assert_eq!(sentinel.pid, std::process::id());

        guard.release();
        assert!(!lock.marker_path().exists());
    }

    #[test]
    fn drop_releases_the_marker() {
        let dir = tempdir().unwrap();
        let schedule = dir.path().join("schedule.csv");
        let lock = ScheduleLock::for_schedule(&schedule);

        {
            let _guard = lock.acquire("worker-a", &quick_config()).unwrap();
            assert!(lock.marker_path().exists());
        }
        assert!(!lock.marker_path().exists());
    }

    #[test]
    fn acquire_times_out_against_a_held_marker() {
        let dir = tempdir().unwrap();
        let schedule = dir.path().join("schedule.csv");
        let lock = ScheduleLock::for_schedule(&schedule);

        std::fs::write(lock.marker_path(), "held elsewhere").unwrap();

        let started = Instant::now();
        let result = lock.acquire("worker-b", &quick_config());
        let elapsed = started.elapsed();

        match result {
            Err(LockError::Timeout { waited, .. }) => {
                assert!(waited >= Duration::from_secs(1));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        // ~1s plus at most one retry interval of slack.
        assert!(elapsed < Duration::from_secs(2));

        // The loser must not have replaced the holder's marker.
        let contents = std::fs::read_to_string(lock.marker_path()).unwrap();
        assert_eq!(contents, "held elsewhere");
    }

    #[test]
    fn second_acquire_succeeds_after_release() {
        let dir = tempdir().unwrap();
        let schedule = dir.path().join("schedule.csv");
        let lock = ScheduleLock::for_schedule(&schedule);

        let first = lock.acquire("worker-a", &quick_config()).unwrap();
        assert!(matches!(
            lock.acquire("worker-b", &quick_config()),
            Err(LockError::Timeout { .. })
        ));

        first.release();
        let second = lock.acquire("worker-b", &quick_config()).unwrap();
        second.release();
    }

    #[test]
    fn release_of_externally_removed_marker_is_a_noop() {
        let dir = tempdir().unwrap();
        let schedule = dir.path().join("schedule.csv");
        let lock = ScheduleLock::for_schedule(&schedule);

        let guard = lock.acquire("worker-a", &quick_config()).unwrap();
        std::fs::remove_file(lock.marker_path()).unwrap();

        // Must not panic or error.
        guard.release();
    }
}
