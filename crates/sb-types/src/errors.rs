use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the SwarmBand system
#[derive(Error, Debug)]
pub enum SbError {
    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Schedule error: {0}")]
    Schedule(#[from] ScheduleError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Advisory-lock errors
#[derive(Error, Debug)]
pub enum LockError {
    #[error("Could not acquire lock for {path} within {waited:?}")]
    Timeout { path: PathBuf, waited: Duration },

    #[error("Failed to create lock marker {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Schedule-table errors: malformed persisted state is fatal, never retried
#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("Missing column '{column}' in schedule {path}")]
    MissingColumn { column: String, path: PathBuf },

    #[error("Unexpected round column '{column}' in schedule {path}")]
    UnexpectedRoundColumn { column: String, path: PathBuf },

    #[error("Trial {trial} round {round} is finished but has no result")]
    MissingResult { trial: usize, round: usize },

    #[error("Schedule {path} has {found} trials, expected {expected}")]
    TrialCountMismatch {
        path: PathBuf,
        expected: usize,
        found: usize,
    },

    #[error("Unknown status code '{code}' at trial {trial}, round {round}")]
    UnknownStatusCode {
        code: String,
        trial: usize,
        round: usize,
    },

    #[error("Malformed result '{value}' at trial {trial}, round {round}")]
    MalformedResult {
        value: String,
        trial: usize,
        round: usize,
    },

    #[error("Trial index {trial} out of range: schedule has {count} trials")]
    TrialOutOfRange { trial: usize, count: usize },

    #[error("CSV error in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Failed to access schedule {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Worker-loop errors
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Trial {trial} round {round} failed: {message}")]
    TrialFailed {
        trial: usize,
        round: usize,
        message: String,
    },

    #[error("Trial {trial} round {round} returned metric {metric}: must be finite and non-negative")]
    MetricRejected {
        trial: usize,
        round: usize,
        metric: f64,
    },

    #[error("Cannot record result for trial {trial} round {round}: status is '{found}', expected 'p'")]
    NotInProgress {
        trial: usize,
        round: usize,
        found: String,
    },
}

/// Result type alias for SwarmBand operations
pub type SbResult<T> = Result<T, SbError>;
