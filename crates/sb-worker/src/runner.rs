use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{info, warn};

use sb_types::{ClaimedTrial, SbError, SbResult, WorkerError};

/// Executes the trial body for one claimed (trial, round).
///
/// Round 0 means fresh initialization; a later round resumes the state this
/// trial produced in its previous round. The returned metric must be finite
/// and non-negative, larger is better — the worker rejects anything else
/// and leaves the claim in place.
pub trait TrialRunner {
    fn run(&mut self, trial: &ClaimedTrial, out_dir: &Path) -> SbResult<f64>;
}

/// Per-trial output directory: `{out_path}/{bracket}_{trial}_{round}`.
pub fn trial_out_dir(out_path: &Path, bracket: u32, trial: usize, round: usize) -> PathBuf {
    out_path.join(format!("{bracket}_{trial}_{round}"))
}

/// Runs the trial body as a subprocess.
///
/// The trial context is exported through environment variables — `SB_TRIAL`,
/// `SB_ROUND`, `SB_EPOCHS`, `SB_OUT_DIR`, and one `SB_PARAM_<NAME>` per
/// hyperparameter column — and the last non-empty line of stdout is parsed
/// as the metric. A non-zero exit or unparseable output is a trial failure.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandRunner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

impl TrialRunner for CommandRunner {
    fn run(&mut self, trial: &ClaimedTrial, out_dir: &Path) -> SbResult<f64> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .env("SB_TRIAL", trial.trial_index.to_string())
            .env("SB_ROUND", trial.round.to_string())
            .env("SB_EPOCHS", trial.marginal_epochs.to_string())
            .env("SB_OUT_DIR", out_dir);

        // Stable export order so reruns see identical environments.
        let mut names: Vec<&String> = trial.parameters.keys().collect();
        names.sort();
        for name in names {
            command.env(
                format!("SB_PARAM_{}", env_suffix(name)),
                trial.parameters[name].to_string(),
            );
        }

        info!(
            program = %self.program.display(),
            trial = trial.trial_index,
            round = trial.round,
            "Launching trial body"
        );

        let output = command
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| {
                trial_failed(trial, format!("failed to spawn {}: {e}", self.program.display()))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(
                trial = trial.trial_index,
                round = trial.round,
                status = %output.status,
                stderr = %stderr.trim_end(),
                "Trial body failed"
            );
            return Err(trial_failed(
                trial,
                format!("trial body exited with {}", output.status),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let metric_line = stdout
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .ok_or_else(|| trial_failed(trial, "trial body produced no output"))?;

        metric_line.trim().parse::<f64>().map_err(|_| {
            trial_failed(
                trial,
                format!("could not parse metric from '{}'", metric_line.trim()),
            )
        })
    }
}

/// Uppercase the column name and replace anything outside `[A-Za-z0-9]`
/// with `_` so it is a valid environment variable suffix.
fn env_suffix(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

fn trial_failed(trial: &ClaimedTrial, message: impl Into<String>) -> SbError {
    WorkerError::TrialFailed {
        trial: trial.trial_index,
        round: trial.round,
        message: message.into(),
    }
    .into()
}
