use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sb_store::{LockConfig, ScheduleStore};
use sb_types::BracketParams;
use sb_worker::{CommandRunner, Worker, WorkerConfig, WorkerOutcome};

/// Run the next available trial of a shared Hyperband bracket.
///
/// Every invocation is one independent worker: it claims the next runnable
/// (trial, round) from the shared tuning schedule, executes the trial body
/// and records the metric. Launch as many invocations in parallel as the
/// cluster allows; they coordinate through the schedule file's lock.
#[derive(Parser, Debug)]
#[command(name = "sb-worker", version, about)]
struct Cli {
    /// Name of the set of hyperparameter trials being tested.
    #[arg(long, default_value = "Exp1")]
    experiment_id: String,

    /// Parent directory to which all trial outputs are saved.
    #[arg(long)]
    out_path: PathBuf,

    /// Directory containing the tuning schedule.
    #[arg(long)]
    in_path: PathBuf,

    /// Hyperband R: maximum epoch budget per fully-trained trial.
    #[arg(long, default_value_t = 800)]
    max_epochs: u32,

    /// Hyperband eta: reduction factor between rounds.
    #[arg(long, default_value_t = 3)]
    factor: u32,

    /// Hyperband s: bracket index.
    #[arg(long, default_value_t = 0)]
    bracket: u32,

    /// Program executed as the trial body. It receives the trial context in
    /// SB_* environment variables and must print the metric as the last
    /// line of stdout.
    #[arg(long)]
    trial_cmd: PathBuf,

    /// Extra argument passed to the trial body (repeatable).
    #[arg(long)]
    trial_arg: Vec<String>,

    /// Attempts before giving up while earlier rounds finish.
    #[arg(long, default_value_t = 4)]
    max_repeats: u32,

    /// Seconds to sleep between attempts.
    #[arg(long, default_value_t = 60)]
    wait_backoff_secs: u64,

    /// Seconds before a lock acquisition times out.
    #[arg(long, default_value_t = 30)]
    lock_timeout_secs: u64,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let bracket = BracketParams::new(cli.max_epochs, cli.factor, cli.bracket)
        .context("invalid bracket parameters")?;
    let store = ScheduleStore::open(&cli.in_path, &cli.experiment_id, bracket);
    info!(schedule = %store.path().display(), "Joining bracket");

    let runner = CommandRunner::new(cli.trial_cmd).with_args(cli.trial_arg);
    let config = WorkerConfig {
        lock: LockConfig {
            timeout: Duration::from_secs(cli.lock_timeout_secs),
            ..LockConfig::default()
        },
        wait_backoff: Duration::from_secs(cli.wait_backoff_secs),
        max_repeats: cli.max_repeats,
        ..WorkerConfig::default()
    };

    let mut worker = Worker::new(store, cli.out_path, runner, config);
    match worker.run()? {
        WorkerOutcome::RanTrial {
            trial_index,
            round,
            metric,
        } => info!(trial = trial_index, round, metric, "Trial recorded"),
        WorkerOutcome::BracketComplete => info!("Bracket complete, nothing left to run"),
        WorkerOutcome::GaveUpWaiting => {
            info!("Gave up waiting for earlier rounds; run again later")
        }
    }

    Ok(())
}
