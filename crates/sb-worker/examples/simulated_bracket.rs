//! Walks a full two-round bracket in one process with a synthetic trial
//! body, printing each claim and the final survivor set.
//!
//! ```bash
//! cargo run --example simulated_bracket
//! ```

use std::path::Path;
use std::time::Duration;

use sb_store::{LockConfig, ScheduleStore};
use sb_types::{BracketParams, ClaimedTrial, SbResult, TrialStatus};
use sb_worker::{TrialRunner, Worker, WorkerConfig, WorkerOutcome};

/// Pretends to train: the "model" converges toward its learning-rate sweet
/// spot, improving with every extra epoch.
struct SyntheticRunner;

impl TrialRunner for SyntheticRunner {
    fn run(&mut self, trial: &ClaimedTrial, _out_dir: &Path) -> SbResult<f64> {
        let lr = trial
            .parameters
            .get("lr")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.1);
        let total_epochs = trial.marginal_epochs as f64 * (trial.round + 1) as f64;
        let quality = 1.0 / (1.0 + (lr.log10() + 2.0).abs());
        Ok(quality * (1.0 - (-total_epochs / 10.0).exp()))
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("info")
        .init();

    let dir = tempfile::tempdir()?;

    // eta=3, R=9, s=1: 5 trials at 3 epochs, then 2 survivors at 6 more.
    let bracket = BracketParams::new(9, 3, 1)?;
    let store = ScheduleStore::open(dir.path(), "demo", bracket);

    // Normally the experiment tooling seeds the schedule; the demo does it
    // itself with a small learning-rate sweep.
    let guard = store.lock().acquire("seeder", &LockConfig::default())?;
    let columns = vec!["trial".to_string(), "lr".to_string()];
    let rows = (0..bracket.initial_trials())
        .map(|i| vec![i.to_string(), format!("{}", 10f64.powi(-(i as i32) - 1))])
        .collect();
    store.seed(columns, rows, &guard)?;
    guard.release();

    let config = WorkerConfig {
        wait_backoff: Duration::from_millis(10),
        ..WorkerConfig::default()
    };
    let mut worker = Worker::new(
        store.clone(),
        dir.path().join("out"),
        SyntheticRunner,
        config,
    );

    loop {
        match worker.run()? {
            WorkerOutcome::RanTrial {
                trial_index,
                round,
                metric,
            } => println!("ran trial {trial_index} round {round}: metric {metric:.4}"),
            WorkerOutcome::BracketComplete => break,
            WorkerOutcome::GaveUpWaiting => break,
        }
    }

    let guard = store.lock().acquire("inspect", &LockConfig::default())?;
    let table = store.load(&guard)?;
    let final_round = table.rounds() - 1;
    println!("\nsurvivors of the final round:");
    for trial in table.trials_with_status(final_round, TrialStatus::Finished) {
        println!(
            "  trial {trial} (lr={}): {:.4}",
            table.parameters(trial)["lr"],
            table.result(trial, final_round).unwrap_or(f64::NAN)
        );
    }

    Ok(())
}
