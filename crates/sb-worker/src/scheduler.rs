use std::cmp::Ordering;

use sb_store::ScheduleTable;
use sb_types::{BracketParams, ClaimedTrial, TrialStatus};
use tracing::{debug, info};

/// Outcome of one scheduling pass over a loaded schedule.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// A trial was claimed; its cell is `InProgress` in the mutated table.
    Claimed(ClaimedTrial),
    /// An earlier round still has trials in flight; retry later.
    WaitForStragglers {
        round: usize,
        /// Trial indices still `InProgress` in that round.
        in_progress: Vec<usize>,
    },
    /// Every trial has reached a terminal outcome; the bracket is complete.
    Done,
}

/// Select the next runnable trial of the bracket.
///
/// Scans rounds lowest-first: promotion into round `rd` requires round
/// `rd-1` to be fully finished, and a non-final round with trials still in
/// flight short-circuits the scan so the bracket is never declared done (or
/// a later round decided) while stragglers are running. Mutations touch
/// only the in-memory table; the caller persists it while still holding the
/// schedule lock.
pub fn next_trial(table: &mut ScheduleTable, bracket: &BracketParams) -> ClaimOutcome {
    let rounds = bracket.rounds();

    for rd in 0..rounds {
        if table.count_in_round(rd, TrialStatus::Undecided) > 0 {
            decide_round(table, bracket, rd);
        }

        if let Some(trial) = table.first_with_status(rd, TrialStatus::In) {
            table.set_status(trial, rd, TrialStatus::InProgress);
            let claim = ClaimedTrial {
                trial_index: trial,
                round: rd,
                marginal_epochs: bracket.marginal_epochs(rd),
                parameters: table.parameters(trial),
            };
            info!(
                trial,
                round = rd,
                marginal_epochs = claim.marginal_epochs,
                "Claimed trial"
            );
            return ClaimOutcome::Claimed(claim);
        }

        let in_progress = table.trials_with_status(rd, TrialStatus::InProgress);
        if !in_progress.is_empty() && rd != rounds - 1 {
            debug!(
                round = rd,
                stragglers = in_progress.len(),
                "Earlier round still running"
            );
            return ClaimOutcome::WaitForStragglers {
                round: rd,
                in_progress,
            };
        }
    }

    ClaimOutcome::Done
}

/// Decide promotion into `round` for every trial at once.
///
/// Round 0 admits everyone. For later rounds, exactly
/// `ceil(finished / eta)` trials are promoted: highest previous-round
/// result first, ties resolved in favor of the lower original trial index.
/// The tie-break is part of the contract; re-running the decision on an
/// identical table yields an identical promotion set.
fn decide_round(table: &mut ScheduleTable, bracket: &BracketParams, round: usize) {
    if round == 0 {
        for trial in 0..table.trial_count() {
            table.set_status(trial, 0, TrialStatus::In);
        }
        info!(trials = table.trial_count(), "Initialized round 0");
        return;
    }

    let finished = table.trials_with_status(round - 1, TrialStatus::Finished);
    let n_promote = (finished.len() + bracket.factor as usize - 1) / bracket.factor as usize;

    let mut ranked = finished.clone();
    ranked.sort_by(|&a, &b| {
        // Finished cells always carry a result; absent would have failed the load.
        let result_a = table.result(a, round - 1).unwrap_or(0.0);
        let result_b = table.result(b, round - 1).unwrap_or(0.0);
        result_b
            .partial_cmp(&result_a)
            .unwrap_or(Ordering::Equal)
            .then(a.cmp(&b))
    });

    for trial in 0..table.trial_count() {
        table.set_status(trial, round, TrialStatus::Out);
    }
    for &trial in ranked.iter().take(n_promote) {
        table.set_status(trial, round, TrialStatus::In);
    }

    info!(
        round,
        promoted = n_promote,
        from = finished.len(),
        "Promoted trials into round"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_table(trials: usize, rounds: usize) -> ScheduleTable {
        let columns = vec!["trial".to_string(), "lr".to_string()];
        let rows = (0..trials)
            .map(|i| vec![i.to_string(), format!("0.{}", i + 1)])
            .collect();
        ScheduleTable::new(columns, rows, rounds)
    }

    fn finish(table: &mut ScheduleTable, trial: usize, round: usize, metric: f64) {
        table.set_status(trial, round, TrialStatus::Finished);
        table.set_result(trial, round, metric);
    }

    #[test]
    fn scenario_single_round_bracket() {
        // eta=3, R=9, s=0: one round, 3 trials, 9 epochs each.
        let bracket = BracketParams::new(9, 3, 0).unwrap();
        let mut table = fresh_table(3, 1);

        for expected in 0..3 {
            match next_trial(&mut table, &bracket) {
                ClaimOutcome::Claimed(claim) => {
                    assert_eq!(claim.trial_index, expected);
                    assert_eq!(claim.round, 0);
                    assert_eq!(claim.marginal_epochs, 9);
                }
                other => panic!("expected claim, got {other:?}"),
            }
        }

        // Final-round stragglers do not block completion reporting.
        assert_eq!(next_trial(&mut table, &bracket), ClaimOutcome::Done);

        for trial in 0..3 {
            finish(&mut table, trial, 0, trial as f64);
        }
        assert_eq!(next_trial(&mut table, &bracket), ClaimOutcome::Done);
    }

    #[test]
    fn scenario_two_round_bracket() {
        // eta=3, R=9, s=1: 5 trials at 3 epochs, then 2 survivors at 6 more.
        let bracket = BracketParams::new(9, 3, 1).unwrap();
        let mut table = fresh_table(5, 2);

        for expected in 0..5 {
            match next_trial(&mut table, &bracket) {
                ClaimOutcome::Claimed(claim) => {
                    assert_eq!(claim.trial_index, expected);
                    assert_eq!(claim.marginal_epochs, 3);
                }
                other => panic!("expected claim, got {other:?}"),
            }
        }

        for (trial, metric) in [(0, 0.2), (1, 0.9), (2, 0.5), (3, 0.7), (4, 0.1)] {
            finish(&mut table, trial, 0, metric);
        }

        // ceil(5/3) = 2 promoted: trials 1 (0.9) and 3 (0.7).
        match next_trial(&mut table, &bracket) {
            ClaimOutcome::Claimed(claim) => {
                assert_eq!(claim.trial_index, 1);
                assert_eq!(claim.round, 1);
                assert_eq!(claim.marginal_epochs, 6);
            }
            other => panic!("expected claim, got {other:?}"),
        }

        assert_eq!(table.status(1, 1), TrialStatus::InProgress);
        assert_eq!(table.status(3, 1), TrialStatus::In);
        for trial in [0, 2, 4] {
            assert_eq!(table.status(trial, 1), TrialStatus::Out);
        }

        match next_trial(&mut table, &bracket) {
            ClaimOutcome::Claimed(claim) => assert_eq!(claim.trial_index, 3),
            other => panic!("expected claim, got {other:?}"),
        }
    }

    #[test]
    fn promotion_count_invariant() {
        let bracket = BracketParams::new(27, 3, 2).unwrap();
        let n = bracket.initial_trials();
        // s_max = 3 for R=27, eta=3: n = ceil(4 * 9 / 3) = 12
        assert_eq!(n, 12);
        let mut table = fresh_table(n, 3);

        for trial in 0..n {
            table.set_status(trial, 0, TrialStatus::Finished);
            table.set_result(trial, 0, trial as f64 * 0.1);
        }

        match next_trial(&mut table, &bracket) {
            ClaimOutcome::Claimed(claim) => assert_eq!(claim.round, 1),
            other => panic!("expected claim, got {other:?}"),
        }

        let finished_prev = table.count_in_round(0, TrialStatus::Finished);
        let promoted = table.count_in_round(1, TrialStatus::In)
            + table.count_in_round(1, TrialStatus::InProgress);
        assert_eq!(promoted, (finished_prev + 2) / 3); // ceil(9/3)
        assert_eq!(
            promoted + table.count_in_round(1, TrialStatus::Out),
            table.trial_count()
        );
    }

    #[test]
    fn ties_promote_the_lower_trial_index() {
        let bracket = BracketParams::new(9, 3, 1).unwrap();
        let mut table = fresh_table(5, 2);

        for trial in 0..5 {
            finish(&mut table, trial, 0, 0.5);
        }

        match next_trial(&mut table, &bracket) {
            ClaimOutcome::Claimed(claim) => assert_eq!(claim.trial_index, 0),
            other => panic!("expected claim, got {other:?}"),
        }
        assert_eq!(table.status(0, 1), TrialStatus::InProgress);
        assert_eq!(table.status(1, 1), TrialStatus::In);
        for trial in 2..5 {
            assert_eq!(table.status(trial, 1), TrialStatus::Out);
        }
    }

    #[test]
    fn round_decisions_are_deterministic() {
        let bracket = BracketParams::new(9, 3, 1).unwrap();
        let mut table = fresh_table(5, 2);
        for (trial, metric) in [(0, 0.4), (1, 0.4), (2, 0.8), (3, 0.4), (4, 0.8)] {
            finish(&mut table, trial, 0, metric);
        }

        let mut replay = table.clone();
        let first = next_trial(&mut table, &bracket);
        let second = next_trial(&mut replay, &bracket);

        assert_eq!(first, second);
        assert_eq!(table, replay);
    }

    #[test]
    fn waits_for_stragglers_in_non_final_rounds() {
        let bracket = BracketParams::new(9, 3, 1).unwrap();
        let mut table = fresh_table(5, 2);

        for trial in 0..4 {
            finish(&mut table, trial, 0, trial as f64);
        }
        table.set_status(4, 0, TrialStatus::InProgress);

        assert_eq!(
            next_trial(&mut table, &bracket),
            ClaimOutcome::WaitForStragglers {
                round: 0,
                in_progress: vec![4],
            }
        );

        // Waiting must not decide round 1 prematurely.
        for trial in 0..5 {
            assert_eq!(table.status(trial, 1), TrialStatus::Undecided);
        }
    }

    #[test]
    fn done_is_idempotent() {
        let bracket = BracketParams::new(9, 3, 1).unwrap();
        let mut table = fresh_table(5, 2);

        for trial in 0..5 {
            finish(&mut table, trial, 0, trial as f64);
        }
        for trial in [3, 4] {
            finish(&mut table, trial, 1, trial as f64);
        }
        for trial in 0..3 {
            table.set_status(trial, 1, TrialStatus::Out);
        }

        let before = table.clone();
        assert_eq!(next_trial(&mut table, &bracket), ClaimOutcome::Done);
        assert_eq!(table, before);
        assert_eq!(next_trial(&mut table, &bracket), ClaimOutcome::Done);
        assert_eq!(table, before);
    }
}
