use std::collections::HashMap;

use sb_types::{ParameterValue, TrialStatus};

/// One bracket's trial/round table, fully materialized in memory.
///
/// One row per trial; per round, one status and one result cell per trial.
/// Hyperparameter cells keep their raw text so a load/save cycle is
/// lossless. Trial identity is the row position, fixed for the lifetime of
/// the bracket.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleTable {
    param_columns: Vec<String>,
    rounds: usize,
    /// Raw hyperparameter text, `params[trial][column]`.
    params: Vec<Vec<String>>,
    /// `statuses[trial][round]`
    statuses: Vec<Vec<TrialStatus>>,
    /// `results[trial][round]`
    results: Vec<Vec<Option<f64>>>,
}

impl ScheduleTable {
    /// Build a fresh table: every cell `Undecided`, every result absent.
    pub fn new(param_columns: Vec<String>, params: Vec<Vec<String>>, rounds: usize) -> Self {
        let trials = params.len();
        Self {
            param_columns,
            rounds,
            params,
            statuses: vec![vec![TrialStatus::Undecided; rounds]; trials],
            results: vec![vec![None; rounds]; trials],
        }
    }

    pub(crate) fn from_parts(
        param_columns: Vec<String>,
        rounds: usize,
        params: Vec<Vec<String>>,
        statuses: Vec<Vec<TrialStatus>>,
        results: Vec<Vec<Option<f64>>>,
    ) -> Self {
        Self {
            param_columns,
            rounds,
            params,
            statuses,
            results,
        }
    }

    pub fn trial_count(&self) -> usize {
        self.params.len()
    }

    pub fn rounds(&self) -> usize {
        self.rounds
    }

    pub fn param_columns(&self) -> &[String] {
        &self.param_columns
    }

    pub(crate) fn raw_params(&self, trial: usize) -> &[String] {
        &self.params[trial]
    }

    pub fn status(&self, trial: usize, round: usize) -> TrialStatus {
        self.statuses[trial][round]
    }

    pub fn set_status(&mut self, trial: usize, round: usize, status: TrialStatus) {
        self.statuses[trial][round] = status;
    }

    pub fn result(&self, trial: usize, round: usize) -> Option<f64> {
        self.results[trial][round]
    }

    pub fn set_result(&mut self, trial: usize, round: usize, result: f64) {
        self.results[trial][round] = Some(result);
    }

    /// How many trials hold `status` in `round`.
    pub fn count_in_round(&self, round: usize, status: TrialStatus) -> usize {
        self.statuses.iter().filter(|row| row[round] == status).count()
    }

    /// Lowest trial index holding `status` in `round`.
    pub fn first_with_status(&self, round: usize, status: TrialStatus) -> Option<usize> {
        self.statuses.iter().position(|row| row[round] == status)
    }

    /// All trial indices holding `status` in `round`, ascending.
    pub fn trials_with_status(&self, round: usize, status: TrialStatus) -> Vec<usize> {
        self.statuses
            .iter()
            .enumerate()
            .filter(|(_, row)| row[round] == status)
            .map(|(trial, _)| trial)
            .collect()
    }

    /// Typed view of one trial's hyperparameters.
    pub fn parameters(&self, trial: usize) -> HashMap<String, ParameterValue> {
        self.param_columns
            .iter()
            .zip(&self.params[trial])
            .map(|(name, raw)| (name.clone(), ParameterValue::parse(raw)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_trial_table() -> ScheduleTable {
        ScheduleTable::new(
            vec!["trial".to_string(), "lr".to_string()],
            vec![
                vec!["0".to_string(), "0.1".to_string()],
                vec!["1".to_string(), "0.01".to_string()],
                vec!["2".to_string(), "0.001".to_string()],
            ],
            2,
        )
    }

    #[test]
    fn fresh_table_is_all_undecided() {
        let table = three_trial_table();
        assert_eq!(table.trial_count(), 3);
        assert_eq!(table.rounds(), 2);
        for trial in 0..3 {
            for round in 0..2 {
                assert_eq!(table.status(trial, round), TrialStatus::Undecided);
                assert_eq!(table.result(trial, round), None);
            }
        }
        assert_eq!(table.count_in_round(0, TrialStatus::Undecided), 3);
    }

    #[test]
    fn status_queries_track_mutations() {
        let mut table = three_trial_table();
        table.set_status(0, 0, TrialStatus::Finished);
        table.set_status(1, 0, TrialStatus::In);
        table.set_status(2, 0, TrialStatus::In);
        table.set_result(0, 0, 0.83);

        assert_eq!(table.count_in_round(0, TrialStatus::In), 2);
        assert_eq!(table.first_with_status(0, TrialStatus::In), Some(1));
        assert_eq!(table.trials_with_status(0, TrialStatus::In), vec![1, 2]);
        assert_eq!(table.result(0, 0), Some(0.83));
    }

    #[test]
    fn parameters_are_typed() {
        let table = three_trial_table();
        let params = table.parameters(1);
        assert_eq!(params.get("trial"), Some(&ParameterValue::Int(1)));
        assert_eq!(params.get("lr"), Some(&ParameterValue::Float(0.01)));
    }
}
