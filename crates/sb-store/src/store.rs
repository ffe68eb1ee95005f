use std::path::{Path, PathBuf};
use tracing::{debug, info};

use sb_types::{BracketParams, ScheduleError, TrialStatus};

use crate::lock::{LockGuard, ScheduleLock};
use crate::table::ScheduleTable;

enum RoundField {
    Status,
    Result,
}

/// Classify a header: `round_{rd}_status` / `round_{rd}_result` cells belong
/// to the schedule machinery, everything else is a hyperparameter column.
fn parse_round_column(header: &str) -> Option<(usize, RoundField)> {
    let rest = header.strip_prefix("round_")?;
    if let Some(index) = rest.strip_suffix("_status") {
        return index.parse().ok().map(|rd| (rd, RoundField::Status));
    }
    if let Some(index) = rest.strip_suffix("_result") {
        return index.parse().ok().map(|rd| (rd, RoundField::Result));
    }
    None
}

/// Owns the persisted schedule for one bracket.
///
/// Load and save are whole-table serialize/deserialize with no partial-write
/// protocol; both demand a [`LockGuard`], so read-modify-write atomicity
/// across workers is entirely the lock's. The store itself has no
/// concurrency control.
#[derive(Debug, Clone)]
pub struct ScheduleStore {
    path: PathBuf,
    bracket: BracketParams,
}

impl ScheduleStore {
    /// Deterministic schedule path: every worker targeting the same
    /// `(experiment_id, R, eta, s)` resolves to the same file.
    pub fn schedule_path(in_path: &Path, experiment_id: &str, bracket: &BracketParams) -> PathBuf {
        in_path.join(format!(
            "tuning_tracker_{}_epochs_{}_factor_{}_bracket_{}.csv",
            experiment_id, bracket.max_epochs, bracket.factor, bracket.bracket
        ))
    }

    pub fn open(in_path: &Path, experiment_id: &str, bracket: BracketParams) -> Self {
        let path = Self::schedule_path(in_path, experiment_id, &bracket);
        Self { path, bracket }
    }

    /// Point the store at an explicit schedule file.
    pub fn at_path(path: PathBuf, bracket: BracketParams) -> Self {
        Self { path, bracket }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bracket(&self) -> &BracketParams {
        &self.bracket
    }

    /// The lock guarding this schedule.
    pub fn lock(&self) -> ScheduleLock {
        ScheduleLock::for_schedule(&self.path)
    }

    /// Load and validate the whole table. Malformed persisted state aborts
    /// with a [`ScheduleError`]; it is never silently repaired.
    pub fn load(&self, _guard: &LockGuard) -> Result<ScheduleTable, ScheduleError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(&self.path)
            .map_err(|e| self.csv_error(e))?;
        let headers = reader.headers().map_err(|e| self.csv_error(e))?.clone();

        let rounds = self.bracket.rounds();
        let mut status_cols: Vec<Option<usize>> = vec![None; rounds];
        let mut result_cols: Vec<Option<usize>> = vec![None; rounds];
        let mut param_cols: Vec<(usize, String)> = Vec::new();

        for (index, header) in headers.iter().enumerate() {
            match parse_round_column(header) {
                Some((rd, RoundField::Status)) if rd < rounds && status_cols[rd].is_none() => {
                    status_cols[rd] = Some(index);
                }
                Some((rd, RoundField::Result)) if rd < rounds && result_cols[rd].is_none() => {
                    result_cols[rd] = Some(index);
                }
                Some(_) => {
                    // Duplicate, or a round this bracket does not run.
                    return Err(ScheduleError::UnexpectedRoundColumn {
                        column: header.to_string(),
                        path: self.path.clone(),
                    });
                }
                None => param_cols.push((index, header.to_string())),
            }
        }

        for rd in 0..rounds {
            if status_cols[rd].is_none() {
                return Err(self.missing_column(format!("round_{rd}_status")));
            }
            if result_cols[rd].is_none() {
                return Err(self.missing_column(format!("round_{rd}_result")));
            }
        }

        let mut params: Vec<Vec<String>> = Vec::new();
        let mut statuses: Vec<Vec<TrialStatus>> = Vec::new();
        let mut results: Vec<Vec<Option<f64>>> = Vec::new();

        for (trial, record) in reader.records().enumerate() {
            let record = record.map_err(|e| self.csv_error(e))?;

            params.push(
                param_cols
                    .iter()
                    .map(|(index, _)| record.get(*index).unwrap_or("").to_string())
                    .collect(),
            );

            let mut row_statuses = Vec::with_capacity(rounds);
            let mut row_results = Vec::with_capacity(rounds);
            for rd in 0..rounds {
                let code = record.get(status_cols[rd].unwrap_or_default()).unwrap_or("");
                let status = TrialStatus::from_code(code.trim()).ok_or_else(|| {
                    ScheduleError::UnknownStatusCode {
                        code: code.to_string(),
                        trial,
                        round: rd,
                    }
                })?;
                row_statuses.push(status);

                let raw = record
                    .get(result_cols[rd].unwrap_or_default())
                    .unwrap_or("")
                    .trim();
                let result = parse_result(raw).map_err(|value| ScheduleError::MalformedResult {
                    value,
                    trial,
                    round: rd,
                })?;
                if status == TrialStatus::Finished && result.is_none() {
                    return Err(ScheduleError::MissingResult { trial, round: rd });
                }
                row_results.push(result);
            }
            statuses.push(row_statuses);
            results.push(row_results);
        }

        let expected = self.bracket.initial_trials();
        if params.len() != expected {
            return Err(ScheduleError::TrialCountMismatch {
                path: self.path.clone(),
                expected,
                found: params.len(),
            });
        }

        debug!(
            path = %self.path.display(),
            trials = params.len(),
            rounds,
            "Loaded tuning schedule"
        );

        Ok(ScheduleTable::from_parts(
            param_cols.into_iter().map(|(_, name)| name).collect(),
            rounds,
            params,
            statuses,
            results,
        ))
    }

    /// Persist the whole table, hyperparameter columns first, then the
    /// status/result pair of each round in order. Absent results are empty
    /// cells.
    pub fn save(&self, table: &ScheduleTable, _guard: &LockGuard) -> Result<(), ScheduleError> {
        let mut writer = csv::Writer::from_path(&self.path).map_err(|e| self.csv_error(e))?;

        let mut headers: Vec<String> = table.param_columns().to_vec();
        for rd in 0..table.rounds() {
            headers.push(format!("round_{rd}_status"));
            headers.push(format!("round_{rd}_result"));
        }
        writer.write_record(&headers).map_err(|e| self.csv_error(e))?;

        for trial in 0..table.trial_count() {
            let mut record: Vec<String> = table.raw_params(trial).to_vec();
            for rd in 0..table.rounds() {
                record.push(table.status(trial, rd).as_code().to_string());
                record.push(
                    table
                        .result(trial, rd)
                        .map(|v| v.to_string())
                        .unwrap_or_default(),
                );
            }
            writer.write_record(&record).map_err(|e| self.csv_error(e))?;
        }

        writer.flush().map_err(|source| ScheduleError::Io {
            path: self.path.clone(),
            source,
        })?;

        debug!(path = %self.path.display(), "Saved tuning schedule");
        Ok(())
    }

    /// Write a fresh pre-populated table: `n` rows, every cell undecided.
    ///
    /// Schedule creation is normally the experiment tooling's job; this is
    /// the writer that tooling (and the tests) use.
    pub fn seed(
        &self,
        param_columns: Vec<String>,
        rows: Vec<Vec<String>>,
        guard: &LockGuard,
    ) -> Result<ScheduleTable, ScheduleError> {
        let expected = self.bracket.initial_trials();
        if rows.len() != expected {
            return Err(ScheduleError::TrialCountMismatch {
                path: self.path.clone(),
                expected,
                found: rows.len(),
            });
        }

        let table = ScheduleTable::new(param_columns, rows, self.bracket.rounds());
        self.save(&table, guard)?;
        info!(
            path = %self.path.display(),
            trials = expected,
            rounds = self.bracket.rounds(),
            "Seeded tuning schedule"
        );
        Ok(table)
    }

    fn csv_error(&self, source: csv::Error) -> ScheduleError {
        ScheduleError::Csv {
            path: self.path.clone(),
            source,
        }
    }

    fn missing_column(&self, column: String) -> ScheduleError {
        ScheduleError::MissingColumn {
            column,
            path: self.path.clone(),
        }
    }
}

/// Empty and NaN cells both mean "no result yet".
fn parse_result(raw: &str) -> Result<Option<f64>, String> {
    if raw.is_empty() || raw.eq_ignore_ascii_case("nan") {
        return Ok(None);
    }
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(Some(v)),
        _ => Err(raw.to_string()),
    }
}
