use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A concrete hyperparameter value from a schedule cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParameterValue {
    /// Parse a raw schedule cell: integer first, then float, else text.
    pub fn parse(raw: &str) -> Self {
        if let Ok(v) = raw.parse::<i64>() {
            return Self::Int(v);
        }
        if let Ok(v) = raw.parse::<f64>() {
            return Self::Float(v);
        }
        Self::Text(raw.to_string())
    }

    /// Numeric view, if the value is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Text(_) => None,
        }
    }
}

impl std::fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v}"),
        }
    }
}

/// Everything the trial runner needs for one (trial, round) execution.
///
/// Produced by the bracket scheduler when a trial is claimed; `trial_index`
/// is the trial's row position in the schedule, fixed for the lifetime of
/// the bracket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimedTrial {
    pub trial_index: usize,
    pub round: usize,
    /// Additional training epochs granted for this round.
    pub marginal_epochs: u64,
    /// The trial's hyperparameter columns, typed.
    pub parameters: HashMap<String, ParameterValue>,
}
