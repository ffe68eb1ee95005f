use serde::{Deserialize, Serialize};

/// State of one (trial, round) cell in the tuning schedule.
///
/// Exactly one state holds per cell at all times. The short codes are the
/// persisted representation in the schedule file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrialStatus {
    /// Promotion into this round has not been computed yet (`io`).
    Undecided,
    /// Eligible to run, not yet started (`i`).
    In,
    /// Eliminated, will never run (`o`).
    Out,
    /// Claimed by a worker (`p`).
    InProgress,
    /// Result recorded (`f`).
    Finished,
}

impl TrialStatus {
    /// The persisted status code.
    pub fn as_code(&self) -> &'static str {
        match self {
            Self::Undecided => "io",
            Self::In => "i",
            Self::Out => "o",
            Self::InProgress => "p",
            Self::Finished => "f",
        }
    }

    /// Parse a persisted status code.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "io" => Some(Self::Undecided),
            "i" => Some(Self::In),
            "o" => Some(Self::Out),
            "p" => Some(Self::InProgress),
            "f" => Some(Self::Finished),
            _ => None,
        }
    }

    /// Whether this cell can still change: `Out` and `Finished` are terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Out | Self::Finished)
    }
}

impl std::fmt::Display for TrialStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_code())
    }
}
