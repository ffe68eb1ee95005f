use serde::{Deserialize, Serialize};

use crate::{SbError, SbResult};

/// Hyperband bracket parameters: `R`, `eta` and `s` in the paper's notation.
///
/// One value of `s` selects one bracket of successive halving; every worker
/// attached to that bracket must be constructed with identical parameters so
/// they all derive the same schedule geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BracketParams {
    /// Maximum epoch budget granted to a fully-trained trial (`R`).
    pub max_epochs: u32,
    /// Reduction factor between rounds (`eta`).
    pub factor: u32,
    /// Bracket index (`s`).
    pub bracket: u32,
}

impl BracketParams {
    /// Validate and build bracket parameters.
    ///
    /// Requires `factor >= 2`, `max_epochs >= 1` and `bracket <= s_max`.
    pub fn new(max_epochs: u32, factor: u32, bracket: u32) -> SbResult<Self> {
        if factor < 2 {
            return Err(SbError::Config(format!(
                "factor must be >= 2, got {factor}"
            )));
        }
        if max_epochs < 1 {
            return Err(SbError::Config("max_epochs must be >= 1".to_string()));
        }

        let params = Self {
            max_epochs,
            factor,
            bracket,
        };
        let s_max = params.s_max();
        if bracket > s_max {
            return Err(SbError::Config(format!(
                "bracket {bracket} out of range: s_max = {s_max} for max_epochs {max_epochs}, factor {factor}"
            )));
        }

        Ok(params)
    }

    /// `s_max = floor(log_eta(R))`, computed exactly: the largest `k` with
    /// `factor^k <= max_epochs`.
    pub fn s_max(&self) -> u32 {
        let mut k = 0u32;
        let mut power = u64::from(self.factor);
        while power <= u64::from(self.max_epochs) {
            k += 1;
            power *= u64::from(self.factor);
        }
        k
    }

    /// Total per-bracket budget `B = (s_max + 1) * R` (informational).
    pub fn total_budget(&self) -> u64 {
        u64::from(self.s_max() + 1) * u64::from(self.max_epochs)
    }

    /// Number of elimination rounds this bracket runs (`s + 1`).
    pub fn rounds(&self) -> usize {
        self.bracket as usize + 1
    }

    /// Number of trials started in round 0:
    /// `n = ceil((B/R) * eta^s / (s+1))`.
    pub fn initial_trials(&self) -> usize {
        let numerator =
            u64::from(self.s_max() + 1) * u64::from(self.factor).pow(self.bracket);
        let denominator = u64::from(self.bracket) + 1;
        ((numerator + denominator - 1) / denominator) as usize
    }

    /// Epoch budget for round 0: `r = R * eta^-s`. Fractional for `s > 0`.
    pub fn round_zero_epochs(&self) -> f64 {
        f64::from(self.max_epochs) / f64::from(self.factor).powi(self.bracket as i32)
    }

    /// Cumulative epochs a trial alive in round `round` has been granted:
    /// `E(round) = round(r * eta^round)`.
    pub fn cumulative_epochs(&self, round: usize) -> u64 {
        let scaled = self.round_zero_epochs() * f64::from(self.factor).powi(round as i32);
        scaled.round() as u64
    }

    /// Additional epochs granted for `round` beyond what prior rounds spent.
    pub fn marginal_epochs(&self, round: usize) -> u64 {
        if round == 0 {
            self.cumulative_epochs(0)
        } else {
            self.cumulative_epochs(round) - self.cumulative_epochs(round - 1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_single_round_bracket() {
        // eta=3, R=9, s=0
        let params = BracketParams::new(9, 3, 0).unwrap();
        assert_eq!(params.s_max(), 2);
        assert_eq!(params.rounds(), 1);
        assert_eq!(params.initial_trials(), 3);
        assert_eq!(params.round_zero_epochs(), 9.0);
        assert_eq!(params.marginal_epochs(0), 9);
    }

    #[test]
    fn scenario_two_round_bracket() {
        // eta=3, R=9, s=1
        let params = BracketParams::new(9, 3, 1).unwrap();
        assert_eq!(params.rounds(), 2);
        assert_eq!(params.initial_trials(), 5);
        assert_eq!(params.round_zero_epochs(), 3.0);
        assert_eq!(params.marginal_epochs(0), 3);
        // round(3*3) - round(3*1) = 9 - 3
        assert_eq!(params.marginal_epochs(1), 6);
    }

    #[test]
    fn geometry_matches_closed_forms() {
        for factor in 2..=4u32 {
            for max_epochs in 1..=81u32 {
                let probe = BracketParams {
                    max_epochs,
                    factor,
                    bracket: 0,
                };
                let s_max = probe.s_max();
                assert_eq!(
                    s_max,
                    (f64::from(max_epochs).ln() / f64::from(factor).ln() + 1e-9).floor() as u32
                );

                for bracket in 0..=s_max {
                    let params = BracketParams::new(max_epochs, factor, bracket).unwrap();
                    assert_eq!(params.rounds(), bracket as usize + 1);

                    let b_over_r = f64::from(s_max + 1);
                    let expected_n = (b_over_r * f64::from(factor).powi(bracket as i32)
                        / f64::from(bracket + 1))
                    .ceil() as usize;
                    assert_eq!(params.initial_trials(), expected_n);

                    let expected_r = f64::from(max_epochs)
                        / f64::from(factor).powi(bracket as i32);
                    assert!((params.round_zero_epochs() - expected_r).abs() < 1e-12);
                }
            }
        }
    }

    #[test]
    fn marginal_epochs_sum_to_final_cumulative() {
        for factor in 2..=4u32 {
            for max_epochs in [8u32, 9, 27, 64, 81] {
                let s_max = BracketParams {
                    max_epochs,
                    factor,
                    bracket: 0,
                }
                .s_max();
                for bracket in 0..=s_max {
                    let params = BracketParams::new(max_epochs, factor, bracket).unwrap();
                    let total: u64 = (0..params.rounds())
                        .map(|rd| params.marginal_epochs(rd))
                        .sum();
                    assert_eq!(total, params.cumulative_epochs(params.rounds() - 1));
                }
            }
        }
    }

    #[test]
    fn final_round_gets_full_budget() {
        // The last round of any bracket trains up to R total epochs.
        for bracket in 0..=2u32 {
            let params = BracketParams::new(27, 3, bracket).unwrap();
            assert_eq!(params.cumulative_epochs(params.rounds() - 1), 27);
        }
    }

    #[test]
    fn rejects_invalid_parameters() {
        assert!(BracketParams::new(9, 1, 0).is_err());
        assert!(BracketParams::new(0, 3, 0).is_err());
        // s_max = 2 for R=9, eta=3
        assert!(BracketParams::new(9, 3, 3).is_err());
        assert!(BracketParams::new(9, 3, 2).is_ok());
    }
}
