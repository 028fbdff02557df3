use serde::{Deserialize, Serialize};

/// Error statistics over a set of `(predicted, actual)` daily returns, both in
/// percent. Hit rates are fractions in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Metrics {
    pub mae: f64,
    pub rmse: f64,
    pub hit_rate_02: f64,
    pub hit_rate_05: f64,
    pub max_err: f64,
    /// Mean signed error; positive means the estimate ran hot.
    pub bias: f64,
    pub samples: usize,
}

impl Metrics {
    /// `None` when there is nothing to score.
    pub fn from_pairs(pairs: &[(f64, f64)]) -> Option<Self> {
        let errors: Vec<f64> = pairs
            .iter()
            .map(|(predicted, actual)| predicted - actual)
            .filter(|e| e.is_finite())
            .collect();
        if errors.is_empty() {
            return None;
        }
        let n = errors.len() as f64;
        let abs = || errors.iter().map(|e| e.abs());
        let hit_rate = |threshold: f64| abs().filter(|e| *e <= threshold).count() as f64 / n;

        Some(Self {
            mae: abs().sum::<f64>() / n,
            rmse: (errors.iter().map(|e| e * e).sum::<f64>() / n).sqrt(),
            hit_rate_02: hit_rate(0.2),
            hit_rate_05: hit_rate(0.5),
            max_err: abs().fold(0.0, f64::max),
            bias: errors.iter().sum::<f64>() / n,
            samples: errors.len(),
        })
    }
}
