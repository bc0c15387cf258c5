//! Cost functions comparing a target vector with a network output.

use serde::{Deserialize, Serialize};

/// Cost functions resolvable by name in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Cost {
    /// Mean squared error.
    #[default]
    Mse,
    /// Mean absolute error.
    Mae,
    /// Mean absolute percentage error.
    Mape,
    /// Mean squared logarithmic error.
    Msle,
    /// Cross entropy for outputs in (0, 1).
    CrossEntropy,
    /// Fraction of outputs on the wrong side of 0.5.
    Binary,
    /// Hinge loss for targets in {-1, 1}.
    Hinge,
}

impl Cost {
    /// Compute the cost of `output` against `target`.
    ///
    /// Both slices must have the same length; extra elements of the longer
    /// slice are ignored.
    #[must_use]
    pub fn calculate(self, target: &[f32], output: &[f32]) -> f32 {
        let n = target.len().min(output.len());
        if n == 0 {
            return 0.0;
        }
        let pairs = target.iter().zip(output.iter()).take(n);

        let sum: f32 = match self {
            Self::Mse => pairs.map(|(t, o)| (t - o).powi(2)).sum(),
            Self::Mae => pairs.map(|(t, o)| (t - o).abs()).sum(),
            Self::Mape => pairs
                .map(|(t, o)| ((o - t) / t.abs().max(1e-15)).abs())
                .sum(),
            Self::Msle => pairs
                .map(|(t, o)| {
                    let lt = t.max(1e-15).ln_1p();
                    let lo = o.max(1e-15).ln_1p();
                    (lt - lo).powi(2)
                })
                .sum(),
            Self::CrossEntropy => pairs
                .map(|(t, o)| {
                    let o = o.clamp(1e-15, 1.0 - 1e-7);
                    -(t * o.ln() + (1.0 - t) * (1.0 - o).ln())
                })
                .sum(),
            Self::Binary => pairs
                .map(|(t, o)| {
                    if (t * 2.0).round() != (o * 2.0).round() {
                        1.0
                    } else {
                        0.0
                    }
                })
                .sum(),
            Self::Hinge => pairs.map(|(t, o)| (1.0 - t * o).max(0.0)).sum(),
        };

        sum / n as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mse() {
        let err = Cost::Mse.calculate(&[1.0, 0.0], &[0.5, 0.5]);
        assert!((err - 0.25).abs() < 1e-6);
        assert!(Cost::Mse.calculate(&[0.3], &[0.3]).abs() < 1e-9);
    }

    #[test]
    fn test_mae() {
        let err = Cost::Mae.calculate(&[1.0, -1.0], &[0.0, 0.0]);
        assert!((err - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cross_entropy_prefers_confident_correct() {
        let good = Cost::CrossEntropy.calculate(&[1.0], &[0.99]);
        let bad = Cost::CrossEntropy.calculate(&[1.0], &[0.01]);
        assert!(good < bad);
        assert!(good.is_finite() && bad.is_finite());
    }

    #[test]
    fn test_hinge() {
        assert!(Cost::Hinge.calculate(&[1.0], &[2.0]).abs() < 1e-6);
        assert!((Cost::Hinge.calculate(&[1.0], &[0.0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_empty_is_zero() {
        assert_eq!(Cost::Mse.calculate(&[], &[]), 0.0);
    }

    #[test]
    fn test_serde_name() {
        let parsed: Cost = serde_json::from_str("\"CROSS_ENTROPY\"").unwrap();
        assert_eq!(parsed, Cost::CrossEntropy);
    }
}
