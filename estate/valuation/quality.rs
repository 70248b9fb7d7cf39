//! Qualitative model tiers and RMSE-based estimates for metrics a backend did not report.
//!
//! Every constant here is expressed in the currency of the training data; the defaults
//! assume sale prices in the hundreds of thousands.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A metric that is either measured by the backend or estimated from RMSE.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricValue {
    /// The number.
    pub value: f64,
    /// True when derived from a heuristic rather than measured.
    pub estimated: bool,
}

impl MetricValue {
    /// Value reported by the backend.
    #[must_use]
    pub const fn measured(value: f64) -> Self {
        Self {
            value,
            estimated: false,
        }
    }

    /// Value derived from a heuristic.
    #[must_use]
    pub const fn estimated(value: f64) -> Self {
        Self {
            value,
            estimated: true,
        }
    }

    /// Marker appended when rendering estimated values.
    #[must_use]
    pub const fn marker(&self) -> &'static str {
        if self.estimated {
            " (*estimated)"
        } else {
            ""
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match f.precision() {
            Some(precision) => write!(f, "{:.*}{}", precision, self.value, self.marker()),
            None => write!(f, "{}{}", self.value, self.marker()),
        }
    }
}

/// One RMSE band of the R² estimation table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct R2Band {
    /// Exclusive upper RMSE bound of the band.
    pub rmse_below: f64,
    /// R² assumed inside the band.
    pub r2: f64,
}

/// Heuristics used when a backend only reports RMSE.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimationPolicy {
    /// MAE assumed as a fraction of RMSE.
    pub mae_ratio: f64,
    /// Bands checked in order; must be ascending in `rmse_below`.
    pub r2_bands: Vec<R2Band>,
    /// R² assumed when RMSE exceeds every band.
    pub r2_floor: f64,
}

impl Default for EstimationPolicy {
    fn default() -> Self {
        Self {
            mae_ratio: 0.7,
            r2_bands: vec![
                R2Band {
                    rmse_below: 80_000.0,
                    r2: 0.85,
                },
                R2Band {
                    rmse_below: 120_000.0,
                    r2: 0.75,
                },
                R2Band {
                    rmse_below: 180_000.0,
                    r2: 0.65,
                },
            ],
            r2_floor: 0.55,
        }
    }
}

impl EstimationPolicy {
    /// MAE estimate for `rmse`.
    #[must_use]
    pub fn estimate_mae(&self, rmse: f64) -> f64 {
        self.mae_ratio * rmse
    }

    /// R² estimate for `rmse` from the band table.
    #[must_use]
    pub fn estimate_r2(&self, rmse: f64) -> f64 {
        self.r2_bands
            .iter()
            .find(|band| rmse < band.rmse_below)
            .map_or(self.r2_floor, |band| band.r2)
    }

    /// Reported MAE, or the tagged estimate when absent.
    #[must_use]
    pub fn resolve_mae(&self, rmse: f64, reported: Option<f64>) -> MetricValue {
        reported.map_or_else(
            || MetricValue::estimated(self.estimate_mae(rmse)),
            MetricValue::measured,
        )
    }

    /// Reported R², or the tagged estimate when absent.
    #[must_use]
    pub fn resolve_r2(&self, rmse: f64, reported: Option<f64>) -> MetricValue {
        reported.map_or_else(
            || MetricValue::estimated(self.estimate_r2(rmse)),
            MetricValue::measured,
        )
    }

    /// Checks that bands ascend and values are finite.
    pub fn check(&self) -> Result<(), String> {
        if !(self.mae_ratio.is_finite() && self.mae_ratio > 0.0) {
            return Err(format!("mae_ratio must be positive, got {}", self.mae_ratio));
        }
        if self
            .r2_bands
            .windows(2)
            .any(|pair| pair[0].rmse_below >= pair[1].rmse_below)
        {
            return Err("r2_bands must be strictly ascending in rmse_below".into());
        }
        Ok(())
    }
}

/// Qualitative model grade, best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    /// Production ready.
    Excellent,
    /// Usable with monitoring.
    Good,
    /// Usable for rough estimates.
    Acceptable,
    /// Should not serve predictions yet.
    NeedsImprovement,
}

impl QualityTier {
    /// Display label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Excellent => "Excellent",
            Self::Good => "Good",
            Self::Acceptable => "Acceptable",
            Self::NeedsImprovement => "Needs improvement",
        }
    }

    /// Fixed recommendation attached to the tier.
    #[must_use]
    pub const fn recommendation(self) -> &'static str {
        match self {
            Self::Excellent => "Model is ready for production use.",
            Self::Good => "Model is suitable for production with periodic monitoring.",
            Self::Acceptable => {
                "Model can support rough estimates; consider tuning before relying on it."
            }
            Self::NeedsImprovement => {
                "Model needs improvement: review data quality, features, and hyperparameters."
            }
        }
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Joint thresholds a model must meet to earn a tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierThreshold {
    /// Tier granted.
    pub tier: QualityTier,
    /// Minimum R² (inclusive).
    pub min_r2: f64,
    /// RMSE must be strictly below.
    pub max_rmse: f64,
    /// MAE must be strictly below.
    pub max_mae: f64,
}

impl TierThreshold {
    fn admits(&self, rmse: f64, mae: f64, r2: f64) -> bool {
        r2 >= self.min_r2 && rmse < self.max_rmse && mae < self.max_mae
    }
}

/// Verdict for a set of metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityAssessment {
    /// Tier earned.
    pub tier: QualityTier,
    /// Fixed recommendation of the tier.
    pub recommendation: String,
    /// Metric-driven improvement ideas.
    pub suggestions: Vec<String>,
}

/// Ordered tier table, checked best first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityPolicy {
    /// Thresholds for every tier above `NeedsImprovement`, best first.
    pub tiers: Vec<TierThreshold>,
}

impl Default for QualityPolicy {
    fn default() -> Self {
        Self {
            tiers: vec![
                TierThreshold {
                    tier: QualityTier::Excellent,
                    min_r2: 0.90,
                    max_rmse: 50_000.0,
                    max_mae: 30_000.0,
                },
                TierThreshold {
                    tier: QualityTier::Good,
                    min_r2: 0.80,
                    max_rmse: 80_000.0,
                    max_mae: 50_000.0,
                },
                TierThreshold {
                    tier: QualityTier::Acceptable,
                    min_r2: 0.70,
                    max_rmse: 120_000.0,
                    max_mae: 80_000.0,
                },
            ],
        }
    }
}

impl QualityPolicy {
    /// First tier whose thresholds all hold; `NeedsImprovement` otherwise.
    #[must_use]
    pub fn tier(&self, rmse: f64, mae: f64, r2: f64) -> QualityTier {
        self.tiers
            .iter()
            .find(|threshold| threshold.admits(rmse, mae, r2))
            .map_or(QualityTier::NeedsImprovement, |threshold| threshold.tier)
    }

    /// Tier implied by R² alone, using each tier's `min_r2`.
    #[must_use]
    pub fn tier_for_r2(&self, r2: f64) -> QualityTier {
        self.tiers
            .iter()
            .find(|threshold| r2 >= threshold.min_r2)
            .map_or(QualityTier::NeedsImprovement, |threshold| threshold.tier)
    }

    /// Tier, recommendation, and suggestions.
    #[must_use]
    pub fn assess(&self, rmse: f64, mae: f64, r2: f64) -> QualityAssessment {
        let tier = self.tier(rmse, mae, r2);
        QualityAssessment {
            tier,
            recommendation: tier.recommendation().to_string(),
            suggestions: self.suggestions(rmse, mae, r2),
        }
    }

    fn suggestions(&self, rmse: f64, mae: f64, r2: f64) -> Vec<String> {
        let Some(floor) = self.tiers.last() else {
            return Vec::new();
        };
        let mut suggestions = Vec::new();
        if r2 < floor.min_r2 {
            suggestions.push(format!(
                "R² {r2:.2} is below {:.2}: add explanatory features (location, age, condition) or more training rows.",
                floor.min_r2
            ));
        }
        if rmse >= floor.max_rmse {
            suggestions.push(
                "RMSE is high: run a hyperparameter sweep with deeper trees and more estimators."
                    .into(),
            );
        }
        if mae >= floor.max_mae {
            suggestions.push(
                "Typical errors are large: check for outliers and unit inconsistencies in sale prices."
                    .into(),
            );
        }
        if rmse > 0.0 && mae / rmse < 0.5 {
            suggestions.push(
                "RMSE is dominated by a few large errors: consider filtering extreme sale prices."
                    .into(),
            );
        }
        if r2 > 0.98 {
            suggestions.push(
                "R² is suspiciously high: verify the target is not leaking into the features."
                    .into(),
            );
        }
        suggestions
    }
}

/// Assesses metrics against the default tier table.
#[must_use]
pub fn assess_model_quality(rmse: f64, mae: f64, r2: f64) -> QualityAssessment {
    QualityPolicy::default().assess(rmse, mae, r2)
}
