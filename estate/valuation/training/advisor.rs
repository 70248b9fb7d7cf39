use std::{path::Path, sync::Arc};

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    config::ValuationConfig,
    dataset::Dataset,
    ports::{DataRepository, Hyperparameters},
    telemetry::ValuationTelemetry,
};

/// Complexity tier of a training recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyTier {
    /// Small data, shallow models.
    Conservative,
    /// Mid-sized data.
    Standard,
    /// Large data.
    Complex,
    /// Very large data.
    Robust,
}

impl StrategyTier {
    /// Lowercase label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Conservative => "conservative",
            Self::Standard => "standard",
            Self::Complex => "complex",
            Self::Robust => "robust",
        }
    }
}

/// What a tier recommends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierPlan {
    /// Tier name.
    pub strategy: StrategyTier,
    /// Recommended estimators.
    pub n_estimators: u32,
    /// Recommended depth.
    pub max_depth: u32,
    /// Human label for the dataset size.
    pub size_category: String,
    /// Rough training time.
    pub expected_time: String,
    /// Rough memory footprint.
    pub memory_tier: String,
}

impl TierPlan {
    fn new(
        strategy: StrategyTier,
        (n_estimators, max_depth): (u32, u32),
        size_category: &str,
        expected_time: &str,
        memory_tier: &str,
    ) -> Self {
        Self {
            strategy,
            n_estimators,
            max_depth,
            size_category: size_category.into(),
            expected_time: expected_time.into(),
            memory_tier: memory_tier.into(),
        }
    }
}

/// A plan for datasets with fewer than `max_rows` rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeTier {
    /// Exclusive row bound.
    pub max_rows: usize,
    /// Plan applied below the bound.
    #[serde(flatten)]
    pub plan: TierPlan,
}

/// Thresholds used by [`TrainingAdvisor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvisorPolicy {
    /// Bounded tiers, ascending by `max_rows`.
    pub size_tiers: Vec<SizeTier>,
    /// Plan for datasets above every bound.
    pub fallback: TierPlan,
    /// Target column names, in preference order.
    pub target_candidates: Vec<String>,
    /// Assessed-value column names, in preference order.
    pub assessed_candidates: Vec<String>,
    /// Coefficient of variation above which prices count as highly variable.
    pub variability_cv: f64,
    /// Share of sale == assessed rows above which data counts as synthetic.
    pub synthetic_ratio: f64,
    /// Estimator cap applied to synthetic-looking data.
    pub synthetic_estimator_cap: u32,
}

impl Default for AdvisorPolicy {
    fn default() -> Self {
        Self {
            size_tiers: vec![
                SizeTier {
                    max_rows: 1_000,
                    plan: TierPlan::new(
                        StrategyTier::Conservative,
                        (100, 5),
                        "small",
                        "< 1 minute",
                        "low",
                    ),
                },
                SizeTier {
                    max_rows: 10_000,
                    plan: TierPlan::new(
                        StrategyTier::Standard,
                        (200, 10),
                        "medium",
                        "1-5 minutes",
                        "moderate",
                    ),
                },
                SizeTier {
                    max_rows: 50_000,
                    plan: TierPlan::new(
                        StrategyTier::Complex,
                        (300, 15),
                        "large",
                        "5-15 minutes",
                        "high",
                    ),
                },
            ],
            fallback: TierPlan::new(
                StrategyTier::Robust,
                (500, 20),
                "very large",
                "15+ minutes",
                "very high",
            ),
            target_candidates: ["Sale Amount", "sale_amount", "SalePrice", "sale_price", "price"]
                .map(String::from)
                .to_vec(),
            assessed_candidates: ["Assessed Value", "assessed_value"].map(String::from).to_vec(),
            variability_cv: 2.0,
            synthetic_ratio: 0.5,
            synthetic_estimator_cap: 150,
        }
    }
}

impl AdvisorPolicy {
    /// Plan for a dataset of `rows` rows.
    #[must_use]
    pub fn plan_for(&self, rows: usize) -> &TierPlan {
        self.size_tiers
            .iter()
            .find(|tier| rows < tier.max_rows)
            .map_or(&self.fallback, |tier| &tier.plan)
    }
}

/// Dataset-derived training advice. Never produced by training.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendations {
    /// Rows inspected.
    pub dataset_size: usize,
    /// Columns inspected.
    pub n_columns: usize,
    /// Missing cells.
    pub null_cells: usize,
    /// Chosen tier.
    pub strategy: StrategyTier,
    /// Recommended estimators, after caps.
    pub n_estimators: u32,
    /// Recommended depth.
    pub max_depth: u32,
    /// Human label for the dataset size.
    pub size_category: String,
    /// Rough training time.
    pub expected_time: String,
    /// Rough memory footprint.
    pub memory_tier: String,
    /// Detected target column.
    pub target_column: Option<String>,
    /// Coefficient of variation of the target.
    pub price_cv: Option<f64>,
    /// True when `price_cv` exceeds the policy threshold.
    pub high_variability: bool,
    /// Share of rows whose sale price equals the assessed value.
    pub synthetic_ratio: Option<f64>,
    /// True when `synthetic_ratio` exceeds the policy threshold.
    pub synthetic_data_detected: bool,
    /// Informational notes.
    pub notes: Vec<String>,
    /// Data quality warnings.
    pub warnings: Vec<String>,
    /// True when the dataset could not be inspected.
    pub is_default: bool,
}

impl Recommendations {
    /// Recommendation used when the dataset cannot be read.
    #[must_use]
    pub fn fallback(reason: &str) -> Self {
        let defaults = Hyperparameters::default();
        Self {
            dataset_size: 0,
            n_columns: 0,
            null_cells: 0,
            strategy: StrategyTier::Conservative,
            n_estimators: defaults.n_estimators,
            max_depth: defaults.max_depth,
            size_category: "unknown".into(),
            expected_time: "unknown".into(),
            memory_tier: "unknown".into(),
            target_column: None,
            price_cv: None,
            high_variability: false,
            synthetic_ratio: None,
            synthetic_data_detected: false,
            notes: vec![format!(
                "dataset could not be inspected ({reason}); using default hyperparameters"
            )],
            warnings: Vec::new(),
            is_default: true,
        }
    }

    /// Recommended hyperparameters with default split settings.
    #[must_use]
    pub fn hyperparameters(&self) -> Hyperparameters {
        Hyperparameters::new(self.n_estimators, self.max_depth)
    }
}

/// Inspects a dataset and suggests training settings.
pub struct TrainingAdvisor {
    data: Arc<dyn DataRepository>,
    policy: AdvisorPolicy,
    telemetry: ValuationTelemetry,
}

impl TrainingAdvisor {
    /// Advisor with the default policy.
    #[must_use]
    pub fn new(data: Arc<dyn DataRepository>) -> Self {
        Self::with_policy(data, AdvisorPolicy::default())
    }

    /// Advisor with a custom policy.
    #[must_use]
    pub fn with_policy(data: Arc<dyn DataRepository>, policy: AdvisorPolicy) -> Self {
        Self {
            data,
            policy,
            telemetry: ValuationTelemetry::tracing_only("advisor"),
        }
    }

    /// Advisor with the `[advisor]` section of `config`.
    #[must_use]
    pub fn from_config(data: Arc<dyn DataRepository>, config: &ValuationConfig) -> Self {
        Self::with_policy(data, config.advisor.clone())
    }

    /// Replaces the telemetry handle.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: &ValuationTelemetry) -> Self {
        self.telemetry = telemetry.scoped("advisor");
        self
    }

    /// Recommendations for the dataset at `path`; falls back to defaults when unreadable.
    pub fn get_training_recommendations(&self, path: &Path) -> Recommendations {
        match self.data.load_data(path) {
            Ok(dataset) => {
                let recommendations = self.recommend(&dataset);
                self.telemetry.info(
                    "advisor.recommended",
                    json!({
                        "rows": recommendations.dataset_size,
                        "strategy": recommendations.strategy.label(),
                        "n_estimators": recommendations.n_estimators,
                        "max_depth": recommendations.max_depth,
                        "synthetic": recommendations.synthetic_data_detected,
                    }),
                );
                recommendations
            }
            Err(err) => {
                self.telemetry.warn(
                    "advisor.load_failed",
                    json!({ "path": path.display().to_string(), "error": err.to_string() }),
                );
                Recommendations::fallback(&err.to_string())
            }
        }
    }

    /// Recommendations for an already loaded dataset.
    #[must_use]
    pub fn recommend(&self, dataset: &Dataset) -> Recommendations {
        let profile = dataset.profile();
        let plan = self.policy.plan_for(profile.rows);
        let mut recommendations = Recommendations {
            dataset_size: profile.rows,
            n_columns: profile.columns,
            null_cells: profile.null_cells,
            strategy: plan.strategy,
            n_estimators: plan.n_estimators,
            max_depth: plan.max_depth,
            size_category: plan.size_category.clone(),
            expected_time: plan.expected_time.clone(),
            memory_tier: plan.memory_tier.clone(),
            target_column: None,
            price_cv: None,
            high_variability: false,
            synthetic_ratio: None,
            synthetic_data_detected: false,
            notes: vec![format!(
                "{} rows: {} strategy ({} estimators, depth {})",
                profile.rows,
                plan.strategy.label(),
                plan.n_estimators,
                plan.max_depth
            )],
            warnings: Vec::new(),
            is_default: false,
        };
        if profile.null_cells > 0 {
            recommendations.notes.push(format!(
                "{} missing cells; incomplete rows are dropped before training",
                profile.null_cells
            ));
        }

        let target = find(dataset, &self.policy.target_candidates);
        let Some(target) = target else {
            recommendations
                .warnings
                .push("no sale price column found; training will fail on this dataset".into());
            return recommendations;
        };
        let prices = dataset.numeric_column(&target).unwrap_or_default();
        recommendations.target_column = Some(target);

        recommendations.price_cv = coefficient_of_variation(prices.iter().flatten().copied());
        if let Some(cv) = recommendations.price_cv {
            if cv > self.policy.variability_cv {
                recommendations.high_variability = true;
                recommendations.warnings.push(format!(
                    "sale prices are highly variable (CV {cv:.2}); consider a log transform or removing outliers"
                ));
            }
        }

        if let Some(assessed) = find(dataset, &self.policy.assessed_candidates) {
            let assessed = dataset.numeric_column(&assessed).unwrap_or_default();
            recommendations.synthetic_ratio = synthetic_share(&prices, &assessed);
        }
        if let Some(ratio) = recommendations.synthetic_ratio {
            if ratio > self.policy.synthetic_ratio {
                recommendations.synthetic_data_detected = true;
                recommendations.n_estimators = recommendations
                    .n_estimators
                    .min(self.policy.synthetic_estimator_cap);
                recommendations.warnings.push(format!(
                    "{:.0}% of rows have a sale price equal to the assessed value; filter these synthetic rows before training",
                    ratio * 100.0
                ));
            }
        }
        recommendations
    }
}

fn find(dataset: &Dataset, candidates: &[String]) -> Option<String> {
    let candidates: Vec<&str> = candidates.iter().map(String::as_str).collect();
    dataset.find_column(&candidates).map(str::to_string)
}

#[allow(clippy::cast_precision_loss)]
fn coefficient_of_variation(values: impl Iterator<Item = f64> + Clone) -> Option<f64> {
    let count = values.clone().count();
    if count == 0 {
        return None;
    }
    let mean = values.clone().sum::<f64>() / count as f64;
    if mean.abs() <= f64::EPSILON {
        return None;
    }
    let variance = values.map(|value| (value - mean).powi(2)).sum::<f64>() / count as f64;
    Some(variance.sqrt() / mean.abs())
}

#[allow(clippy::cast_precision_loss, clippy::float_cmp)]
fn synthetic_share(prices: &[Option<f64>], assessed: &[Option<f64>]) -> Option<f64> {
    let pairs: Vec<(f64, f64)> = prices
        .iter()
        .zip(assessed)
        .filter_map(|(price, assessed)| Some(((*price)?, (*assessed)?)))
        .collect();
    if pairs.is_empty() {
        return None;
    }
    let matching = pairs.iter().filter(|(price, assessed)| price == assessed).count();
    Some(matching as f64 / pairs.len() as f64)
}
