use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    dataset::ColumnMapping,
    error::{ValuationError, ValuationResult},
    ports::Hyperparameters,
    quality::{EstimationPolicy, QualityPolicy},
    training::{advisor::AdvisorPolicy, sweep::SweepMode},
    validation::ValidationThresholds,
};

/// Every tunable of the valuation core. All sections are optional in TOML.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValuationConfig {
    /// Warning bands for property inputs.
    pub validation: ValidationThresholds,
    /// RMSE-based metric estimation.
    pub estimation: EstimationPolicy,
    /// Quality tier table.
    pub quality: QualityPolicy,
    /// Defaults for single training runs.
    pub training: TrainingDefaults,
    /// Hyperparameter sweep menu and execution mode.
    pub sweep: SweepConfig,
    /// Training recommendation thresholds.
    pub advisor: AdvisorPolicy,
    /// Dataset column names.
    pub columns: ColumnMapping,
}

/// Defaults applied when a caller does not specify training settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingDefaults {
    /// Experiment name runs are filed under.
    pub experiment_name: String,
    /// Hyperparameters for a single run.
    pub hyperparameters: Hyperparameters,
    /// R² below which `execute_with_validation` adds warnings.
    pub min_r2: f64,
    /// Metric used to pick the serving model.
    pub selection_metric: String,
}

impl Default for TrainingDefaults {
    fn default() -> Self {
        Self {
            experiment_name: "real_estate_valuation".into(),
            hyperparameters: Hyperparameters::default(),
            min_r2: 0.7,
            selection_metric: "rmse".into(),
        }
    }
}

/// Sweep menu plus execution mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// `(n_estimators, max_depth)` pairs tried in order.
    pub menu: Vec<(u32, u32)>,
    /// Sequential or worker-thread execution.
    pub mode: SweepMode,
}

/// Seven combinations from conservative to aggressive model complexity.
pub const DEFAULT_SWEEP_MENU: [(u32, u32); 7] = [
    (50, 3),
    (100, 5),
    (100, 10),
    (200, 8),
    (200, 15),
    (300, 10),
    (500, 20),
];

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            menu: DEFAULT_SWEEP_MENU.to_vec(),
            mode: SweepMode::Sequential,
        }
    }
}

impl ValuationConfig {
    /// Loads and checks a TOML file.
    pub fn load(path: impl AsRef<Path>) -> ValuationResult<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|err| {
            ValuationError::Config(format!("reading {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&raw)
            .map_err(|err| ValuationError::Config(format!("{}: {err}", path.display())))
    }

    /// Parses and checks TOML text.
    pub fn from_toml_str(raw: &str) -> ValuationResult<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|err| ValuationError::Config(err.to_string()))?;
        config.check()?;
        Ok(config)
    }

    /// Rejects internally inconsistent settings.
    pub fn check(&self) -> ValuationResult<()> {
        self.estimation.check().map_err(ValuationError::Config)?;
        if self.sweep.menu.is_empty() {
            return Err(ValuationError::Config("sweep menu is empty".into()));
        }
        if let SweepMode::Parallel { workers: 0 } = self.sweep.mode {
            return Err(ValuationError::Config(
                "parallel sweep needs at least one worker".into(),
            ));
        }
        if self.training.selection_metric.trim().is_empty() {
            return Err(ValuationError::Config("selection_metric is empty".into()));
        }
        let split = self.training.hyperparameters.test_size;
        if !(split > 0.0 && split < 1.0) {
            return Err(ValuationError::Config(format!(
                "test_size must be in (0, 1), got {split}"
            )));
        }
        if self
            .advisor
            .size_tiers
            .windows(2)
            .any(|pair| pair[0].max_rows >= pair[1].max_rows)
        {
            return Err(ValuationError::Config(
                "advisor size tiers must be ascending in max_rows".into(),
            ));
        }
        Ok(())
    }

    /// Sweep menu expanded into full hyperparameter sets.
    #[must_use]
    pub fn sweep_menu(&self) -> Vec<Hyperparameters> {
        let base = self.training.hyperparameters;
        self.sweep
            .menu
            .iter()
            .map(|&(n_estimators, max_depth)| Hyperparameters {
                n_estimators,
                max_depth,
                ..base
            })
            .collect()
    }
}
