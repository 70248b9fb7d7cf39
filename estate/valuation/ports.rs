//! Capability contracts between the orchestrators and their collaborators.
//!
//! Data loading, model tracking, and the regression backend all plug in here.

use std::{fmt, path::Path, sync::Arc};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    dataset::Dataset,
    error::ValuationResult,
    property::{Property, FEATURE_COUNT},
    validation::ValidationReport,
};

/// One model input row, ordered as [`crate::property::FEATURE_COLUMNS`].
pub type FeatureVector = [f64; FEATURE_COUNT];

/// A fitted model. The algorithm behind it is opaque to the core.
pub trait Regressor: Send + Sync + fmt::Debug {
    /// Predicts one value per input row, in order.
    fn predict(&self, rows: &[FeatureVector]) -> anyhow::Result<Vec<f64>>;

    /// Short algorithm name used in logs.
    fn algorithm(&self) -> &str {
        "regressor"
    }
}

/// Shared handle to a fitted model.
pub type ModelHandle = Arc<dyn Regressor>;

/// Tree-ensemble hyperparameters plus split settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Hyperparameters {
    /// Number of estimators.
    pub n_estimators: u32,
    /// Maximum tree depth.
    pub max_depth: u32,
    /// Seed for splitting and fitting.
    pub random_state: u64,
    /// Fraction of rows held out for evaluation.
    pub test_size: f64,
}

impl Hyperparameters {
    /// Estimator count and depth with default split settings.
    #[must_use]
    pub fn new(n_estimators: u32, max_depth: u32) -> Self {
        Self {
            n_estimators,
            max_depth,
            ..Self::default()
        }
    }

    /// Flat parameter map as recorded by model repositories.
    #[must_use]
    pub fn to_params(&self) -> IndexMap<String, String> {
        IndexMap::from([
            ("n_estimators".to_string(), self.n_estimators.to_string()),
            ("max_depth".to_string(), self.max_depth.to_string()),
            ("random_state".to_string(), self.random_state.to_string()),
            ("test_size".to_string(), self.test_size.to_string()),
        ])
    }
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: 5,
            random_state: 42,
            test_size: 0.2,
        }
    }
}

/// Evaluation metrics as reported by a training backend. Only RMSE is mandatory.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// Root mean squared error.
    pub rmse: f64,
    /// Mean absolute error.
    #[serde(default)]
    pub mae: Option<f64>,
    /// Coefficient of determination.
    #[serde(default)]
    pub r2: Option<f64>,
    /// Mean squared error.
    #[serde(default)]
    pub mse: Option<f64>,
    /// Mean absolute percentage error, in percent.
    #[serde(default)]
    pub mape: Option<f64>,
}

impl Metrics {
    /// Metrics carrying RMSE only.
    #[must_use]
    pub const fn rmse_only(rmse: f64) -> Self {
        Self {
            rmse,
            mae: None,
            r2: None,
            mse: None,
            mape: None,
        }
    }

    /// Named view of the reported metrics, skipping absent ones.
    #[must_use]
    pub fn to_map(&self) -> IndexMap<String, f64> {
        let mut map = IndexMap::from([("rmse".to_string(), self.rmse)]);
        let optional = [
            ("mae", self.mae),
            ("r2", self.r2),
            ("mse", self.mse),
            ("mape", self.mape),
        ];
        for (name, value) in optional {
            if let Some(value) = value {
                map.insert(name.to_string(), value);
            }
        }
        map
    }
}

/// Where a saved model ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelReceipt {
    /// Opaque model URI.
    pub uri: String,
    /// Experiment the run was filed under.
    pub experiment_id: String,
    /// Run identifier.
    pub run_id: String,
}

/// What a training backend hands back after a run.
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    /// The fitted model.
    pub model: ModelHandle,
    /// Persisted location of the model.
    pub receipt: ModelReceipt,
    /// Evaluation metrics on the held-out split.
    pub metrics: Metrics,
    /// Rows used for fitting.
    pub n_train_samples: Option<usize>,
    /// Rows used for evaluation.
    pub n_test_samples: Option<usize>,
    /// Feature count.
    pub n_features: Option<usize>,
}

/// Source of raw tabular data.
pub trait DataRepository: Send + Sync {
    /// Reads a dataset; fails with a data-access error when unreadable or malformed.
    fn load_data(&self, path: &Path) -> ValuationResult<Dataset>;

    /// Cleans and encodes a dataset into model features and sale-price target.
    fn preprocess_data(&self, dataset: &Dataset) -> ValuationResult<(Vec<FeatureVector>, Vec<f64>)>;
}

/// Experiment-tracking model store.
pub trait ModelRepository: Send + Sync {
    /// Selects (creating if needed) an experiment and returns its identifier.
    fn set_experiment(&self, name: &str) -> ValuationResult<String>;

    /// Files a new run under `experiment`; runs accumulate, never overwrite.
    fn save_model(
        &self,
        experiment: &str,
        model: ModelHandle,
        params: &Hyperparameters,
        metrics: &Metrics,
    ) -> ValuationResult<ModelReceipt>;

    /// Resolves a model by URI.
    fn load_model(&self, uri: &str) -> ValuationResult<ModelHandle>;

    /// Best model across all runs carrying `metric`.
    fn get_best_model(&self, metric: &str) -> ValuationResult<ModelHandle>;
}

/// Backend able to fit and score models.
pub trait ModelTrainingService: Send + Sync {
    /// Trains on the dataset at `path`, persisting the run under `experiment`.
    fn train_model(
        &self,
        path: &Path,
        hyperparameters: &Hyperparameters,
        experiment: &str,
    ) -> ValuationResult<TrainingOutcome>;

    /// Scores a model against held-out rows.
    fn evaluate_model(
        &self,
        model: &dyn Regressor,
        features: &[FeatureVector],
        target: &[f64],
    ) -> ValuationResult<Metrics>;
}

/// Backend answering price queries.
pub trait PredictionService: Send + Sync {
    /// Price for one property.
    fn predict_price(&self, property: &Property) -> ValuationResult<f64>;

    /// Prices for many properties, in input order, with a single model load.
    fn predict_batch(&self, properties: &[Property]) -> ValuationResult<Vec<f64>>;

    /// Service-level domain rules; may be stricter than the input validator.
    fn validate_property(&self, property: &Property) -> ValidationReport;

    /// Version tag of the serving model, when the backend knows it.
    fn model_version(&self) -> Option<String> {
        None
    }

    /// Drops any cached model so the next call reloads.
    fn reset_model(&self) {}
}
