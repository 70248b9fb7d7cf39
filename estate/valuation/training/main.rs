//! Training orchestration: one run, metric completion, and quality verdicts.

/// Dataset inspection and hyperparameter recommendations.
pub mod advisor;
/// Bagged regression-tree estimator.
pub mod forest;
/// Regression metrics and seeded splitting.
pub mod metrics;
/// Hyperparameter sweep over a fixed menu.
pub mod sweep;
/// Reference training backend.
pub mod trainer;

use std::{path::Path, sync::Arc, time::Instant};

use estate_journal::JournalLevel;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::json;

use crate::{
    config::{TrainingDefaults, ValuationConfig},
    error::{ValuationError, ValuationResult},
    ports::{Hyperparameters, ModelRepository, ModelTrainingService},
    quality::{EstimationPolicy, MetricValue, QualityAssessment, QualityPolicy},
    telemetry::ValuationTelemetry,
};

/// Serde adapter for RMSE fields: a failed run's infinite RMSE travels as `null`.
pub(crate) mod failed_rmse {
    use super::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::trivially_copy_pass_by_ref)]
    pub fn serialize<S: Serializer>(rmse: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if rmse.is_finite() {
            serializer.serialize_some(rmse)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::INFINITY))
    }
}

/// Outcome of one training run. Failed runs carry an infinite RMSE and no MAE/R².
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingResult {
    /// URI of the persisted model; empty on failure.
    pub model_uri: String,
    /// Root mean squared error on the held-out split; `null` when serialized for a failed run.
    #[serde(with = "failed_rmse")]
    pub rmse: f64,
    /// Mean absolute error, measured or estimated.
    pub mae: Option<MetricValue>,
    /// Coefficient of determination, measured or estimated.
    pub r2_score: Option<MetricValue>,
    /// Mean squared error when reported.
    pub mse: Option<f64>,
    /// Mean absolute percentage error when reported.
    pub mape: Option<f64>,
    /// Estimators requested.
    pub n_estimators: u32,
    /// Depth requested.
    pub max_depth: u32,
    /// Experiment name the run was requested under.
    pub experiment_name: String,
    /// Registry identifier of that experiment; empty when the run never reached the registry.
    pub experiment_id: String,
    /// Run identifier; empty on failure.
    pub run_id: String,
    /// Rows used for fitting.
    pub n_train_samples: Option<usize>,
    /// Rows used for evaluation.
    pub n_test_samples: Option<usize>,
    /// Feature count.
    pub n_features: Option<usize>,
    /// Wall-clock duration.
    pub elapsed_secs: Option<f64>,
    /// False when any step failed.
    pub success: bool,
    /// Failure description.
    pub error_message: Option<String>,
    /// Advisory notes; never change `success`.
    pub warnings: Vec<String>,
    /// Quality verdict for successful runs.
    pub quality: Option<QualityAssessment>,
}

impl TrainingResult {
    /// Failed run for `hyperparameters` under `experiment_name`.
    #[must_use]
    pub fn failed(
        hyperparameters: &Hyperparameters,
        experiment_name: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            model_uri: String::new(),
            rmse: f64::INFINITY,
            mae: None,
            r2_score: None,
            mse: None,
            mape: None,
            n_estimators: hyperparameters.n_estimators,
            max_depth: hyperparameters.max_depth,
            experiment_name: experiment_name.into(),
            experiment_id: String::new(),
            run_id: String::new(),
            n_train_samples: None,
            n_test_samples: None,
            n_features: None,
            elapsed_secs: None,
            success: false,
            error_message: Some(error.into()),
            warnings: Vec::new(),
            quality: None,
        }
    }

    /// R² value of a successful run.
    #[must_use]
    pub fn r2(&self) -> Option<f64> {
        self.r2_score.filter(|_| self.success).map(|metric| metric.value)
    }

    /// True when the run may compete in a ranking.
    #[must_use]
    pub fn is_rankable(&self) -> bool {
        self.success && self.rmse.is_finite() && self.r2().is_some_and(f64::is_finite)
    }

    /// One-line summary for logs and reports.
    #[must_use]
    pub fn summary(&self) -> String {
        if !self.success {
            return format!(
                "{}: failed ({})",
                self.experiment_name,
                self.error_message.as_deref().unwrap_or("unknown error")
            );
        }
        let r2 = self
            .r2_score
            .map_or_else(|| "n/a".to_string(), |metric| format!("{metric:.3}"));
        format!(
            "{}: rmse {:.0}, r2 {r2}, {} estimators / depth {}",
            self.experiment_name, self.rmse, self.n_estimators, self.max_depth
        )
    }
}

/// Runs one training job against the ports and completes the metric set.
pub struct TrainModelUseCase {
    models: Arc<dyn ModelRepository>,
    trainer: Arc<dyn ModelTrainingService>,
    estimation: EstimationPolicy,
    quality: QualityPolicy,
    defaults: TrainingDefaults,
    telemetry: ValuationTelemetry,
}

impl TrainModelUseCase {
    /// Use case with default policies.
    #[must_use]
    pub fn new(models: Arc<dyn ModelRepository>, trainer: Arc<dyn ModelTrainingService>) -> Self {
        Self {
            models,
            trainer,
            estimation: EstimationPolicy::default(),
            quality: QualityPolicy::default(),
            defaults: TrainingDefaults::default(),
            telemetry: ValuationTelemetry::tracing_only("training"),
        }
    }

    /// Use case with the estimation, quality, and training sections of `config`.
    #[must_use]
    pub fn from_config(
        models: Arc<dyn ModelRepository>,
        trainer: Arc<dyn ModelTrainingService>,
        config: &ValuationConfig,
    ) -> Self {
        Self::new(models, trainer)
            .with_policies(config.estimation.clone(), config.quality.clone())
            .with_defaults(config.training.clone())
    }

    /// Replaces the settings used by [`Self::execute_default`].
    #[must_use]
    pub fn with_defaults(mut self, defaults: TrainingDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Experiment name, hyperparameters, and R² floor used when the caller gives none.
    #[must_use]
    pub const fn defaults(&self) -> &TrainingDefaults {
        &self.defaults
    }

    /// Replaces the estimation and quality policies.
    #[must_use]
    pub fn with_policies(mut self, estimation: EstimationPolicy, quality: QualityPolicy) -> Self {
        self.estimation = estimation;
        self.quality = quality;
        self
    }

    /// Replaces the telemetry handle.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: &ValuationTelemetry) -> Self {
        self.telemetry = telemetry.scoped("training");
        self
    }

    /// Telemetry handle, shared with sweeps built on this use case.
    #[must_use]
    pub const fn telemetry(&self) -> &ValuationTelemetry {
        &self.telemetry
    }

    /// Trains once. Never fails: errors become a failed [`TrainingResult`].
    pub fn execute(
        &self,
        path: &Path,
        hyperparameters: &Hyperparameters,
        experiment: &str,
    ) -> TrainingResult {
        let started = Instant::now();
        self.telemetry.info(
            "training.started",
            json!({
                "experiment": experiment,
                "path": path.display().to_string(),
                "n_estimators": hyperparameters.n_estimators,
                "max_depth": hyperparameters.max_depth,
            }),
        );
        let mut result = match self.try_execute(path, hyperparameters, experiment) {
            Ok(result) => result,
            Err(err) => {
                self.telemetry.emit(
                    JournalLevel::Error,
                    "training.failed",
                    json!({ "experiment": experiment, "error": err.to_string() }),
                );
                TrainingResult::failed(hyperparameters, experiment, err.to_string())
            }
        };
        result.elapsed_secs = Some(started.elapsed().as_secs_f64());
        if result.success {
            self.telemetry.info(
                "training.completed",
                json!({
                    "experiment": experiment,
                    "run_id": result.run_id,
                    "rmse": result.rmse,
                    "r2": result.r2(),
                    "r2_estimated": result.r2_score.is_some_and(|metric| metric.estimated),
                    "elapsed_secs": result.elapsed_secs,
                }),
            );
        }
        result
    }

    fn try_execute(
        &self,
        path: &Path,
        hyperparameters: &Hyperparameters,
        experiment: &str,
    ) -> ValuationResult<TrainingResult> {
        self.models.set_experiment(experiment)?;
        let outcome = self.trainer.train_model(path, hyperparameters, experiment)?;
        let rmse = outcome.metrics.rmse;
        if !rmse.is_finite() || rmse < 0.0 {
            return Err(ValuationError::Training(format!(
                "backend reported an unusable RMSE ({rmse})"
            )));
        }
        let mae = self.estimation.resolve_mae(rmse, outcome.metrics.mae);
        let r2 = self.estimation.resolve_r2(rmse, outcome.metrics.r2);
        if mae.estimated || r2.estimated {
            tracing::debug!(experiment, rmse, "completed missing metrics from RMSE");
        }
        let quality = self.quality.assess(rmse, mae.value, r2.value);

        Ok(TrainingResult {
            model_uri: outcome.receipt.uri,
            rmse,
            mae: Some(mae),
            r2_score: Some(r2),
            mse: outcome.metrics.mse,
            mape: outcome.metrics.mape,
            n_estimators: hyperparameters.n_estimators,
            max_depth: hyperparameters.max_depth,
            experiment_name: experiment.to_string(),
            experiment_id: outcome.receipt.experiment_id,
            run_id: outcome.receipt.run_id,
            n_train_samples: outcome.n_train_samples,
            n_test_samples: outcome.n_test_samples,
            n_features: outcome.n_features,
            elapsed_secs: None,
            success: true,
            error_message: None,
            warnings: Vec::new(),
            quality: Some(quality),
        })
    }

    /// Trains once, then adds advisory warnings when R² is below `min_r2`.
    pub fn execute_with_validation(
        &self,
        path: &Path,
        hyperparameters: &Hyperparameters,
        experiment: &str,
        min_r2: f64,
    ) -> TrainingResult {
        let mut result = self.execute(path, hyperparameters, experiment);
        let Some(r2) = result.r2_score.filter(|_| result.success) else {
            return result;
        };
        if r2.value < min_r2 {
            result.warnings.push(format!(
                "R² {r2:.3} is below the minimum threshold {min_r2:.2}"
            ));
            if r2.estimated {
                result.warnings.push(
                    "R² was estimated from RMSE; measure it on held-out data before relying on this check"
                        .into(),
                );
            }
            result.warnings.push(
                "consider a hyperparameter sweep or richer features before deploying this model"
                    .into(),
            );
            self.telemetry.warn(
                "training.below_threshold",
                json!({ "experiment": experiment, "r2": r2.value, "min_r2": min_r2 }),
            );
        }
        result
    }

    /// Trains once with the configured experiment, hyperparameters, and R² floor.
    pub fn execute_default(&self, path: &Path) -> TrainingResult {
        let defaults = &self.defaults;
        self.execute_with_validation(
            path,
            &defaults.hyperparameters,
            &defaults.experiment_name,
            defaults.min_r2,
        )
    }

    /// Quality verdict under this use case's tier table.
    #[must_use]
    pub fn assess_model_quality(&self, rmse: f64, mae: f64, r2: f64) -> QualityAssessment {
        self.quality.assess(rmse, mae, r2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        adapters::{CsvDataRepository, InMemoryModelRegistry},
        ports::Metrics,
        quality::QualityTier,
        testing::{write_listings, StubModelRepository, StubTrainingService},
        training::{forest::RandomForestFactory, trainer::RealEstateModelTrainer},
    };
    use tempfile::tempdir;

    fn use_case(trainer: StubTrainingService) -> TrainModelUseCase {
        TrainModelUseCase::new(Arc::new(StubModelRepository::new()), Arc::new(trainer))
    }

    #[test]
    fn rmse_only_backend_gets_estimated_metrics() {
        let training = use_case(StubTrainingService::always(Metrics::rmse_only(70_000.0)));
        let result = training.execute(Path::new("data.csv"), &Hyperparameters::default(), "exp");
        assert!(result.success);
        assert_eq!(result.rmse, 70_000.0);
        let mae = result.mae.unwrap();
        assert!((mae.value - 49_000.0).abs() < 1e-6);
        assert!(mae.estimated);
        assert_eq!(result.r2_score, Some(MetricValue::estimated(0.85)));
        assert_eq!(result.quality.unwrap().tier, QualityTier::Good);
        assert!(result.elapsed_secs.is_some());
    }

    #[test]
    fn r2_band_for_ninety_five_thousand() {
        let training = use_case(StubTrainingService::always(Metrics::rmse_only(95_000.0)));
        let result = training.execute(Path::new("data.csv"), &Hyperparameters::default(), "exp");
        assert_eq!(result.r2(), Some(0.75));
    }

    #[test]
    fn measured_metrics_are_kept() {
        let metrics = Metrics {
            mae: Some(20_000.0),
            r2: Some(0.93),
            ..Metrics::rmse_only(40_000.0)
        };
        let result = use_case(StubTrainingService::always(metrics)).execute(
            Path::new("data.csv"),
            &Hyperparameters::new(300, 10),
            "exp",
        );
        assert_eq!(result.mae, Some(MetricValue::measured(20_000.0)));
        assert_eq!(result.r2_score, Some(MetricValue::measured(0.93)));
        assert_eq!((result.n_estimators, result.max_depth), (300, 10));
        assert_eq!(result.quality.unwrap().tier, QualityTier::Excellent);
    }

    #[test]
    fn backend_failure_becomes_failed_result() {
        let training = use_case(StubTrainingService::failing("disk on fire"));
        let result = training.execute(Path::new("data.csv"), &Hyperparameters::default(), "exp");
        assert!(!result.success);
        assert!(result.rmse.is_infinite());
        assert_eq!(result.mae, None);
        assert_eq!(result.r2_score, None);
        assert!(!result.is_rankable());
        assert!(result.error_message.unwrap().contains("disk on fire"));
    }

    #[test]
    fn non_finite_rmse_is_a_failure() {
        let training = use_case(StubTrainingService::always(Metrics::rmse_only(f64::NAN)));
        let result = training.execute(Path::new("data.csv"), &Hyperparameters::default(), "exp");
        assert!(!result.success);
    }

    #[test]
    fn low_r2_adds_warnings_without_failing() {
        let training = use_case(StubTrainingService::always(Metrics::rmse_only(150_000.0)));
        let result = training.execute_with_validation(
            Path::new("data.csv"),
            &Hyperparameters::default(),
            "exp",
            0.7,
        );
        assert!(result.success);
        assert!(result.warnings[0].contains("0.650 (*estimated)"), "{:?}", result.warnings);
        assert_eq!(result.warnings.len(), 3);

        let healthy = use_case(StubTrainingService::always(Metrics::rmse_only(60_000.0)))
            .execute_with_validation(Path::new("data.csv"), &Hyperparameters::default(), "exp", 0.7);
        assert!(healthy.warnings.is_empty());
    }

    #[test]
    fn failed_runs_skip_threshold_warnings() {
        let result = use_case(StubTrainingService::failing("boom")).execute_with_validation(
            Path::new("data.csv"),
            &Hyperparameters::default(),
            "exp",
            0.7,
        );
        assert!(result.warnings.is_empty());
        assert!(result.summary().contains("failed (training failure: boom)"), "{}", result.summary());
    }

    #[test]
    fn configured_defaults_drive_execute_default() {
        let config = ValuationConfig::from_toml_str(
            r#"
[training]
experiment_name = "lisbon"
min_r2 = 0.9

[training.hyperparameters]
n_estimators = 300
max_depth = 10
"#,
        )
        .unwrap();
        let training = TrainModelUseCase::from_config(
            Arc::new(StubModelRepository::new()),
            Arc::new(StubTrainingService::always(Metrics::rmse_only(70_000.0))),
            &config,
        );
        assert_eq!(training.defaults().experiment_name, "lisbon");
        let result = training.execute_default(Path::new("data.csv"));
        assert!(result.success);
        assert_eq!(result.experiment_name, "lisbon");
        assert_eq!((result.n_estimators, result.max_depth), (300, 10));
        assert_eq!(result.warnings.len(), 3, "{:?}", result.warnings);
    }

    #[test]
    fn experiment_name_and_registry_id_are_kept_apart() {
        let dir = tempdir().unwrap();
        let path = write_listings(dir.path(), 30);
        let registry = Arc::new(InMemoryModelRegistry::new());
        let trainer = RealEstateModelTrainer::new(
            Arc::new(CsvDataRepository::default()),
            registry.clone(),
            Arc::new(RandomForestFactory),
        );
        let training = TrainModelUseCase::new(registry, Arc::new(trainer));

        let trained = training.execute(&path, &Hyperparameters::new(20, 4), "lisbon");
        assert!(trained.success, "{:?}", trained.error_message);
        assert_eq!(trained.experiment_name, "lisbon");
        assert_eq!(trained.experiment_id, "1");
        assert!(trained.summary().starts_with("lisbon: rmse"), "{}", trained.summary());

        let missing = training.execute(&dir.path().join("absent.csv"), &Hyperparameters::default(), "porto");
        assert!(!missing.success);
        assert_eq!(missing.experiment_name, "porto");
        assert_eq!(missing.experiment_id, "");
    }

    #[test]
    fn failed_results_survive_json() {
        let failed = use_case(StubTrainingService::failing("boom")).execute(
            Path::new("data.csv"),
            &Hyperparameters::default(),
            "exp",
        );
        let encoded = serde_json::to_value(&failed).unwrap();
        assert_eq!(encoded["rmse"], serde_json::Value::Null);
        let decoded: TrainingResult = serde_json::from_value(encoded).unwrap();
        assert!(decoded.rmse.is_infinite());
        assert!(!decoded.success);
        assert_eq!(decoded.error_message, failed.error_message);

        let trained = use_case(StubTrainingService::always(Metrics::rmse_only(70_000.0)))
            .execute(Path::new("data.csv"), &Hyperparameters::default(), "exp");
        let decoded: TrainingResult =
            serde_json::from_str(&serde_json::to_string(&trained).unwrap()).unwrap();
        assert_eq!(decoded.rmse, 70_000.0);
        assert_eq!(decoded.r2_score, trained.r2_score);
    }
}
