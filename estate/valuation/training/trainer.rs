use std::{path::Path, sync::Arc};

use estate_journal::JournalLevel;
use serde_json::json;

use crate::{
    error::{ValuationError, ValuationResult},
    ports::{
        DataRepository, FeatureVector, Hyperparameters, Metrics, ModelHandle, ModelRepository,
        ModelTrainingService, Regressor, TrainingOutcome,
    },
    property::FEATURE_COUNT,
    telemetry::ValuationTelemetry,
    training::metrics::{regression_metrics, train_test_split},
};

/// A configured, not yet fitted learning algorithm.
pub trait Estimator: Send + Sync {
    /// Fits on the training rows and returns the model.
    fn fit(&self, rows: &[FeatureVector], target: &[f64]) -> anyhow::Result<ModelHandle>;
}

/// Turns hyperparameters into an estimator.
pub trait EstimatorFactory: Send + Sync {
    /// Estimator configured for one run.
    fn build(&self, hyperparameters: &Hyperparameters) -> Box<dyn Estimator>;
}

/// Reference training backend: load, preprocess, split, fit, evaluate, persist.
pub struct RealEstateModelTrainer {
    data: Arc<dyn DataRepository>,
    models: Arc<dyn ModelRepository>,
    estimators: Arc<dyn EstimatorFactory>,
    telemetry: ValuationTelemetry,
}

impl RealEstateModelTrainer {
    /// Wires the backend to its repositories and algorithm.
    #[must_use]
    pub fn new(
        data: Arc<dyn DataRepository>,
        models: Arc<dyn ModelRepository>,
        estimators: Arc<dyn EstimatorFactory>,
    ) -> Self {
        Self {
            data,
            models,
            estimators,
            telemetry: ValuationTelemetry::tracing_only("trainer"),
        }
    }

    /// Replaces the telemetry handle.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: &ValuationTelemetry) -> Self {
        self.telemetry = telemetry.scoped("trainer");
        self
    }
}

impl ModelTrainingService for RealEstateModelTrainer {
    fn train_model(
        &self,
        path: &Path,
        hyperparameters: &Hyperparameters,
        experiment: &str,
    ) -> ValuationResult<TrainingOutcome> {
        let dataset = self.data.load_data(path)?;
        let (features, target) = self.data.preprocess_data(&dataset)?;
        let split = train_test_split(
            &features,
            &target,
            hyperparameters.test_size,
            hyperparameters.random_state,
        )?;
        self.telemetry.emit(
            JournalLevel::Debug,
            "trainer.split",
            json!({
                "experiment": experiment,
                "train": split.train_target.len(),
                "test": split.test_target.len(),
            }),
        );

        let model = self
            .estimators
            .build(hyperparameters)
            .fit(&split.train_features, &split.train_target)
            .map_err(|err| ValuationError::training(&err))?;
        let metrics = self.evaluate_model(model.as_ref(), &split.test_features, &split.test_target)?;
        let receipt =
            self.models
                .save_model(experiment, Arc::clone(&model), hyperparameters, &metrics)?;
        self.telemetry.info(
            "trainer.fitted",
            json!({
                "experiment": experiment,
                "algorithm": model.algorithm(),
                "uri": receipt.uri,
                "rmse": metrics.rmse,
            }),
        );

        Ok(TrainingOutcome {
            model,
            receipt,
            metrics,
            n_train_samples: Some(split.train_target.len()),
            n_test_samples: Some(split.test_target.len()),
            n_features: Some(FEATURE_COUNT),
        })
    }

    fn evaluate_model(
        &self,
        model: &dyn Regressor,
        features: &[FeatureVector],
        target: &[f64],
    ) -> ValuationResult<Metrics> {
        if features.is_empty() {
            return Err(ValuationError::Training("no rows to evaluate on".into()));
        }
        let predictions = model
            .predict(features)
            .map_err(|err| ValuationError::training(&err))?;
        if predictions.len() != target.len() {
            return Err(ValuationError::Training(format!(
                "model returned {} predictions for {} rows",
                predictions.len(),
                target.len()
            )));
        }
        Ok(regression_metrics(&predictions, target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        adapters::{CsvDataRepository, InMemoryModelRegistry},
        testing::{write_listings, FixedRegressor},
        training::forest::RandomForestFactory,
    };
    use tempfile::tempdir;

    fn trainer(models: Arc<InMemoryModelRegistry>) -> RealEstateModelTrainer {
        RealEstateModelTrainer::new(
            Arc::new(CsvDataRepository::default()),
            models,
            Arc::new(RandomForestFactory),
        )
    }

    #[test]
    fn trains_end_to_end_and_files_the_run() {
        let dir = tempdir().unwrap();
        let path = write_listings(dir.path(), 40);
        let registry = Arc::new(InMemoryModelRegistry::new());
        let outcome = trainer(Arc::clone(&registry))
            .train_model(&path, &Hyperparameters::default(), "lisbon")
            .unwrap();
        assert_eq!(outcome.n_train_samples, Some(32));
        assert_eq!(outcome.n_test_samples, Some(8));
        assert!(outcome.metrics.rmse.is_finite());
        assert!(outcome.metrics.r2.unwrap() > 0.8);
        assert!(outcome.receipt.uri.starts_with("models:/lisbon/"));
        assert!(registry.load_model(&outcome.receipt.uri).is_ok());
    }

    #[test]
    fn hyperparameters_change_the_fitted_model() {
        let dir = tempdir().unwrap();
        let path = write_listings(dir.path(), 60);
        let trainer = trainer(Arc::new(InMemoryModelRegistry::new()));
        let rmse = |n_estimators, max_depth| {
            trainer
                .train_model(&path, &Hyperparameters::new(n_estimators, max_depth), "menu")
                .unwrap()
                .metrics
                .rmse
        };
        let stump = rmse(50, 1);
        let deep = rmse(300, 15);
        assert!(deep < stump, "deep {deep} vs stump {stump}");
        assert_ne!(rmse(100, 5), rmse(200, 10));
        assert_eq!(rmse(100, 5), rmse(100, 5));
    }

    #[test]
    fn missing_file_is_a_data_access_error() {
        let dir = tempdir().unwrap();
        let err = trainer(Arc::new(InMemoryModelRegistry::new()))
            .train_model(&dir.path().join("absent.csv"), &Hyperparameters::default(), "x")
            .unwrap_err();
        assert!(matches!(err, ValuationError::DataAccess(_)), "{err}");
    }

    #[test]
    fn evaluation_rejects_short_predictions() {
        let trainer = trainer(Arc::new(InMemoryModelRegistry::new()));
        let model = FixedRegressor::new(1.0).truncated();
        let err = trainer
            .evaluate_model(&model, &[[0.0; FEATURE_COUNT]; 2], &[1.0, 1.0])
            .unwrap_err();
        assert!(err.to_string().contains("0 predictions"), "{err}");
    }

    #[test]
    fn evaluation_scores_a_constant_model() {
        let trainer = trainer(Arc::new(InMemoryModelRegistry::new()));
        let metrics = trainer
            .evaluate_model(
                &FixedRegressor::new(100.0),
                &[[0.0; FEATURE_COUNT]; 2],
                &[90.0, 110.0],
            )
            .unwrap();
        assert!((metrics.rmse - 10.0).abs() < 1e-9);
        assert_eq!(metrics.mae, Some(10.0));
    }
}
