use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use parking_lot::Mutex;
use serde_json::json;

use crate::{
    config::ValuationConfig,
    error::{ValuationError, ValuationResult},
    ports::{FeatureVector, ModelHandle, ModelRepository, PredictionService},
    property::Property,
    telemetry::ValuationTelemetry,
    validation::{PropertyValidator, ValidationReport},
};

/// Lazily loaded serving model. The first load is single-flight.
#[derive(Debug, Default)]
pub struct ModelCache {
    slot: Mutex<Option<ModelHandle>>,
    loads: AtomicUsize,
}

impl ModelCache {
    /// Empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached model, or the result of `load` stored for later callers.
    ///
    /// The lock is held across `load`, so concurrent first callers wait for one load.
    pub fn get_or_load(
        &self,
        load: impl FnOnce() -> ValuationResult<ModelHandle>,
    ) -> ValuationResult<ModelHandle> {
        let mut slot = self.slot.lock();
        if let Some(model) = slot.as_ref() {
            return Ok(Arc::clone(model));
        }
        let model = load()?;
        self.loads.fetch_add(1, Ordering::Relaxed);
        *slot = Some(Arc::clone(&model));
        Ok(model)
    }

    /// Drops the cached model.
    pub fn invalidate(&self) {
        self.slot.lock().take();
    }

    /// True when a model is cached.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Successful loads since construction.
    #[must_use]
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }
}

/// Serves predictions from the best registered model.
pub struct RealEstatePredictionService {
    models: Arc<dyn ModelRepository>,
    cache: Arc<ModelCache>,
    validator: PropertyValidator,
    metric: String,
    telemetry: ValuationTelemetry,
}

impl RealEstatePredictionService {
    /// Service selecting the lowest-RMSE model, with its own cache.
    #[must_use]
    pub fn new(models: Arc<dyn ModelRepository>) -> Self {
        Self::with_cache(models, Arc::new(ModelCache::new()))
    }

    /// Service ranking models by the configured selection metric and validating
    /// with the configured thresholds.
    #[must_use]
    pub fn from_config(models: Arc<dyn ModelRepository>, config: &ValuationConfig) -> Self {
        Self::new(models)
            .with_metric(config.training.selection_metric.clone())
            .with_validator(PropertyValidator::new(config.validation.clone()))
    }

    /// Metric the serving model is ranked by.
    #[must_use]
    pub fn metric(&self) -> &str {
        &self.metric
    }

    /// Service sharing an externally owned cache.
    #[must_use]
    pub fn with_cache(models: Arc<dyn ModelRepository>, cache: Arc<ModelCache>) -> Self {
        Self {
            models,
            cache,
            validator: PropertyValidator::default(),
            metric: "rmse".into(),
            telemetry: ValuationTelemetry::tracing_only("prediction_service"),
        }
    }

    /// Metric used to pick the serving model.
    #[must_use]
    pub fn with_metric(mut self, metric: impl Into<String>) -> Self {
        self.metric = metric.into();
        self
    }

    /// Domain validator applied by `validate_property`.
    #[must_use]
    pub fn with_validator(mut self, validator: PropertyValidator) -> Self {
        self.validator = validator;
        self
    }

    /// Replaces the telemetry handle.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: &ValuationTelemetry) -> Self {
        self.telemetry = telemetry.scoped("prediction_service");
        self
    }

    /// The shared cache.
    #[must_use]
    pub fn cache(&self) -> &Arc<ModelCache> {
        &self.cache
    }

    fn model(&self) -> ValuationResult<ModelHandle> {
        self.cache.get_or_load(|| {
            let model = self.models.get_best_model(&self.metric)?;
            self.telemetry.info(
                "prediction.model_loaded",
                json!({ "metric": self.metric, "algorithm": model.algorithm() }),
            );
            Ok(model)
        })
    }
}

impl PredictionService for RealEstatePredictionService {
    fn predict_price(&self, property: &Property) -> ValuationResult<f64> {
        let prices = self.predict_batch(std::slice::from_ref(property))?;
        prices
            .into_iter()
            .next()
            .ok_or_else(|| ValuationError::Training("model returned no prediction".into()))
    }

    fn predict_batch(&self, properties: &[Property]) -> ValuationResult<Vec<f64>> {
        if properties.is_empty() {
            return Ok(Vec::new());
        }
        let model = self.model()?;
        let rows: Vec<FeatureVector> = properties.iter().map(Property::features).collect();
        let prices = model
            .predict(&rows)
            .map_err(|err| ValuationError::training(&err))?;
        if prices.len() != rows.len() {
            return Err(ValuationError::Training(format!(
                "model returned {} predictions for {} properties",
                prices.len(),
                rows.len()
            )));
        }
        if let Some(position) = prices.iter().position(|price| !price.is_finite()) {
            return Err(ValuationError::Training(format!(
                "model returned a non-finite price for property {}",
                position + 1
            )));
        }
        Ok(prices)
    }

    fn validate_property(&self, property: &Property) -> ValidationReport {
        self.validator.validate_entity(property)
    }

    fn reset_model(&self) {
        self.cache.invalidate();
        self.telemetry.info("prediction.cache_reset", json!({}));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FixedRegressor, StubModelRepository};
    use std::{sync::Barrier, thread, time::Duration};

    fn property() -> Property {
        Property {
            assessed_value: 300_000.0,
            area_m2: 150.0,
            months_on_market: 6,
            rooms: 3,
            floors: 2,
            is_residential: 0.0,
            is_single_family: 1.0,
            sale_amount: None,
        }
    }

    #[test]
    fn concurrent_first_callers_share_one_load() {
        let registry = Arc::new(
            StubModelRepository::with_best(Arc::new(FixedRegressor::new(410_000.0)))
                .with_load_delay(Duration::from_millis(20)),
        );
        let service = RealEstatePredictionService::new(registry.clone());
        let barrier = Barrier::new(8);
        thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    barrier.wait();
                    assert_eq!(service.predict_price(&property()).unwrap(), 410_000.0);
                });
            }
        });
        assert_eq!(registry.best_model_calls(), 1);
        assert_eq!(service.cache().load_count(), 1);
    }

    #[test]
    fn reset_forces_a_reload() {
        let registry = Arc::new(StubModelRepository::with_best(Arc::new(FixedRegressor::new(1.0))));
        let service = RealEstatePredictionService::new(registry.clone());
        service.predict_batch(&[property(), property()]).unwrap();
        assert!(service.cache().is_loaded());
        service.reset_model();
        assert!(!service.cache().is_loaded());
        service.predict_price(&property()).unwrap();
        assert_eq!(registry.best_model_calls(), 2);
    }

    #[test]
    fn missing_model_propagates_and_is_not_cached() {
        let registry = Arc::new(StubModelRepository::new());
        let service = RealEstatePredictionService::new(registry.clone());
        let err = service.predict_price(&property()).unwrap_err();
        assert!(matches!(err, ValuationError::ModelNotFound(_)), "{err}");
        assert!(!service.cache().is_loaded());
        assert!(service.predict_batch(&[]).unwrap().is_empty());
    }

    #[test]
    fn short_model_output_is_an_error() {
        let registry = Arc::new(StubModelRepository::with_best(Arc::new(
            FixedRegressor::new(1.0).truncated(),
        )));
        let service = RealEstatePredictionService::new(registry);
        assert!(service.predict_batch(&[property()]).is_err());
    }

    #[test]
    fn configured_selection_metric_picks_the_serving_model() {
        let registry = Arc::new(crate::adapters::InMemoryModelRegistry::new());
        let params = crate::ports::Hyperparameters::default();
        for (price, rmse, r2) in [(1.0, 50.0, 0.7), (2.0, 80.0, 0.9)] {
            let metrics = crate::ports::Metrics {
                r2: Some(r2),
                ..crate::ports::Metrics::rmse_only(rmse)
            };
            registry
                .save_model("lisbon", Arc::new(FixedRegressor::new(price)), &params, &metrics)
                .unwrap();
        }
        let config = ValuationConfig::from_toml_str("[training]\nselection_metric = \"r2\"").unwrap();
        let service = RealEstatePredictionService::from_config(registry.clone(), &config);
        assert_eq!(service.metric(), "r2");
        assert_eq!(service.predict_price(&property()).unwrap(), 2.0);

        let by_rmse = RealEstatePredictionService::from_config(registry, &ValuationConfig::default());
        assert_eq!(by_rmse.predict_price(&property()).unwrap(), 1.0);
    }

    #[test]
    fn entity_rules_apply() {
        let service = RealEstatePredictionService::new(Arc::new(StubModelRepository::new()));
        let mut both = property();
        both.is_residential = 1.0;
        assert!(!service.validate_property(&both).is_valid);
        assert!(service.validate_property(&property()).is_valid);
    }
}
