//! Price prediction orchestration.

/// Reference prediction service and its model cache.
pub mod service;

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    config::ValuationConfig,
    error::{ValuationError, ValuationResult},
    ports::PredictionService,
    property::{Property, PropertyInput},
    quality::{MetricValue, QualityPolicy, QualityTier},
    telemetry::ValuationTelemetry,
    training::TrainingResult,
    validation::{PropertyValidator, ValidationReport},
};

/// Version tag reported when the service does not name its model.
pub const LATEST_MODEL: &str = "latest";

/// Symmetric price band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceInterval {
    /// Lower bound.
    pub lower: f64,
    /// Upper bound.
    pub upper: f64,
}

impl PriceInterval {
    /// `center ± half_width`.
    #[must_use]
    pub fn around(center: f64, half_width: f64) -> Self {
        Self {
            lower: center - half_width,
            upper: center + half_width,
        }
    }

    /// Distance between the bounds.
    #[must_use]
    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }

    /// True when `value` lies inside the band, bounds included.
    #[must_use]
    pub fn contains(&self, value: f64) -> bool {
        (self.lower..=self.upper).contains(&value)
    }
}

/// Metrics of the serving model, used for intervals and confidence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelMetricsSnapshot {
    /// Root mean squared error.
    pub rmse: f64,
    /// Mean absolute error, measured or estimated.
    pub mae: MetricValue,
    /// R², measured or estimated.
    pub r2: MetricValue,
}

impl TryFrom<&TrainingResult> for ModelMetricsSnapshot {
    type Error = ValuationError;

    fn try_from(result: &TrainingResult) -> ValuationResult<Self> {
        if !result.success {
            return Err(ValuationError::invalid(format!(
                "cannot take metrics from failed run {}",
                result.experiment_name
            )));
        }
        match (result.mae, result.r2_score) {
            (Some(mae), Some(r2)) if result.rmse.is_finite() => Ok(Self {
                rmse: result.rmse,
                mae,
                r2,
            }),
            _ => Err(ValuationError::invalid(format!(
                "run {} lacks RMSE, MAE, or R²",
                result.experiment_name
            ))),
        }
    }
}

/// Result of a price query. A successful prediction always carries a price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyPrediction {
    /// Predicted sale price.
    pub predicted_price: f64,
    /// Serving model tag.
    pub model_version: String,
    /// Clamped R² of the serving model.
    pub confidence_score: Option<f64>,
    /// Price ± MAE.
    pub mae_interval: Option<PriceInterval>,
    /// Price ± RMSE.
    pub rmse_interval: Option<PriceInterval>,
    /// R²-banded quality of the serving model.
    pub model_quality: Option<QualityTier>,
    /// Metrics the intervals were computed from.
    pub metrics: Option<ModelMetricsSnapshot>,
    /// Input validation report, warnings included.
    pub validation: Option<ValidationReport>,
}

impl PropertyPrediction {
    fn point(predicted_price: f64, model_version: String, validation: ValidationReport) -> Self {
        Self {
            predicted_price,
            model_version,
            confidence_score: None,
            mae_interval: None,
            rmse_interval: None,
            model_quality: None,
            metrics: None,
            validation: Some(validation),
        }
    }
}

/// Validates inputs and asks the prediction service for prices.
pub struct PredictPriceUseCase {
    service: Arc<dyn PredictionService>,
    validator: PropertyValidator,
    quality: QualityPolicy,
    metrics: RwLock<Option<ModelMetricsSnapshot>>,
    telemetry: ValuationTelemetry,
}

impl PredictPriceUseCase {
    /// Use case with default thresholds.
    #[must_use]
    pub fn new(service: Arc<dyn PredictionService>) -> Self {
        Self {
            service,
            validator: PropertyValidator::default(),
            quality: QualityPolicy::default(),
            metrics: RwLock::new(None),
            telemetry: ValuationTelemetry::tracing_only("prediction"),
        }
    }

    /// Use case with the validation and quality sections of `config`.
    #[must_use]
    pub fn from_config(service: Arc<dyn PredictionService>, config: &ValuationConfig) -> Self {
        let mut use_case = Self::new(service);
        use_case.validator = PropertyValidator::new(config.validation.clone());
        use_case.quality = config.quality.clone();
        use_case
    }

    /// Replaces the telemetry handle.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: &ValuationTelemetry) -> Self {
        self.telemetry = telemetry.scoped("prediction");
        self
    }

    /// Predicts one price after input and service-level validation.
    pub fn execute(&self, input: &PropertyInput) -> ValuationResult<PropertyPrediction> {
        let (property, report) = self.admit(input)?;
        let price = self.service.predict_price(&property)?;
        let version = self.model_version();
        self.telemetry.info(
            "prediction.completed",
            json!({
                "price": price,
                "model_version": version,
                "warnings": report.warning_count,
            }),
        );
        Ok(PropertyPrediction::point(price, version, report))
    }

    /// Prices for many inputs in order. Every input is validated before the single model call.
    pub fn predict_batch(&self, inputs: &[PropertyInput]) -> ValuationResult<Vec<f64>> {
        let mut properties = Vec::with_capacity(inputs.len());
        let mut errors = Vec::new();
        for (position, input) in inputs.iter().enumerate() {
            match self.admit(input) {
                Ok((property, _)) => properties.push(property),
                Err(ValuationError::InvalidInput(found)) => errors.extend(
                    found
                        .into_iter()
                        .map(|error| format!("property {}: {error}", position + 1)),
                ),
                Err(other) => return Err(other),
            }
        }
        if !errors.is_empty() {
            return Err(ValuationError::InvalidInput(errors));
        }
        let prices = self.service.predict_batch(&properties)?;
        if prices.len() != properties.len() {
            return Err(ValuationError::Training(format!(
                "service returned {} prices for {} properties",
                prices.len(),
                properties.len()
            )));
        }
        self.telemetry
            .info("prediction.batch_completed", json!({ "count": prices.len() }));
        Ok(prices)
    }

    /// Point prediction plus intervals and confidence from the installed metrics.
    pub fn predict_with_confidence(
        &self,
        input: &PropertyInput,
    ) -> ValuationResult<PropertyPrediction> {
        let mut prediction = self.execute(input)?;
        let Some(metrics) = *self.metrics.read() else {
            tracing::debug!("no model metrics installed; returning point prediction");
            return Ok(prediction);
        };
        let price = prediction.predicted_price;
        prediction.mae_interval = Some(PriceInterval::around(price, metrics.mae.value));
        prediction.rmse_interval = Some(PriceInterval::around(price, metrics.rmse));
        prediction.model_quality = Some(self.quality.tier_for_r2(metrics.r2.value));
        prediction.confidence_score = Some(metrics.r2.value.clamp(0.0, 1.0));
        prediction.metrics = Some(metrics);
        Ok(prediction)
    }

    /// Installs the serving model's metrics from a successful training run.
    pub fn set_model_metrics(&self, result: &TrainingResult) -> ValuationResult<()> {
        let snapshot = ModelMetricsSnapshot::try_from(result)?;
        self.install_metrics(snapshot);
        Ok(())
    }

    /// Installs a metrics snapshot directly.
    pub fn install_metrics(&self, snapshot: ModelMetricsSnapshot) {
        *self.metrics.write() = Some(snapshot);
    }

    /// Installed metrics, if any.
    #[must_use]
    pub fn model_metrics(&self) -> Option<ModelMetricsSnapshot> {
        *self.metrics.read()
    }

    /// Clears the service's cached model.
    pub fn reset_model_cache(&self) {
        self.service.reset_model();
    }

    fn model_version(&self) -> String {
        self.service
            .model_version()
            .unwrap_or_else(|| LATEST_MODEL.to_string())
    }

    fn admit(&self, input: &PropertyInput) -> ValuationResult<(Property, ValidationReport)> {
        let report = self.validator.validate_detailed(input);
        if !report.is_valid {
            return Err(ValuationError::InvalidInput(report.errors));
        }
        let property = Property::from_input(input);
        let service_report = self.service.validate_property(&property);
        if !service_report.is_valid {
            return Err(ValuationError::InvalidInput(service_report.errors));
        }
        Ok((property, report))
    }
}
