#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Real-estate valuation core: property validation, model training orchestration,
//! hyperparameter sweeps, quality assessment, and price prediction.

/// Error taxonomy shared by every port and use case.
#[path = "../error.rs"]
pub mod error;

/// TOML-backed configuration with market-specific defaults.
#[path = "../config.rs"]
pub mod config;

/// Tracing plus journal fan-out.
#[path = "../telemetry.rs"]
pub mod telemetry;

/// Property boundary input and domain entity.
#[path = "../property.rs"]
pub mod property;

/// Input validation rules and reports.
#[path = "../validation.rs"]
pub mod validation;

/// Tabular datasets, preprocessing, and profiling.
#[path = "../dataset.rs"]
pub mod dataset;

/// Repository and service ports.
#[path = "../ports.rs"]
pub mod ports;

/// Quality tiers and metric estimation.
#[path = "../quality.rs"]
pub mod quality;

/// Training orchestration, sweeps, and recommendations.
#[path = "../training/main.rs"]
pub mod training;

/// Prediction orchestration.
#[path = "../prediction/main.rs"]
pub mod prediction;

/// Concrete adapters for the repository ports.
#[path = "../adapters/main.rs"]
pub mod adapters;

#[cfg(test)]
#[path = "../testing.rs"]
pub(crate) mod testing;

pub use adapters::{CsvDataRepository, InMemoryModelRegistry};
pub use config::ValuationConfig;
pub use dataset::{ColumnMapping, Dataset, DatasetProfile};
pub use error::{ValuationError, ValuationResult};
pub use ports::{
    DataRepository, FeatureVector, Hyperparameters, Metrics, ModelHandle, ModelReceipt,
    ModelRepository, ModelTrainingService, PredictionService, Regressor, TrainingOutcome,
};
pub use prediction::{
    service::{ModelCache, RealEstatePredictionService},
    ModelMetricsSnapshot, PredictPriceUseCase, PriceInterval, PropertyPrediction,
};
pub use property::{Property, PropertyInput, PropertyType, FEATURE_COLUMNS};
pub use quality::{
    assess_model_quality, EstimationPolicy, MetricValue, QualityAssessment, QualityPolicy,
    QualityTier,
};
pub use telemetry::{ValuationTelemetry, ValuationTelemetryBuilder};
pub use training::{
    advisor::{Recommendations, StrategyTier, TrainingAdvisor},
    forest::{RandomForest, RandomForestFactory, RegressionTree},
    sweep::{HyperparameterSweep, SweepMode, SweepReport, TrialSummary},
    trainer::{Estimator, EstimatorFactory, RealEstateModelTrainer},
    TrainModelUseCase, TrainingResult,
};
pub use validation::{PropertyValidator, ValidationReport, ValidationThresholds};
