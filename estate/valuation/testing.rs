//! Scriptable port doubles shared by unit tests.

use std::{
    fmt::Write as _,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use parking_lot::Mutex;

use crate::{
    dataset::{ColumnMapping, Dataset},
    error::{ValuationError, ValuationResult},
    ports::{
        DataRepository, FeatureVector, Hyperparameters, Metrics, ModelHandle, ModelReceipt,
        ModelRepository, ModelTrainingService, PredictionService, Regressor, TrainingOutcome,
    },
    property::Property,
    validation::ValidationReport,
};

/// Predicts the same price for every row.
#[derive(Debug, Clone, Copy)]
pub struct FixedRegressor {
    price: f64,
    truncate: bool,
}

impl FixedRegressor {
    pub fn new(price: f64) -> Self {
        Self {
            price,
            truncate: false,
        }
    }

    /// Returns no predictions at all.
    pub fn truncated(mut self) -> Self {
        self.truncate = true;
        self
    }
}

impl Regressor for FixedRegressor {
    fn predict(&self, rows: &[FeatureVector]) -> anyhow::Result<Vec<f64>> {
        if self.truncate {
            return Ok(Vec::new());
        }
        Ok(vec![self.price; rows.len()])
    }

    fn algorithm(&self) -> &str {
        "fixed"
    }
}

#[derive(Default)]
pub struct StubModelRepository {
    best: Option<ModelHandle>,
    load_delay: Duration,
    best_calls: AtomicUsize,
    saves: AtomicUsize,
}

impl StubModelRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_best(model: ModelHandle) -> Self {
        Self {
            best: Some(model),
            ..Self::default()
        }
    }

    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    pub fn best_model_calls(&self) -> usize {
        self.best_calls.load(Ordering::SeqCst)
    }
}

impl ModelRepository for StubModelRepository {
    fn set_experiment(&self, name: &str) -> ValuationResult<String> {
        Ok(name.to_string())
    }

    fn save_model(
        &self,
        experiment: &str,
        _model: ModelHandle,
        _params: &Hyperparameters,
        _metrics: &Metrics,
    ) -> ValuationResult<ModelReceipt> {
        let run = self.saves.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ModelReceipt {
            uri: format!("models:/{experiment}/run-{run}"),
            experiment_id: experiment.to_string(),
            run_id: format!("run-{run}"),
        })
    }

    fn load_model(&self, uri: &str) -> ValuationResult<ModelHandle> {
        self.best
            .clone()
            .ok_or_else(|| ValuationError::ModelNotFound(uri.to_string()))
    }

    fn get_best_model(&self, metric: &str) -> ValuationResult<ModelHandle> {
        self.best_calls.fetch_add(1, Ordering::SeqCst);
        if !self.load_delay.is_zero() {
            thread::sleep(self.load_delay);
        }
        self.best
            .clone()
            .ok_or_else(|| ValuationError::ModelNotFound(format!("no run records metric '{metric}'")))
    }
}

type Script = Box<dyn Fn(&Hyperparameters) -> Result<Metrics, String> + Send + Sync>;

/// Training backend whose metrics are a function of the hyperparameters.
pub struct StubTrainingService {
    script: Script,
    runs: AtomicUsize,
}

impl StubTrainingService {
    pub fn by_estimators(
        script: impl Fn(&Hyperparameters) -> Result<Metrics, String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            script: Box::new(script),
            runs: AtomicUsize::new(0),
        }
    }

    pub fn always(metrics: Metrics) -> Self {
        Self::by_estimators(move |_| Ok(metrics))
    }

    pub fn failing(message: &str) -> Self {
        let message = message.to_string();
        Self::by_estimators(move |_| Err(message.clone()))
    }
}

impl ModelTrainingService for StubTrainingService {
    fn train_model(
        &self,
        _path: &Path,
        hyperparameters: &Hyperparameters,
        experiment: &str,
    ) -> ValuationResult<TrainingOutcome> {
        let metrics = (self.script)(hyperparameters).map_err(ValuationError::Training)?;
        let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(TrainingOutcome {
            model: Arc::new(FixedRegressor::new(0.0)),
            receipt: ModelReceipt {
                uri: format!("models:/{experiment}/run-{run}"),
                experiment_id: experiment.to_string(),
                run_id: format!("run-{run}"),
            },
            metrics,
            n_train_samples: Some(80),
            n_test_samples: Some(20),
            n_features: Some(7),
        })
    }

    fn evaluate_model(
        &self,
        _model: &dyn Regressor,
        _features: &[FeatureVector],
        _target: &[f64],
    ) -> ValuationResult<Metrics> {
        Ok(Metrics::rmse_only(0.0))
    }
}

/// Data source returning a fixed dataset, or failing every load.
pub struct StubDataRepository {
    dataset: Option<Dataset>,
}

impl StubDataRepository {
    pub fn with_dataset(dataset: Dataset) -> Self {
        Self {
            dataset: Some(dataset),
        }
    }

    pub fn unreadable() -> Self {
        Self { dataset: None }
    }
}

impl DataRepository for StubDataRepository {
    fn load_data(&self, path: &Path) -> ValuationResult<Dataset> {
        self.dataset
            .clone()
            .ok_or_else(|| ValuationError::DataAccess(format!("cannot read {}", path.display())))
    }

    fn preprocess_data(
        &self,
        dataset: &Dataset,
    ) -> ValuationResult<(Vec<FeatureVector>, Vec<f64>)> {
        dataset.preprocess(&ColumnMapping::default())
    }
}

/// Prediction backend answering a fixed price and recording what it saw.
#[derive(Default)]
pub struct StubPredictionService {
    price: f64,
    rejection: Option<String>,
    version: Option<String>,
    seen: Mutex<Vec<Property>>,
    batch_calls: AtomicUsize,
    resets: AtomicUsize,
}

impl StubPredictionService {
    pub fn fixed(price: f64) -> Self {
        Self {
            price,
            ..Self::default()
        }
    }

    pub fn rejecting(mut self, reason: &str) -> Self {
        self.rejection = Some(reason.to_string());
        self
    }

    pub fn versioned(mut self, version: &str) -> Self {
        self.version = Some(version.to_string());
        self
    }

    pub fn seen(&self) -> Vec<Property> {
        self.seen.lock().clone()
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }
}

impl PredictionService for StubPredictionService {
    fn predict_price(&self, property: &Property) -> ValuationResult<f64> {
        self.seen.lock().push(property.clone());
        Ok(self.price)
    }

    fn predict_batch(&self, properties: &[Property]) -> ValuationResult<Vec<f64>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().extend_from_slice(properties);
        Ok(vec![self.price; properties.len()])
    }

    fn validate_property(&self, property: &Property) -> ValidationReport {
        let base = crate::validation::PropertyValidator::default().validate_entity(property);
        match &self.rejection {
            Some(reason) => ValidationReport {
                is_valid: false,
                errors: vec![reason.clone()],
                error_count: 1,
                summary: "invalid: 1 error(s)".into(),
                ..base
            },
            None => base,
        }
    }

    fn model_version(&self) -> Option<String> {
        self.version.clone()
    }

    fn reset_model(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}

/// Writes `rows` synthetic listings as `listings.csv` under `dir`.
pub fn write_listings(dir: &Path, rows: usize) -> PathBuf {
    let mut csv = String::from(
        "Assessed Value;area_m2;meses_en_venta;nro_habitaciones;nro_pisos;Property Type;Sale Amount\n",
    );
    for i in 0..rows {
        let assessed = 150_000 + i * 7_500;
        let area = 60 + (i % 9) * 15;
        let kind = if i % 2 == 0 { "Residential" } else { "Single Family" };
        let sale = assessed * 6 / 5 + area * 900;
        let _ = writeln!(csv, "{assessed};{area}m2;{};{};1;{kind};{sale}", i % 12, 2 + i % 4);
    }
    let path = dir.join("listings.csv");
    std::fs::write(&path, csv).unwrap();
    path
}
