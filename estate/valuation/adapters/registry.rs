use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::{
    error::{ValuationError, ValuationResult},
    ports::{Hyperparameters, Metrics, ModelHandle, ModelReceipt, ModelRepository},
    telemetry::ValuationTelemetry,
};

const URI_SCHEME: &str = "models:/";

/// Metadata of a filed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredRun {
    /// Run identifier.
    pub run_id: String,
    /// Experiment name.
    pub experiment: String,
    /// Experiment identifier.
    pub experiment_id: String,
    /// `models:/<experiment>/<run_id>`.
    pub uri: String,
    /// Logged hyperparameters.
    pub params: IndexMap<String, String>,
    /// Logged metrics.
    pub metrics: IndexMap<String, f64>,
    /// Filing time.
    pub recorded_at: DateTime<Utc>,
}

struct StoredRun {
    meta: RegisteredRun,
    model: ModelHandle,
}

struct Experiment {
    id: String,
    runs: Vec<StoredRun>,
}

/// Experiment-tracking store kept in memory. Experiments accumulate runs.
#[derive(Clone, Default)]
pub struct InMemoryModelRegistry {
    experiments: Arc<RwLock<IndexMap<String, Experiment>>>,
    telemetry: ValuationTelemetry,
}

impl std::fmt::Debug for InMemoryModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryModelRegistry")
            .field("experiments", &self.experiments.read().len())
            .field("runs", &self.run_count())
            .finish()
    }
}

/// Error metrics rank ascending; every other metric ranks descending.
#[must_use]
pub fn lower_is_better(metric: &str) -> bool {
    matches!(metric, "rmse" | "mae" | "mse" | "mape")
}

impl InMemoryModelRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the telemetry handle.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: &ValuationTelemetry) -> Self {
        self.telemetry = telemetry.scoped("registry");
        self
    }

    /// Experiment names in creation order.
    #[must_use]
    pub fn experiment_names(&self) -> Vec<String> {
        self.experiments.read().keys().cloned().collect()
    }

    /// Runs filed under `experiment`, oldest first.
    #[must_use]
    pub fn runs(&self, experiment: &str) -> Vec<RegisteredRun> {
        self.experiments
            .read()
            .get(experiment)
            .map(|entry| entry.runs.iter().map(|run| run.meta.clone()).collect())
            .unwrap_or_default()
    }

    /// Total runs across experiments.
    #[must_use]
    pub fn run_count(&self) -> usize {
        self.experiments
            .read()
            .values()
            .map(|entry| entry.runs.len())
            .sum()
    }

    fn ensure_experiment(experiments: &mut IndexMap<String, Experiment>, name: &str) -> String {
        let next_id = experiments.len() + 1;
        experiments
            .entry(name.to_string())
            .or_insert_with(|| Experiment {
                id: next_id.to_string(),
                runs: Vec::new(),
            })
            .id
            .clone()
    }
}

impl ModelRepository for InMemoryModelRegistry {
    fn set_experiment(&self, name: &str) -> ValuationResult<String> {
        if name.trim().is_empty() {
            return Err(ValuationError::Persistence("experiment name is empty".into()));
        }
        Ok(Self::ensure_experiment(&mut self.experiments.write(), name))
    }

    fn save_model(
        &self,
        experiment: &str,
        model: ModelHandle,
        params: &Hyperparameters,
        metrics: &Metrics,
    ) -> ValuationResult<ModelReceipt> {
        if experiment.trim().is_empty() {
            return Err(ValuationError::Persistence("experiment name is empty".into()));
        }
        let run_id = Uuid::new_v4().simple().to_string();
        let uri = format!("{URI_SCHEME}{experiment}/{run_id}");
        let receipt = {
            let mut experiments = self.experiments.write();
            let experiment_id = Self::ensure_experiment(&mut experiments, experiment);
            let meta = RegisteredRun {
                run_id: run_id.clone(),
                experiment: experiment.to_string(),
                experiment_id: experiment_id.clone(),
                uri: uri.clone(),
                params: params.to_params(),
                metrics: metrics.to_map(),
                recorded_at: Utc::now(),
            };
            if let Some(entry) = experiments.get_mut(experiment) {
                entry.runs.push(StoredRun { meta, model });
            }
            ModelReceipt {
                uri,
                experiment_id,
                run_id,
            }
        };
        self.telemetry.info(
            "registry.run_saved",
            json!({ "experiment": experiment, "uri": receipt.uri, "rmse": metrics.rmse }),
        );
        Ok(receipt)
    }

    fn load_model(&self, uri: &str) -> ValuationResult<ModelHandle> {
        let (experiment, run_id) = uri
            .strip_prefix(URI_SCHEME)
            .and_then(|rest| rest.rsplit_once('/'))
            .ok_or_else(|| ValuationError::Persistence(format!("malformed model uri '{uri}'")))?;
        self.experiments
            .read()
            .get(experiment)
            .and_then(|entry| entry.runs.iter().find(|run| run.meta.run_id == run_id))
            .map(|run| Arc::clone(&run.model))
            .ok_or_else(|| ValuationError::ModelNotFound(uri.to_string()))
    }

    fn get_best_model(&self, metric: &str) -> ValuationResult<ModelHandle> {
        let ascending = lower_is_better(metric);
        let experiments = self.experiments.read();
        let mut best: Option<(f64, &StoredRun)> = None;
        for run in experiments.values().flat_map(|entry| entry.runs.iter()) {
            let Some(&value) = run.meta.metrics.get(metric) else {
                continue;
            };
            if !value.is_finite() {
                continue;
            }
            let better = match best {
                None => true,
                Some((current, _)) if ascending => value < current,
                Some((current, _)) => value > current,
            };
            if better {
                best = Some((value, run));
            }
        }
        best.map(|(_, run)| Arc::clone(&run.model)).ok_or_else(|| {
            ValuationError::ModelNotFound(format!("no run records metric '{metric}'"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FixedRegressor;

    fn metrics(rmse: f64, r2: f64) -> Metrics {
        Metrics {
            r2: Some(r2),
            ..Metrics::rmse_only(rmse)
        }
    }

    fn price_of(model: &ModelHandle) -> f64 {
        model.predict(&[[0.0; 7]]).unwrap()[0]
    }

    #[test]
    fn repeated_experiment_names_accumulate_runs() {
        let registry = InMemoryModelRegistry::new();
        let first = registry.set_experiment("lisbon").unwrap();
        assert_eq!(registry.set_experiment("lisbon").unwrap(), first);
        for price in [1.0, 2.0] {
            registry
                .save_model(
                    "lisbon",
                    Arc::new(FixedRegressor::new(price)),
                    &Hyperparameters::default(),
                    &Metrics::rmse_only(10.0),
                )
                .unwrap();
        }
        let runs = registry.runs("lisbon");
        assert_eq!(runs.len(), 2);
        assert_ne!(runs[0].run_id, runs[1].run_id);
        assert_eq!(runs[0].params["n_estimators"], "100");
        assert_eq!(registry.experiment_names(), ["lisbon"]);
    }

    #[test]
    fn uris_resolve_to_the_saved_model() {
        let registry = InMemoryModelRegistry::new();
        let receipt = registry
            .save_model(
                "porto/north",
                Arc::new(FixedRegressor::new(7.0)),
                &Hyperparameters::default(),
                &Metrics::rmse_only(1.0),
            )
            .unwrap();
        assert!(receipt.uri.starts_with("models:/porto/north/"));
        assert_eq!(price_of(&registry.load_model(&receipt.uri).unwrap()), 7.0);
        assert!(matches!(
            registry.load_model("models:/porto/north/nope"),
            Err(ValuationError::ModelNotFound(_))
        ));
        assert!(matches!(
            registry.load_model("s3://bucket/model"),
            Err(ValuationError::Persistence(_))
        ));
    }

    #[test]
    fn best_model_respects_metric_direction() {
        let registry = InMemoryModelRegistry::new();
        let params = Hyperparameters::default();
        registry
            .save_model("a", Arc::new(FixedRegressor::new(1.0)), &params, &metrics(50.0, 0.7))
            .unwrap();
        registry
            .save_model("b", Arc::new(FixedRegressor::new(2.0)), &params, &metrics(80.0, 0.9))
            .unwrap();
        assert_eq!(price_of(&registry.get_best_model("rmse").unwrap()), 1.0);
        assert_eq!(price_of(&registry.get_best_model("r2").unwrap()), 2.0);
        assert!(matches!(
            registry.get_best_model("mape"),
            Err(ValuationError::ModelNotFound(_))
        ));
    }

    #[test]
    fn empty_registry_has_no_best_model() {
        assert!(InMemoryModelRegistry::new().get_best_model("rmse").is_err());
        assert!(InMemoryModelRegistry::new().set_experiment("  ").is_err());
    }
}
