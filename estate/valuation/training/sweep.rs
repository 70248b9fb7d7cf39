use std::{
    cmp::Ordering,
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering as AtomicOrdering},
        Arc,
    },
    thread,
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    config::{ValuationConfig, DEFAULT_SWEEP_MENU},
    ports::Hyperparameters,
    quality::MetricValue,
    telemetry::ValuationTelemetry,
    training::{TrainModelUseCase, TrainingResult},
};

/// Experiment id and name of the result returned when every trial failed.
pub const OPTIMIZATION_FAILED: &str = "optimization_failed";

/// How trials are scheduled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepMode {
    /// One trial after another, in menu order.
    #[default]
    Sequential,
    /// Trials pulled from a shared queue by scoped worker threads.
    Parallel {
        /// Worker thread count.
        workers: usize,
    },
}

/// Compact record of one trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialSummary {
    /// 1-based position in the menu.
    pub index: usize,
    /// Sub-experiment the trial ran under.
    pub experiment: String,
    /// Hyperparameters tried.
    pub hyperparameters: Hyperparameters,
    /// RMSE; infinite for failed trials.
    #[serde(with = "crate::training::failed_rmse")]
    pub rmse: f64,
    /// MAE, measured or estimated.
    pub mae: Option<MetricValue>,
    /// R², measured or estimated.
    pub r2: Option<MetricValue>,
    /// Whether the trial produced a model.
    pub success: bool,
    /// Failure description.
    pub error: Option<String>,
}

impl TrialSummary {
    fn from_result(
        index: usize,
        experiment: String,
        hyperparameters: Hyperparameters,
        result: &TrainingResult,
    ) -> Self {
        Self {
            index,
            experiment,
            hyperparameters,
            rmse: result.rmse,
            mae: result.mae,
            r2: result.r2_score,
            success: result.success,
            error: result.error_message.clone(),
        }
    }

    fn score(&self) -> Option<f64> {
        self.r2
            .filter(|_| self.success)
            .map(|metric| metric.value)
            .filter(|value| value.is_finite())
    }
}

/// Every trial of a sweep plus the winner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Base experiment name.
    pub experiment: String,
    /// Trials in menu order.
    pub trials: Vec<TrialSummary>,
    /// 1-based index of the winning trial.
    pub best_index: Option<usize>,
    /// Full result of the winner, or the failed placeholder.
    pub best: TrainingResult,
}

impl SweepReport {
    /// Trials by R² descending; failures last; ties keep menu order.
    #[must_use]
    pub fn ranked(&self) -> Vec<&TrialSummary> {
        let mut ranked: Vec<&TrialSummary> = self.trials.iter().collect();
        ranked.sort_by(|a, b| match (a.score(), b.score()) {
            (Some(left), Some(right)) => right.partial_cmp(&left).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        });
        ranked
    }

    /// Number of trials that produced a model.
    #[must_use]
    pub fn successful_trials(&self) -> usize {
        self.trials.iter().filter(|trial| trial.success).count()
    }
}

/// Running winner. Higher R² wins; equal R² keeps the lower trial index.
struct Leader {
    index: usize,
    r2: f64,
    result: TrainingResult,
}

#[allow(clippy::float_cmp)]
fn offer(leader: &mut Option<Leader>, index: usize, result: &TrainingResult) {
    if !result.is_rankable() {
        return;
    }
    let Some(r2) = result.r2() else {
        return;
    };
    let replace = match leader.as_ref() {
        None => true,
        Some(current) => r2 > current.r2 || (r2 == current.r2 && index < current.index),
    };
    if replace {
        *leader = Some(Leader {
            index,
            r2,
            result: result.clone(),
        });
    }
}

/// Tries every menu entry and keeps the model with the highest R².
pub struct HyperparameterSweep {
    training: Arc<TrainModelUseCase>,
    menu: Vec<Hyperparameters>,
    mode: SweepMode,
    telemetry: ValuationTelemetry,
}

impl HyperparameterSweep {
    /// Sweep over the default seven-entry menu, sequentially.
    #[must_use]
    pub fn new(training: Arc<TrainModelUseCase>) -> Self {
        let telemetry = training.telemetry().scoped("sweep");
        Self {
            training,
            menu: DEFAULT_SWEEP_MENU
                .iter()
                .map(|&(n_estimators, max_depth)| Hyperparameters::new(n_estimators, max_depth))
                .collect(),
            mode: SweepMode::Sequential,
            telemetry,
        }
    }

    /// Sweep using the menu and mode of `config`.
    #[must_use]
    pub fn from_config(training: Arc<TrainModelUseCase>, config: &ValuationConfig) -> Self {
        Self::new(training)
            .with_menu(config.sweep_menu())
            .with_mode(config.sweep.mode)
    }

    /// Replaces the menu.
    #[must_use]
    pub fn with_menu(mut self, menu: Vec<Hyperparameters>) -> Self {
        self.menu = menu;
        self
    }

    /// Replaces the execution mode.
    #[must_use]
    pub fn with_mode(mut self, mode: SweepMode) -> Self {
        self.mode = mode;
        self
    }

    /// Menu in trial order.
    #[must_use]
    pub fn menu(&self) -> &[Hyperparameters] {
        &self.menu
    }

    /// Best trial's result, or a failed result tagged `optimization_failed`.
    pub fn execute_hyperparameter_optimization(
        &self,
        path: &Path,
        experiment: &str,
    ) -> TrainingResult {
        self.run(path, experiment).best
    }

    /// Runs every trial and reports all of them.
    pub fn run(&self, path: &Path, experiment: &str) -> SweepReport {
        self.telemetry.info(
            "sweep.started",
            json!({ "experiment": experiment, "trials": self.menu.len(), "mode": format!("{:?}", self.mode) }),
        );
        let (trials, leader) = match self.mode {
            SweepMode::Parallel { workers } if workers > 1 && self.menu.len() > 1 => {
                self.run_parallel(path, experiment, workers)
            }
            _ => self.run_sequential(path, experiment),
        };

        let (best_index, best) = match leader {
            Some(leader) => (Some(leader.index), leader.result),
            None => {
                self.telemetry.warn(
                    "sweep.all_failed",
                    json!({ "experiment": experiment, "trials": trials.len() }),
                );
                let first = self.menu.first().copied().unwrap_or_default();
                let mut failed = TrainingResult::failed(
                    &first,
                    OPTIMIZATION_FAILED,
                    format!("all {} trials failed", trials.len()),
                );
                failed.experiment_id = OPTIMIZATION_FAILED.to_string();
                (None, failed)
            }
        };
        if let Some(index) = best_index {
            self.telemetry.info(
                "sweep.completed",
                json!({
                    "experiment": experiment,
                    "best_trial": index,
                    "r2": best.r2(),
                    "rmse": best.rmse,
                    "n_estimators": best.n_estimators,
                    "max_depth": best.max_depth,
                }),
            );
        }
        SweepReport {
            experiment: experiment.to_string(),
            trials,
            best_index,
            best,
        }
    }

    fn trial(&self, path: &Path, experiment: &str, position: usize) -> (TrialSummary, TrainingResult) {
        let index = position + 1;
        let hyperparameters = self.menu[position];
        let name = format!("{experiment}_trial_{index}");
        let result = self.training.execute(path, &hyperparameters, &name);
        if result.success {
            self.telemetry.info(
                "sweep.trial",
                json!({ "trial": index, "experiment": name, "rmse": result.rmse, "r2": result.r2() }),
            );
        } else {
            self.telemetry.warn(
                "sweep.trial_failed",
                json!({ "trial": index, "experiment": name, "error": result.error_message }),
            );
        }
        (
            TrialSummary::from_result(index, name, hyperparameters, &result),
            result,
        )
    }

    fn run_sequential(&self, path: &Path, experiment: &str) -> (Vec<TrialSummary>, Option<Leader>) {
        let mut leader = None;
        let mut trials = Vec::with_capacity(self.menu.len());
        for position in 0..self.menu.len() {
            let (summary, result) = self.trial(path, experiment, position);
            offer(&mut leader, summary.index, &result);
            trials.push(summary);
        }
        (trials, leader)
    }

    fn run_parallel(
        &self,
        path: &Path,
        experiment: &str,
        workers: usize,
    ) -> (Vec<TrialSummary>, Option<Leader>) {
        let next = AtomicUsize::new(0);
        let slots: Mutex<Vec<Option<TrialSummary>>> = Mutex::new(vec![None; self.menu.len()]);
        let leader: Mutex<Option<Leader>> = Mutex::new(None);

        thread::scope(|scope| {
            for _ in 0..workers.min(self.menu.len()) {
                scope.spawn(|| loop {
                    let position = next.fetch_add(1, AtomicOrdering::Relaxed);
                    if position >= self.menu.len() {
                        break;
                    }
                    let (summary, result) = self.trial(path, experiment, position);
                    offer(&mut leader.lock(), summary.index, &result);
                    slots.lock()[position] = Some(summary);
                });
            }
        });

        let trials = slots.into_inner().into_iter().flatten().collect();
        (trials, leader.into_inner())
    }
}
