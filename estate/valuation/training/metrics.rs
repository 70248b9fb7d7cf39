use rand::{rngs::SmallRng, seq::SliceRandom, SeedableRng};

use crate::{
    error::{ValuationError, ValuationResult},
    ports::{FeatureVector, Metrics},
};

/// Train/test partition of a feature matrix.
#[derive(Debug, Clone, Default)]
pub struct Split {
    /// Fitting rows.
    pub train_features: Vec<FeatureVector>,
    /// Fitting targets.
    pub train_target: Vec<f64>,
    /// Held-out rows.
    pub test_features: Vec<FeatureVector>,
    /// Held-out targets.
    pub test_target: Vec<f64>,
}

/// Seeded shuffle split. Both sides keep at least one row.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn train_test_split(
    features: &[FeatureVector],
    target: &[f64],
    test_size: f64,
    seed: u64,
) -> ValuationResult<Split> {
    if features.len() != target.len() {
        return Err(ValuationError::Training(format!(
            "{} feature rows but {} targets",
            features.len(),
            target.len()
        )));
    }
    if features.len() < 2 {
        return Err(ValuationError::Training(format!(
            "need at least 2 rows to split, got {}",
            features.len()
        )));
    }
    let mut order: Vec<usize> = (0..features.len()).collect();
    order.shuffle(&mut SmallRng::seed_from_u64(seed));
    let n_test = ((features.len() as f64) * test_size.clamp(0.0, 1.0)).round() as usize;
    let n_test = n_test.clamp(1, features.len() - 1);

    let mut split = Split::default();
    for (position, &row) in order.iter().enumerate() {
        if position < n_test {
            split.test_features.push(features[row]);
            split.test_target.push(target[row]);
        } else {
            split.train_features.push(features[row]);
            split.train_target.push(target[row]);
        }
    }
    Ok(split)
}

/// Mean squared error; zero for empty or mismatched input.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn mean_squared_error(predictions: &[f64], actual: &[f64]) -> f64 {
    if predictions.is_empty() || predictions.len() != actual.len() {
        return 0.0;
    }
    predictions
        .iter()
        .zip(actual)
        .map(|(pred, label)| (pred - label).powi(2))
        .sum::<f64>()
        / predictions.len() as f64
}

/// Mean absolute error; zero for empty or mismatched input.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn mean_absolute_error(predictions: &[f64], actual: &[f64]) -> f64 {
    if predictions.is_empty() || predictions.len() != actual.len() {
        return 0.0;
    }
    predictions
        .iter()
        .zip(actual)
        .map(|(pred, label)| (pred - label).abs())
        .sum::<f64>()
        / predictions.len() as f64
}

/// Coefficient of determination. `None` when the target has no variance.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn r2_score(predictions: &[f64], actual: &[f64]) -> Option<f64> {
    if predictions.is_empty() || predictions.len() != actual.len() {
        return None;
    }
    let mean = actual.iter().sum::<f64>() / actual.len() as f64;
    let total: f64 = actual.iter().map(|label| (label - mean).powi(2)).sum();
    if total <= f64::EPSILON {
        return None;
    }
    let residual: f64 = predictions
        .iter()
        .zip(actual)
        .map(|(pred, label)| (label - pred).powi(2))
        .sum();
    Some(1.0 - residual / total)
}

/// Mean absolute percentage error in percent, skipping zero targets.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn mean_absolute_percentage_error(predictions: &[f64], actual: &[f64]) -> Option<f64> {
    let ratios: Vec<f64> = predictions
        .iter()
        .zip(actual)
        .filter(|(_, label)| label.abs() > f64::EPSILON)
        .map(|(pred, label)| ((label - pred) / label).abs())
        .collect();
    if ratios.is_empty() || predictions.len() != actual.len() {
        return None;
    }
    Some(100.0 * ratios.iter().sum::<f64>() / ratios.len() as f64)
}

/// Full metric set for held-out predictions.
#[must_use]
pub fn regression_metrics(predictions: &[f64], actual: &[f64]) -> Metrics {
    let mse = mean_squared_error(predictions, actual);
    Metrics {
        rmse: mse.sqrt(),
        mae: Some(mean_absolute_error(predictions, actual)),
        r2: r2_score(predictions, actual),
        mse: Some(mse),
        mape: mean_absolute_percentage_error(predictions, actual),
    }
}
