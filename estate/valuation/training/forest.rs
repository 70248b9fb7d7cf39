use std::sync::Arc;

use anyhow::{bail, ensure};
use rand::{rngs::SmallRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::{
    ports::{FeatureVector, Hyperparameters, ModelHandle, Regressor},
    property::FEATURE_COUNT,
    training::trainer::{Estimator, EstimatorFactory},
};

/// Smallest gain in summed squared error that justifies a split.
const MIN_GAIN: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// Running sums over a set of targets.
#[derive(Debug, Clone, Copy, Default)]
struct Moments {
    count: usize,
    sum: f64,
    sum_sq: f64,
}

impl Moments {
    fn push(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.sum_sq = value.mul_add(value, self.sum_sq);
    }

    fn without(self, other: Self) -> Self {
        Self {
            count: self.count - other.count,
            sum: self.sum - other.sum,
            sum_sq: self.sum_sq - other.sum_sq,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn sse(self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        (self.sum_sq - self.sum * self.sum / self.count as f64).max(0.0)
    }

    #[allow(clippy::cast_precision_loss)]
    fn mean(self) -> f64 {
        self.sum / self.count.max(1) as f64
    }
}

/// CART regression tree stored as a flat node arena. Node 0 is the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    /// Grows a tree over `sample` (row indices, repeats allowed).
    ///
    /// `max_depth` of zero leaves depth unbounded.
    fn grow(rows: &[FeatureVector], target: &[f64], sample: &mut [usize], max_depth: u32) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.build(rows, target, sample, 0, max_depth);
        tree
    }

    fn build(
        &mut self,
        rows: &[FeatureVector],
        target: &[f64],
        sample: &mut [usize],
        depth: u32,
        max_depth: u32,
    ) -> usize {
        let id = self.nodes.len();
        let mut totals = Moments::default();
        for &row in sample.iter() {
            totals.push(target[row]);
        }
        self.nodes.push(Node::Leaf {
            value: totals.mean(),
        });

        let depth_left = max_depth == 0 || depth < max_depth;
        if !depth_left || sample.len() < 2 {
            return id;
        }
        let Some((feature, threshold)) = best_split(rows, target, sample, totals) else {
            return id;
        };

        let mut boundary = 0;
        for position in 0..sample.len() {
            if rows[sample[position]][feature] <= threshold {
                sample.swap(position, boundary);
                boundary += 1;
            }
        }
        let (lower, upper) = sample.split_at_mut(boundary);
        let left = self.build(rows, target, lower, depth + 1, max_depth);
        let right = self.build(rows, target, upper, depth + 1, max_depth);
        self.nodes[id] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        id
    }

    fn predict_row(&self, row: &FeatureVector) -> f64 {
        let mut id = 0;
        loop {
            match self.nodes.get(id) {
                Some(Node::Leaf { value }) => return *value,
                Some(&Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => id = if row[feature] <= threshold { left } else { right },
                None => return 0.0,
            }
        }
    }

    /// Levels below the root.
    #[must_use]
    pub fn depth(&self) -> u32 {
        fn walk(nodes: &[Node], id: usize) -> u32 {
            match nodes.get(id) {
                Some(&Node::Split { left, right, .. }) => {
                    1 + walk(nodes, left).max(walk(nodes, right))
                }
                _ => 0,
            }
        }
        walk(&self.nodes, 0)
    }
}

/// Lowest summed squared error split over every feature, if any beats the parent.
fn best_split(
    rows: &[FeatureVector],
    target: &[f64],
    sample: &[usize],
    totals: Moments,
) -> Option<(usize, f64)> {
    let parent = totals.sse();
    let mut best: Option<(f64, usize, f64)> = None;
    let mut order = sample.to_vec();
    for feature in 0..FEATURE_COUNT {
        order.sort_by(|a, b| rows[*a][feature].total_cmp(&rows[*b][feature]));
        let mut lower = Moments::default();
        for pair in order.windows(2) {
            lower.push(target[pair[0]]);
            let (here, next) = (rows[pair[0]][feature], rows[pair[1]][feature]);
            if here >= next {
                continue;
            }
            let cost = lower.sse() + totals.without(lower).sse();
            let improves = match best {
                None => cost < parent - MIN_GAIN,
                Some((current, ..)) => cost < current,
            };
            if improves {
                best = Some((cost, feature, (here + next) / 2.0));
            }
        }
    }
    best.map(|(_, feature, threshold)| (feature, threshold))
}

/// Bagged regression trees averaged into one price estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<RegressionTree>,
}

impl RandomForest {
    /// Fits `n_estimators` trees, each on a bootstrap draw seeded from `random_state`.
    pub fn fit(
        rows: &[FeatureVector],
        target: &[f64],
        hyperparameters: &Hyperparameters,
    ) -> anyhow::Result<Self> {
        ensure!(!rows.is_empty(), "cannot fit on an empty training set");
        ensure!(
            rows.len() == target.len(),
            "{} rows but {} targets",
            rows.len(),
            target.len()
        );
        ensure!(
            hyperparameters.n_estimators > 0,
            "n_estimators must be at least 1"
        );
        if rows.iter().flatten().chain(target).any(|value| !value.is_finite()) {
            bail!("training data contains non-finite values");
        }

        let mut rng = SmallRng::seed_from_u64(hyperparameters.random_state);
        let mut sample = vec![0; rows.len()];
        let trees = (0..hyperparameters.n_estimators)
            .map(|_| {
                for slot in &mut sample {
                    *slot = rng.gen_range(0..rows.len());
                }
                RegressionTree::grow(rows, target, &mut sample, hyperparameters.max_depth)
            })
            .collect();
        Ok(Self { trees })
    }

    /// Fitted trees.
    #[must_use]
    pub fn trees(&self) -> &[RegressionTree] {
        &self.trees
    }
}

impl Regressor for RandomForest {
    #[allow(clippy::cast_precision_loss)]
    fn predict(&self, rows: &[FeatureVector]) -> anyhow::Result<Vec<f64>> {
        ensure!(!self.trees.is_empty(), "forest has no trees");
        let count = self.trees.len() as f64;
        Ok(rows
            .iter()
            .map(|row| {
                self.trees
                    .iter()
                    .map(|tree| tree.predict_row(row))
                    .sum::<f64>()
                    / count
            })
            .collect())
    }

    fn algorithm(&self) -> &str {
        "random_forest"
    }
}

/// Builds [`RandomForest`] estimators from run hyperparameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RandomForestFactory;

/// A forest configured for one run.
#[derive(Debug, Clone, Copy)]
struct ForestEstimator {
    hyperparameters: Hyperparameters,
}

impl EstimatorFactory for RandomForestFactory {
    fn build(&self, hyperparameters: &Hyperparameters) -> Box<dyn Estimator> {
        Box::new(ForestEstimator {
            hyperparameters: *hyperparameters,
        })
    }
}

impl Estimator for ForestEstimator {
    fn fit(&self, rows: &[FeatureVector], target: &[f64]) -> anyhow::Result<ModelHandle> {
        let model = RandomForest::fit(rows, target, &self.hyperparameters)?;
        Ok(Arc::new(model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(clippy::cast_precision_loss)]
    fn listings(n: usize) -> (Vec<FeatureVector>, Vec<f64>) {
        let rows: Vec<FeatureVector> = (0..n)
            .map(|i| {
                [
                    100_000.0 + 5_000.0 * i as f64,
                    50.0 + (i % 7) as f64 * 10.0,
                    (i % 5) as f64,
                    2.0,
                    1.0,
                    (i % 2) as f64,
                    0.0,
                ]
            })
            .collect();
        let target = rows
            .iter()
            .map(|row| 1.2 * row[0] + 800.0 * row[1] + 20_000.0)
            .collect();
        (rows, target)
    }

    fn fitted(rows: &[FeatureVector], target: &[f64], n: u32, depth: u32) -> RandomForest {
        RandomForest::fit(rows, target, &Hyperparameters::new(n, depth)).unwrap()
    }

    #[test]
    fn tracks_the_training_signal() {
        let (rows, target) = listings(60);
        let predictions = fitted(&rows, &target, 50, 8).predict(&rows).unwrap();
        let worst = predictions
            .iter()
            .zip(&target)
            .map(|(pred, label)| (pred - label).abs() / label)
            .fold(0.0_f64, f64::max);
        assert!(worst < 0.15, "relative error {worst}");
    }

    #[test]
    fn hyperparameters_shape_the_ensemble() {
        let (rows, target) = listings(40);
        let shallow = fitted(&rows, &target, 3, 2);
        assert_eq!(shallow.trees().len(), 3);
        assert!(shallow.trees().iter().all(|tree| tree.depth() <= 2));

        let deep = fitted(&rows, &target, 10, 0);
        assert_eq!(deep.trees().len(), 10);
        assert!(deep.trees().iter().any(|tree| tree.depth() > 2));
        assert_ne!(
            shallow.predict(&rows).unwrap(),
            deep.predict(&rows).unwrap()
        );
    }

    #[test]
    fn same_seed_same_forest() {
        let (rows, target) = listings(30);
        let params = Hyperparameters::new(5, 4);
        let first = RandomForest::fit(&rows, &target, &params).unwrap();
        assert_eq!(first, RandomForest::fit(&rows, &target, &params).unwrap());
        let reseeded = Hyperparameters {
            random_state: 7,
            ..params
        };
        assert_ne!(first, RandomForest::fit(&rows, &target, &reseeded).unwrap());
    }

    #[test]
    fn constant_target_yields_single_leaves() {
        let (rows, _) = listings(10);
        let forest = fitted(&rows, &[10.0; 10], 4, 6);
        assert!(forest.trees().iter().all(|tree| tree.depth() == 0));
        let predictions = forest.predict(&rows).unwrap();
        assert!(predictions.iter().all(|value| (value - 10.0).abs() < 1e-9));
    }

    #[test]
    fn rejects_bad_training_data() {
        let params = Hyperparameters::default();
        assert!(RandomForest::fit(&[], &[], &params).is_err());
        let rows = vec![[f64::NAN; FEATURE_COUNT]];
        assert!(RandomForest::fit(&rows, &[1.0], &params).is_err());
        let (rows, target) = listings(4);
        assert!(RandomForest::fit(&rows, &target, &Hyperparameters::new(0, 3)).is_err());
    }

    #[test]
    fn factory_forwards_hyperparameters() {
        let (rows, target) = listings(20);
        let model = RandomForestFactory
            .build(&Hyperparameters::new(7, 3))
            .fit(&rows, &target)
            .unwrap();
        assert_eq!(model.algorithm(), "random_forest");
    }
}
