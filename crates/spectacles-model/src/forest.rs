//! Random forest regressor built from CART regression trees.
//!
//! Each tree is grown on a bootstrap sample with the squared-error
//! criterion. Splits are placed halfway between adjacent distinct feature
//! values and samples go left when `value <= threshold`. All randomness
//! comes from a single seeded generator, so a fit is reproducible.

use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Adjacent feature values closer than this are not split between.
const FEATURE_EPSILON: f64 = 1e-7;
/// Nodes whose squared error is at or below this become leaves.
const IMPURITY_EPSILON: f64 = 1e-12;

#[derive(Error, Debug)]
pub enum ForestError {
    #[error("cannot fit on an empty training set")]
    EmptyTrainingSet,
    #[error("feature matrix has {rows} rows but {targets} targets")]
    LengthMismatch { rows: usize, targets: usize },
    #[error("expected {expected} features, got {actual}")]
    FeatureCount { expected: usize, actual: usize },
    #[error("invalid forest parameters: {0}")]
    InvalidParams(String),
}

/// Hyper-parameters for [`RandomForest::fit`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub bootstrap: bool,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 200,
            max_depth: Some(15),
            min_samples_split: 2,
            min_samples_leaf: 5,
            bootstrap: true,
            seed: 42,
        }
    }
}

impl ForestParams {
    fn validate(&self) -> Result<(), ForestError> {
        if self.n_estimators == 0 {
            return Err(ForestError::InvalidParams("n_estimators must be >= 1".into()));
        }
        if self.min_samples_leaf == 0 {
            return Err(ForestError::InvalidParams("min_samples_leaf must be >= 1".into()));
        }
        if self.min_samples_split < 2 {
            return Err(ForestError::InvalidParams("min_samples_split must be >= 2".into()));
        }
        Ok(())
    }
}

/// A node in a regression tree. Children are indices into the node list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TreeNode {
    Split {
        feature: u32,
        threshold: f64,
        left: u32,
        right: u32,
    },
    Leaf {
        value: f64,
    },
}

/// A single regression tree. Node 0 is the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<TreeNode>,
}

impl RegressionTree {
    pub fn nodes(&self) -> &[TreeNode] {
        &self.nodes
    }

    pub fn predict(&self, row: ArrayView1<f64>) -> f64 {
        let mut idx = 0usize;
        loop {
            match &self.nodes[idx] {
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature as usize] <= *threshold {
                        *left as usize
                    } else {
                        *right as usize
                    };
                }
                TreeNode::Leaf { value } => return *value,
            }
        }
    }

    /// Longest root-to-leaf path, counted in edges.
    pub fn depth(&self) -> usize {
        fn walk(nodes: &[TreeNode], idx: usize) -> usize {
            match &nodes[idx] {
                TreeNode::Split { left, right, .. } => {
                    1 + walk(nodes, *left as usize).max(walk(nodes, *right as usize))
                }
                TreeNode::Leaf { .. } => 0,
            }
        }
        walk(&self.nodes, 0)
    }
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    children_sse: f64,
}

/// Grows one tree and accumulates impurity decrease per feature.
struct TreeBuilder<'a> {
    x: ArrayView2<'a, f64>,
    y: ArrayView1<'a, f64>,
    params: &'a ForestParams,
    nodes: Vec<TreeNode>,
    importances: Vec<f64>,
}

impl<'a> TreeBuilder<'a> {
    fn new(x: ArrayView2<'a, f64>, y: ArrayView1<'a, f64>, params: &'a ForestParams) -> Self {
        Self {
            x,
            y,
            params,
            nodes: Vec::new(),
            importances: vec![0.0; x.ncols()],
        }
    }

    fn build(&mut self, samples: &mut [usize], depth: usize) -> u32 {
        let node_idx = self.nodes.len();
        self.nodes.push(TreeNode::Leaf { value: 0.0 });

        let n = samples.len() as f64;
        let (sum, sumsq) = samples.iter().fold((0.0, 0.0), |(s, q), &i| {
            let v = self.y[i];
            (s + v, q + v * v)
        });
        let sse = (sumsq - sum * sum / n).max(0.0);

        let can_split = self.params.max_depth.map_or(true, |d| depth < d)
            && samples.len() >= self.params.min_samples_split
            && samples.len() >= 2 * self.params.min_samples_leaf
            && sse > IMPURITY_EPSILON;

        if can_split {
            if let Some(split) = self.best_split(samples, sum, sumsq, sse) {
                let (x, feature, threshold) = (self.x, split.feature, split.threshold);
                let (mut left, right): (Vec<usize>, Vec<usize>) =
                    samples.iter().partition(|&&i| x[[i, feature]] <= threshold);
                let mid = left.len();
                left.extend(right);
                samples.copy_from_slice(&left);

                self.importances[feature] += sse - split.children_sse;

                let (l, r) = samples.split_at_mut(mid);
                let left_idx = self.build(l, depth + 1);
                let right_idx = self.build(r, depth + 1);
                self.nodes[node_idx] = TreeNode::Split {
                    feature: feature as u32,
                    threshold,
                    left: left_idx,
                    right: right_idx,
                };
                return node_idx as u32;
            }
        }

        self.nodes[node_idx] = TreeNode::Leaf { value: sum / n };
        node_idx as u32
    }

    /// Exhaustive search over every feature and every distinct-value gap.
    /// Ties keep the first candidate found, which keeps fits deterministic.
    fn best_split(
        &self,
        samples: &[usize],
        total_sum: f64,
        total_sumsq: f64,
        parent_sse: f64,
    ) -> Option<SplitCandidate> {
        let n = samples.len();
        let min_leaf = self.params.min_samples_leaf;
        let mut order = samples.to_vec();
        let mut best: Option<SplitCandidate> = None;

        for feature in 0..self.x.ncols() {
            let column = self.x.column(feature);
            order.sort_by(|&a, &b| column[a].total_cmp(&column[b]));

            let mut left_sum = 0.0;
            let mut left_sumsq = 0.0;
            for i in 0..n - 1 {
                let v = self.y[order[i]];
                left_sum += v;
                left_sumsq += v * v;

                let left_n = i + 1;
                let right_n = n - left_n;
                if left_n < min_leaf {
                    continue;
                }
                if right_n < min_leaf {
                    break;
                }

                let lo = column[order[i]];
                let hi = column[order[i + 1]];
                if hi <= lo + FEATURE_EPSILON {
                    continue;
                }

                let right_sum = total_sum - left_sum;
                let right_sumsq = total_sumsq - left_sumsq;
                let children_sse = (left_sumsq - left_sum * left_sum / left_n as f64)
                    + (right_sumsq - right_sum * right_sum / right_n as f64);

                if best.as_ref().map_or(true, |b| children_sse < b.children_sse) {
                    let mut threshold = lo + (hi - lo) / 2.0;
                    if threshold >= hi {
                        threshold = lo;
                    }
                    best = Some(SplitCandidate {
                        feature,
                        threshold,
                        children_sse,
                    });
                }
            }
        }

        best.filter(|b| b.children_sse < parent_sse - IMPURITY_EPSILON)
    }
}

/// Bagged ensemble of regression trees; predictions are the tree mean.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    params: ForestParams,
    n_features: usize,
    trees: Vec<RegressionTree>,
    feature_importances: Vec<f64>,
}

impl RandomForest {
    pub fn fit(
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        params: &ForestParams,
    ) -> Result<Self, ForestError> {
        params.validate()?;
        let rows = x.nrows();
        if rows == 0 {
            return Err(ForestError::EmptyTrainingSet);
        }
        if y.len() != rows {
            return Err(ForestError::LengthMismatch {
                rows,
                targets: y.len(),
            });
        }

        let n_features = x.ncols();
        let mut rng = StdRng::seed_from_u64(params.seed);
        let mut trees = Vec::with_capacity(params.n_estimators);
        let mut importances = vec![0.0; n_features];

        for _ in 0..params.n_estimators {
            let mut tree_rng = StdRng::seed_from_u64(rng.gen());
            let mut samples: Vec<usize> = if params.bootstrap {
                (0..rows).map(|_| tree_rng.gen_range(0..rows)).collect()
            } else {
                (0..rows).collect()
            };

            let mut builder = TreeBuilder::new(x, y, params);
            builder.build(&mut samples, 0);

            let total: f64 = builder.importances.iter().sum();
            if total > 0.0 {
                for (acc, v) in importances.iter_mut().zip(&builder.importances) {
                    *acc += v / total;
                }
            }
            trees.push(RegressionTree {
                nodes: builder.nodes,
            });
        }

        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            importances.iter_mut().for_each(|v| *v /= total);
        }

        tracing::debug!(
            trees = trees.len(),
            rows,
            features = n_features,
            max_depth = trees.iter().map(RegressionTree::depth).max().unwrap_or(0),
            "random forest fitted"
        );

        Ok(Self {
            params: params.clone(),
            n_features,
            trees,
            feature_importances: importances,
        })
    }

    pub fn predict_row(&self, row: ArrayView1<f64>) -> Result<f64, ForestError> {
        if row.len() != self.n_features {
            return Err(ForestError::FeatureCount {
                expected: self.n_features,
                actual: row.len(),
            });
        }
        let sum: f64 = self.trees.iter().map(|t| t.predict(row)).sum();
        Ok(sum / self.trees.len() as f64)
    }

    pub fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>, ForestError> {
        x.rows().into_iter().map(|row| self.predict_row(row)).collect()
    }

    /// Coefficient of determination of the predictions on `(x, y)`.
    pub fn score(&self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<f64, ForestError> {
        let predicted = self.predict(x)?;
        Ok(r2_score(y, predicted.view()))
    }

    pub fn params(&self) -> &ForestParams {
        &self.params
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn trees(&self) -> &[RegressionTree] {
        &self.trees
    }

    /// Normalised impurity-decrease importance per feature (sums to 1).
    pub fn feature_importances(&self) -> &[f64] {
        &self.feature_importances
    }
}

/// R^2 = 1 - SS_res / SS_tot. A constant target scores 1.0 when predicted
/// exactly and 0.0 otherwise.
pub fn r2_score(y_true: ArrayView1<f64>, y_pred: ArrayView1<f64>) -> f64 {
    let n = y_true.len();
    if n == 0 {
        return 0.0;
    }
    let mean = y_true.sum() / n as f64;
    let ss_res: f64 = y_true
        .iter()
        .zip(y_pred.iter())
        .map(|(t, p)| (t - p).powi(2))
        .sum();
    let ss_tot: f64 = y_true.iter().map(|t| (t - mean).powi(2)).sum();
    if ss_tot <= IMPURITY_EPSILON {
        return if ss_res <= IMPURITY_EPSILON { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    fn step_data() -> (Array2<f64>, Array1<f64>) {
        // y depends only on feature 0: 1.0 below 5, 9.0 from 5 upward.
        let rows = 40;
        let x = Array2::from_shape_fn((rows, 2), |(i, j)| {
            if j == 0 {
                (i % 10) as f64
            } else {
                ((i * 7) % 13) as f64
            }
        });
        let y = x.column(0).mapv(|v| if v < 5.0 { 1.0 } else { 9.0 });
        (x, y)
    }

    fn single_tree() -> ForestParams {
        ForestParams {
            n_estimators: 1,
            max_depth: None,
            min_samples_leaf: 1,
            bootstrap: false,
            ..ForestParams::default()
        }
    }

    #[test]
    fn test_single_tree_learns_step() {
        let (x, y) = step_data();
        let forest = RandomForest::fit(x.view(), y.view(), &single_tree()).unwrap();
        let tree = &forest.trees()[0];
        match &tree.nodes()[0] {
            TreeNode::Split {
                feature, threshold, ..
            } => {
                assert_eq!(*feature, 0);
                assert!((threshold - 4.5).abs() < 1e-12);
            }
            other => panic!("expected root split, got {other:?}"),
        }
        assert_eq!(tree.depth(), 1);
        assert_eq!(forest.predict_row(array![2.0, 0.0].view()).unwrap(), 1.0);
        assert_eq!(forest.predict_row(array![7.0, 0.0].view()).unwrap(), 9.0);
        assert!((forest.feature_importances()[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_max_depth_zero_is_mean_leaf() {
        let (x, y) = step_data();
        let params = ForestParams {
            max_depth: Some(0),
            ..single_tree()
        };
        let forest = RandomForest::fit(x.view(), y.view(), &params).unwrap();
        assert_eq!(forest.trees()[0].nodes().len(), 1);
        assert!((forest.predict_row(array![0.0, 0.0].view()).unwrap() - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_min_samples_leaf_respected() {
        let x = array![[0.0], [1.0], [2.0], [3.0], [4.0], [5.0]];
        let y = array![0.0, 0.0, 0.0, 0.0, 0.0, 100.0];
        let params = ForestParams {
            min_samples_leaf: 3,
            ..single_tree()
        };
        let forest = RandomForest::fit(x.view(), y.view(), &params).unwrap();
        // The only admissible split is 3/3 at 2.5.
        match &forest.trees()[0].nodes()[0] {
            TreeNode::Split { threshold, .. } => assert!((threshold - 2.5).abs() < 1e-12),
            other => panic!("expected split, got {other:?}"),
        }
    }

    #[test]
    fn test_same_seed_same_forest() {
        let (x, y) = step_data();
        let params = ForestParams {
            n_estimators: 8,
            min_samples_leaf: 2,
            ..ForestParams::default()
        };
        let a = RandomForest::fit(x.view(), y.view(), &params).unwrap();
        let b = RandomForest::fit(x.view(), y.view(), &params).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_forest_fits_step_well() {
        let (x, y) = step_data();
        let params = ForestParams {
            n_estimators: 20,
            min_samples_leaf: 1,
            ..ForestParams::default()
        };
        let forest = RandomForest::fit(x.view(), y.view(), &params).unwrap();
        let r2 = forest.score(x.view(), y.view()).unwrap();
        assert!(r2 > 0.9, "r2 = {r2}");
    }

    #[test]
    fn test_fit_errors() {
        let x = Array2::<f64>::zeros((0, 2));
        let y = Array1::<f64>::zeros(0);
        assert!(matches!(
            RandomForest::fit(x.view(), y.view(), &ForestParams::default()),
            Err(ForestError::EmptyTrainingSet)
        ));

        let x = Array2::<f64>::zeros((3, 2));
        let y = Array1::<f64>::zeros(2);
        assert!(matches!(
            RandomForest::fit(x.view(), y.view(), &ForestParams::default()),
            Err(ForestError::LengthMismatch { rows: 3, targets: 2 })
        ));

        let params = ForestParams {
            n_estimators: 0,
            ..ForestParams::default()
        };
        let y = Array1::<f64>::zeros(3);
        assert!(matches!(
            RandomForest::fit(x.view(), y.view(), &params),
            Err(ForestError::InvalidParams(_))
        ));
    }

    #[test]
    fn test_predict_checks_width() {
        let (x, y) = step_data();
        let forest = RandomForest::fit(x.view(), y.view(), &single_tree()).unwrap();
        assert!(matches!(
            forest.predict_row(array![1.0].view()),
            Err(ForestError::FeatureCount { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn test_r2_score() {
        let y = array![1.0, 2.0, 3.0];
        assert_eq!(r2_score(y.view(), y.view()), 1.0);
        let mean = array![2.0, 2.0, 2.0];
        assert!(r2_score(y.view(), mean.view()).abs() < 1e-12);
        let c = array![4.0, 4.0];
        assert_eq!(r2_score(c.view(), c.view()), 1.0);
        assert_eq!(r2_score(c.view(), array![3.0, 4.0].view()), 0.0);
    }
}
