//! Gradient-statistics regression tree.
//!
//! One builder serves every tree-based model: plain CART fits use gradients
//! `-y` with unit hessians and no leaf penalty (leaf value = mean, gain =
//! variance reduction), boosting passes its own gradients and `lambda`.

use super::{check_width, FitError};
use ndarray::{Array1, ArrayView1, ArrayView2};

/// Growth limits and leaf regularization
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeParams {
    /// Maximum depth, `None` grows until leaves are pure
    pub max_depth: Option<usize>,
    /// Minimum rows required to attempt a split
    pub min_samples_split: usize,
    /// Minimum rows in each child
    pub min_samples_leaf: usize,
    /// L2 penalty on leaf weights
    pub lambda: f64,
    /// Minimum hessian sum in each child
    pub min_child_weight: f64,
}

impl TreeParams {
    /// Unpruned CART tree
    #[must_use]
    pub const fn cart(max_depth: Option<usize>) -> Self {
        Self {
            max_depth,
            min_samples_split: 2,
            min_samples_leaf: 1,
            lambda: 0.0,
            min_child_weight: 0.0,
        }
    }
}

impl Default for TreeParams {
    fn default() -> Self {
        Self::cart(None)
    }
}

#[derive(Debug, Clone)]
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

#[derive(Debug, Clone, Copy)]
struct Candidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

/// Binary regression tree stored as a flat node arena
#[derive(Debug, Clone)]
pub struct RegressionTree {
    nodes: Vec<Node>,
    n_features: usize,
}

struct Builder<'x, 'g> {
    x: ArrayView2<'x, f64>,
    grad: &'g [f64],
    hess: &'g [f64],
    params: TreeParams,
    nodes: Vec<Node>,
}

impl RegressionTree {
    /// Fit a least-squares tree to `y` over `rows` (duplicates allowed)
    #[must_use]
    pub fn fit(x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>, rows: &[usize], params: TreeParams) -> Self {
        let grad: Vec<f64> = y.iter().map(|v| -v).collect();
        let hess = vec![1.0; y.len()];
        Self::fit_gradients(x, &grad, &hess, rows, params)
    }

    /// Fit leaf weights `-G / (H + lambda)` to per-row gradient statistics
    #[must_use]
    pub fn fit_gradients(
        x: ArrayView2<'_, f64>,
        grad: &[f64],
        hess: &[f64],
        rows: &[usize],
        params: TreeParams,
    ) -> Self {
        let mut builder = Builder {
            x: x.reborrow(),
            grad,
            hess,
            params,
            nodes: Vec::new(),
        };
        let mut rows = rows.to_vec();
        builder.grow(&mut rows, 0);
        Self {
            nodes: builder.nodes,
            n_features: x.ncols(),
        }
    }

    /// Predict a single row
    #[must_use]
    pub fn predict_row(&self, row: ArrayView1<'_, f64>) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    /// Predict every row of `x`
    ///
    /// # Errors
    ///
    /// Returns `ShapeMismatch` if `x` has the wrong width.
    pub fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>, FitError> {
        check_width(self.n_features, x)?;
        Ok(x.rows().into_iter().map(|row| self.predict_row(row)).collect())
    }

    /// Number of leaves
    #[must_use]
    pub fn n_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| matches!(n, Node::Leaf { .. })).count()
    }
}

impl Builder<'_, '_> {
    fn leaf_value(&self, g: f64, h: f64) -> f64 {
        let denom = h + self.params.lambda;
        if denom > 0.0 {
            -g / denom
        } else {
            0.0
        }
    }

    fn score(&self, g: f64, h: f64) -> f64 {
        let denom = h + self.params.lambda;
        if denom > 0.0 {
            g * g / denom
        } else {
            0.0
        }
    }

    /// Grow the subtree for `rows` and return its node index
    fn grow(&mut self, rows: &mut [usize], depth: usize) -> usize {
        let g: f64 = rows.iter().map(|&r| self.grad[r]).sum();
        let h: f64 = rows.iter().map(|&r| self.hess[r]).sum();
        let idx = self.nodes.len();
        self.nodes.push(Node::Leaf {
            value: self.leaf_value(g, h),
        });

        let depth_reached = self.params.max_depth.is_some_and(|d| depth >= d);
        if depth_reached || rows.len() < self.params.min_samples_split.max(2) {
            return idx;
        }

        let Some(best) = self.best_split(rows, g, h) else {
            return idx;
        };

        let (feature, threshold) = (best.feature, best.threshold);
        let x = self.x;
        rows.sort_by_key(|&r| x[[r, feature]] > threshold);
        let split_at = rows.partition_point(|&r| x[[r, feature]] <= threshold);
        let (left_rows, right_rows) = rows.split_at_mut(split_at);

        let left = self.grow(left_rows, depth + 1);
        let right = self.grow(right_rows, depth + 1);
        self.nodes[idx] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        idx
    }

    fn best_split(&self, rows: &[usize], g_total: f64, h_total: f64) -> Option<Candidate> {
        let parent = self.score(g_total, h_total);
        let min_leaf = self.params.min_samples_leaf.max(1);
        let mut best: Option<Candidate> = None;
        let mut sorted: Vec<(f64, f64, f64)> = Vec::with_capacity(rows.len());

        for feature in 0..self.x.ncols() {
            sorted.clear();
            sorted.extend(
                rows.iter()
                    .map(|&r| (self.x[[r, feature]], self.grad[r], self.hess[r])),
            );

            let first = sorted[0].0;
            if sorted.iter().all(|s| s.0 == first) {
                continue;
            }
            sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

            let (mut g_left, mut h_left) = (0.0, 0.0);
            for i in 0..sorted.len() - 1 {
                g_left += sorted[i].1;
                h_left += sorted[i].2;
                if sorted[i].0 == sorted[i + 1].0 {
                    continue;
                }
                let n_left = i + 1;
                let n_right = sorted.len() - n_left;
                if n_left < min_leaf || n_right < min_leaf {
                    continue;
                }
                let (g_right, h_right) = (g_total - g_left, h_total - h_left);
                if h_left < self.params.min_child_weight || h_right < self.params.min_child_weight {
                    continue;
                }

                let gain = self.score(g_left, h_left) + self.score(g_right, h_right) - parent;
                if gain > 1e-12 * parent.abs().max(1.0) && best.map_or(true, |b| gain > b.gain) {
                    best = Some(Candidate {
                        feature,
                        threshold: 0.5 * (sorted[i].0 + sorted[i + 1].0),
                        gain,
                    });
                }
            }
        }

        best
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_stump_splits_step_function() {
        let x = array![[0.0], [1.0], [2.0], [3.0]];
        let y = array![1.0, 1.0, 5.0, 5.0];
        let rows: Vec<usize> = (0..4).collect();
        let tree = RegressionTree::fit(x.view(), y.view(), &rows, TreeParams::cart(Some(1)));

        assert_eq!(tree.n_leaves(), 2);
        let pred = tree.predict(array![[0.5], [2.5]].view()).unwrap();
        assert_eq!(pred.to_vec(), vec![1.0, 5.0]);
    }

    #[test]
    fn test_unpruned_tree_interpolates_training_data() {
        let x = array![[0.0, 1.0], [1.0, 0.0], [2.0, 1.0], [3.0, 0.0], [4.0, 1.0]];
        let y = array![3.0, -1.0, 4.0, 1.0, 5.0];
        let rows: Vec<usize> = (0..5).collect();
        let tree = RegressionTree::fit(x.view(), y.view(), &rows, TreeParams::default());
        let pred = tree.predict(x.view()).unwrap();
        for (p, t) in pred.iter().zip(y.iter()) {
            assert!((p - t).abs() < 1e-12);
        }
    }

    #[test]
    fn test_constant_target_is_single_leaf() {
        let x = array![[0.0], [1.0], [2.0]];
        let y = array![2.0, 2.0, 2.0];
        let tree = RegressionTree::fit(x.view(), y.view(), &[0, 1, 2], TreeParams::default());
        assert_eq!(tree.n_leaves(), 1);
    }

    #[test]
    fn test_lambda_shrinks_leaf() {
        let x = array![[0.0], [1.0]];
        let grad = [-4.0, -4.0];
        let hess = [1.0, 1.0];
        let params = TreeParams {
            lambda: 2.0,
            ..TreeParams::cart(Some(0))
        };
        let tree = RegressionTree::fit_gradients(x.view(), &grad, &hess, &[0, 1], params);
        // -G / (H + lambda) = 8 / 4
        assert_eq!(tree.predict_row(array![0.0].view()), 2.0);
    }

    #[test]
    fn test_gradients_shorter_lived_than_features() {
        let x = array![[0.0], [1.0], [2.0], [3.0]];
        let y = [1.0, 1.0, 5.0, 5.0];
        let mut pred = [0.0; 4];
        let mut trees = Vec::new();
        for _ in 0..3 {
            let grad: Vec<f64> = pred.iter().zip(y.iter()).map(|(p, t)| p - t).collect();
            let hess = vec![1.0; grad.len()];
            let tree = RegressionTree::fit_gradients(x.view(), &grad, &hess, &[0, 1, 2, 3], TreeParams::cart(Some(1)));
            for (i, p) in pred.iter_mut().enumerate() {
                *p += tree.predict_row(x.row(i));
            }
            trees.push(tree);
        }
        assert_eq!(trees.len(), 3);
        assert_eq!(pred, y);
    }

    #[test]
    fn test_duplicate_rows_weight_the_leaf() {
        let x = array![[0.0], [0.0]];
        let y = array![1.0, 4.0];
        let tree = RegressionTree::fit(x.view(), y.view(), &[0, 1, 1], TreeParams::default());
        assert_eq!(tree.predict_row(array![0.0].view()), 3.0);
    }

    #[test]
    fn test_predict_width_checked() {
        let x = array![[0.0], [1.0]];
        let y = array![0.0, 1.0];
        let tree = RegressionTree::fit(x.view(), y.view(), &[0, 1], TreeParams::default());
        assert!(tree.predict(array![[0.0, 1.0]].view()).is_err());
    }
}
