//! Boosted tree ensembles: gradient boosting, AdaBoost.R2 and second-order
//! (XGBoost-style) boosting. Bagging and the random forest are `aprender`'s.

use super::tree::{RegressionTree, TreeParams};
use super::{check_training_data, check_width, FitError, Regressor};
use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::distributions::{Distribution, WeightedIndex};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

fn mean(y: ArrayView1<'_, f64>) -> f64 {
    y.mean().unwrap_or(0.0)
}

/// Shared state of additive boosting models
#[derive(Debug, Clone)]
struct Additive {
    base: f64,
    rate: f64,
    trees: Vec<RegressionTree>,
    n_features: usize,
}

impl Additive {
    fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>, FitError> {
        check_width(self.n_features, x)?;
        let mut out = Array1::from_elem(x.nrows(), self.base);
        for tree in &self.trees {
            out.scaled_add(self.rate, &tree.predict(x)?);
        }
        Ok(out)
    }
}

/// Least-squares gradient boosting from the training mean
#[derive(Debug, Clone)]
pub struct GradientBoosting {
    n_estimators: usize,
    learning_rate: f64,
    max_depth: usize,
    model: Option<Additive>,
}

impl GradientBoosting {
    /// Create an unfitted model
    #[must_use]
    pub const fn new(n_estimators: usize, learning_rate: f64, max_depth: usize) -> Self {
        Self {
            n_estimators,
            learning_rate,
            max_depth,
            model: None,
        }
    }
}

impl Regressor for GradientBoosting {
    fn fit(&mut self, x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> Result<(), FitError> {
        check_training_data(x, y)?;
        let mut model = boost(
            x,
            y,
            self.n_estimators,
            self.learning_rate,
            TreeParams::cart(Some(self.max_depth)),
        );
        model.n_features = x.ncols();
        self.model = Some(model);
        Ok(())
    }

    fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>, FitError> {
        self.model.as_ref().ok_or(FitError::NotFitted)?.predict(x)
    }
}

/// Boosting with regularized second-order leaf weights
///
/// For squared error the hessian is 1 per row, so each round fits leaves
/// `sum(residual) / (count + lambda)` under a depth limit and a minimum child
/// weight of one.
#[derive(Debug, Clone)]
pub struct XgbRegressor {
    n_estimators: usize,
    eta: f64,
    max_depth: usize,
    lambda: f64,
    model: Option<Additive>,
}

impl XgbRegressor {
    /// Create an unfitted model
    #[must_use]
    pub const fn new(n_estimators: usize, eta: f64, max_depth: usize, lambda: f64) -> Self {
        Self {
            n_estimators,
            eta,
            max_depth,
            lambda,
            model: None,
        }
    }
}

impl Regressor for XgbRegressor {
    fn fit(&mut self, x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> Result<(), FitError> {
        check_training_data(x, y)?;
        let params = TreeParams {
            max_depth: Some(self.max_depth),
            min_samples_split: 2,
            min_samples_leaf: 1,
            lambda: self.lambda,
            min_child_weight: 1.0,
        };
        let mut model = boost(x, y, self.n_estimators, self.eta, params);
        model.n_features = x.ncols();
        self.model = Some(model);
        Ok(())
    }

    fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>, FitError> {
        self.model.as_ref().ok_or(FitError::NotFitted)?.predict(x)
    }
}

/// Squared-error boosting loop shared by both boosters
fn boost(
    x: ArrayView2<'_, f64>,
    y: ArrayView1<'_, f64>,
    rounds: usize,
    rate: f64,
    params: TreeParams,
) -> Additive {
    let n = x.nrows();
    let rows: Vec<usize> = (0..n).collect();
    let hess = vec![1.0; n];
    let base = mean(y);
    let mut current = Array1::from_elem(n, base);
    let mut trees = Vec::with_capacity(rounds);

    for _ in 0..rounds {
        let grad: Vec<f64> = current.iter().zip(y.iter()).map(|(f, t)| f - t).collect();
        let tree = RegressionTree::fit_gradients(x, &grad, &hess, &rows, params);
        for (i, row) in x.rows().into_iter().enumerate() {
            current[i] += rate * tree.predict_row(row);
        }
        trees.push(tree);
    }

    Additive {
        base,
        rate,
        trees,
        n_features: x.ncols(),
    }
}

/// AdaBoost.R2 with linear loss and weighted-median aggregation
#[derive(Debug, Clone)]
pub struct AdaBoostRegressor {
    n_estimators: usize,
    max_depth: usize,
    random_state: u64,
    trees: Vec<RegressionTree>,
    weights: Vec<f64>,
    n_features: usize,
}

impl AdaBoostRegressor {
    /// Create an unfitted model
    #[must_use]
    pub const fn new(n_estimators: usize, max_depth: usize, random_state: u64) -> Self {
        Self {
            n_estimators,
            max_depth,
            random_state,
            trees: Vec::new(),
            weights: Vec::new(),
            n_features: 0,
        }
    }
}

impl Regressor for AdaBoostRegressor {
    #[allow(clippy::cast_precision_loss)]
    fn fit(&mut self, x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> Result<(), FitError> {
        check_training_data(x, y)?;
        let n = x.nrows();
        let mut rng = ChaCha8Rng::seed_from_u64(self.random_state);
        let mut sample_weight = vec![1.0 / n as f64; n];
        let params = TreeParams::cart(Some(self.max_depth));

        self.trees.clear();
        self.weights.clear();

        for iboost in 0..self.n_estimators {
            let sampler = WeightedIndex::new(&sample_weight)
                .map_err(|e| FitError::Failed(format!("sample weights: {e}")))?;
            let rows: Vec<usize> = (0..n).map(|_| sampler.sample(&mut rng)).collect();
            let tree = RegressionTree::fit(x, y, &rows, params);

            let errors: Vec<f64> = x
                .rows()
                .into_iter()
                .zip(y.iter())
                .map(|(row, t)| (tree.predict_row(row) - t).abs())
                .collect();
            let max_error = errors.iter().copied().fold(0.0, f64::max);

            if max_error <= 0.0 {
                // Perfect fit: keep it with unit weight and stop
                self.trees.push(tree);
                self.weights.push(1.0);
                break;
            }

            let avg_loss: f64 = errors
                .iter()
                .zip(&sample_weight)
                .map(|(e, w)| w * e / max_error)
                .sum();

            if avg_loss >= 0.5 {
                if iboost == 0 {
                    self.trees.push(tree);
                    self.weights.push(1.0);
                }
                break;
            }

            let beta = avg_loss / (1.0 - avg_loss);
            self.trees.push(tree);
            self.weights.push((1.0 / beta).ln());

            for (w, e) in sample_weight.iter_mut().zip(&errors) {
                *w *= beta.powf(1.0 - e / max_error);
            }
            let total: f64 = sample_weight.iter().sum();
            if total <= 0.0 || !total.is_finite() {
                break;
            }
            for w in &mut sample_weight {
                *w /= total;
            }
        }

        self.n_features = x.ncols();
        Ok(())
    }

    fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>, FitError> {
        if self.trees.is_empty() {
            return Err(FitError::NotFitted);
        }
        check_width(self.n_features, x)?;

        let total_weight: f64 = self.weights.iter().sum();
        Ok(x
            .rows()
            .into_iter()
            .map(|row| {
                let mut preds: Vec<(f64, f64)> = self
                    .trees
                    .iter()
                    .zip(&self.weights)
                    .map(|(t, &w)| (t.predict_row(row), w))
                    .collect();
                preds.sort_by(|a, b| a.0.total_cmp(&b.0));

                let half = 0.5 * total_weight;
                let mut cumulative = 0.0;
                for &(value, weight) in &preds {
                    cumulative += weight;
                    if cumulative >= half {
                        return value;
                    }
                }
                preds.last().map_or(0.0, |p| p.0)
            })
            .collect())
    }
}
