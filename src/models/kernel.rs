//! Kernel and instance-based regressors.

use super::linalg::cholesky_solve;
use super::{check_training_data, check_width, FitError, Regressor};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

fn squared_distance(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(u, v)| (u - v).powi(2)).sum()
}

/// Epsilon-insensitive support vector regression with an RBF kernel
///
/// Solved in the dual by coordinate descent on the bias-augmented kernel
/// `K + 1`, which folds the intercept into the kernel and removes the
/// equality constraint. `gamma` follows the "scale" heuristic
/// `1 / (n_features * Var(X))`.
#[derive(Debug, Clone)]
pub struct Svr {
    c: f64,
    epsilon: f64,
    max_iter: usize,
    tol: f64,
    fitted: Option<SvrFit>,
}

#[derive(Debug, Clone)]
struct SvrFit {
    support: Array2<f64>,
    dual: Array1<f64>,
    gamma: f64,
}

impl Svr {
    /// Create an unfitted model
    #[must_use]
    pub const fn new(c: f64, epsilon: f64) -> Self {
        Self {
            c,
            epsilon,
            max_iter: 1000,
            tol: 1e-3,
            fitted: None,
        }
    }
}

impl Regressor for Svr {
    #[allow(clippy::cast_precision_loss)]
    fn fit(&mut self, x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> Result<(), FitError> {
        check_training_data(x, y)?;
        if self.c <= 0.0 || self.epsilon < 0.0 {
            return Err(FitError::InvalidParameter(format!(
                "C = {}, epsilon = {}",
                self.c, self.epsilon
            )));
        }

        let n = x.nrows();
        let variance = x.var(0.0);
        let gamma = if variance > 0.0 {
            1.0 / (x.ncols() as f64 * variance)
        } else {
            1.0
        };

        let mut kernel = Array2::<f64>::zeros((n, n));
        for i in 0..n {
            for j in 0..=i {
                let k = (-gamma * squared_distance(x.row(i), x.row(j))).exp() + 1.0;
                kernel[[i, j]] = k;
                kernel[[j, i]] = k;
            }
        }

        let mut beta = Array1::<f64>::zeros(n);
        let mut f = Array1::<f64>::zeros(n);
        for _ in 0..self.max_iter {
            let mut max_delta = 0.0_f64;
            for i in 0..n {
                let kii = kernel[[i, i]];
                let z = beta[i] - (f[i] - y[i]) / kii;
                let shrunk = z.signum() * (z.abs() - self.epsilon / kii).max(0.0);
                let new = shrunk.clamp(-self.c, self.c);
                let delta = new - beta[i];
                if delta != 0.0 {
                    f.scaled_add(delta, &kernel.column(i));
                    beta[i] = new;
                    max_delta = max_delta.max(delta.abs());
                }
            }
            if max_delta < self.tol {
                break;
            }
        }

        self.fitted = Some(SvrFit {
            support: x.to_owned(),
            dual: beta,
            gamma,
        });
        Ok(())
    }

    fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>, FitError> {
        let fit = self.fitted.as_ref().ok_or(FitError::NotFitted)?;
        check_width(fit.support.ncols(), x)?;
        Ok(x.rows()
            .into_iter()
            .map(|row| {
                fit.support
                    .rows()
                    .into_iter()
                    .zip(fit.dual.iter())
                    .map(|(sv, b)| b * ((-fit.gamma * squared_distance(sv, row)).exp() + 1.0))
                    .sum()
            })
            .collect())
    }
}

/// Uniformly weighted k-nearest-neighbour regression (Euclidean)
#[derive(Debug, Clone)]
pub struct KNeighborsRegressor {
    k: usize,
    train_x: Option<Array2<f64>>,
    train_y: Array1<f64>,
}

impl KNeighborsRegressor {
    /// Create an unfitted model
    #[must_use]
    pub fn new(k: usize) -> Self {
        Self {
            k,
            train_x: None,
            train_y: Array1::zeros(0),
        }
    }
}

impl Regressor for KNeighborsRegressor {
    fn fit(&mut self, x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> Result<(), FitError> {
        check_training_data(x, y)?;
        if self.k == 0 {
            return Err(FitError::InvalidParameter("k = 0".to_string()));
        }
        if self.k > x.nrows() {
            return Err(FitError::InvalidParameter(format!(
                "k = {} exceeds {} training rows",
                self.k,
                x.nrows()
            )));
        }
        self.train_x = Some(x.to_owned());
        self.train_y = y.to_owned();
        Ok(())
    }

    #[allow(clippy::cast_precision_loss)]
    fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>, FitError> {
        let train_x = self.train_x.as_ref().ok_or(FitError::NotFitted)?;
        check_width(train_x.ncols(), x)?;
        Ok(x.rows()
            .into_iter()
            .map(|row| {
                let mut dist: Vec<(f64, usize)> = train_x
                    .rows()
                    .into_iter()
                    .enumerate()
                    .map(|(i, t)| (squared_distance(t, row), i))
                    .collect();
                dist.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
                dist.iter().take(self.k).map(|&(_, i)| self.train_y[i]).sum::<f64>() / self.k as f64
            })
            .collect())
    }
}

/// Linear-kernel ridge regression without intercept: `(X X^T + alpha I) a = y`
#[derive(Debug, Clone)]
pub struct KernelRidge {
    alpha: f64,
    fitted: Option<(Array2<f64>, Array1<f64>)>,
}

impl KernelRidge {
    /// Create an unfitted model
    #[must_use]
    pub const fn new(alpha: f64) -> Self {
        Self { alpha, fitted: None }
    }
}

impl Regressor for KernelRidge {
    fn fit(&mut self, x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> Result<(), FitError> {
        check_training_data(x, y)?;
        if self.alpha <= 0.0 {
            return Err(FitError::InvalidParameter(format!("alpha = {}", self.alpha)));
        }
        let mut gram = x.dot(&x.t());
        for i in 0..gram.nrows() {
            gram[[i, i]] += self.alpha;
        }
        let dual = cholesky_solve(&gram, y)?;
        self.fitted = Some((x.to_owned(), dual));
        Ok(())
    }

    fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>, FitError> {
        let (train_x, dual) = self.fitted.as_ref().ok_or(FitError::NotFitted)?;
        check_width(train_x.ncols(), x)?;
        Ok(x.dot(&train_x.t()).dot(dual))
    }
}
