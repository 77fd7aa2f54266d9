//! Panel variants backed by `aprender` estimators.
//!
//! `aprender` works on row-major `f32` matrices, so features and targets are
//! narrowed at the boundary and predictions widened back to `f64`. Its
//! predict methods panic when unfitted or handed the wrong width; the
//! adapters check both before delegating.

use super::linear::LeastSquares;
use super::{check_training_data, check_width, FitError, Regressor};
use aprender::error::AprenderError;
use aprender::linear_model::{ElasticNet, Lasso, LinearRegression, Ridge};
use aprender::primitives::{Matrix, Vector};
use aprender::traits::Estimator;
use aprender::tree::RandomForestRegressor;
use ndarray::{Array1, ArrayView1, ArrayView2};

impl From<AprenderError> for FitError {
    fn from(err: AprenderError) -> Self {
        Self::Estimator(err.to_string())
    }
}

/// Copy a feature view into an `aprender` matrix
///
/// # Errors
///
/// Returns an error if the element count does not match the shape.
#[allow(clippy::cast_possible_truncation)]
pub fn to_matrix(x: ArrayView2<'_, f64>) -> Result<Matrix<f32>, FitError> {
    let data: Vec<f32> = x.iter().map(|&v| v as f32).collect();
    Matrix::from_vec(x.nrows(), x.ncols(), data).map_err(|e| FitError::Estimator(e.to_string()))
}

/// Copy a target view into an `aprender` vector
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn to_vector(y: ArrayView1<'_, f64>) -> Vector<f32> {
    Vector::from_vec(y.iter().map(|&v| v as f32).collect())
}

/// Widen an `aprender` vector back to `f64`
#[must_use]
pub fn from_vector(v: &Vector<f32>) -> Array1<f64> {
    v.as_slice().iter().map(|&p| f64::from(p)).collect()
}

fn fit_estimator<E: Estimator>(mut estimator: E, x: &Matrix<f32>, y: &Vector<f32>) -> Result<E, FitError> {
    estimator.fit(x, y)?;
    Ok(estimator)
}

/// Linear model penalty, with the lasso and elastic-net strength on the
/// per-sample `1/(2n)` loss scale
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Penalty {
    /// Plain least squares
    None,
    /// `alpha * ||w||^2`
    L2 { alpha: f64 },
    /// `alpha * ||w||_1`
    L1 { alpha: f64 },
    /// `alpha * (l1_ratio * ||w||_1 + (1 - l1_ratio) / 2 * ||w||^2)`
    Mixed { alpha: f64, l1_ratio: f64 },
}

#[derive(Debug, Clone)]
enum FittedLinear {
    Ols(LinearRegression),
    MinimumNorm(LeastSquares),
    Ridge(Ridge),
    Lasso(Lasso),
    ElasticNet(ElasticNet),
}

/// Linear-family regressor delegating to `aprender::linear_model`
///
/// Plain least squares falls back to the minimum-norm solution when
/// `aprender` rejects the system as underdetermined or singular.
#[derive(Debug, Clone)]
pub struct LinearModel {
    penalty: Penalty,
    fitted: Option<FittedLinear>,
    n_features: usize,
}

impl LinearModel {
    /// Create an unfitted model
    #[must_use]
    pub const fn new(penalty: Penalty) -> Self {
        Self {
            penalty,
            fitted: None,
            n_features: 0,
        }
    }

    /// Whether the last fit took the minimum-norm path
    #[must_use]
    pub const fn is_minimum_norm(&self) -> bool {
        matches!(self.fitted, Some(FittedLinear::MinimumNorm(_)))
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn fit_penalized(&self, x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> Result<FittedLinear, FitError> {
        let matrix = to_matrix(x)?;
        let targets = to_vector(y);
        let n = x.nrows() as f64;

        let fitted = match self.penalty {
            Penalty::None => match fit_estimator(LinearRegression::new(), &matrix, &targets) {
                Ok(model) => FittedLinear::Ols(model),
                Err(e) => {
                    tracing::debug!(error = %e, rows = x.nrows(), cols = x.ncols(), "Falling back to minimum-norm least squares");
                    let mut model = LeastSquares::new();
                    model.fit(x, y)?;
                    FittedLinear::MinimumNorm(model)
                }
            },
            Penalty::L2 { alpha } => FittedLinear::Ridge(fit_estimator(Ridge::new(alpha as f32), &matrix, &targets)?),
            Penalty::L1 { alpha } => {
                FittedLinear::Lasso(fit_estimator(Lasso::new((alpha * n) as f32), &matrix, &targets)?)
            }
            Penalty::Mixed { alpha, l1_ratio } => FittedLinear::ElasticNet(fit_estimator(
                ElasticNet::new((alpha * n) as f32, l1_ratio as f32),
                &matrix,
                &targets,
            )?),
        };
        Ok(fitted)
    }

    fn validate_penalty(&self) -> Result<(), FitError> {
        let valid = match self.penalty {
            Penalty::None => true,
            Penalty::L2 { alpha } | Penalty::L1 { alpha } => alpha >= 0.0,
            Penalty::Mixed { alpha, l1_ratio } => alpha >= 0.0 && (0.0..=1.0).contains(&l1_ratio),
        };
        if valid {
            Ok(())
        } else {
            Err(FitError::InvalidParameter(format!("{:?}", self.penalty)))
        }
    }
}

impl Regressor for LinearModel {
    fn fit(&mut self, x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> Result<(), FitError> {
        check_training_data(x, y)?;
        self.validate_penalty()?;
        self.fitted = None;
        self.fitted = Some(self.fit_penalized(x, y)?);
        self.n_features = x.ncols();
        Ok(())
    }

    fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>, FitError> {
        let fitted = self.fitted.as_ref().ok_or(FitError::NotFitted)?;
        check_width(self.n_features, x)?;
        let predictions = match fitted {
            FittedLinear::MinimumNorm(model) => return model.predict(x),
            FittedLinear::Ols(model) => model.predict(&to_matrix(x)?),
            FittedLinear::Ridge(model) => model.predict(&to_matrix(x)?),
            FittedLinear::Lasso(model) => model.predict(&to_matrix(x)?),
            FittedLinear::ElasticNet(model) => model.predict(&to_matrix(x)?),
        };
        Ok(from_vector(&predictions))
    }
}

/// Bootstrap-aggregated unpruned trees over every feature
///
/// Backs both the random forest and plain bagging entries; the forest is
/// rebuilt from `random_state` on every fit.
#[derive(Debug, Clone)]
pub struct Forest {
    n_estimators: usize,
    random_state: u64,
    fitted: Option<RandomForestRegressor>,
    n_features: usize,
}

impl Forest {
    /// Create an unfitted ensemble
    #[must_use]
    pub const fn new(n_estimators: usize, random_state: u64) -> Self {
        Self {
            n_estimators,
            random_state,
            fitted: None,
            n_features: 0,
        }
    }
}

impl Regressor for Forest {
    fn fit(&mut self, x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> Result<(), FitError> {
        check_training_data(x, y)?;
        if self.n_estimators == 0 {
            return Err(FitError::InvalidParameter("n_estimators = 0".to_string()));
        }

        self.fitted = None;
        let mut forest = RandomForestRegressor::new(self.n_estimators).with_random_state(self.random_state);
        forest.fit(&to_matrix(x)?, &to_vector(y))?;
        self.fitted = Some(forest);
        self.n_features = x.ncols();
        Ok(())
    }

    fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>, FitError> {
        let forest = self.fitted.as_ref().ok_or(FitError::NotFitted)?;
        check_width(self.n_features, x)?;
        Ok(from_vector(&forest.predict(&to_matrix(x)?)))
    }
}
