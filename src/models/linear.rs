//! Minimum-norm least squares on `f64`.
//!
//! Serves the spline head and the underdetermined fallback of the linear
//! panel entry; the penalized variants live behind `aprender`.

use super::linalg::{center_columns, ridge_solve};
use super::{check_training_data, check_width, FitError, Regressor};
use ndarray::{Array1, ArrayView1, ArrayView2};

/// Fitted linear coefficients with intercept
#[derive(Debug, Clone)]
struct LinearFit {
    coef: Array1<f64>,
    intercept: f64,
}

impl LinearFit {
    fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>, FitError> {
        check_width(self.coef.len(), x)?;
        Ok(x.dot(&self.coef) + self.intercept)
    }
}

/// Ordinary least squares with intercept, minimum norm when underdetermined
#[derive(Debug, Clone, Default)]
pub struct LeastSquares {
    fit: Option<LinearFit>,
}

impl LeastSquares {
    /// Create an unfitted model
    #[must_use]
    pub const fn new() -> Self {
        Self { fit: None }
    }

    /// Fitted coefficients, if any
    #[must_use]
    pub fn coefficients(&self) -> Option<&Array1<f64>> {
        self.fit.as_ref().map(|f| &f.coef)
    }
}

impl Regressor for LeastSquares {
    fn fit(&mut self, x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> Result<(), FitError> {
        check_training_data(x, y)?;

        let (x_mean, xc) = center_columns(x);
        let y_mean = y.mean().unwrap_or(0.0);
        let yc = &y - y_mean;

        let coef = ridge_solve(xc.view(), yc.view(), 0.0)?;
        let intercept = y_mean - x_mean.dot(&coef);
        self.fit = Some(LinearFit { coef, intercept });
        Ok(())
    }

    fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>, FitError> {
        self.fit.as_ref().ok_or(FitError::NotFitted)?.predict(x)
    }
}
