//! Per-trial feature standardization.

use crate::models::{from_vector, to_matrix, FitError};
use aprender::preprocessing::StandardScaler as Standardizer;
use aprender::primitives::Vector;
use aprender::traits::Transformer;
use ndarray::{Array1, Array2, ArrayView2};

/// Columns whose standard deviation is at or below this are left unscaled
const MIN_STD: f32 = 1e-10;

/// Zero-mean, unit-variance scaler fitted on training rows only
///
/// Wraps `aprender`'s scaler; its population standard deviation and the
/// unscaled treatment of constant columns carry through unchanged.
#[derive(Debug, Clone)]
pub struct StandardScaler {
    inner: Standardizer,
}

impl StandardScaler {
    /// Fit column means and population standard deviations
    ///
    /// Columns with zero variance get a scale of 1, so they transform to 0.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty matrix or non-finite input.
    pub fn fit(x: ArrayView2<'_, f64>) -> Result<Self, FitError> {
        if x.nrows() == 0 {
            return Err(FitError::EmptyTrainingSet);
        }
        if x.iter().any(|v| !v.is_finite()) {
            return Err(FitError::NonFinite("training features".to_string()));
        }

        let mut inner = Standardizer::new();
        inner.fit(&to_matrix(x)?)?;
        Ok(Self { inner })
    }

    /// Apply the fitted transform
    ///
    /// # Errors
    ///
    /// Returns `ShapeMismatch` if `x` has a different column count.
    pub fn transform(&self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>, FitError> {
        let width = self.inner.mean().len();
        if x.ncols() != width {
            return Err(FitError::ShapeMismatch {
                expected: width,
                actual: x.ncols(),
            });
        }

        let scaled = self.inner.transform(&to_matrix(x)?)?;
        let values: Vec<f64> = scaled.as_slice().iter().map(|&v| f64::from(v)).collect();
        Array2::from_shape_vec((x.nrows(), width), values).map_err(|e| FitError::Failed(e.to_string()))
    }

    /// Fitted column means
    #[must_use]
    pub fn mean(&self) -> Array1<f64> {
        from_vector(&Vector::from_slice(self.inner.mean()))
    }

    /// Fitted column scales, 1 for constant columns
    #[must_use]
    pub fn scale(&self) -> Array1<f64> {
        self.inner
            .std()
            .iter()
            .map(|&s| if s > MIN_STD { f64::from(s) } else { 1.0 })
            .collect()
    }
}
