//! Per-feature B-spline expansion followed by least squares.

use super::linear::LeastSquares;
use super::{check_training_data, check_width, FitError, Regressor};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

/// Uniform knot vector for one feature, extended by `degree` knots on each side
#[derive(Debug, Clone)]
struct Knots {
    lo: f64,
    hi: f64,
    knots: Vec<f64>,
}

impl Knots {
    #[allow(clippy::cast_precision_loss)]
    fn uniform(column: ArrayView1<'_, f64>, n_knots: usize, degree: usize) -> Self {
        let mut lo = column.iter().copied().fold(f64::INFINITY, f64::min);
        let mut hi = column.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if hi <= lo {
            lo -= 0.5;
            hi += 0.5;
        }
        let step = (hi - lo) / (n_knots - 1) as f64;
        let knots = (0..n_knots + 2 * degree)
            .map(|j| (j as f64 - degree as f64).mul_add(step, lo))
            .collect();
        Self { lo, hi, knots }
    }

    /// Index `k` of the knot span holding `x`, with the last span closed on the right
    fn span(&self, x: f64, degree: usize, n_basis: usize) -> usize {
        let mut k = degree;
        while k + 1 < n_basis && self.knots[k + 1] <= x {
            k += 1;
        }
        k
    }

    /// Write the `n_basis` basis values at `x` into `out` (Cox-de Boor)
    fn evaluate(&self, x: f64, degree: usize, out: &mut [f64]) {
        let x = x.clamp(self.lo, self.hi);
        let k = self.span(x, degree, out.len());
        let t = &self.knots;

        let mut n = vec![0.0; degree + 1];
        let mut left = vec![0.0; degree + 1];
        let mut right = vec![0.0; degree + 1];
        n[0] = 1.0;
        for j in 1..=degree {
            left[j] = x - t[k + 1 - j];
            right[j] = t[k + j] - x;
            let mut saved = 0.0;
            for r in 0..j {
                let temp = n[r] / (right[r + 1] + left[j - r]);
                n[r] = right[r + 1].mul_add(temp, saved);
                saved = left[j - r] * temp;
            }
            n[j] = saved;
        }

        out.fill(0.0);
        out[k - degree..=k].copy_from_slice(&n);
    }
}

/// Spline feature expansion with an ordinary least-squares head
///
/// Each feature is expanded into `n_knots + degree - 1` B-spline basis values
/// over uniform knots spanning its training range; inputs outside the range
/// are clamped to the boundary.
#[derive(Debug, Clone)]
pub struct SplineRegressor {
    n_knots: usize,
    degree: usize,
    knots: Vec<Knots>,
    head: LeastSquares,
}

impl SplineRegressor {
    /// Create an unfitted model
    #[must_use]
    pub const fn new(n_knots: usize, degree: usize) -> Self {
        Self {
            n_knots,
            degree,
            knots: Vec::new(),
            head: LeastSquares::new(),
        }
    }

    /// Basis functions per input feature
    #[must_use]
    pub const fn n_basis(&self) -> usize {
        self.n_knots + self.degree - 1
    }

    fn expand(&self, x: ArrayView2<'_, f64>) -> Array2<f64> {
        let n_basis = self.n_basis();
        let mut out = Array2::<f64>::zeros((x.nrows(), x.ncols() * n_basis));
        for (mut target, row) in out.axis_iter_mut(Axis(0)).zip(x.rows()) {
            let Some(slice) = target.as_slice_mut() else {
                continue;
            };
            for ((knots, value), chunk) in self.knots.iter().zip(row.iter()).zip(slice.chunks_mut(n_basis)) {
                knots.evaluate(*value, self.degree, chunk);
            }
        }
        out
    }
}

impl Regressor for SplineRegressor {
    fn fit(&mut self, x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> Result<(), FitError> {
        check_training_data(x, y)?;
        if self.n_knots < 2 {
            return Err(FitError::InvalidParameter(format!("n_knots = {}", self.n_knots)));
        }
        self.knots = x
            .axis_iter(Axis(1))
            .map(|column| Knots::uniform(column, self.n_knots, self.degree))
            .collect();
        let basis = self.expand(x);
        self.head.fit(basis.view(), y)
    }

    fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>, FitError> {
        if self.knots.is_empty() {
            return Err(FitError::NotFitted);
        }
        check_width(self.knots.len(), x)?;
        self.head.predict(self.expand(x).view())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_basis_is_partition_of_unity() {
        let column = array![0.0, 1.0, 2.0, 4.0];
        let knots = Knots::uniform(column.view(), 5, 3);
        let mut out = vec![0.0; 7];
        for x in [0.0, 0.3, 1.0, 2.5, 3.99, 4.0, 9.0, -3.0] {
            knots.evaluate(x, 3, &mut out);
            let total: f64 = out.iter().sum();
            assert!((total - 1.0).abs() < 1e-12, "x = {x}: {total}");
            assert!(out.iter().all(|v| *v >= -1e-15));
        }
    }

    #[test]
    fn test_constant_column_is_widened() {
        let knots = Knots::uniform(array![2.0, 2.0].view(), 5, 3);
        assert!((knots.lo - 1.5).abs() < 1e-12);
        assert!((knots.hi - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_fits_quadratic() {
        let x = Array2::from_shape_fn((25, 1), |(i, _)| i as f64 / 4.0 - 3.0);
        let y = x.column(0).mapv(|v| v * v);
        let mut model = SplineRegressor::new(5, 3);
        model.fit(x.view(), y.view()).unwrap();
        let pred = model.predict(array![[0.5], [-1.5]].view()).unwrap();
        assert!((pred[0] - 0.25).abs() < 1e-4);
        assert!((pred[1] - 2.25).abs() < 1e-4);
    }

    #[test]
    fn test_expansion_width() {
        let x = array![[0.0, 1.0], [1.0, 0.0], [2.0, 2.0]];
        let y = array![0.0, 1.0, 2.0];
        let mut model = SplineRegressor::new(5, 3);
        model.fit(x.view(), y.view()).unwrap();
        assert_eq!(model.n_basis(), 7);
        assert_eq!(model.expand(x.view()).ncols(), 14);
    }
}
