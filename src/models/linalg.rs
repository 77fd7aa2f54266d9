//! Dense solvers for the least-squares family.

use super::FitError;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

/// Relative diagonal jitter used when an unregularized system is requested
const JITTER: f64 = 1e-10;

/// Solve `a * x = b` for symmetric positive definite `a` via Cholesky
pub(crate) fn cholesky_solve(a: &Array2<f64>, b: ArrayView1<'_, f64>) -> Result<Array1<f64>, FitError> {
    let n = a.nrows();
    let mut l = Array2::<f64>::zeros((n, n));

    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[[i, j]];
            for k in 0..j {
                sum -= l[[i, k]] * l[[j, k]];
            }
            if i == j {
                if sum <= 0.0 || !sum.is_finite() {
                    return Err(FitError::Singular(format!("pivot {i} = {sum:e}")));
                }
                l[[i, i]] = sum.sqrt();
            } else {
                l[[i, j]] = sum / l[[j, j]];
            }
        }
    }

    // Forward substitution: L z = b
    let mut z = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut sum = b[i];
        for k in 0..i {
            sum -= l[[i, k]] * z[k];
        }
        z[i] = sum / l[[i, i]];
    }

    // Back substitution: L^T x = z
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = z[i];
        for k in (i + 1)..n {
            sum -= l[[k, i]] * x[k];
        }
        x[i] = sum / l[[i, i]];
    }

    Ok(x)
}

/// Add `alpha` to the diagonal; a zero `alpha` becomes a tiny trace-relative jitter
#[allow(clippy::cast_precision_loss)]
pub(crate) fn regularize(gram: &mut Array2<f64>, alpha: f64) {
    let n = gram.nrows();
    let ridge = if alpha > 0.0 {
        alpha
    } else {
        let mean_diag = gram.diag().sum() / n.max(1) as f64;
        JITTER * mean_diag.max(1.0)
    };
    for i in 0..n {
        gram[[i, i]] += ridge;
    }
}

/// Ridge solution of `min ||y - X w||^2 + alpha ||w||^2` for centered data
///
/// Uses the primal normal equations when there are at least as many rows as
/// columns, otherwise the dual `w = X^T (X X^T + alpha I)^-1 y`, which for
/// `alpha -> 0` is the minimum-norm least-squares solution.
pub(crate) fn ridge_solve(
    x: ArrayView2<'_, f64>,
    y: ArrayView1<'_, f64>,
    alpha: f64,
) -> Result<Array1<f64>, FitError> {
    if x.nrows() >= x.ncols() {
        let mut gram = x.t().dot(&x);
        regularize(&mut gram, alpha);
        let rhs = x.t().dot(&y);
        cholesky_solve(&gram, rhs.view())
    } else {
        let mut gram = x.dot(&x.t());
        regularize(&mut gram, alpha);
        let dual = cholesky_solve(&gram, y)?;
        Ok(x.t().dot(&dual))
    }
}

/// Column means and the centered copy of `x`
#[allow(clippy::cast_precision_loss)]
pub(crate) fn center_columns(x: ArrayView2<'_, f64>) -> (Array1<f64>, Array2<f64>) {
    let mean = x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(x.ncols()));
    let centered = &x - &mean;
    (mean, centered)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_cholesky_solve() {
        let a = array![[4.0, 2.0], [2.0, 3.0]];
        let b = array![2.0, 1.0];
        let x = cholesky_solve(&a, b.view()).unwrap();
        let back = a.dot(&x);
        assert!((back[0] - 2.0).abs() < 1e-12);
        assert!((back[1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_cholesky_rejects_indefinite() {
        let a = array![[0.0, 1.0], [1.0, 0.0]];
        assert!(matches!(
            cholesky_solve(&a, array![1.0, 1.0].view()),
            Err(FitError::Singular(_))
        ));
    }

    #[test]
    fn test_ridge_solve_underdetermined_interpolates() {
        // Two rows, three columns: the minimum-norm solution fits exactly
        let x = array![[1.0, 0.0, 1.0], [0.0, 1.0, 1.0]];
        let y = array![1.0, 2.0];
        let w = ridge_solve(x.view(), y.view(), 0.0).unwrap();
        let fitted = x.dot(&w);
        assert!((fitted[0] - 1.0).abs() < 1e-6);
        assert!((fitted[1] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_center_columns() {
        let (mean, centered) = center_columns(array![[1.0, 4.0], [3.0, 8.0]].view());
        assert_eq!(mean.to_vec(), vec![2.0, 6.0]);
        assert_eq!(centered.row(0).to_vec(), vec![-1.0, -2.0]);
    }
}
