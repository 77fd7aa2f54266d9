//! Regression model panel.
//!
//! Every learned model implements [`Regressor`]. The panel is a closed set of
//! [`ModelKind`] variants plus their construction parameters; the harness
//! builds a fresh instance per trial so no fitted state crosses trials.

mod ensemble;
mod estimator;
mod kernel;
mod linalg;
mod linear;
mod mlp;
mod spline;
mod tree;

pub use ensemble::{AdaBoostRegressor, GradientBoosting, XgbRegressor};
pub use estimator::{from_vector, to_matrix, to_vector, Forest, LinearModel, Penalty};
pub use kernel::{KNeighborsRegressor, KernelRidge, Svr};
pub use linear::LeastSquares;
pub use mlp::MlpRegressor;
pub use spline::SplineRegressor;
pub use tree::{RegressionTree, TreeParams};

use ndarray::{Array1, ArrayView1, ArrayView2};
use thiserror::Error;

/// Errors raised while fitting or predicting with a single model
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitError {
    #[error("Training set is empty")]
    EmptyTrainingSet,

    #[error("Shape mismatch: expected {expected} columns, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("Row count mismatch: {features} feature rows, {targets} targets")]
    LengthMismatch { features: usize, targets: usize },

    #[error("Non-finite values in {0}")]
    NonFinite(String),

    #[error("Matrix is not positive definite: {0}")]
    Singular(String),

    #[error("Model used before fit")]
    NotFitted,

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Estimator error: {0}")]
    Estimator(String),

    #[error("{0}")]
    Failed(String),
}

/// Fit/predict capability shared by every learned model
pub trait Regressor: Send {
    /// Fit on a training matrix (rows are samples) and target vector
    ///
    /// # Errors
    ///
    /// Returns an error on invalid input or numerical failure.
    fn fit(&mut self, x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> Result<(), FitError>;

    /// Predict one value per row of `x`
    ///
    /// # Errors
    ///
    /// Returns an error if the model is unfitted or `x` has the wrong width.
    fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>, FitError>;
}

/// Validate a training pair before fitting
///
/// # Errors
///
/// Returns an error for empty, misaligned or non-finite input.
pub fn check_training_data(x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> Result<(), FitError> {
    if x.nrows() == 0 {
        return Err(FitError::EmptyTrainingSet);
    }
    if x.nrows() != y.len() {
        return Err(FitError::LengthMismatch {
            features: x.nrows(),
            targets: y.len(),
        });
    }
    if x.iter().any(|v| !v.is_finite()) {
        return Err(FitError::NonFinite("features".to_string()));
    }
    if y.iter().any(|v| !v.is_finite()) {
        return Err(FitError::NonFinite("targets".to_string()));
    }
    Ok(())
}

pub(crate) fn check_width(expected: usize, x: ArrayView2<'_, f64>) -> Result<(), FitError> {
    if x.ncols() == expected {
        Ok(())
    } else {
        Err(FitError::ShapeMismatch {
            expected,
            actual: x.ncols(),
        })
    }
}

/// Model variants and their construction parameters
#[derive(Debug, Clone)]
pub enum ModelKind {
    /// Ordinary least squares with intercept
    Linear,
    /// L2-regularized least squares
    Ridge { alpha: f64 },
    /// L1-regularized least squares
    Lasso { alpha: f64 },
    /// Mixed L1/L2 regularized least squares
    ElasticNet { alpha: f64, l1_ratio: f64 },
    /// Bootstrap-aggregated unpruned trees
    RandomForest { n_estimators: usize },
    /// Bootstrap-aggregated unpruned trees, small ensemble
    Bagging { n_estimators: usize },
    /// Least-squares gradient boosting
    GradientBoosting {
        n_estimators: usize,
        learning_rate: f64,
        max_depth: usize,
    },
    /// AdaBoost.R2 with linear loss
    AdaBoost { n_estimators: usize, max_depth: usize },
    /// Second-order boosting with L2-regularized leaf weights
    XgBoost {
        n_estimators: usize,
        eta: f64,
        max_depth: usize,
        lambda: f64,
    },
    /// Epsilon-SVR with RBF kernel
    Svm { c: f64, epsilon: f64 },
    /// k-nearest-neighbour average
    Knn { k: usize },
    /// Linear-kernel ridge regression without intercept
    KernelRidge { alpha: f64 },
    /// Per-feature cubic B-spline expansion followed by least squares
    Spline { n_knots: usize, degree: usize },
    /// Feed-forward ReLU network
    Mlp { hidden: Vec<usize> },
    /// Caller-supplied constructor
    Custom(fn() -> Box<dyn Regressor>),
}

impl ModelKind {
    /// Build a fresh, unfitted instance
    #[must_use]
    pub fn build(&self, random_state: u64) -> Box<dyn Regressor> {
        match self {
            Self::Linear => Box::new(LinearModel::new(Penalty::None)),
            Self::Ridge { alpha } => Box::new(LinearModel::new(Penalty::L2 { alpha: *alpha })),
            Self::Lasso { alpha } => Box::new(LinearModel::new(Penalty::L1 { alpha: *alpha })),
            Self::ElasticNet { alpha, l1_ratio } => Box::new(LinearModel::new(Penalty::Mixed {
                alpha: *alpha,
                l1_ratio: *l1_ratio,
            })),
            Self::RandomForest { n_estimators } | Self::Bagging { n_estimators } => {
                Box::new(Forest::new(*n_estimators, random_state))
            }
            Self::GradientBoosting {
                n_estimators,
                learning_rate,
                max_depth,
            } => Box::new(GradientBoosting::new(*n_estimators, *learning_rate, *max_depth)),
            Self::AdaBoost {
                n_estimators,
                max_depth,
            } => Box::new(AdaBoostRegressor::new(*n_estimators, *max_depth, random_state)),
            Self::XgBoost {
                n_estimators,
                eta,
                max_depth,
                lambda,
            } => Box::new(XgbRegressor::new(*n_estimators, *eta, *max_depth, *lambda)),
            Self::Svm { c, epsilon } => Box::new(Svr::new(*c, *epsilon)),
            Self::Knn { k } => Box::new(KNeighborsRegressor::new(*k)),
            Self::KernelRidge { alpha } => Box::new(KernelRidge::new(*alpha)),
            Self::Spline { n_knots, degree } => Box::new(SplineRegressor::new(*n_knots, *degree)),
            Self::Mlp { hidden } => Box::new(MlpRegressor::new(hidden.clone(), random_state)),
            Self::Custom(constructor) => constructor(),
        }
    }
}

/// Parameter-wise equality; two `Custom` constructors never compare equal
impl PartialEq for ModelKind {
    #[allow(clippy::float_cmp)]
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Linear, Self::Linear) => true,
            (Self::Ridge { alpha: a }, Self::Ridge { alpha: b })
            | (Self::Lasso { alpha: a }, Self::Lasso { alpha: b })
            | (Self::KernelRidge { alpha: a }, Self::KernelRidge { alpha: b }) => a == b,
            (
                Self::ElasticNet { alpha: a, l1_ratio: r },
                Self::ElasticNet { alpha: b, l1_ratio: s },
            ) => a == b && r == s,
            (Self::RandomForest { n_estimators: a }, Self::RandomForest { n_estimators: b })
            | (Self::Bagging { n_estimators: a }, Self::Bagging { n_estimators: b })
            | (Self::Knn { k: a }, Self::Knn { k: b }) => a == b,
            (
                Self::GradientBoosting {
                    n_estimators: n1,
                    learning_rate: r1,
                    max_depth: d1,
                },
                Self::GradientBoosting {
                    n_estimators: n2,
                    learning_rate: r2,
                    max_depth: d2,
                },
            ) => n1 == n2 && r1 == r2 && d1 == d2,
            (
                Self::AdaBoost {
                    n_estimators: n1,
                    max_depth: d1,
                },
                Self::AdaBoost {
                    n_estimators: n2,
                    max_depth: d2,
                },
            ) => n1 == n2 && d1 == d2,
            (
                Self::XgBoost {
                    n_estimators: n1,
                    eta: e1,
                    max_depth: d1,
                    lambda: l1,
                },
                Self::XgBoost {
                    n_estimators: n2,
                    eta: e2,
                    max_depth: d2,
                    lambda: l2,
                },
            ) => n1 == n2 && e1 == e2 && d1 == d2 && l1 == l2,
            (Self::Svm { c: c1, epsilon: e1 }, Self::Svm { c: c2, epsilon: e2 }) => c1 == c2 && e1 == e2,
            (
                Self::Spline {
                    n_knots: k1,
                    degree: d1,
                },
                Self::Spline {
                    n_knots: k2,
                    degree: d2,
                },
            ) => k1 == k2 && d1 == d2,
            (Self::Mlp { hidden: a }, Self::Mlp { hidden: b }) => a == b,
            _ => false,
        }
    }
}

/// A named panel slot
#[derive(Debug, Clone, PartialEq)]
pub struct PanelEntry {
    /// Display name used as the result-table key
    pub name: String,
    /// Variant and parameters
    pub kind: ModelKind,
}

/// Ordered registry of models evaluated uniformly on every trial
#[derive(Debug, Clone, PartialEq)]
pub struct ModelPanel {
    entries: Vec<PanelEntry>,
    random_state: u64,
}

impl ModelPanel {
    /// Empty panel
    #[must_use]
    pub const fn empty(random_state: u64) -> Self {
        Self {
            entries: Vec::new(),
            random_state,
        }
    }

    /// The full default panel with one MLP per hidden-layer architecture
    #[must_use]
    pub fn standard(mlp_architectures: &[Vec<usize>], random_state: u64) -> Self {
        let mut panel = Self::empty(random_state);
        panel
            .register("Linear", ModelKind::Linear)
            .register("Ridge", ModelKind::Ridge { alpha: 1.0 })
            .register("Lasso", ModelKind::Lasso { alpha: 1.0 })
            .register(
                "ElasticNet",
                ModelKind::ElasticNet {
                    alpha: 1.0,
                    l1_ratio: 0.5,
                },
            )
            .register("RandomForest", ModelKind::RandomForest { n_estimators: 100 })
            .register("Bagging", ModelKind::Bagging { n_estimators: 10 })
            .register(
                "GradientBoosting",
                ModelKind::GradientBoosting {
                    n_estimators: 100,
                    learning_rate: 0.1,
                    max_depth: 3,
                },
            )
            .register(
                "AdaBoost",
                ModelKind::AdaBoost {
                    n_estimators: 50,
                    max_depth: 3,
                },
            )
            .register(
                "XGBoost",
                ModelKind::XgBoost {
                    n_estimators: 100,
                    eta: 0.3,
                    max_depth: 6,
                    lambda: 1.0,
                },
            )
            .register("SVM", ModelKind::Svm { c: 1.0, epsilon: 0.1 })
            .register("KNN", ModelKind::Knn { k: 5 })
            .register("KernelRidge", ModelKind::KernelRidge { alpha: 1.0 })
            .register(
                "Spline",
                ModelKind::Spline {
                    n_knots: 5,
                    degree: 3,
                },
            );

        for (i, hidden) in mlp_architectures.iter().enumerate() {
            panel.register(
                &format!("MLP_{}", i + 1),
                ModelKind::Mlp {
                    hidden: hidden.clone(),
                },
            );
        }
        panel
    }

    /// Register a model, replacing any existing entry with the same name in place
    pub fn register(&mut self, name: &str, kind: ModelKind) -> &mut Self {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.name == name) {
            entry.kind = kind;
        } else {
            self.entries.push(PanelEntry {
                name: name.to_string(),
                kind,
            });
        }
        self
    }

    /// Seed handed to every stochastic model
    #[must_use]
    pub const fn random_state(&self) -> u64 {
        self.random_state
    }

    /// Registered names in registration order
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    /// Number of registered models
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no models are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over entries in registration order
    pub fn iter(&self) -> impl Iterator<Item = &PanelEntry> {
        self.entries.iter()
    }
}
