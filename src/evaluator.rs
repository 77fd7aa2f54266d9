//! Per-trial evaluation of the model panel and the naive baselines.

use crate::dataset::{DataError, Dataset};
use crate::models::{FitError, ModelKind, ModelPanel};
use crate::preprocessing::StandardScaler;
use crate::sampling::{draw_trial, SamplingError, Trial};
use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::Rng;
use thiserror::Error;

/// Predicts the mean of the training targets
pub const MEAN_BASELINE: &str = "Mean_Baseline";
/// Predicts one training target drawn uniformly at random
pub const RANDOM_BASELINE: &str = "Random_Baseline";
/// Predicts the last training target in draw order
pub const LAST_VALUE_BASELINE: &str = "Last_Value_Baseline";

/// Baseline names in the order they follow the panel
pub const BASELINES: [&str; 3] = [MEAN_BASELINE, RANDOM_BASELINE, LAST_VALUE_BASELINE];

/// Errors that abort a whole trial
#[derive(Error, Debug)]
pub enum EvalError {
    #[error("{0}")]
    Sampling(#[from] SamplingError),

    #[error("{0}")]
    Data(#[from] DataError),

    #[error("Feature scaling failed: {0}")]
    Scaling(FitError),
}

impl EvalError {
    /// Insufficient data is fatal for the whole run; everything else only
    /// affects the current task/representation pair
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Sampling(_))
    }
}

/// One model's result on one trial
#[derive(Debug, Clone, PartialEq)]
pub struct ModelOutcome {
    /// Panel or baseline name
    pub name: String,
    /// Held-out prediction, or the reason it is missing
    pub prediction: Result<f64, FitError>,
}

impl ModelOutcome {
    /// Prediction with failures mapped to NaN
    #[must_use]
    pub fn predicted_or_nan(&self) -> f64 {
        self.prediction.as_ref().map_or(f64::NAN, |v| *v)
    }
}

/// Every model's prediction for the single held-out record of one trial
#[derive(Debug, Clone)]
pub struct TrialOutcome {
    /// The split that was evaluated
    pub trial: Trial,
    /// True target of the held-out record
    pub true_value: f64,
    /// Panel models in registration order, then the baselines
    pub outcomes: Vec<ModelOutcome>,
}

impl TrialOutcome {
    /// Iterate `(name, true, predicted)` with failures as NaN
    pub fn pairs(&self) -> impl Iterator<Item = (&str, f64, f64)> + '_ {
        self.outcomes
            .iter()
            .map(move |o| (o.name.as_str(), self.true_value, o.predicted_or_nan()))
    }
}

/// Draw the split for `seed` and evaluate it
///
/// # Errors
///
/// Returns an error if the split cannot be drawn, the dataset lacks the
/// requested columns, or the scaler cannot be fit. Individual model failures
/// are recorded in the outcome instead.
pub fn evaluate_trial(
    dataset: &Dataset,
    representation: &str,
    target: &str,
    seed: u64,
    train_size: usize,
    panel: &ModelPanel,
) -> Result<TrialOutcome, EvalError> {
    let trial = draw_trial(dataset.len(), seed, train_size)?;
    evaluate_split(dataset, representation, target, trial, panel)
}

/// Evaluate an already drawn split
///
/// # Errors
///
/// See [`evaluate_trial`].
pub fn evaluate_split(
    dataset: &Dataset,
    representation: &str,
    target: &str,
    trial: Trial,
    panel: &ModelPanel,
) -> Result<TrialOutcome, EvalError> {
    let held_out = [trial.held_out];
    let x_train = dataset.features(representation, &trial.training)?;
    let x_test = dataset.features(representation, &held_out)?;
    let y_train = dataset.targets(target, &trial.training)?;
    let y_test = dataset.targets(target, &held_out)?;

    // The scaler only ever sees training rows
    let scaler = StandardScaler::fit(x_train.view()).map_err(EvalError::Scaling)?;
    let x_train = scaler.transform(x_train.view()).map_err(EvalError::Scaling)?;
    let x_test = scaler.transform(x_test.view()).map_err(EvalError::Scaling)?;

    let mut outcomes = Vec::with_capacity(panel.len() + BASELINES.len());
    for entry in panel.iter() {
        let prediction = fit_and_predict(
            &entry.kind,
            panel.random_state(),
            x_train.view(),
            y_train.view(),
            x_test.view(),
        );
        if let Err(e) = &prediction {
            tracing::warn!(
                model = %entry.name,
                seed = trial.seed,
                representation,
                target,
                error = %e,
                "Model failed; recording as missing"
            );
        }
        outcomes.push(ModelOutcome {
            name: entry.name.clone(),
            prediction,
        });
    }

    for (name, value) in BASELINES.iter().zip(baseline_predictions(&trial, &y_train)) {
        outcomes.push(ModelOutcome {
            name: (*name).to_string(),
            prediction: value.ok_or(FitError::EmptyTrainingSet),
        });
    }

    Ok(TrialOutcome {
        true_value: y_test[0],
        trial,
        outcomes,
    })
}

/// Mean, random draw and last value of the training targets
///
/// The random draw uses the trial's own baseline stream, so it is
/// reproducible per seed and independent of the split.
#[must_use]
pub fn baseline_predictions(trial: &Trial, y_train: &Array1<f64>) -> [Option<f64>; 3] {
    if y_train.is_empty() {
        return [None; 3];
    }
    let mut rng = trial.baseline_rng();
    let random = y_train[rng.gen_range(0..y_train.len())];
    [y_train.mean(), Some(random), y_train.get(y_train.len() - 1).copied()]
}

fn fit_and_predict(
    kind: &ModelKind,
    random_state: u64,
    x_train: ArrayView2<'_, f64>,
    y_train: ArrayView1<'_, f64>,
    x_test: ArrayView2<'_, f64>,
) -> Result<f64, FitError> {
    let mut model = kind.build(random_state);
    model.fit(x_train, y_train)?;
    let predicted = model.predict(x_test)?;
    let value = predicted
        .get(0)
        .copied()
        .ok_or_else(|| FitError::Failed("empty prediction".to_string()))?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(FitError::NonFinite("prediction".to_string()))
    }
}
