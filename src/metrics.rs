//! Error metrics and NaN-aware reductions.
//!
//! Missing values (failed fits, unparsable external predictions) travel as
//! NaN and are dropped by every reduction here rather than counted as zero.

use serde::{Deserialize, Serialize};

/// Mean, population standard deviation and median of per-trial absolute errors
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MaeSummary {
    #[serde(rename = "Mean_MAE", with = "nan_as_null")]
    pub mean_mae: f64,
    #[serde(rename = "Std_MAE", with = "nan_as_null")]
    pub std_mae: f64,
    #[serde(rename = "Median_MAE", with = "nan_as_null")]
    pub median_mae: f64,
}

impl MaeSummary {
    /// Summary with every statistic missing
    #[must_use]
    pub const fn missing() -> Self {
        Self {
            mean_mae: f64::NAN,
            std_mae: f64::NAN,
            median_mae: f64::NAN,
        }
    }

    /// Reduce absolute errors, ignoring NaN entries
    #[must_use]
    pub fn from_errors(errors: &[f64]) -> Self {
        Self {
            mean_mae: nan_mean(errors),
            std_mae: nan_std(errors),
            median_mae: nan_median(errors),
        }
    }

    /// Check whether no valid trial contributed
    #[must_use]
    pub fn is_missing(&self) -> bool {
        self.mean_mae.is_nan()
    }
}

fn finite_values(samples: &[f64]) -> Vec<f64> {
    samples.iter().copied().filter(|v| !v.is_nan()).collect()
}

/// Mean of the non-NaN samples; NaN when there are none
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn nan_mean(samples: &[f64]) -> f64 {
    let values = finite_values(samples);
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population (ddof = 0) standard deviation of the non-NaN samples
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn nan_std(samples: &[f64]) -> f64 {
    let values = finite_values(samples);
    if values.is_empty() {
        return f64::NAN;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Median of the non-NaN samples (mean of the middle pair for even counts)
#[must_use]
pub fn nan_median(samples: &[f64]) -> f64 {
    let mut values = finite_values(samples);
    if values.is_empty() {
        return f64::NAN;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        0.5 * (values[mid - 1] + values[mid])
    } else {
        values[mid]
    }
}

/// Absolute error, NaN if either side is missing
#[must_use]
pub fn absolute_error(true_value: f64, predicted: f64) -> f64 {
    (true_value - predicted).abs()
}

/// Pooled coefficient of determination over paired sequences
///
/// Pairs where either value is NaN are dropped first. Fewer than two valid
/// pairs yield NaN. A constant true sequence scores 1 when predicted exactly
/// and 0 otherwise.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn pooled_r2(true_values: &[f64], predicted: &[f64]) -> f64 {
    let pairs: Vec<(f64, f64)> = true_values
        .iter()
        .zip(predicted)
        .filter(|(t, p)| !t.is_nan() && !p.is_nan())
        .map(|(t, p)| (*t, *p))
        .collect();
    if pairs.len() < 2 {
        return f64::NAN;
    }

    let mean = pairs.iter().map(|(t, _)| t).sum::<f64>() / pairs.len() as f64;
    let ss_res: f64 = pairs.iter().map(|(t, p)| (t - p).powi(2)).sum();
    let ss_tot: f64 = pairs.iter().map(|(t, _)| (t - mean).powi(2)).sum();

    if ss_tot == 0.0 {
        return if ss_res == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

/// JSON has no NaN; missing statistics are stored as `null`
pub(crate) mod nan_as_null {
    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::trivially_copy_pass_by_ref)]
    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_nan() {
            serializer.serialize_none()
        } else {
            serializer.serialize_f64(*value)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
    }
}
