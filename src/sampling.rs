//! Seeded resampling protocol.
//!
//! Each trial draws one held-out record and a disjoint training subsample
//! from a random source built from the trial seed alone, so ML runs and
//! external-predictor runs see identical splits for the same seed.

use rand::seq::index;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stream used by the trial split itself
const SPLIT_STREAM: u64 = 0;
/// Stream reserved for the random-draw baseline of a trial
const BASELINE_STREAM: u64 = 1;

/// Errors from the resampling protocol
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SamplingError {
    #[error("Insufficient data: need {required} records (train_size + 1), dataset has {available}")]
    InsufficientData { required: usize, available: usize },
}

/// One resampling iteration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trial {
    /// Seed the trial was drawn from
    pub seed: u64,
    /// Index of the single held-out record
    pub held_out: usize,
    /// Training indices in draw order
    pub training: Vec<usize>,
}

impl Trial {
    /// Random source for the random-draw baseline of this trial.
    ///
    /// Independent of the split stream, so adding or removing baselines never
    /// shifts the split drawn for a seed.
    #[must_use]
    pub fn baseline_rng(&self) -> ChaCha8Rng {
        trial_rng(self.seed, BASELINE_STREAM)
    }
}

fn trial_rng(seed: u64, stream: u64) -> ChaCha8Rng {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream(stream);
    rng
}

/// Ensure a dataset of `len` records can supply `train_size + 1` distinct records
///
/// # Errors
///
/// Returns `InsufficientData` when it cannot.
pub const fn check_capacity(len: usize, train_size: usize) -> Result<(), SamplingError> {
    let required = train_size.saturating_add(1);
    if required > len {
        return Err(SamplingError::InsufficientData {
            required,
            available: len,
        });
    }
    Ok(())
}

/// Draw the held-out record and training subsample for `seed`
///
/// The held-out index is uniform over `0..len`; the training indices are
/// `train_size` distinct draws, without replacement, from the remaining
/// records.
///
/// # Errors
///
/// Returns `InsufficientData` if `train_size + 1 > len`.
pub fn draw_trial(len: usize, seed: u64, train_size: usize) -> Result<Trial, SamplingError> {
    check_capacity(len, train_size)?;

    let mut rng = trial_rng(seed, SPLIT_STREAM);
    let held_out = rng.gen_range(0..len);

    // Sample positions in the dataset with the held-out record removed,
    // then map them back to dataset indices.
    let training = index::sample(&mut rng, len - 1, train_size)
        .into_iter()
        .map(|pos| if pos >= held_out { pos + 1 } else { pos })
        .collect();

    Ok(Trial {
        seed,
        held_out,
        training,
    })
}

/// All trials for seeds `1..=n_trials`
///
/// # Errors
///
/// Returns `InsufficientData` if the dataset is too small.
pub fn draw_trials(len: usize, n_trials: usize, train_size: usize) -> Result<Vec<Trial>, SamplingError> {
    (1..=n_trials as u64)
        .map(|seed| draw_trial(len, seed, train_size))
        .collect()
}
