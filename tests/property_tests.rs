//! Property tests for the resampling protocol and aggregation.

#![allow(clippy::unwrap_used)]

use molprop_bench::{draw_trial, extract_numeric_prediction, nan_mean, nan_median, pooled_r2, MaeSummary};
use molprop_bench::{EvalMode, ResultRow, ResultTable, Score};
use proptest::prelude::*;
use std::collections::HashSet;

proptest! {
    #[test]
    fn prop_trial_is_deterministic(len in 2usize..300, seed in any::<u64>(), frac in 0.0f64..1.0) {
        let train_size = ((len - 1) as f64 * frac) as usize;
        let a = draw_trial(len, seed, train_size).unwrap();
        let b = draw_trial(len, seed, train_size).unwrap();
        prop_assert_eq!(a, b);
    }

    #[test]
    fn prop_trial_is_disjoint_and_sized(len in 2usize..300, seed in any::<u64>(), frac in 0.0f64..1.0) {
        let train_size = ((len - 1) as f64 * frac) as usize;
        let trial = draw_trial(len, seed, train_size).unwrap();

        prop_assert_eq!(trial.training.len(), train_size);
        prop_assert!(trial.held_out < len);
        prop_assert!(!trial.training.contains(&trial.held_out));
        let unique: HashSet<_> = trial.training.iter().collect();
        prop_assert_eq!(unique.len(), train_size);
        prop_assert!(trial.training.iter().all(|&i| i < len));
    }

    #[test]
    fn prop_too_small_dataset_rejected(len in 0usize..50, extra in 0usize..10) {
        prop_assert!(draw_trial(len, 1, len + extra).is_err());
    }

    #[test]
    fn prop_nan_entries_do_not_change_summary(
        values in prop::collection::vec(0.0f64..100.0, 1..40),
        gaps in prop::collection::vec(any::<bool>(), 1..40),
    ) {
        let mut padded = Vec::new();
        for (v, gap) in values.iter().zip(gaps.iter().cycle()) {
            if *gap {
                padded.push(f64::NAN);
            }
            padded.push(*v);
        }
        prop_assert_eq!(MaeSummary::from_errors(&values), MaeSummary::from_errors(&padded));
        prop_assert!(nan_median(&padded) <= values.iter().copied().fold(f64::MIN, f64::max));
        prop_assert!(nan_mean(&padded) >= 0.0);
    }

    #[test]
    fn prop_r2_of_identity_is_one(values in prop::collection::vec(-1e3f64..1e3, 2..40)) {
        let spread = values.iter().copied().fold(f64::MIN, f64::max) - values.iter().copied().fold(f64::MAX, f64::min);
        prop_assume!(spread > 1e-6);
        prop_assert_eq!(pooled_r2(&values, &values), 1.0);
    }

    #[test]
    fn prop_table_order_is_ascending_with_nan_last(
        scores in prop::collection::vec(prop::option::of(0.0f64..10.0), 0..20),
    ) {
        let rows = scores
            .iter()
            .enumerate()
            .map(|(i, s)| ResultRow {
                model: format!("m{i}"),
                score: Score::Mae(s.map_or_else(MaeSummary::missing, |v| MaeSummary::from_errors(&[v]))),
            })
            .collect();
        let table = ResultTable::new(EvalMode::Mae, rows).unwrap();
        let keys: Vec<f64> = table.rows().iter().map(|r| r.score.key()).collect();

        let first_nan = keys.iter().position(|k| k.is_nan()).unwrap_or(keys.len());
        prop_assert!(keys[first_nan..].iter().all(|k| k.is_nan()));
        prop_assert!(keys[..first_nan].windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn prop_plain_numbers_extract_exactly(value in -1e6f64..1e6) {
        let rounded = (value * 100.0).round() / 100.0;
        prop_assert_eq!(extract_numeric_prediction(&format!("{rounded}")), rounded);
    }
}
