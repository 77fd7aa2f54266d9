//! # Molprop Bench
//!
//! Few-shot molecular property regression benchmark.
//!
//! Every trial draws one held-out molecule and a small labelled training set
//! from a seeded generator, fits a panel of classical regressors plus three
//! trivial baselines, and records the held-out prediction. Trials are then
//! reduced either per model to mean/std/median absolute error, or by pooling
//! every (true, predicted) pair into a single R².
//!
//! ## Protocol
//!
//! - Seed `s` selects the same split for every model, representation and
//!   external predictor, so results are directly comparable
//! - Features are standardised on the training rows of each trial only
//! - A model that fails to fit contributes a missing value, never a zero
//! - Missing values are ignored by aggregation; a table ranks them last
//!
//! ## Architecture
//!
//! ```text
//! Dataset (JSON lines: structure, targets, feature vectors)
//!        ↓
//! draw_trial(seed)  ──────────────────────────┐
//!        ↓                                    ↓
//! Scaler → Model panel + baselines     External predictor (CLI) → response log
//!        ↓                                    ↓
//! MAE / pooled R² aggregation          Numeric extraction → summary
//!        ↓                                    ↓
//! ResultTable ←────────── merge ──────────────┘
//!        ↓
//! TaskResultBundle (JSON, one per task and mode) → Report
//! ```

pub mod config;
pub mod dataset;
pub mod evaluator;
pub mod external;
pub mod metrics;
pub mod models;
pub mod preprocessing;
pub mod report;
pub mod runner;
pub mod sampling;
pub mod store;
pub mod table;

pub use config::{
    ConfigError, DatasetSettings, EvalMode, EvaluationSettings, ExperimentConfig, ModelSettings, OutputSettings,
};
pub use dataset::{DataError, Dataset, MoleculeRecord};
pub use evaluator::{
    evaluate_split, evaluate_trial, EvalError, ModelOutcome, TrialOutcome, BASELINES, LAST_VALUE_BASELINE,
    MEAN_BASELINE, RANDOM_BASELINE,
};
pub use external::{
    build_prompt, extract_numeric_prediction, format_examples, parse_response_log, run_external, summarize,
    summarize_mae, summarize_r2, valid_count, CommandPredictor, ExternalError, ExternalPrediction,
    ExternalPredictor, DEFAULT_PROMPT,
};
pub use metrics::{absolute_error, nan_mean, nan_median, nan_std, pooled_r2, MaeSummary};
pub use models::{FitError, ModelKind, ModelPanel, PanelEntry, Regressor};
pub use preprocessing::StandardScaler;
pub use report::{best_per_representation, flatten, min_ranks, Highlight, RankMatrix, RankMatrixRow, SummaryReport, SummaryRow};
pub use runner::{run_mae, run_r2, RunnerConfig, RunnerError, TaskRunner};
pub use sampling::{check_capacity, draw_trial, draw_trials, SamplingError, Trial};
pub use store::{ResultStore, StoreError};
pub use table::{merge_external, ExternalRows, ResultRow, ResultTable, Score, TableError, TaskResultBundle};
