//! Trial loops, the two aggregation modes, and multi-task sweeps.
//!
//! MAE mode reduces each model's per-trial absolute errors; R² mode pools
//! every trial's (true, predicted) pair per model and scores the pooled
//! sequence once. The two are deliberately separate functions.

use crate::config::{EvalMode, ExperimentConfig};
use crate::dataset::Dataset;
use crate::evaluator::{evaluate_split, EvalError, TrialOutcome, BASELINES};
use crate::metrics::{absolute_error, pooled_r2, MaeSummary};
use crate::models::ModelPanel;
use crate::sampling::{check_capacity, draw_trial};
use crate::store::{ResultStore, StoreError};
use crate::table::{ResultRow, ResultTable, Score, TableError, TaskResultBundle};
use std::path::PathBuf;
use thiserror::Error;

/// Trials between progress log lines
const PROGRESS_EVERY: u64 = 10;

/// Errors that can occur during task execution
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("{0}")]
    Eval(#[from] EvalError),

    #[error("{0}")]
    Table(#[from] TableError),

    #[error("{0}")]
    Store(#[from] StoreError),
}

impl RunnerError {
    /// Whether the whole run must stop rather than skip the current pair
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::Eval(e) => e.is_fatal(),
            Self::Table(_) | Self::Store(_) => true,
        }
    }
}

impl From<crate::sampling::SamplingError> for RunnerError {
    fn from(e: crate::sampling::SamplingError) -> Self {
        Self::Eval(EvalError::Sampling(e))
    }
}

/// Row names every trial produces: the panel, then the baselines
fn row_names(panel: &ModelPanel) -> Vec<String> {
    panel
        .names()
        .into_iter()
        .chain(BASELINES)
        .map(ToString::to_string)
        .collect()
}

/// Run seeds `1..=n_trials`, handing each outcome to `collect`
fn for_each_trial<F>(
    dataset: &Dataset,
    representation: &str,
    target: &str,
    n_trials: usize,
    train_size: usize,
    panel: &ModelPanel,
    mut collect: F,
) -> Result<(), RunnerError>
where
    F: FnMut(&TrialOutcome),
{
    check_capacity(dataset.len(), train_size)?;
    let n_trials = n_trials as u64;
    for seed in 1..=n_trials {
        let trial = draw_trial(dataset.len(), seed, train_size)?;
        let outcome = evaluate_split(dataset, representation, target, trial, panel)?;
        collect(&outcome);
        if seed % PROGRESS_EVERY == 0 || seed == n_trials {
            tracing::info!(representation, target, seed, n_trials, "Trial progress");
        }
    }
    Ok(())
}

/// Mean/std/median of per-trial absolute errors for every model
///
/// A model that failed on every trial gets an all-NaN summary.
///
/// # Errors
///
/// Returns an error if the dataset is too small for `train_size` (fatal), or
/// lacks the requested target or representation.
pub fn run_mae(
    dataset: &Dataset,
    representation: &str,
    target: &str,
    n_trials: usize,
    train_size: usize,
    panel: &ModelPanel,
) -> Result<ResultTable, RunnerError> {
    let names = row_names(panel);
    let mut errors: Vec<Vec<f64>> = vec![Vec::with_capacity(n_trials); names.len()];

    for_each_trial(dataset, representation, target, n_trials, train_size, panel, |outcome| {
        for (slot, (_, truth, predicted)) in errors.iter_mut().zip(outcome.pairs()) {
            slot.push(absolute_error(truth, predicted));
        }
    })?;

    let rows = names
        .into_iter()
        .zip(&errors)
        .map(|(model, errs)| ResultRow {
            model,
            score: Score::Mae(MaeSummary::from_errors(errs)),
        })
        .collect();
    Ok(ResultTable::new(EvalMode::Mae, rows)?)
}

/// Pooled R² over every trial's held-out pair for every model
///
/// Pairs are stored with their seed and ordered by it before scoring, so the
/// result does not depend on collection order.
///
/// # Errors
///
/// See [`run_mae`].
pub fn run_r2(
    dataset: &Dataset,
    representation: &str,
    target: &str,
    n_trials: usize,
    train_size: usize,
    panel: &ModelPanel,
) -> Result<ResultTable, RunnerError> {
    let names = row_names(panel);
    let mut pairs: Vec<Vec<(u64, f64, f64)>> = vec![Vec::with_capacity(n_trials); names.len()];

    for_each_trial(dataset, representation, target, n_trials, train_size, panel, |outcome| {
        for (slot, (_, truth, predicted)) in pairs.iter_mut().zip(outcome.pairs()) {
            slot.push((outcome.trial.seed, truth, predicted));
        }
    })?;

    let rows = names
        .into_iter()
        .zip(pairs.iter_mut())
        .map(|(model, model_pairs)| {
            model_pairs.sort_by_key(|(seed, _, _)| *seed);
            let truths: Vec<f64> = model_pairs.iter().map(|p| p.1).collect();
            let predictions: Vec<f64> = model_pairs.iter().map(|p| p.2).collect();
            ResultRow {
                model,
                score: Score::R2 {
                    r2: pooled_r2(&truths, &predictions),
                },
            }
        })
        .collect();
    Ok(ResultTable::new(EvalMode::R2, rows)?)
}

/// Protocol parameters for a sweep
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Aggregation mode
    pub mode: EvalMode,
    /// Trials per (task, representation)
    pub n_trials: usize,
    /// Training molecules per trial
    pub train_size: usize,
    /// Representations evaluated per task
    pub representations: Vec<String>,
    /// `(property, task code)` pairs
    pub tasks: Vec<(String, String)>,
}

impl From<&ExperimentConfig> for RunnerConfig {
    fn from(config: &ExperimentConfig) -> Self {
        Self {
            mode: config.evaluation.mode,
            n_trials: config.evaluation.n_trials,
            train_size: config.dataset.train_size,
            representations: config.dataset.representations.clone(),
            tasks: config
                .dataset
                .target_properties
                .iter()
                .map(|t| (t.clone(), config.task_code(t)))
                .collect(),
        }
    }
}

/// Sweep driver over tasks and representations
#[derive(Debug, Clone)]
pub struct TaskRunner {
    config: RunnerConfig,
    panel: ModelPanel,
}

impl TaskRunner {
    /// Create a runner for a fixed panel
    #[must_use]
    pub const fn new(config: RunnerConfig, panel: ModelPanel) -> Self {
        Self { config, panel }
    }

    /// Runner configured entirely from an experiment file
    #[must_use]
    pub fn from_experiment(config: &ExperimentConfig) -> Self {
        Self::new(RunnerConfig::from(config), config.panel())
    }

    /// Get the runner configuration
    #[must_use]
    pub const fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Get the model panel
    #[must_use]
    pub const fn panel(&self) -> &ModelPanel {
        &self.panel
    }

    /// One table for a (representation, target) pair in the configured mode
    ///
    /// # Errors
    ///
    /// See [`run_mae`].
    pub fn run_table(&self, dataset: &Dataset, representation: &str, target: &str) -> Result<ResultTable, RunnerError> {
        let c = &self.config;
        match c.mode {
            EvalMode::Mae => run_mae(dataset, representation, target, c.n_trials, c.train_size, &self.panel),
            EvalMode::R2 => run_r2(dataset, representation, target, c.n_trials, c.train_size, &self.panel),
        }
    }

    /// Every configured representation for one target
    ///
    /// Representations the dataset lacks, or that raise a data error, are
    /// skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns only fatal errors (insufficient data).
    pub fn run_representations(
        &self,
        dataset: &Dataset,
        target: &str,
        task_code: &str,
    ) -> Result<TaskResultBundle, RunnerError> {
        let c = &self.config;
        let mut bundle = TaskResultBundle::new(target, task_code, c.mode, c.n_trials, c.train_size);

        for representation in &c.representations {
            if !dataset.has_representation(representation) {
                tracing::warn!(%representation, target, "Representation not in dataset; skipping");
                continue;
            }
            tracing::info!(%representation, target, mode = %c.mode, "Evaluating");
            match self.run_table(dataset, representation, target) {
                Ok(table) => bundle.insert(representation, table)?,
                Err(e) if !e.is_fatal() => {
                    tracing::warn!(%representation, target, error = %e, "Skipping pair");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(bundle)
    }

    /// Every configured task, checkpointing each finished bundle
    ///
    /// Targets absent from the dataset are skipped. Bundles already written
    /// stay on disk if a later task fails.
    ///
    /// # Errors
    ///
    /// Returns fatal evaluation errors and write failures.
    pub fn run_all_tasks(&self, dataset: &Dataset, store: &ResultStore) -> Result<Vec<PathBuf>, RunnerError> {
        let mut written = Vec::new();
        for (target, code) in &self.config.tasks {
            if !dataset.has_target(target) {
                tracing::warn!(%target, "Task not found in dataset; skipping");
                continue;
            }
            let bundle = self.run_representations(dataset, target, code)?;
            if bundle.tables.is_empty() {
                tracing::warn!(%target, "No representation produced results; nothing saved");
                continue;
            }
            written.push(store.save(&bundle)?);
            tracing::info!(%target, task_code = %code, "Checkpoint written");
        }
        Ok(written)
    }
}
