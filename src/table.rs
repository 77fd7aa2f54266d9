//! Ranked result tables and per-task bundles.
//!
//! A table holds one row per model in ranking order: ascending mean MAE or
//! descending pooled R², NaN last in both, ties kept in insertion order.

use crate::config::EvalMode;
use crate::metrics::{nan_as_null, MaeSummary};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors raised when combining tables
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TableError {
    #[error("Mode mismatch: table is {table}, rows are {rows}")]
    ModeMismatch { table: EvalMode, rows: EvalMode },
}

/// Summary statistic of one model
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Score {
    Mae(MaeSummary),
    R2 {
        #[serde(rename = "R2", with = "nan_as_null")]
        r2: f64,
    },
}

impl Score {
    /// Mode this score belongs to
    #[must_use]
    pub const fn mode(&self) -> EvalMode {
        match self {
            Self::Mae(_) => EvalMode::Mae,
            Self::R2 { .. } => EvalMode::R2,
        }
    }

    /// The value rows are ranked by (mean MAE or R²)
    #[must_use]
    pub const fn key(&self) -> f64 {
        match self {
            Self::Mae(summary) => summary.mean_mae,
            Self::R2 { r2 } => *r2,
        }
    }
}

/// One named row
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultRow {
    pub model: String,
    #[serde(flatten)]
    pub score: Score,
}

/// Externally computed rows keyed by method name, in insertion order
pub type ExternalRows = Vec<(String, Score)>;

/// Ranked per-model results for one (task, representation) pair
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultTable {
    mode: EvalMode,
    rows: Vec<ResultRow>,
}

/// NaN sorts last regardless of direction
fn rank(a: f64, b: f64, descending: bool) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) if descending => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

impl ResultTable {
    /// Build a ranked table from rows in registration order
    ///
    /// # Errors
    ///
    /// Returns `ModeMismatch` if a row's score does not belong to `mode`.
    pub fn new(mode: EvalMode, rows: Vec<ResultRow>) -> Result<Self, TableError> {
        if let Some(row) = rows.iter().find(|r| r.score.mode() != mode) {
            return Err(TableError::ModeMismatch {
                table: mode,
                rows: row.score.mode(),
            });
        }
        let mut table = Self { mode, rows };
        table.sort();
        Ok(table)
    }

    /// Aggregation mode of every row
    #[must_use]
    pub const fn mode(&self) -> EvalMode {
        self.mode
    }

    /// Rows in ranking order
    #[must_use]
    pub fn rows(&self) -> &[ResultRow] {
        &self.rows
    }

    /// Model names in ranking order
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.rows.iter().map(|r| r.model.as_str()).collect()
    }

    /// Look up a model's score
    #[must_use]
    pub fn get(&self, model: &str) -> Option<&Score> {
        self.rows.iter().find(|r| r.model == model).map(|r| &r.score)
    }

    /// Number of rows
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if the table has no rows
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Best-ranked row with a valid score
    #[must_use]
    pub fn best(&self) -> Option<&ResultRow> {
        self.rows.first().filter(|r| !r.score.key().is_nan())
    }

    fn sort(&mut self) {
        let descending = self.mode == EvalMode::R2;
        self.rows
            .sort_by(|a, b| rank(a.score.key(), b.score.key(), descending));
    }

    /// Insert or overwrite external rows by name, then re-rank
    ///
    /// Rows whose names do not collide are left untouched, and merging the
    /// same rows again yields the same table.
    ///
    /// # Errors
    ///
    /// Returns `ModeMismatch` if `mode` or any row's score differs from the
    /// table's mode; the table is unchanged in that case.
    pub fn merge_external(&mut self, external: &[(String, Score)], mode: EvalMode) -> Result<(), TableError> {
        if mode != self.mode {
            return Err(TableError::ModeMismatch {
                table: self.mode,
                rows: mode,
            });
        }
        if let Some((_, score)) = external.iter().find(|(_, s)| s.mode() != self.mode) {
            return Err(TableError::ModeMismatch {
                table: self.mode,
                rows: score.mode(),
            });
        }

        for (name, score) in external {
            if let Some(row) = self.rows.iter_mut().find(|r| &r.model == name) {
                row.score = *score;
            } else {
                self.rows.push(ResultRow {
                    model: name.clone(),
                    score: *score,
                });
            }
        }
        self.sort();
        Ok(())
    }
}

/// Free-function form of [`ResultTable::merge_external`]
///
/// # Errors
///
/// See [`ResultTable::merge_external`].
pub fn merge_external(table: &mut ResultTable, external: &[(String, Score)], mode: EvalMode) -> Result<(), TableError> {
    table.merge_external(external, mode)
}

/// All representation tables of one target property
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskResultBundle {
    /// Human property name
    pub task: String,
    /// Short file-name code
    pub task_code: String,
    /// Aggregation mode shared by every table
    pub mode: EvalMode,
    /// Trials per table
    pub n_trials: usize,
    /// Training molecules per trial
    pub train_size: usize,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Crate version that produced the bundle
    pub version: String,
    /// Tables keyed by representation name
    pub tables: BTreeMap<String, ResultTable>,
}

impl TaskResultBundle {
    /// Empty bundle stamped with the current time
    #[must_use]
    pub fn new(task: &str, task_code: &str, mode: EvalMode, n_trials: usize, train_size: usize) -> Self {
        Self {
            task: task.to_string(),
            task_code: task_code.to_string(),
            mode,
            n_trials,
            train_size,
            created_at: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            tables: BTreeMap::new(),
        }
    }

    /// Add or replace a representation's table
    ///
    /// # Errors
    ///
    /// Returns `ModeMismatch` if the table's mode differs from the bundle's.
    pub fn insert(&mut self, representation: &str, table: ResultTable) -> Result<(), TableError> {
        if table.mode() != self.mode {
            return Err(TableError::ModeMismatch {
                table: self.mode,
                rows: table.mode(),
            });
        }
        self.tables.insert(representation.to_string(), table);
        Ok(())
    }

    /// Merge the same external rows into every representation table
    ///
    /// # Errors
    ///
    /// Returns `ModeMismatch` if the rows do not match the bundle's mode.
    pub fn merge_external(&mut self, external: &[(String, Score)]) -> Result<(), TableError> {
        for table in self.tables.values_mut() {
            table.merge_external(external, self.mode)?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    fn mae(mean: f64) -> Score {
        Score::Mae(MaeSummary {
            mean_mae: mean,
            std_mae: 0.0,
            median_mae: mean,
        })
    }

    fn row(model: &str, score: Score) -> ResultRow {
        ResultRow {
            model: model.to_string(),
            score,
        }
    }

    // ========================================================================
    // Ranking
    // ========================================================================

    #[test]
    fn test_mae_ascending_nan_last_stable() {
        let table = ResultTable::new(
            EvalMode::Mae,
            vec![
                row("a", mae(2.0)),
                row("broken", mae(f64::NAN)),
                row("b", mae(1.0)),
                row("c", mae(2.0)),
            ],
        )
        .unwrap();
        assert_eq!(table.names(), vec!["b", "a", "c", "broken"]);
        assert_eq!(table.best().unwrap().model, "b");
    }

    #[test]
    fn test_r2_descending_nan_last() {
        let table = ResultTable::new(
            EvalMode::R2,
            vec![
                row("nan", Score::R2 { r2: f64::NAN }),
                row("low", Score::R2 { r2: -0.5 }),
                row("high", Score::R2 { r2: 0.9 }),
            ],
        )
        .unwrap();
        assert_eq!(table.names(), vec!["high", "low", "nan"]);
    }

    #[test]
    fn test_mixed_modes_rejected() {
        let result = ResultTable::new(EvalMode::Mae, vec![row("x", Score::R2 { r2: 0.1 })]);
        assert!(matches!(result, Err(TableError::ModeMismatch { .. })));
    }

    // ========================================================================
    // External merge
    // ========================================================================

    #[test]
    fn test_merge_inserts_and_reranks() {
        let mut table =
            ResultTable::new(EvalMode::Mae, vec![row("Linear", mae(0.5)), row("KNN", mae(1.5))]).unwrap();
        let external = vec![("LLM".to_string(), mae(1.0))];
        table.merge_external(&external, EvalMode::Mae).unwrap();
        assert_eq!(table.names(), vec!["Linear", "LLM", "KNN"]);
    }

    #[test]
    fn test_merge_overwrites_collisions_only() {
        let mut table =
            ResultTable::new(EvalMode::Mae, vec![row("Linear", mae(0.5)), row("LLM", mae(9.0))]).unwrap();
        let external = vec![("LLM".to_string(), mae(0.1))];
        table.merge_external(&external, EvalMode::Mae).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.get("Linear"), Some(&mae(0.5)));
        assert_eq!(table.get("LLM"), Some(&mae(0.1)));
        assert_eq!(table.names(), vec!["LLM", "Linear"]);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let base = ResultTable::new(
            EvalMode::R2,
            vec![row("Linear", Score::R2 { r2: 0.7 }), row("KNN", Score::R2 { r2: 0.7 })],
        )
        .unwrap();
        let external = vec![
            ("GPT".to_string(), Score::R2 { r2: 0.7 }),
            ("Claude".to_string(), Score::R2 { r2: f64::NAN }),
        ];

        let mut once = base.clone();
        once.merge_external(&external, EvalMode::R2).unwrap();
        let mut twice = once.clone();
        twice.merge_external(&external, EvalMode::R2).unwrap();

        assert_eq!(once.names(), twice.names());
        assert_eq!(once.names(), vec!["Linear", "KNN", "GPT", "Claude"]);
    }

    #[test]
    fn test_merge_wrong_mode_leaves_table_unchanged() {
        let mut table = ResultTable::new(EvalMode::Mae, vec![row("Linear", mae(0.5))]).unwrap();
        let before = table.clone();
        let external = vec![("LLM".to_string(), Score::R2 { r2: 0.5 })];
        assert!(table.merge_external(&external, EvalMode::Mae).is_err());
        assert!(merge_external(&mut table, &[], EvalMode::R2).is_err());
        assert_eq!(table, before);
    }

    // ========================================================================
    // Bundles
    // ========================================================================

    #[test]
    fn test_bundle_merges_every_table() {
        let mut bundle = TaskResultBundle::new("LogP", "logp", EvalMode::Mae, 100, 50);
        for rep in ["ecfp", "maccs"] {
            let table = ResultTable::new(EvalMode::Mae, vec![row("Linear", mae(1.0))]).unwrap();
            bundle.insert(rep, table).unwrap();
        }
        bundle
            .merge_external(&[("Claude".to_string(), mae(0.6))])
            .unwrap();
        for table in bundle.tables.values() {
            assert_eq!(table.names(), vec!["Claude", "Linear"]);
        }
    }

    #[test]
    fn test_bundle_json_keeps_missing_values() {
        let mut bundle = TaskResultBundle::new("LogP", "logp", EvalMode::R2, 3, 2);
        let table = ResultTable::new(
            EvalMode::R2,
            vec![row("Linear", Score::R2 { r2: 0.5 }), row("Broken", Score::R2 { r2: f64::NAN })],
        )
        .unwrap();
        bundle.insert("ecfp", table).unwrap();

        let json = serde_json::to_string(&bundle).unwrap();
        assert!(json.contains(r#""R2":null"#));
        let back: TaskResultBundle = serde_json::from_str(&json).unwrap();
        let restored = &back.tables["ecfp"];
        assert_eq!(restored.names(), vec!["Linear", "Broken"]);
        assert!(matches!(restored.get("Broken"), Some(Score::R2 { r2 }) if r2.is_nan()));
    }
}
