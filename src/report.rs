//! Report generation over stored task bundles.
//!
//! Flattens every (task, representation, model) row into one summary table
//! and renders it as JSON, markdown or plain text, with the best model of
//! each representation called out and a representation by model rank
//! matrix per task.

use crate::config::EvalMode;
use crate::table::{ResultTable, Score, TaskResultBundle};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as FmtWrite;
use tabled::{Table, Tabled};

const RULE: &str = "═══════════════════════════════════════════════════════════════";
const THIN_RULE: &str = "───────────────────────────────────────────────────────────────";

/// One flattened result row
///
/// MAE fields are `None` for R² rows and vice versa; a missing statistic
/// (no valid trial) is also `None`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SummaryRow {
    pub task: String,
    pub representation: String,
    pub model: String,
    pub mode: EvalMode,
    /// Rank within its table, starting at 1; tied scores share the lowest
    /// rank and missing scores tie below every valid one
    pub rank: usize,
    pub mean_mae: Option<f64>,
    pub std_mae: Option<f64>,
    pub median_mae: Option<f64>,
    pub r2: Option<f64>,
}

fn present(value: f64) -> Option<f64> {
    (!value.is_nan()).then_some(value)
}

impl SummaryRow {
    fn new(task: &str, representation: &str, model: &str, rank: usize, score: &Score) -> Self {
        let (mean_mae, std_mae, median_mae, r2) = match score {
            Score::Mae(s) => (present(s.mean_mae), present(s.std_mae), present(s.median_mae), None),
            Score::R2 { r2 } => (None, None, None, present(*r2)),
        };
        Self {
            task: task.to_string(),
            representation: representation.to_string(),
            model: model.to_string(),
            mode: score.mode(),
            rank,
            mean_mae,
            std_mae,
            median_mae,
            r2,
        }
    }
}

/// Competition ranks over a sorted table: equal keys share the lowest
/// position, as do all missing keys after the valid ones
#[must_use]
pub fn min_ranks(table: &ResultTable) -> Vec<usize> {
    let mut ranks: Vec<usize> = Vec::with_capacity(table.len());
    let mut previous: Option<f64> = None;
    for (i, row) in table.rows().iter().enumerate() {
        let key = row.score.key();
        let tied = previous.is_some_and(|p| p == key || (p.is_nan() && key.is_nan()));
        let rank = match ranks.last() {
            Some(&last) if tied => last,
            _ => i + 1,
        };
        ranks.push(rank);
        previous = Some(key);
    }
    ranks
}

/// Every row of every table, tasks in input order, representations sorted
#[must_use]
pub fn flatten(bundles: &[TaskResultBundle]) -> Vec<SummaryRow> {
    bundles
        .iter()
        .flat_map(|bundle| {
            bundle.tables.iter().flat_map(move |(representation, table)| {
                table
                    .rows()
                    .iter()
                    .zip(min_ranks(table))
                    .map(move |(row, rank)| {
                        SummaryRow::new(&bundle.task, representation, &row.model, rank, &row.score)
                    })
            })
        })
        .collect()
}

/// Ranks of every model under every representation of one task bundle
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RankMatrix {
    pub task: String,
    pub mode: EvalMode,
    /// Column order: first appearance across the representation tables
    pub models: Vec<String>,
    pub rows: Vec<RankMatrixRow>,
}

/// One representation's ranks, aligned with `RankMatrix::models`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RankMatrixRow {
    pub representation: String,
    /// `None` where the model has no row in this representation's table
    pub ranks: Vec<Option<usize>>,
}

impl RankMatrix {
    /// Build the matrix for one bundle
    #[must_use]
    pub fn from_bundle(bundle: &TaskResultBundle) -> Self {
        let mut models: Vec<String> = Vec::new();
        for table in bundle.tables.values() {
            for row in table.rows() {
                if !models.contains(&row.model) {
                    models.push(row.model.clone());
                }
            }
        }

        let rows = bundle
            .tables
            .iter()
            .map(|(representation, table)| {
                let ranked: Vec<(&str, usize)> = table
                    .rows()
                    .iter()
                    .map(|r| r.model.as_str())
                    .zip(min_ranks(table))
                    .collect();
                let ranks = models
                    .iter()
                    .map(|m| ranked.iter().find(|(name, _)| name == m).map(|&(_, rank)| rank))
                    .collect();
                RankMatrixRow {
                    representation: representation.clone(),
                    ranks,
                }
            })
            .collect();

        Self {
            task: bundle.task.clone(),
            mode: bundle.mode,
            models,
            rows,
        }
    }

    /// Rank of `model` under `representation`
    #[must_use]
    pub fn rank(&self, representation: &str, model: &str) -> Option<usize> {
        let column = self.models.iter().position(|m| m == model)?;
        self.rows
            .iter()
            .find(|r| r.representation == representation)
            .and_then(|r| r.ranks[column])
    }

    fn render(&self, output: &mut String) {
        writeln!(output, "| Representation | {} |", self.models.join(" | ")).ok();
        writeln!(output, "|---{}|", "|---".repeat(self.models.len())).ok();
        for row in &self.rows {
            let cells: Vec<String> = row
                .ranks
                .iter()
                .map(|r| r.map_or_else(|| "-".to_string(), |v| v.to_string()))
                .collect();
            writeln!(output, "| {} | {} |", row.representation.to_uppercase(), cells.join(" | ")).ok();
        }
    }
}

/// Best model of one (task, representation) table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Highlight {
    pub task: String,
    pub representation: String,
    pub mode: EvalMode,
    pub model: String,
    /// Mean MAE or R²
    pub value: f64,
}

/// Best valid model per table; tables where every score is missing are omitted
#[must_use]
pub fn best_per_representation(bundles: &[TaskResultBundle]) -> Vec<Highlight> {
    bundles
        .iter()
        .flat_map(|bundle| {
            bundle.tables.iter().filter_map(move |(representation, table)| {
                table.best().map(|row| Highlight {
                    task: bundle.task.clone(),
                    representation: representation.clone(),
                    mode: table.mode(),
                    model: row.model.clone(),
                    value: row.score.key(),
                })
            })
        })
        .collect()
}

/// Report metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub title: String,
    pub generated_at: DateTime<Utc>,
    pub framework_version: String,
    /// Task bundles included
    pub bundles: usize,
}

/// Summary report over a set of bundles
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryReport {
    pub metadata: ReportMetadata,
    pub highlights: Vec<Highlight>,
    pub rows: Vec<SummaryRow>,
    #[serde(default)]
    pub rank_matrices: Vec<RankMatrix>,
}

/// Table row for text/markdown output
#[derive(Tabled)]
struct RenderedRow {
    #[tabled(rename = "#")]
    rank: usize,
    #[tabled(rename = "Model")]
    model: String,
    #[tabled(rename = "Mean MAE")]
    mean_mae: String,
    #[tabled(rename = "Std MAE")]
    std_mae: String,
    #[tabled(rename = "Median MAE")]
    median_mae: String,
    #[tabled(rename = "R²")]
    r2: String,
}

fn cell(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.4}"))
}

impl From<&SummaryRow> for RenderedRow {
    fn from(row: &SummaryRow) -> Self {
        Self {
            rank: row.rank,
            model: row.model.clone(),
            mean_mae: cell(row.mean_mae),
            std_mae: cell(row.std_mae),
            median_mae: cell(row.median_mae),
            r2: cell(row.r2),
        }
    }
}

impl SummaryReport {
    /// Build a report from loaded bundles
    #[must_use]
    pub fn new(title: &str, bundles: &[TaskResultBundle]) -> Self {
        Self {
            metadata: ReportMetadata {
                title: title.to_string(),
                generated_at: Utc::now(),
                framework_version: env!("CARGO_PKG_VERSION").to_string(),
                bundles: bundles.len(),
            },
            highlights: best_per_representation(bundles),
            rows: flatten(bundles),
            rank_matrices: bundles.iter().map(RankMatrix::from_bundle).collect(),
        }
    }

    /// (task, representation) groups in row order
    fn groups(&self) -> Vec<(&str, &str, Vec<&SummaryRow>)> {
        let mut groups: Vec<(&str, &str, Vec<&SummaryRow>)> = Vec::new();
        for row in &self.rows {
            let same = groups
                .last()
                .is_some_and(|(task, rep, _)| *task == row.task && *rep == row.representation);
            match groups.last_mut() {
                Some(group) if same => group.2.push(row),
                _ => groups.push((row.task.as_str(), row.representation.as_str(), vec![row])),
            }
        }
        groups
    }

    fn highlight(&self, task: &str, representation: &str) -> Option<&Highlight> {
        self.highlights
            .iter()
            .find(|h| h.task == task && h.representation == representation)
    }

    /// Render report as JSON
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Render report as markdown
    #[must_use]
    pub fn to_markdown(&self) -> String {
        let mut output = String::new();

        writeln!(output, "# {}", self.metadata.title).ok();
        writeln!(output).ok();
        writeln!(
            output,
            "**Generated:** {}",
            self.metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
        )
        .ok();
        writeln!(output, "**Framework Version:** {}", self.metadata.framework_version).ok();
        writeln!(output).ok();

        if !self.highlights.is_empty() {
            writeln!(output, "## Best Models").ok();
            writeln!(output).ok();
            writeln!(output, "| Task | Representation | Model | Score |").ok();
            writeln!(output, "|------|----------------|-------|-------|").ok();
            for h in &self.highlights {
                writeln!(
                    output,
                    "| {} | {} | {} | {} |",
                    h.task,
                    h.representation,
                    h.model,
                    format_score(h.mode, h.value)
                )
                .ok();
            }
            writeln!(output).ok();
        }

        for (task, representation, rows) in self.groups() {
            writeln!(output, "## {task} / {representation}").ok();
            writeln!(output).ok();
            let table = Table::new(rows.into_iter().map(RenderedRow::from)).to_string();
            writeln!(output, "{table}").ok();
            writeln!(output).ok();
        }

        for matrix in &self.rank_matrices {
            writeln!(output, "## Rank Matrix: {} ({})", matrix.task, matrix.mode).ok();
            writeln!(output).ok();
            matrix.render(&mut output);
            writeln!(output).ok();
        }

        output
    }

    /// Render report as plain text tables
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut output = String::new();

        writeln!(output, "{RULE}").ok();
        writeln!(output, "  {}", self.metadata.title).ok();
        writeln!(output, "{RULE}").ok();
        writeln!(output).ok();

        if self.rows.is_empty() {
            writeln!(output, "No results.").ok();
            return output;
        }

        for (task, representation, rows) in self.groups() {
            writeln!(output, "{} / {}", task.to_uppercase(), representation).ok();
            writeln!(output, "{THIN_RULE}").ok();
            if let Some(h) = self.highlight(task, representation) {
                writeln!(output, "  Best: {} ({})", h.model, format_score(h.mode, h.value)).ok();
            }
            let table = Table::new(rows.into_iter().map(RenderedRow::from)).to_string();
            writeln!(output, "{table}").ok();
            writeln!(output).ok();
        }

        for matrix in &self.rank_matrices {
            writeln!(output, "RANKS: {} ({})", matrix.task.to_uppercase(), matrix.mode).ok();
            writeln!(output, "{THIN_RULE}").ok();
            matrix.render(&mut output);
            writeln!(output).ok();
        }

        output
    }
}

fn format_score(mode: EvalMode, value: f64) -> String {
    match mode {
        EvalMode::Mae => format!("MAE {value:.4}"),
        EvalMode::R2 => format!("R² {value:.4}"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::metrics::MaeSummary;
    use crate::table::{ResultRow, ResultTable};

    fn mae_bundle() -> TaskResultBundle {
        let row = |model: &str, errors: &[f64]| ResultRow {
            model: model.to_string(),
            score: Score::Mae(MaeSummary::from_errors(errors)),
        };
        let ecfp = ResultTable::new(
            EvalMode::Mae,
            vec![row("KNN", &[2.0, 4.0]), row("Linear", &[1.0, 1.0]), row("Broken", &[f64::NAN])],
        )
        .unwrap();
        let maccs = ResultTable::new(EvalMode::Mae, vec![row("Broken", &[f64::NAN])]).unwrap();

        let mut bundle = TaskResultBundle::new("LogP", "logp", EvalMode::Mae, 2, 1);
        bundle.insert("ecfp", ecfp).unwrap();
        bundle.insert("maccs", maccs).unwrap();
        bundle
    }

    fn r2_bundle() -> TaskResultBundle {
        let table = ResultTable::new(
            EvalMode::R2,
            vec![
                ResultRow {
                    model: "Ridge".to_string(),
                    score: Score::R2 { r2: 0.5 },
                },
                ResultRow {
                    model: "SVM".to_string(),
                    score: Score::R2 { r2: 0.75 },
                },
            ],
        )
        .unwrap();
        let mut bundle = TaskResultBundle::new("TPSA", "tpsa", EvalMode::R2, 2, 1);
        bundle.insert("rdkit", table).unwrap();
        bundle
    }

    #[test]
    fn test_flatten_preserves_rank_order() {
        let rows = flatten(&[mae_bundle()]);
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].model, "Linear");
        assert_eq!(rows[0].rank, 1);
        assert_eq!(rows[0].mean_mae, Some(1.0));
        assert_eq!(rows[1].model, "KNN");
        assert_eq!(rows[1].std_mae, Some(1.0));
        assert_eq!(rows[2].mean_mae, None);
        assert_eq!(rows[3].representation, "maccs");
        assert!(rows.iter().all(|r| r.r2.is_none()));
    }

    #[test]
    fn test_flatten_r2_rows() {
        let rows = flatten(&[r2_bundle()]);
        assert_eq!(rows[0].model, "SVM");
        assert_eq!(rows[0].r2, Some(0.75));
        assert_eq!(rows[0].mode, EvalMode::R2);
        assert!(rows[0].mean_mae.is_none());
    }

    #[test]
    fn test_tied_scores_share_the_lowest_rank() {
        let row = |model: &str, errors: &[f64]| ResultRow {
            model: model.to_string(),
            score: Score::Mae(MaeSummary::from_errors(errors)),
        };
        let table = ResultTable::new(
            EvalMode::Mae,
            vec![
                row("Ridge", &[1.0]),
                row("Broken", &[f64::NAN]),
                row("Linear", &[0.5]),
                row("Lasso", &[1.0]),
                row("Stalled", &[f64::NAN]),
                row("KNN", &[2.0]),
            ],
        )
        .unwrap();
        assert_eq!(min_ranks(&table), vec![1, 2, 2, 4, 5, 5]);

        let mut bundle = TaskResultBundle::new("LogP", "logp", EvalMode::Mae, 1, 1);
        bundle.insert("ecfp", table).unwrap();
        let ranks: Vec<(String, usize)> = flatten(&[bundle]).into_iter().map(|r| (r.model, r.rank)).collect();
        assert_eq!(ranks[1], ("Ridge".to_string(), 2));
        assert_eq!(ranks[2], ("Lasso".to_string(), 2));
        assert_eq!(ranks[3], ("KNN".to_string(), 4));
    }

    #[test]
    fn test_r2_ties_rank_descending() {
        let row = |model: &str, r2: f64| ResultRow {
            model: model.to_string(),
            score: Score::R2 { r2 },
        };
        let table = ResultTable::new(
            EvalMode::R2,
            vec![row("Ridge", 0.5), row("SVM", 0.9), row("Lasso", 0.5), row("Broken", f64::NAN)],
        )
        .unwrap();
        assert_eq!(min_ranks(&table), vec![1, 2, 2, 4]);
    }

    #[test]
    fn test_rank_matrix_aligns_models_across_representations() {
        let matrix = RankMatrix::from_bundle(&mae_bundle());
        assert_eq!(matrix.task, "LogP");
        assert_eq!(matrix.models, vec!["Linear", "KNN", "Broken"]);
        assert_eq!(matrix.rows.len(), 2);
        assert_eq!(matrix.rows[0].ranks, vec![Some(1), Some(2), Some(3)]);
        assert_eq!(matrix.rows[1].representation, "maccs");
        assert_eq!(matrix.rows[1].ranks, vec![None, None, Some(1)]);
        assert_eq!(matrix.rank("ecfp", "KNN"), Some(2));
        assert_eq!(matrix.rank("maccs", "Linear"), None);
        assert_eq!(matrix.rank("rdkit", "Linear"), None);
    }

    #[test]
    fn test_rank_matrix_rendered() {
        let report = SummaryReport::new("Benchmark", &[mae_bundle()]);
        assert_eq!(report.rank_matrices.len(), 1);

        let markdown = report.to_markdown();
        assert!(markdown.contains("## Rank Matrix: LogP (mae)"));
        assert!(markdown.contains("| Representation | Linear | KNN | Broken |"));
        assert!(markdown.contains("| ECFP | 1 | 2 | 3 |"));
        assert!(markdown.contains("| MACCS | - | - | 1 |"));
        assert!(report.to_text().contains("RANKS: LOGP (mae)"));
    }

    #[test]
    fn test_best_skips_all_missing_tables() {
        let highlights = best_per_representation(&[mae_bundle(), r2_bundle()]);
        assert_eq!(highlights.len(), 2);
        assert_eq!(highlights[0].model, "Linear");
        assert_eq!(highlights[0].representation, "ecfp");
        assert_eq!(highlights[1].model, "SVM");
        assert_eq!(highlights[1].value, 0.75);
    }

    #[test]
    fn test_to_json_uses_null_for_missing() {
        let report = SummaryReport::new("Benchmark", &[mae_bundle()]);
        let json = report.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["metadata"]["bundles"], 1);
        assert!(value["rows"][2]["mean_mae"].is_null());
        assert_eq!(value["highlights"][0]["model"], "Linear");
    }

    #[test]
    fn test_to_markdown() {
        let report = SummaryReport::new("Benchmark", &[mae_bundle(), r2_bundle()]);
        let markdown = report.to_markdown();
        assert!(markdown.contains("# Benchmark"));
        assert!(markdown.contains("## Best Models"));
        assert!(markdown.contains("| LogP | ecfp | Linear | MAE 1.0000 |"));
        assert!(markdown.contains("## TPSA / rdkit"));
    }

    #[test]
    fn test_to_text() {
        let report = SummaryReport::new("Benchmark", &[r2_bundle()]);
        let text = report.to_text();
        assert!(text.contains("TPSA / rdkit"));
        assert!(text.contains("Best: SVM (R² 0.7500)"));
    }

    #[test]
    fn test_empty_report() {
        let report = SummaryReport::new("Empty", &[]);
        assert!(report.to_text().contains("No results."));
        assert!(report.highlights.is_empty());
    }
}
