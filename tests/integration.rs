//! Integration tests for the molprop-bench CLI and library.
//!
//! These tests verify end-to-end functionality including:
//! - The resampling protocol feeds the panel, baselines and external
//!   predictors identical splits
//! - Both aggregation modes rank models as expected
//! - External results merge into stored bundles
//! - CLI commands work against a temporary workspace

#![allow(clippy::unwrap_used)]
#![allow(clippy::float_cmp)]
#![allow(clippy::cast_precision_loss)]

use molprop_bench::{
    draw_trial, parse_response_log, pooled_r2, run_external, run_mae, run_r2, summarize, summarize_mae, Dataset,
    EvalMode, ExperimentConfig, ExternalError, ExternalPredictor, FitError, ModelKind, ModelPanel,
    MoleculeRecord, Regressor, ResultStore, RunnerConfig, RunnerError, Score, SummaryReport, TaskRunner, LAST_VALUE_BASELINE,
    MEAN_BASELINE, RANDOM_BASELINE,
};
use ndarray::{Array1, ArrayView1, ArrayView2};
use std::collections::{BTreeMap, HashMap};
use std::process::Command;
use tempfile::TempDir;

// ============================================================================
// Fixtures
// ============================================================================

/// Four features with a noiseless linear target
fn features(i: usize) -> Vec<f64> {
    vec![
        (i % 7) as f64,
        ((i * 3) % 11) as f64,
        ((i * i) % 13) as f64,
        (i % 5) as f64 * 0.5,
    ]
}

fn linear_target(x: &[f64]) -> f64 {
    2.0 * x[0] - x[1] + 0.5 * x[2] + 3.0 * x[3] + 1.0
}

fn records(n: usize) -> Vec<MoleculeRecord> {
    (0..n)
        .map(|i| {
            let x = features(i);
            MoleculeRecord {
                id: format!("mol-{i}"),
                smiles: format!("C{}O", "C".repeat(i % 9)) + &format!("N{i}"),
                targets: BTreeMap::from([("LogP".to_string(), linear_target(&x))]),
                representations: BTreeMap::from([("desc".to_string(), x)]),
            }
        })
        .collect()
}

fn dataset(n: usize) -> Dataset {
    Dataset::from_records(records(n)).unwrap()
}

fn small_panel() -> ModelPanel {
    let mut panel = ModelPanel::empty(42);
    panel
        .register("Linear", ModelKind::Linear)
        .register("Ridge", ModelKind::Ridge { alpha: 1.0 })
        .register("KNN", ModelKind::Knn { k: 5 });
    panel
}

struct AlwaysFails;

impl Regressor for AlwaysFails {
    fn fit(&mut self, _: ArrayView2<'_, f64>, _: ArrayView1<'_, f64>) -> Result<(), FitError> {
        Err(FitError::Failed("solver diverged".to_string()))
    }

    fn predict(&self, _: ArrayView2<'_, f64>) -> Result<Array1<f64>, FitError> {
        Err(FitError::NotFitted)
    }
}

fn always_fails() -> Box<dyn Regressor> {
    Box::new(AlwaysFails)
}

fn write_jsonl(dir: &TempDir, records: &[MoleculeRecord]) -> std::path::PathBuf {
    let path = dir.path().join("dataset.jsonl");
    let lines: Vec<String> = records
        .iter()
        .map(|r| serde_json::to_string(r).unwrap())
        .collect();
    std::fs::write(&path, lines.join("\n") + "\n").unwrap();
    path
}

// ============================================================================
// MAE mode
// ============================================================================

#[test]
fn test_linear_beats_mean_baseline() {
    let table = run_mae(&dataset(60), "desc", "LogP", 5, 50, &small_panel()).unwrap();

    let mae = |name: &str| match table.get(name).unwrap() {
        Score::Mae(s) => s.mean_mae,
        Score::R2 { .. } => unreachable!(),
    };
    assert!(mae("Linear") < mae(MEAN_BASELINE));
    assert!(mae("Linear") < 1e-2);
    assert_eq!(table.len(), 6);
    assert_eq!(table.rows()[0].model, "Linear");
}

#[test]
fn test_failed_model_is_missing_not_zero() {
    let mut panel = small_panel();
    panel.register("Broken", ModelKind::Custom(always_fails));

    let table = run_mae(&dataset(60), "desc", "LogP", 4, 50, &panel).unwrap();
    match table.get("Broken").unwrap() {
        Score::Mae(s) => assert!(s.is_missing()),
        Score::R2 { .. } => unreachable!(),
    }
    assert_eq!(table.rows().last().unwrap().model, "Broken");
    for name in ["Linear", "Ridge", "KNN", MEAN_BASELINE, RANDOM_BASELINE, LAST_VALUE_BASELINE] {
        match table.get(name).unwrap() {
            Score::Mae(s) => assert!(!s.is_missing(), "{name} should have a score"),
            Score::R2 { .. } => unreachable!(),
        }
    }
}

fn mae_of(score: &Score) -> f64 {
    match score {
        Score::Mae(s) => s.mean_mae,
        Score::R2 { .. } => unreachable!(),
    }
}

/// Six-bit fingerprints with a target that depends on three of the bits
fn bit_records(n: usize) -> Vec<MoleculeRecord> {
    (0..n)
        .map(|i| {
            let bits: Vec<f64> = (0..6).map(|b| ((i >> b) & 1) as f64).collect();
            let target = 1.5 * bits[0] - 2.0 * bits[2] + bits[5] + 0.25;
            MoleculeRecord {
                id: format!("bits-{i}"),
                smiles: format!("C{}N", "C".repeat(i)),
                targets: BTreeMap::from([("LogP".to_string(), target)]),
                representations: BTreeMap::from([("ecfp".to_string(), bits)]),
            }
        })
        .collect()
}

#[test]
fn test_standard_panel_fills_every_row() {
    let panel = ModelPanel::standard(&[vec![8]], 42);
    let table = run_mae(&dataset(60), "desc", "LogP", 5, 50, &panel).unwrap();

    assert_eq!(table.len(), panel.len() + 3);
    for row in table.rows() {
        assert!(!mae_of(&row.score).is_nan(), "{} has no score", row.model);
    }
    assert!(mae_of(table.get("Linear").unwrap()) < mae_of(table.get(MEAN_BASELINE).unwrap()));
}

#[test]
fn test_standard_panel_on_tiny_binary_training_sets() {
    let data = Dataset::from_records(bit_records(12)).unwrap();
    let panel = ModelPanel::standard(&[vec![8]], 42);
    let table = run_mae(&data, "ecfp", "LogP", 5, 3, &panel).unwrap();

    assert_eq!(table.len(), panel.len() + 3);
    assert!(mae_of(table.get("KNN").unwrap()).is_nan(), "k = 5 exceeds three training rows");
    assert_eq!(table.rows().last().unwrap().model, "KNN");
    for row in table.rows().iter().filter(|r| r.model != "KNN") {
        assert!(!mae_of(&row.score).is_nan(), "{} has no score", row.model);
    }
}

#[test]
fn test_rankings_are_reproducible() {
    let data = dataset(60);
    let a = run_mae(&data, "desc", "LogP", 3, 50, &small_panel()).unwrap();
    let b = run_mae(&data, "desc", "LogP", 3, 50, &small_panel()).unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_insufficient_data_is_fatal() {
    let err = run_mae(&dataset(30), "desc", "LogP", 5, 50, &small_panel()).unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(err, RunnerError::Eval(_)));
}

#[test]
fn test_missing_representation_is_not_fatal() {
    let err = run_mae(&dataset(60), "ecfp", "LogP", 2, 50, &small_panel()).unwrap_err();
    assert!(!err.is_fatal());
}

// ============================================================================
// R² mode
// ============================================================================

#[test]
fn test_pooled_r2_ranks_exact_fit_first() {
    let table = run_r2(&dataset(60), "desc", "LogP", 8, 50, &small_panel()).unwrap();
    let best = table.best().unwrap();
    assert_eq!(best.model, "Linear");
    assert!(best.score.key() > 0.9999);
    assert!(table.get(MEAN_BASELINE).unwrap().key() < best.score.key());
}

#[test]
fn test_pooled_r2_reference_values() {
    assert_eq!(pooled_r2(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]), 1.0);
    assert!(pooled_r2(&[1.0, 2.0, 3.0], &[3.0, 2.0, 1.0]) < 0.0);
    assert!(pooled_r2(&[1.0], &[1.0]).is_nan());
}

// ============================================================================
// External predictors and merge
// ============================================================================

/// Answers with the true value looked up by structure
struct Oracle(HashMap<String, f64>);

impl ExternalPredictor for Oracle {
    fn name(&self) -> &str {
        "Oracle"
    }

    fn predict(&self, query: &str, examples: &[(String, f64)]) -> Result<String, ExternalError> {
        assert_eq!(examples.len(), 50);
        let value = self.0[query];
        Ok(format!("Based on {} examples, the value is approximately {value}", examples.len()))
    }
}

fn oracle(records: &[MoleculeRecord]) -> Oracle {
    Oracle(
        records
            .iter()
            .map(|r| (r.smiles.clone(), r.targets["LogP"]))
            .collect(),
    )
}

#[test]
fn test_external_perfect_predictor_has_zero_error() {
    let recs = records(60);
    let data = Dataset::from_records(recs.clone()).unwrap();
    let mut log = Vec::new();

    let predictions = run_external(&oracle(&recs), &data, "LogP", 10, 50, &mut log).unwrap();
    let parsed = parse_response_log(&String::from_utf8(log).unwrap());
    assert_eq!(parsed.len(), 10);

    let summary = summarize_mae(&parsed);
    assert_eq!(summary.mean_mae, 0.0);
    assert_eq!(summary.std_mae, 0.0);
    assert_eq!(summary.median_mae, 0.0);
    assert_eq!(summarize_mae(&predictions), summary);

    for p in &parsed {
        let trial = draw_trial(60, p.iteration, 50).unwrap();
        assert_eq!(p.structure, recs[trial.held_out].smiles);
    }
}

#[test]
fn test_merge_external_into_stored_bundle() {
    let dir = TempDir::new().unwrap();
    let mut config = ExperimentConfig::default();
    config.output.results_dir = dir.path().join("Results");
    config.dataset.target_properties = vec!["LogP".to_string()];
    config.dataset.representations = vec!["desc".to_string(), "ecfp".to_string()];
    config.evaluation.n_trials = 3;

    let recs = records(60);
    let data = Dataset::from_records(recs.clone()).unwrap();
    let runner = TaskRunner::new(RunnerConfig::from(&config), small_panel());
    let store = ResultStore::new(config.output.clone());
    let written = runner.run_all_tasks(&data, &store).unwrap();
    assert_eq!(written.len(), 1);

    let mut log = Vec::new();
    let predictions = run_external(&oracle(&recs), &data, "LogP", 3, 50, &mut log).unwrap();
    let rows = vec![("Oracle".to_string(), summarize(&predictions, EvalMode::Mae))];

    let mut bundle = store.load("logp", EvalMode::Mae).unwrap();
    assert_eq!(bundle.tables.len(), 1, "absent representation is skipped");
    bundle.merge_external(&rows).unwrap();
    let once = bundle.clone();
    bundle.merge_external(&rows).unwrap();
    assert_eq!(bundle, once);

    let table = &bundle.tables["desc"];
    assert_eq!(table.len(), 7);
    assert_eq!(table.get("Oracle").unwrap().key(), 0.0);
    assert!(bundle.merge_external(&[("Oracle".to_string(), Score::R2 { r2: 1.0 })]).is_err());

    store.save(&bundle).unwrap();
    let report = SummaryReport::new("Benchmark", &store.load_all().unwrap());
    assert!(report.to_markdown().contains("Oracle"));
}

// ============================================================================
// Dataset loading
// ============================================================================

#[test]
fn test_jsonl_dataset_round_trip() {
    let dir = TempDir::new().unwrap();
    let recs = records(12);
    let path = write_jsonl(&dir, &recs);

    let data = Dataset::from_jsonl(&path).unwrap();
    assert_eq!(data.len(), 12);
    assert_eq!(data.dimension("desc"), Some(4));
    assert!(data.has_target("LogP"));
    assert_eq!(data.structure(3).unwrap(), recs[3].smiles);
}

#[test]
fn test_jsonl_rejects_ragged_vectors() {
    let dir = TempDir::new().unwrap();
    let mut recs = records(5);
    recs[2].representations.insert("desc".to_string(), vec![1.0]);
    let path = write_jsonl(&dir, &recs);
    assert!(Dataset::from_jsonl(&path).is_err());
}

// ============================================================================
// CLI Integration Tests
// ============================================================================

fn cli() -> Command {
    Command::new(env!("CARGO_BIN_EXE_molprop-bench"))
}

fn workspace(n: usize) -> (TempDir, std::path::PathBuf) {
    let dir = TempDir::new().unwrap();
    let data = write_jsonl(&dir, &records(n));
    let config = format!(
        "dataset:\n  path: {}\n  target_properties: [LogP]\n  representations: [desc]\n  train_size: 10\n\
evaluation:\n  n_trials: 2\n  mode: mae\n\
models:\n  mlp_architectures: [[4]]\n\
output:\n  results_dir: {}\n",
        data.display(),
        dir.path().join("Results").display()
    );
    let config_path = dir.path().join("experiment.yaml");
    std::fs::write(&config_path, config).unwrap();
    (dir, config_path)
}

#[test]
fn test_cli_help_command() {
    let output = cli().arg("--help").output().expect("Failed to execute CLI");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success());
    for command in ["evaluate", "run-external", "merge", "report", "preview"] {
        assert!(stdout.contains(command), "Help should list {command}");
    }
}

#[test]
fn test_cli_preview() {
    let (_dir, config) = workspace(20);
    let output = cli()
        .args(["--config", config.to_str().unwrap(), "preview", "--task", "LogP", "--count", "2", "--show-prompt"])
        .output()
        .expect("Failed to execute CLI");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(stdout.contains("Iteration 1:"));
    assert!(stdout.contains("Iteration 2:"));
    assert!(stdout.contains("Now, based on these examples"));
}

#[test]
fn test_cli_evaluate_then_report() {
    let (dir, config) = workspace(20);
    let config = config.to_str().unwrap();

    let evaluate = cli()
        .args(["--config", config, "evaluate"])
        .output()
        .expect("Failed to execute CLI");
    assert!(evaluate.status.success(), "{}", String::from_utf8_lossy(&evaluate.stderr));
    assert!(dir.path().join("Results").join("results_dict_logp.json").exists());

    let report = cli()
        .args(["--config", config, "report", "--format", "json"])
        .output()
        .expect("Failed to execute CLI");
    assert!(report.status.success());
    let value: serde_json::Value = serde_json::from_slice(&report.stdout).unwrap();
    assert_eq!(value["metadata"]["bundles"], 1);
    assert!(value["rows"].as_array().unwrap().len() >= 17);
}

#[test]
fn test_cli_evaluate_rejects_too_few_molecules() {
    let (_dir, config) = workspace(8);
    let output = cli()
        .args(["--config", config.to_str().unwrap(), "evaluate"])
        .output()
        .expect("Failed to execute CLI");
    assert!(!output.status.success());
}
