//! Demo: molprop-bench library in action
use molprop_bench::{
    external::{run_external, summarize, valid_count, ExternalError, ExternalPredictor},
    models::{ModelKind, ModelPanel},
    report::SummaryReport,
    runner::{run_mae, run_r2},
    table::TaskResultBundle,
    Dataset, EvalMode, MoleculeRecord,
};
use std::collections::BTreeMap;

/// Pretends to be an LLM: answers with the mean of its examples, in prose
struct MeanGuesser;

impl ExternalPredictor for MeanGuesser {
    fn name(&self) -> &str {
        "MeanGuesser"
    }

    #[allow(clippy::cast_precision_loss)]
    fn predict(&self, query: &str, examples: &[(String, f64)]) -> Result<String, ExternalError> {
        if query.len() % 11 == 0 {
            return Ok("I cannot determine this without tools.".to_string());
        }
        let mean = examples.iter().map(|(_, v)| v).sum::<f64>() / examples.len() as f64;
        Ok(format!("For {query}, the value is approximately {mean:.3}"))
    }
}

#[allow(clippy::cast_precision_loss)]
fn synthetic(n: usize) -> Vec<MoleculeRecord> {
    (0..n)
        .map(|i| {
            let carbons = 1 + i % 12;
            let rings = (i / 12) % 3;
            let hetero = (i * 7) % 5;
            let x = vec![carbons as f64, rings as f64, hetero as f64, ((i * 13) % 17) as f64 / 17.0];
            let logp = 0.5 * carbons as f64 - 0.7 * hetero as f64 + 0.3 * rings as f64 + 0.2 * x[3];
            MoleculeRecord {
                id: format!("demo-{i}"),
                smiles: format!("{}{}{}", "C".repeat(carbons), "c1ccccc1".repeat(rings), "O".repeat(hetero)),
                targets: BTreeMap::from([("LogP".to_string(), logp)]),
                representations: BTreeMap::from([("descriptors".to_string(), x)]),
            }
        })
        .collect()
}

fn main() -> anyhow::Result<()> {
    println!("=== Molprop Bench Demo ===\n");

    // 1. A small featurized dataset
    let dataset = Dataset::from_records(synthetic(80))?;
    println!("Dataset: {} molecules, descriptor width {:?}\n", dataset.len(), dataset.dimension("descriptors"));

    // 2. A compact panel
    let mut panel = ModelPanel::empty(42);
    panel
        .register("Linear", ModelKind::Linear)
        .register("Ridge", ModelKind::Ridge { alpha: 1.0 })
        .register("KNN", ModelKind::Knn { k: 5 })
        .register(
            "GradientBoosting",
            ModelKind::GradientBoosting {
                n_estimators: 50,
                learning_rate: 0.1,
                max_depth: 3,
            },
        );

    // 3. Both aggregation modes over identical splits
    let n_trials = 20;
    let train_size = 50;
    let mae = run_mae(&dataset, "descriptors", "LogP", n_trials, train_size, &panel)?;
    let r2 = run_r2(&dataset, "descriptors", "LogP", n_trials, train_size, &panel)?;

    // 4. An external predictor on the same splits
    let mut log = Vec::new();
    let predictions = run_external(&MeanGuesser, &dataset, "LogP", n_trials, train_size, &mut log)?;
    println!(
        "External predictor: {}/{} parsable responses\n",
        valid_count(&predictions),
        predictions.len()
    );

    let mut mae_bundle = TaskResultBundle::new("LogP", "logp", EvalMode::Mae, n_trials, train_size);
    mae_bundle.insert("descriptors", mae)?;
    mae_bundle.merge_external(&[("MeanGuesser".to_string(), summarize(&predictions, EvalMode::Mae))])?;

    let mut r2_bundle = TaskResultBundle::new("LogP", "logp", EvalMode::R2, n_trials, train_size);
    r2_bundle.insert("descriptors", r2)?;
    r2_bundle.merge_external(&[("MeanGuesser".to_string(), summarize(&predictions, EvalMode::R2))])?;

    // 5. Report
    let report = SummaryReport::new("Demo Benchmark", &[mae_bundle, r2_bundle]);
    println!("{}", report.to_text());

    Ok(())
}
