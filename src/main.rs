//! Molecular property benchmark CLI

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use molprop_bench::{
    build_prompt, draw_trial, parse_response_log, run_external, summarize, summarize_mae, summarize_r2,
    valid_count, CommandPredictor, Dataset, EvalMode, ExperimentConfig, ExternalPredictor, ResultStore,
    StoreError, SummaryReport, TaskRunner, DEFAULT_PROMPT,
};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "molprop-bench")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Experiment configuration (YAML); built-in defaults when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the model panel over every task and representation
    Evaluate {
        /// Aggregation mode (mae or r2)
        #[arg(long)]
        mode: Option<EvalMode>,

        /// Target properties to evaluate (overrides config)
        #[arg(long, value_delimiter = ',')]
        tasks: Vec<String>,

        /// Representations to evaluate (overrides config)
        #[arg(long, value_delimiter = ',')]
        representations: Vec<String>,

        /// Number of trials (overrides config)
        #[arg(long)]
        trials: Option<usize>,

        /// Training molecules per trial (overrides config)
        #[arg(long)]
        train_size: Option<usize>,
    },

    /// Query an installed LLM CLI on the same splits and log its responses
    RunExternal {
        /// Predictor name used in file names and result rows
        #[arg(long)]
        name: String,

        /// CLI tool to execute
        #[arg(long)]
        command: String,

        /// Argument template; `{prompt}` is replaced by the prompt
        #[arg(long, default_value = "-p {prompt}", allow_hyphen_values = true)]
        args: String,

        /// Target property
        #[arg(long)]
        task: String,

        /// Prompt template file with `{examples}` and `{query}`
        #[arg(long)]
        prompt: Option<PathBuf>,

        /// Number of trials (overrides config)
        #[arg(long)]
        trials: Option<usize>,
    },

    /// Parse a response log and merge its scores into stored bundles
    Merge {
        /// Predictor name the rows are stored under
        #[arg(long)]
        name: String,

        /// Target property
        #[arg(long)]
        task: String,

        /// Response log (defaults to the configured response path)
        #[arg(long)]
        log: Option<PathBuf>,

        /// Only merge into this mode's bundle; both when omitted
        #[arg(long)]
        mode: Option<EvalMode>,
    },

    /// Render every stored bundle
    Report {
        /// Output format
        #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
        format: ReportFormat,

        /// Output file (stdout when omitted)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Print the first trial splits of a task
    Preview {
        /// Target property
        #[arg(long)]
        task: String,

        /// Number of trials to show
        #[arg(long, default_value = "3")]
        count: usize,

        /// Also print the prompt an external predictor would receive
        #[arg(long)]
        show_prompt: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ReportFormat {
    Text,
    Markdown,
    Json,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let fallback = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)))
        .init();

    let mut config = match &cli.config {
        Some(path) => ExperimentConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => ExperimentConfig::default(),
    };

    match cli.command {
        Commands::Evaluate {
            mode,
            tasks,
            representations,
            trials,
            train_size,
        } => {
            if let Some(mode) = mode {
                config.evaluation.mode = mode;
            }
            if !tasks.is_empty() {
                config.dataset.target_properties = tasks;
            }
            if !representations.is_empty() {
                config.dataset.representations = representations;
            }
            if let Some(trials) = trials {
                config.evaluation.n_trials = trials;
            }
            if let Some(train_size) = train_size {
                config.dataset.train_size = train_size;
            }
            config.validate()?;
            evaluate(&config)
        }
        Commands::RunExternal {
            name,
            command,
            args,
            task,
            prompt,
            trials,
        } => {
            if let Some(trials) = trials {
                config.evaluation.n_trials = trials;
            }
            let template = match prompt {
                Some(path) => std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read prompt {}", path.display()))?,
                None => DEFAULT_PROMPT.to_string(),
            };
            let predictor = CommandPredictor::new(&name, &command, &args).with_prompt(&template);
            external(&config, &predictor, &task)
        }
        Commands::Merge { name, task, log, mode } => merge(&config, &name, &task, log, mode),
        Commands::Report { format, output } => report(&config, format, output),
        Commands::Preview {
            task,
            count,
            show_prompt,
        } => preview(&config, &task, count, show_prompt),
    }
}

fn load_dataset(config: &ExperimentConfig) -> Result<Dataset> {
    let path = &config.dataset.path;
    let dataset =
        Dataset::from_jsonl(path).with_context(|| format!("Failed to load dataset {}", path.display()))?;
    tracing::info!(path = %path.display(), molecules = dataset.len(), "Dataset loaded");
    Ok(dataset)
}

fn evaluate(config: &ExperimentConfig) -> Result<()> {
    let dataset = load_dataset(config)?;
    let runner = TaskRunner::from_experiment(config);
    let store = ResultStore::new(config.output.clone());

    tracing::info!(
        mode = %config.evaluation.mode,
        trials = config.evaluation.n_trials,
        train_size = config.dataset.train_size,
        models = runner.panel().len(),
        "Starting evaluation"
    );
    let written = runner.run_all_tasks(&dataset, &store)?;
    for path in &written {
        println!("{}", path.display());
    }
    println!("{} task bundle(s) written to {}", written.len(), store.root().display());
    Ok(())
}

fn external(config: &ExperimentConfig, predictor: &CommandPredictor, task: &str) -> Result<()> {
    if !predictor.is_available() {
        bail!("CLI tool for predictor '{}' is not installed", predictor.name());
    }
    let dataset = load_dataset(config)?;
    let code = config.task_code(task);
    let path = config.output.response_path(predictor.name(), &code);
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let mut log = BufWriter::new(
        File::create(&path).with_context(|| format!("Failed to create {}", path.display()))?,
    );

    let predictions = run_external(
        predictor,
        &dataset,
        task,
        config.evaluation.n_trials,
        config.dataset.train_size,
        &mut log,
    )?;
    log.flush()?;

    let summary = summarize_mae(&predictions);
    println!("Responses: {}", path.display());
    println!(
        "Valid predictions: {}/{}",
        valid_count(&predictions),
        predictions.len()
    );
    println!("Mean MAE:   {:.4}", summary.mean_mae);
    println!("Std MAE:    {:.4}", summary.std_mae);
    println!("Median MAE: {:.4}", summary.median_mae);
    println!("R²:         {:.4}", summarize_r2(&predictions));
    Ok(())
}

fn merge(
    config: &ExperimentConfig,
    name: &str,
    task: &str,
    log: Option<PathBuf>,
    mode: Option<EvalMode>,
) -> Result<()> {
    let code = config.task_code(task);
    let path = log.unwrap_or_else(|| config.output.response_path(name, &code));
    let text =
        std::fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
    let predictions = parse_response_log(&text);
    tracing::info!(
        log = %path.display(),
        parsed = predictions.len(),
        valid = valid_count(&predictions),
        "Response log parsed"
    );

    let store = ResultStore::new(config.output.clone());
    let modes = mode.map_or_else(|| vec![EvalMode::Mae, EvalMode::R2], |m| vec![m]);
    let mut merged = 0;
    for mode in modes {
        let mut bundle = match store.load(&code, mode) {
            Ok(bundle) => bundle,
            Err(StoreError::NotFound(p)) => {
                tracing::warn!(path = %p.display(), %mode, "No stored bundle; skipping");
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        bundle.merge_external(&[(name.to_string(), summarize(&predictions, mode))])?;
        let written = store.save(&bundle)?;
        println!("Merged {name} into {}", written.display());
        merged += 1;
    }
    if merged == 0 {
        bail!("No stored bundle for task '{task}' ({code})");
    }
    Ok(())
}

fn report(config: &ExperimentConfig, format: ReportFormat, output: Option<PathBuf>) -> Result<()> {
    let store = ResultStore::new(config.output.clone());
    let bundles = store.load_all()?;
    let report = SummaryReport::new("Molecular Property Benchmark", &bundles);
    let rendered = match format {
        ReportFormat::Text => report.to_text(),
        ReportFormat::Markdown => report.to_markdown(),
        ReportFormat::Json => report.to_json()?,
    };
    match output {
        Some(path) => {
            std::fs::write(&path, rendered).with_context(|| format!("Failed to write {}", path.display()))?;
            tracing::info!(path = %path.display(), bundles = bundles.len(), "Report written");
        }
        None => print!("{rendered}"),
    }
    Ok(())
}

fn preview(config: &ExperimentConfig, task: &str, count: usize, show_prompt: bool) -> Result<()> {
    let dataset = load_dataset(config)?;
    let train_size = config.dataset.train_size;
    for seed in 1..=count as u64 {
        let trial = draw_trial(dataset.len(), seed, train_size)?;
        let query = dataset.structure(trial.held_out)?;
        let truth = dataset.targets(task, &[trial.held_out])?[0];
        println!("Iteration {seed}: held out #{} {query} ({task} = {truth})", trial.held_out);
        println!("  training: {:?}", trial.training);
        if show_prompt {
            let examples = dataset.examples(task, &trial.training)?;
            println!("{}", build_prompt(DEFAULT_PROMPT, query, &examples));
        }
        println!();
    }
    Ok(())
}
