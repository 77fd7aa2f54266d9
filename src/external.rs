//! External (LLM) predictors evaluated on the same splits as the panel.
//!
//! Predictors are shelled out to installed CLI tools; NO HTTP API calls.
//! Every response is appended to a plain-text log as it arrives, and the log
//! is parsed back later into numeric predictions. Unparsable responses
//! become NaN and lower the valid-sample count instead of aborting.

use crate::config::EvalMode;
use crate::dataset::{DataError, Dataset};
use crate::metrics::{absolute_error, pooled_r2, MaeSummary};
use crate::sampling::{check_capacity, draw_trial, SamplingError};
use crate::table::Score;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::LazyLock;
use thiserror::Error;

/// Separator line closing each response block
const SEPARATOR_WIDTH: usize = 50;

/// Marks a logged query failure; such responses never yield a prediction
const ERROR_PREFIX: &str = "Error:";

/// Instruction prompt; `{examples}` and `{query}` are substituted
pub const DEFAULT_PROMPT: &str = "You are an experienced chemist with expertise in molecular structures. \
Using only your knowledge and without employing any external tools or code, predict the property for the \
following molecules. Below are examples of molecules and known property value:\n\n{examples}\n\n\
Now, based on these examples, predict the property for the following molecule:\n\n{query}\n\n\
Please provide the predicted specific property value!";

static PLAIN_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(-?\d+\.?\d*)\s*$").expect("Invalid plain number regex"));

static ANCHORED_NUMBER: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        r"(?:approximately|around|roughly|about)\s*(-?\d+\.?\d*)",
        r"value.*?(-?\d+\.?\d*)",
        r"prediction.*?(-?\d+\.?\d*)",
    ]
    .map(|p| Regex::new(p).expect("Invalid anchored number regex"))
});

static ANY_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?\d+\.?\d*").expect("Invalid number regex"));

/// Errors that can occur while querying an external predictor
#[derive(Error, Debug)]
pub enum ExternalError {
    #[error("CLI tool not found: {0}")]
    ToolNotFound(String),

    #[error("CLI execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Invalid argument template: {0}")]
    InvalidTemplate(String),

    #[error("{0}")]
    Sampling(#[from] SamplingError),

    #[error("{0}")]
    Data(#[from] DataError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Anything that turns a query structure plus labelled examples into text
pub trait ExternalPredictor {
    /// Name used in logs, file names and result rows
    fn name(&self) -> &str;

    /// Predict the property of `query` given `(structure, value)` examples
    ///
    /// # Errors
    ///
    /// Returns an error if the predictor could not be queried.
    fn predict(&self, query: &str, examples: &[(String, f64)]) -> Result<String, ExternalError>;
}

/// `structure, value` lines with values rounded to 8 decimals
#[must_use]
pub fn format_examples(examples: &[(String, f64)]) -> String {
    examples
        .iter()
        .map(|(structure, value)| format!("{structure}, {}", (value * 1e8).round() / 1e8))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Substitute `{examples}` and `{query}` into a prompt template
#[must_use]
pub fn build_prompt(template: &str, query: &str, examples: &[(String, f64)]) -> String {
    template
        .replace("{examples}", &format_examples(examples))
        .replace("{query}", query)
}

/// Predictor backed by an installed CLI tool
///
/// `args_template` is split with shell quoting rules first; any argument
/// containing `{prompt}` then receives the full prompt, so the prompt itself
/// never needs escaping.
#[derive(Debug, Clone)]
pub struct CommandPredictor {
    name: String,
    command: String,
    args_template: String,
    prompt_template: String,
}

impl CommandPredictor {
    /// Create a predictor using the default prompt
    #[must_use]
    pub fn new(name: &str, command: &str, args_template: &str) -> Self {
        Self {
            name: name.to_string(),
            command: command.to_string(),
            args_template: args_template.to_string(),
            prompt_template: DEFAULT_PROMPT.to_string(),
        }
    }

    /// Replace the prompt template
    #[must_use]
    pub fn with_prompt(mut self, template: &str) -> Self {
        self.prompt_template = template.to_string();
        self
    }

    /// Check if the CLI tool is available
    #[must_use]
    pub fn is_available(&self) -> bool {
        Command::new("which")
            .arg(&self.command)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|s| s.success())
    }

    /// Arguments for one invocation
    ///
    /// # Errors
    ///
    /// Returns `InvalidTemplate` if the template has unbalanced quotes.
    pub fn arguments(&self, prompt: &str) -> Result<Vec<String>, ExternalError> {
        let args = shell_words::split(&self.args_template)
            .map_err(|e| ExternalError::InvalidTemplate(format!("{}: {e}", self.args_template)))?;
        Ok(args.into_iter().map(|a| a.replace("{prompt}", prompt)).collect())
    }
}

impl ExternalPredictor for CommandPredictor {
    fn name(&self) -> &str {
        &self.name
    }

    fn predict(&self, query: &str, examples: &[(String, f64)]) -> Result<String, ExternalError> {
        let prompt = build_prompt(&self.prompt_template, query, examples);
        let args = self.arguments(&prompt)?;

        let output = Command::new(&self.command)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => ExternalError::ToolNotFound(self.command.clone()),
                _ => ExternalError::IoError(e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExternalError::ExecutionFailed(format!(
                "{} exited with {}: {}",
                self.command,
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// One parsed response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExternalPrediction {
    /// Trial seed
    pub iteration: u64,
    /// Held-out structure
    pub structure: String,
    /// True property value
    pub true_value: f64,
    /// Raw response text, newlines folded to spaces
    pub response: String,
    /// Extracted number, NaN when none was found
    pub predicted: f64,
}

/// Extract the predicted value from free text
///
/// Tries, in order: the whole text being a number; a number after
/// "approximately", "around", "roughly" or "about"; after "value"; after
/// "prediction"; and finally the first number anywhere. Returns NaN when
/// nothing matches.
#[must_use]
pub fn extract_numeric_prediction(text: &str) -> f64 {
    let lower = text.to_lowercase();
    let captured = PLAIN_NUMBER
        .captures(&lower)
        .or_else(|| ANCHORED_NUMBER.iter().find_map(|re| re.captures(&lower)))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .or_else(|| ANY_NUMBER.find(text).map(|m| m.as_str()));

    captured
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(f64::NAN)
}

/// Query `predictor` on the held-out record of seeds `1..=n_trials`
///
/// Uses the same splits as the model panel. Each response block is written
/// and flushed to `log` as soon as it arrives; a failed query is logged as
/// `Error: ...` and parses to a missing value.
///
/// # Errors
///
/// Returns an error if the dataset is too small, lacks `target`, or the log
/// cannot be written.
pub fn run_external<W: Write>(
    predictor: &dyn ExternalPredictor,
    dataset: &Dataset,
    target: &str,
    n_trials: usize,
    train_size: usize,
    log: &mut W,
) -> Result<Vec<ExternalPrediction>, ExternalError> {
    check_capacity(dataset.len(), train_size)?;
    let mut predictions = Vec::with_capacity(n_trials);

    for seed in 1..=n_trials as u64 {
        let trial = draw_trial(dataset.len(), seed, train_size)?;
        let structure = dataset.structure(trial.held_out)?.to_string();
        let true_value = dataset.targets(target, &[trial.held_out])?[0];
        let examples = dataset.examples(target, &trial.training)?;

        let (response, predicted) = match predictor.predict(&structure, &examples) {
            Ok(text) => {
                tracing::debug!(predictor = predictor.name(), seed, "Prediction received");
                let folded = fold_lines(&text);
                let predicted = response_value(&folded);
                (text, predicted)
            }
            Err(e) => {
                tracing::warn!(predictor = predictor.name(), seed, error = %e, "Prediction failed");
                (format!("{ERROR_PREFIX} {e}"), f64::NAN)
            }
        };

        write_block(log, seed, &structure, true_value, &response)?;
        predictions.push(ExternalPrediction {
            iteration: seed,
            structure,
            true_value,
            predicted,
            response: fold_lines(&response),
        });
        tracing::info!(predictor = predictor.name(), target, seed, n_trials, "Processed iteration");
    }
    Ok(predictions)
}

fn write_block<W: Write>(
    log: &mut W,
    seed: u64,
    structure: &str,
    true_value: f64,
    response: &str,
) -> std::io::Result<()> {
    writeln!(log, "Iteration: {seed}")?;
    writeln!(log, "SMILES: {structure}")?;
    writeln!(log, "True Property: {true_value}")?;
    writeln!(log, "Predicted Property:")?;
    writeln!(log, "{response}")?;
    writeln!(log, "{}", "=".repeat(SEPARATOR_WIDTH))?;
    log.flush()
}

fn response_value(folded: &str) -> f64 {
    if folded.starts_with(ERROR_PREFIX) {
        f64::NAN
    } else {
        extract_numeric_prediction(folded)
    }
}

fn fold_lines(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse a response log back into predictions
///
/// Blocks missing the iteration, structure, true value or any response text
/// are skipped.
#[must_use]
pub fn parse_response_log(text: &str) -> Vec<ExternalPrediction> {
    let separator = "=".repeat(SEPARATOR_WIDTH);
    text.split(separator.as_str())
        .filter(|block| block.contains("Iteration:"))
        .filter_map(parse_block)
        .collect()
}

fn parse_block(block: &str) -> Option<ExternalPrediction> {
    let mut iteration = None;
    let mut structure = None;
    let mut true_value = None;
    let mut response: Vec<&str> = Vec::new();
    let mut in_prediction = false;

    for line in block.lines().map(str::trim) {
        if let Some(rest) = line.strip_prefix("Iteration:") {
            iteration = rest.trim().parse::<u64>().ok();
        } else if let Some(rest) = line.strip_prefix("SMILES:") {
            structure = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("True Property:") {
            true_value = rest.trim().parse::<f64>().ok();
        } else if line.starts_with("Predicted Property:") {
            in_prediction = true;
        } else if in_prediction && !line.is_empty() && !line.starts_with('=') {
            response.push(line);
        }
    }

    if response.is_empty() {
        return None;
    }
    let response = response.join(" ");
    Some(ExternalPrediction {
        iteration: iteration?,
        structure: structure?,
        true_value: true_value?,
        predicted: response_value(&response),
        response,
    })
}

/// Mean/std/median absolute error over parsed predictions, NaN entries dropped
#[must_use]
pub fn summarize_mae(predictions: &[ExternalPrediction]) -> MaeSummary {
    let errors: Vec<f64> = predictions
        .iter()
        .map(|p| absolute_error(p.true_value, p.predicted))
        .collect();
    MaeSummary::from_errors(&errors)
}

/// Pooled R² over parsed predictions, ordered by iteration
#[must_use]
pub fn summarize_r2(predictions: &[ExternalPrediction]) -> f64 {
    let mut ordered: Vec<&ExternalPrediction> = predictions.iter().collect();
    ordered.sort_by_key(|p| p.iteration);
    let truths: Vec<f64> = ordered.iter().map(|p| p.true_value).collect();
    let predicted: Vec<f64> = ordered.iter().map(|p| p.predicted).collect();
    pooled_r2(&truths, &predicted)
}

/// Score in the given mode, ready to merge into a result table
#[must_use]
pub fn summarize(predictions: &[ExternalPrediction], mode: EvalMode) -> Score {
    match mode {
        EvalMode::Mae => Score::Mae(summarize_mae(predictions)),
        EvalMode::R2 => Score::R2 {
            r2: summarize_r2(predictions),
        },
    }
}

/// Number of predictions with a usable numeric value
#[must_use]
pub fn valid_count(predictions: &[ExternalPrediction]) -> usize {
    predictions.iter().filter(|p| !p.predicted.is_nan()).count()
}
