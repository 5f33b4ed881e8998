//! Evaluation modes and run orchestration.
//!
//! Both modes walk their input table in order, make one blocking backend
//! call at a time, and stop at the first backend error. Results accumulate
//! in memory and are written once the pass completes.

use crate::config::{ConfigError, Credentials, Settings};
use crate::model::{LanguageModel, ModelError, ModelKind};
use crate::remote::RemoteBackend;
use crate::results::{OutputLayout, ResultsError, SentenceStream};
use crate::stimuli::{self, MinimalPairRow, PairCondition, Stimulus, StimulusError};
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Placeholder substituted by [`PromptTemplate::fill`]
pub const SENTENCE_PLACEHOLDER: &str = "[SENTENCE]";

/// Default judgment prompt
pub const DEFAULT_PROMPT: &str = "Is the following sentence grammatically correct in English? [SENTENCE] Respond with C if it is correct, and N if it is not correct.";

/// Rows between progress log lines
const PROGRESS_EVERY: usize = 50;

/// Errors that abort an evaluation run
#[derive(Error, Debug)]
pub enum EvalError {
    #[error(transparent)]
    Stimulus(#[from] StimulusError),

    #[error("Backend error at row {row}: {source}")]
    Model {
        row: usize,
        #[source]
        source: ModelError,
    },

    #[error(transparent)]
    Backend(#[from] ModelError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Results(#[from] ResultsError),
}

/// Which evaluation to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalMode {
    /// Compare surprisal of grammatical and ungrammatical sentences
    MinimalPairs,
    /// Ask the model for a C/N judgment
    Prompting,
}

impl EvalMode {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MinimalPairs => "minimal_pairs",
            Self::Prompting => "prompting",
        }
    }
}

impl std::str::FromStr for EvalMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "minimal_pairs" | "minimal-pairs" => Ok(Self::MinimalPairs),
            "prompting" => Ok(Self::Prompting),
            other => Err(format!(
                "unknown eval mode: {other} (expected minimal_pairs or prompting)"
            )),
        }
    }
}

/// Judgment prompt with exactly one sentence placeholder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    template: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            template: DEFAULT_PROMPT.to_string(),
        }
    }
}

impl PromptTemplate {
    /// Validate a custom template
    ///
    /// # Errors
    ///
    /// Returns `InvalidTemplate` unless the placeholder occurs exactly once.
    pub fn new(template: &str) -> Result<Self, ConfigError> {
        let count = template.matches(SENTENCE_PLACEHOLDER).count();
        if count != 1 {
            return Err(ConfigError::InvalidTemplate(format!(
                "expected exactly one {SENTENCE_PLACEHOLDER}, found {count}"
            )));
        }
        Ok(Self {
            template: template.to_string(),
        })
    }

    /// Substitute `sentence`, quoted and terminated with a period
    #[must_use]
    pub fn fill(&self, sentence: &str) -> String {
        self.template
            .replace(SENTENCE_PLACEHOLDER, &format!("\"{sentence}.\""))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.template
    }
}

/// Minimal-pair row with the two sentence totals filled in
#[derive(Debug, Clone, PartialEq, Serialize, serde::Deserialize)]
pub struct SentenceSurprisalRow {
    pub phenomenon: String,
    pub test_item: String,
    pub original_condition: String,
    pub sentence_grammatical: Option<String>,
    pub sentence_ungrammatical: Option<String>,
    pub sum_surprisal_grammatical: Option<f64>,
    pub sum_surprisal_ungrammatical: Option<f64>,
}

impl SentenceSurprisalRow {
    pub const HEADERS: [&'static str; 7] = [
        "phenomenon",
        "test_item",
        "original_condition",
        "sentence_grammatical",
        "sentence_ungrammatical",
        "sum_surprisal_grammatical",
        "sum_surprisal_ungrammatical",
    ];

    fn from_input(row: &MinimalPairRow) -> Self {
        Self {
            phenomenon: row.phenomenon.clone(),
            test_item: row.test_item.clone(),
            original_condition: row.original_condition.clone(),
            sentence_grammatical: row.sentence_grammatical.clone(),
            sentence_ungrammatical: row.sentence_ungrammatical.clone(),
            sum_surprisal_grammatical: None,
            sum_surprisal_ungrammatical: None,
        }
    }

    fn set_sum(&mut self, condition: PairCondition, value: Option<f64>) {
        match condition {
            PairCondition::Grammatical => self.sum_surprisal_grammatical = value,
            PairCondition::Ungrammatical => self.sum_surprisal_ungrammatical = value,
        }
    }
}

/// One scored token, denormalized with its row's metadata
#[derive(Debug, Clone, PartialEq, Serialize, serde::Deserialize)]
pub struct TokenSurprisalRow {
    pub token: String,
    pub surprisal: f64,
    pub token_id: usize,
    pub model: String,
    pub condition: String,
    pub phenomenon: String,
    pub test_item: String,
    pub original_condition: String,
}

impl TokenSurprisalRow {
    pub const HEADERS: [&'static str; 8] = [
        "token",
        "surprisal",
        "token_id",
        "model",
        "condition",
        "phenomenon",
        "test_item",
        "original_condition",
    ];
}

/// Prompted judgment for one stimulus
#[derive(Debug, Clone, PartialEq, Eq, Serialize, serde::Deserialize)]
pub struct PromptRecord {
    pub phenomenon: String,
    pub test_item: String,
    pub condition: String,
    pub sentence: String,
    pub prompt: String,
    pub response: String,
}

impl PromptRecord {
    pub const HEADERS: [&'static str; 6] = [
        "phenomenon",
        "test_item",
        "condition",
        "sentence",
        "prompt",
        "response",
    ];
}

/// Both tables produced by minimal-pair mode
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MinimalPairOutput {
    /// One row per input pair, input order
    pub sentences: Vec<SentenceSurprisalRow>,
    /// One row per scored token, grammatical side first within a pair
    pub tokens: Vec<TokenSurprisalRow>,
}

/// Score every minimal pair.
///
/// `on_row` sees each sentence-level row as soon as both sides are scored.
///
/// # Errors
///
/// Returns the first backend error (tagged with its row) or any error raised
/// by `on_row`.
pub fn evaluate_minimal_pairs<M, F>(
    model: &M,
    rows: &[MinimalPairRow],
    mut on_row: F,
) -> Result<MinimalPairOutput, EvalError>
where
    M: LanguageModel + ?Sized,
    F: FnMut(&SentenceSurprisalRow) -> Result<(), EvalError>,
{
    let mut output = MinimalPairOutput {
        sentences: Vec::with_capacity(rows.len()),
        tokens: Vec::new(),
    };

    tracing::info!(model = %model.model_id(), rows = rows.len(), "Evaluating minimal pairs");

    for (idx, row) in rows.iter().enumerate() {
        let mut out_row = SentenceSurprisalRow::from_input(row);

        for condition in PairCondition::ALL {
            let Some(sentence) = row.sentence(condition) else {
                out_row.set_sum(condition, None);
                continue;
            };

            let scored = model
                .sentence_surprisal(sentence)
                .map_err(|source| EvalError::Model { row: idx + 1, source })?;
            let (total, tokens) = scored.into_parts();
            out_row.set_sum(condition, Some(total));

            output.tokens.extend(tokens.into_iter().map(|t| TokenSurprisalRow {
                token: t.token,
                surprisal: t.surprisal,
                token_id: t.token_id,
                model: model.model_id().to_string(),
                condition: condition.as_str().to_string(),
                phenomenon: row.phenomenon.clone(),
                test_item: row.test_item.clone(),
                original_condition: row.original_condition.clone(),
            }));
        }

        if row.sentence_grammatical.is_none() && row.sentence_ungrammatical.is_none() {
            tracing::debug!(row = idx + 1, test_item = %row.test_item, "Row has no sentences");
        }

        on_row(&out_row)?;
        output.sentences.push(out_row);
        log_progress(idx + 1, rows.len());
    }

    tracing::info!(
        rows = output.sentences.len(),
        tokens = output.tokens.len(),
        "Minimal-pair evaluation complete"
    );
    Ok(output)
}

/// Ask the model for a judgment on every stimulus.
///
/// # Errors
///
/// Returns the first backend error, tagged with its row.
pub fn evaluate_prompts<M>(
    model: &M,
    stimuli: &[Stimulus],
    template: &PromptTemplate,
) -> Result<Vec<PromptRecord>, EvalError>
where
    M: LanguageModel + ?Sized,
{
    tracing::info!(model = %model.model_id(), rows = stimuli.len(), "Evaluating prompts");

    let mut records = Vec::with_capacity(stimuli.len());
    for (idx, stimulus) in stimuli.iter().enumerate() {
        let prompt = template.fill(&stimulus.sentence);
        let response = model
            .generate(&prompt)
            .map_err(|source| EvalError::Model { row: idx + 1, source })?;

        tracing::debug!(row = idx + 1, response = %response, "Judgment received");

        records.push(PromptRecord {
            phenomenon: stimulus.phenomenon.clone(),
            test_item: stimulus.test_item.clone(),
            condition: stimulus.condition.clone(),
            sentence: stimulus.sentence.clone(),
            prompt,
            response,
        });
        log_progress(idx + 1, stimuli.len());
    }

    Ok(records)
}

fn log_progress(done: usize, total: usize) {
    if done % PROGRESS_EVERY == 0 && done < total {
        tracing::info!(done, total, "Progress");
    }
}

/// Build the backend for `kind`, loading weights or credentials once.
///
/// # Errors
///
/// Returns an error if credentials are missing, the model cannot be loaded,
/// or the local backend was not compiled in.
pub fn load_model(
    kind: ModelKind,
    model_id: &str,
    settings: &Settings,
) -> Result<Box<dyn LanguageModel>, EvalError> {
    tracing::info!(model = %model_id, kind = kind.as_str(), "Initializing model");
    match kind {
        ModelKind::Remote => {
            let credentials = Credentials::resolve(&settings.remote.credentials)?;
            let backend = RemoteBackend::new(
                model_id,
                &credentials,
                &settings.remote,
                settings.surprisal_unit,
            )?;
            Ok(Box::new(backend))
        }
        ModelKind::Local => load_local(model_id, settings),
    }
}

#[cfg(feature = "local-inference")]
fn load_local(model_id: &str, settings: &Settings) -> Result<Box<dyn LanguageModel>, EvalError> {
    let runtime = crate::candle_runtime::CandleRuntime::load(model_id, &settings.local)?;
    Ok(Box::new(crate::local::LocalBackend::new(
        model_id,
        runtime,
        settings.surprisal_unit,
    )))
}

#[cfg(not(feature = "local-inference"))]
fn load_local(_model_id: &str, _settings: &Settings) -> Result<Box<dyn LanguageModel>, EvalError> {
    Err(ModelError::FeatureNotEnabled("local").into())
}

/// Everything needed for one evaluation run
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Stimuli CSV (minimal pairs or canonical stimuli, depending on mode)
    pub input: PathBuf,
    /// Root directory for all outputs
    pub output_root: PathBuf,
    pub model_id: String,
    pub mode: EvalMode,
    pub settings: Settings,
}

/// Files written by a completed run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub rows: usize,
    pub written: Vec<PathBuf>,
}

/// Read the input, evaluate it with `model`, and write the output tables.
///
/// # Errors
///
/// Returns an error if input is malformed, any backend call fails, or an
/// output file cannot be written. No final table is written on error.
pub fn run<M: LanguageModel + ?Sized>(config: &RunConfig, model: &M) -> Result<RunSummary, EvalError> {
    let layout = OutputLayout::new(&config.output_root, &config.model_id);
    tracing::info!(input = %config.input.display(), mode = config.mode.as_str(), "Reading stimuli");

    match config.mode {
        EvalMode::MinimalPairs => {
            let rows = stimuli::load_minimal_pairs(&config.input)?;
            let sentence_path = layout.sentence_surprisals();
            let token_path = layout.token_surprisals();

            let mut stream = SentenceStream::create(&sentence_path)?;
            let output = evaluate_minimal_pairs(model, &rows, |row| {
                stream.append(row).map_err(EvalError::from)
            })?;

            stream.finish(&output.sentences)?;
            crate::results::write_token_surprisals(&token_path, &output.tokens)?;

            Ok(RunSummary {
                rows: output.sentences.len(),
                written: vec![sentence_path, token_path],
            })
        }
        EvalMode::Prompting => {
            let stimuli = stimuli::load_stimuli(&config.input)?;
            let template = config.settings.prompt_template()?;
            let records = evaluate_prompts(model, &stimuli, &template)?;

            let path = layout.prompting();
            crate::results::write_prompt_records(&path, &records)?;

            Ok(RunSummary {
                rows: records.len(),
                written: vec![path],
            })
        }
    }
}
