//! # Acceptability Eval
//!
//! Linguistic acceptability evaluation for language models.
//!
//! Two evaluation modes run over a table of stimuli:
//!
//! - **Minimal pairs**: score the grammatical and ungrammatical sentence of
//!   each pair by total surprisal (negative log-probability). A model
//!   "prefers" the sentence with lower surprisal.
//! - **Prompting**: ask the model for an explicit judgment (`C` or `N`) on
//!   each sentence through a fixed prompt template.
//!
//! Backends implement [`LanguageModel`]: a remote completion API that echoes
//! prompt log-probabilities, or a local causal LM (feature `local-inference`).
//!
//! ## Pipeline
//!
//! ```text
//! raw experiment CSV ──extract──▶ stimuli CSV
//!                                    │
//!                 ┌──────────────────┴─────────────────┐
//!          minimal pairs                           prompting
//!   sentence_surprisal × 2 per row            generate(filled prompt)
//!                 │                                    │
//!   minimal_pairs/sentence_surprisals/<m>.csv   original/<m>.csv
//!   minimal_pairs/token_surprisals/<m>.csv
//!                 └──────────────summarize──────────────┘
//! ```

#[cfg(feature = "local-inference")]
pub mod candle_runtime;
pub mod config;
pub mod local;
pub mod metrics;
pub mod model;
pub mod remote;
pub mod report;
pub mod results;
pub mod runner;
pub mod stimuli;
pub mod surprisal;

#[cfg(feature = "local-inference")]
pub use candle_runtime::{select_device, CandleRuntime};
pub use config::{ConfigError, Credentials, LocalSettings, RemoteSettings, Settings};
pub use local::{CausalLm, LocalBackend, Token};
pub use metrics::{bootstrap_ci, paired_t_test, EffectSize, PairScore, SignificanceResult, StatConfig};
pub use model::{ComputeDevice, LanguageModel, ModelError, ModelKind, MAX_NEW_TOKENS, TEMPERATURE};
pub use remote::RemoteBackend;
pub use report::{Judgment, PhenomenonAccuracy, ReportFormat, ResponseCounts, SummaryReport};
pub use results::{safe_model_name, OutputLayout, ResultsError, SentenceStream};
pub use runner::{
    evaluate_minimal_pairs, evaluate_prompts, load_model, run, EvalError, EvalMode,
    MinimalPairOutput, PromptRecord, PromptTemplate, RunConfig, RunSummary, SentenceSurprisalRow,
    TokenSurprisalRow, DEFAULT_PROMPT,
};
pub use stimuli::{
    extract_stimuli, load_minimal_pairs, load_stimuli, sort_stimuli, write_stimuli,
    MinimalPairRow, PairCondition, Stimulus, StimulusError,
};
pub use surprisal::{SentenceSurprisal, SurprisalUnit, TokenSurprisal};
