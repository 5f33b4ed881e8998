//! Capability interface shared by every model backend.
//!
//! The evaluation modes only ever see a [`LanguageModel`]; how a backend
//! obtains token probabilities or completions stays behind this trait.

use crate::surprisal::SentenceSurprisal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Maximum number of tokens a judgment completion may produce
pub const MAX_NEW_TOKENS: usize = 5;

/// Sampling temperature for remote judgment completions
pub const TEMPERATURE: f64 = 0.5;

/// Errors raised by model backends
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Input rejected by tokenizer: {0}")]
    TokenizationError(String),

    #[error("Rate limited by backend (retry after: {retry_after:?})")]
    RateLimited {
        /// Backoff suggested by the backend, if any
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from backend: {0}")]
    InvalidResponse(String),

    #[error("{0} backend not compiled in (enable the `local-inference` feature)")]
    FeatureNotEnabled(&'static str),
}

impl ModelError {
    /// Whether retrying the same call later could succeed
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

/// Backend family behind a [`LanguageModel`]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// Local causal LM with direct access to token probabilities
    Local,
    /// Remote text-completion service
    Remote,
}

impl ModelKind {
    /// Name used on the command line and in logs
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

impl std::str::FromStr for ModelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" | "hf" => Ok(Self::Local),
            "remote" | "openai" => Ok(Self::Remote),
            other => Err(format!("unknown model type: {other} (expected local or remote)")),
        }
    }
}

/// Compute target for local backends, resolved once at construction.
///
/// `Accelerated` asks for a GPU and falls back to the default device with a
/// warning when none is available; it never fails.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ComputeDevice {
    /// CUDA or Metal when compiled in and present, otherwise CPU
    #[default]
    Accelerated,
    /// Always CPU
    Default,
}

impl std::str::FromStr for ComputeDevice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "accelerated" | "gpu" | "cuda" => Ok(Self::Accelerated),
            "default" | "cpu" => Ok(Self::Default),
            other => Err(format!("unknown compute device: {other}")),
        }
    }
}

/// Uniform interface over local and remote language models
pub trait LanguageModel {
    /// Identifier of the underlying model (e.g. `TinyLlama/TinyLlama-1.1B-Chat-v1.0` or `davinci-002`)
    fn model_id(&self) -> &str;

    /// Score `sentence` token by token under causal conditioning.
    ///
    /// # Errors
    ///
    /// Returns `ModelUnavailable` when the backend cannot be reached and
    /// `TokenizationError` when it rejects the input.
    fn sentence_surprisal(&self, sentence: &str) -> Result<SentenceSurprisal, ModelError>;

    /// Complete `prompt` with a short, trimmed continuation.
    ///
    /// # Errors
    ///
    /// Returns `ModelUnavailable` or `RateLimited`; callers decide whether to retry.
    fn generate(&self, prompt: &str) -> Result<String, ModelError>;
}

impl<M: LanguageModel + ?Sized> LanguageModel for Box<M> {
    fn model_id(&self) -> &str {
        (**self).model_id()
    }

    fn sentence_surprisal(&self, sentence: &str) -> Result<SentenceSurprisal, ModelError> {
        (**self).sentence_surprisal(sentence)
    }

    fn generate(&self, prompt: &str) -> Result<String, ModelError> {
        (**self).generate(prompt)
    }
}
