//! Remote completion backend for OpenAI-compatible `/completions` APIs.
//!
//! Surprisal uses echo mode: the sentence is sent as the prompt with zero
//! generated tokens and the per-token log-probabilities of the prompt come
//! back. Judgments use ordinary completions at a fixed temperature.

use crate::config::{Credentials, RemoteSettings};
use crate::model::{LanguageModel, ModelError, MAX_NEW_TOKENS, TEMPERATURE};
use crate::surprisal::{SentenceSurprisal, SurprisalUnit};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    max_tokens: usize,
    temperature: f64,
    logprobs: u32,
    echo: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    text: String,
    #[serde(default)]
    logprobs: Option<Logprobs>,
}

#[derive(Debug, Deserialize)]
struct Logprobs {
    #[serde(default)]
    tokens: Vec<String>,
    /// The first prompt token has no logprob in echo mode
    #[serde(default)]
    token_logprobs: Vec<Option<f64>>,
}

/// [`LanguageModel`] over a remote completion API
#[derive(Debug, Clone)]
pub struct RemoteBackend {
    client: Client,
    base_url: String,
    model_id: String,
    unit: SurprisalUnit,
}

impl RemoteBackend {
    /// Build a client for `model_id` with explicit credentials.
    ///
    /// # Errors
    ///
    /// Returns `ModelUnavailable` if the credentials are not valid header
    /// values or the HTTP client cannot be built.
    pub fn new(
        model_id: impl Into<String>,
        credentials: &Credentials,
        settings: &RemoteSettings,
        unit: SurprisalUnit,
    ) -> Result<Self, ModelError> {
        Self::with_config(
            model_id,
            credentials,
            settings.base_url.clone(),
            settings.timeout(),
            unit,
        )
    }

    /// Build a client against an arbitrary base URL.
    ///
    /// # Errors
    ///
    /// See [`RemoteBackend::new`].
    pub fn with_config(
        model_id: impl Into<String>,
        credentials: &Credentials,
        base_url: impl Into<String>,
        timeout: Duration,
        unit: SurprisalUnit,
    ) -> Result<Self, ModelError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let auth = HeaderValue::from_str(&format!("Bearer {}", credentials.api_key))
            .map_err(|_| ModelError::ModelUnavailable("invalid API key format".to_string()))?;
        headers.insert(AUTHORIZATION, auth);

        if let Some(org) = &credentials.organization {
            let value = HeaderValue::from_str(org).map_err(|_| {
                ModelError::ModelUnavailable("invalid organization format".to_string())
            })?;
            headers.insert("OpenAI-Organization", value);
        }

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| ModelError::ModelUnavailable(format!("failed to create HTTP client: {e}")))?;

        let base_url: String = base_url.into();
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model_id: model_id.into(),
            unit,
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/completions", self.base_url)
    }

    fn complete(&self, request: &CompletionRequest<'_>) -> Result<Choice, ModelError> {
        let response = self
            .client
            .post(self.completions_url())
            .json(request)
            .send()
            .map_err(|e| ModelError::ModelUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = response.text().unwrap_or_default();
            return Err(classify_status(status, retry_after, body));
        }

        let parsed: CompletionResponse = response
            .json()
            .map_err(|e| ModelError::InvalidResponse(e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ModelError::InvalidResponse("response has no choices".to_string()))
    }
}

fn classify_status(status: StatusCode, retry_after: Option<Duration>, body: String) -> ModelError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => ModelError::RateLimited { retry_after },
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            ModelError::TokenizationError(format!("{status}: {body}"))
        }
        _ => ModelError::ModelUnavailable(format!("{status}: {body}")),
    }
}

impl LanguageModel for RemoteBackend {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn sentence_surprisal(&self, sentence: &str) -> Result<SentenceSurprisal, ModelError> {
        let request = CompletionRequest {
            model: &self.model_id,
            prompt: sentence,
            max_tokens: 0,
            temperature: 0.0,
            logprobs: 0,
            echo: true,
        };
        let choice = self.complete(&request)?;
        let logprobs = choice
            .logprobs
            .ok_or_else(|| ModelError::InvalidResponse("response has no logprobs".to_string()))?;

        if logprobs.tokens.len() != logprobs.token_logprobs.len() {
            return Err(ModelError::InvalidResponse(format!(
                "{} tokens but {} logprobs",
                logprobs.tokens.len(),
                logprobs.token_logprobs.len()
            )));
        }
        if logprobs.tokens.is_empty() {
            return Err(ModelError::TokenizationError(format!(
                "no tokens returned for {sentence:?}"
            )));
        }

        let unit = self.unit;
        let result = SentenceSurprisal::from_pairs(
            logprobs
                .tokens
                .into_iter()
                .zip(logprobs.token_logprobs)
                .map(|(token, lp)| (token, lp.map_or(0.0, |lp| unit.from_ln_prob(lp)))),
        );

        tracing::debug!(
            model = %self.model_id,
            tokens = result.len(),
            total = result.total(),
            "Scored sentence remotely"
        );
        Ok(result)
    }

    fn generate(&self, prompt: &str) -> Result<String, ModelError> {
        let request = CompletionRequest {
            model: &self.model_id,
            prompt,
            max_tokens: MAX_NEW_TOKENS,
            temperature: TEMPERATURE,
            logprobs: 1,
            echo: false,
        };
        let choice = self.complete(&request)?;
        Ok(choice.text.trim().to_string())
    }
}
