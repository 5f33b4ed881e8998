//! Local token-probability backend.
//!
//! A [`LocalBackend`] turns raw next-token logits from any [`CausalLm`]
//! runtime into surprisals and greedy completions. The runtime owns the
//! weights and tokenizer; this module owns the arithmetic.

use crate::model::{LanguageModel, ModelError, MAX_NEW_TOKENS};
use crate::surprisal::{argmax, log_softmax_at, SentenceSurprisal, SurprisalUnit};

/// A token produced by a runtime's tokenizer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub id: u32,
    pub text: String,
}

/// Minimal surface of a causal language model runtime
pub trait CausalLm {
    /// Tokenize without special tokens
    ///
    /// # Errors
    ///
    /// Returns `TokenizationError` if the tokenizer rejects the input.
    fn tokenize(&self, text: &str) -> Result<Vec<Token>, ModelError>;

    /// Beginning-of-sequence token used as left context for the first token
    fn bos_token_id(&self) -> Option<u32>;

    /// Tokens that end generation
    fn eos_token_ids(&self) -> &[u32];

    /// Next-token logits after every prefix of `ids`.
    ///
    /// Row `i` is the distribution over the token following `ids[..=i]`.
    ///
    /// # Errors
    ///
    /// Returns `ModelUnavailable` if the forward pass fails.
    fn logits(&self, ids: &[u32]) -> Result<Vec<Vec<f32>>, ModelError>;

    /// Next-token logits after the full sequence
    ///
    /// # Errors
    ///
    /// Returns `ModelUnavailable` if the forward pass fails.
    fn last_logits(&self, ids: &[u32]) -> Result<Vec<f32>, ModelError> {
        self.logits(ids)?
            .pop()
            .ok_or_else(|| ModelError::InvalidResponse("runtime returned no logits".to_string()))
    }

    /// Decode ids to text, skipping special tokens
    ///
    /// # Errors
    ///
    /// Returns `TokenizationError` if decoding fails.
    fn decode(&self, ids: &[u32]) -> Result<String, ModelError>;
}

/// [`LanguageModel`] over a local [`CausalLm`] runtime
pub struct LocalBackend<R> {
    model_id: String,
    runtime: R,
    unit: SurprisalUnit,
    max_new_tokens: usize,
}

impl<R: CausalLm> LocalBackend<R> {
    /// Wrap an already-loaded runtime
    #[must_use]
    pub fn new(model_id: impl Into<String>, runtime: R, unit: SurprisalUnit) -> Self {
        Self {
            model_id: model_id.into(),
            runtime,
            unit,
            max_new_tokens: MAX_NEW_TOKENS,
        }
    }

    /// Access the wrapped runtime
    #[must_use]
    pub const fn runtime(&self) -> &R {
        &self.runtime
    }
}

impl<R: CausalLm> LanguageModel for LocalBackend<R> {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn sentence_surprisal(&self, sentence: &str) -> Result<SentenceSurprisal, ModelError> {
        let tokens = self.runtime.tokenize(sentence)?;
        if tokens.is_empty() {
            return Err(ModelError::TokenizationError(format!(
                "no tokens produced for {sentence:?}"
            )));
        }

        let bos = self.runtime.bos_token_id();
        let offset = usize::from(bos.is_some());
        let ids: Vec<u32> = bos
            .into_iter()
            .chain(tokens.iter().map(|t| t.id))
            .collect();

        // Only prefixes ending before the last token are needed.
        let logits = self.runtime.logits(&ids[..ids.len() - 1])?;

        let mut pairs = Vec::with_capacity(tokens.len());
        for (i, token) in tokens.into_iter().enumerate() {
            let position = i + offset;
            let surprisal = if position == 0 {
                0.0
            } else {
                let row = logits.get(position - 1).ok_or_else(|| {
                    ModelError::InvalidResponse(format!("missing logits for position {position}"))
                })?;
                let ln_p = log_softmax_at(row, token.id as usize).ok_or_else(|| {
                    ModelError::InvalidResponse(format!(
                        "token id {} outside vocabulary of {}",
                        token.id,
                        row.len()
                    ))
                })?;
                self.unit.from_ln_prob(ln_p)
            };
            pairs.push((token.text, surprisal));
        }

        let result = SentenceSurprisal::from_pairs(pairs);
        tracing::debug!(
            model = %self.model_id,
            tokens = result.len(),
            total = result.total(),
            unit = self.unit.as_str(),
            "Scored sentence"
        );
        Ok(result)
    }

    fn generate(&self, prompt: &str) -> Result<String, ModelError> {
        let mut ids: Vec<u32> = self.runtime.tokenize(prompt)?.iter().map(|t| t.id).collect();
        if let Some(bos) = self.runtime.bos_token_id() {
            ids.insert(0, bos);
        }
        if ids.is_empty() {
            return Err(ModelError::TokenizationError("empty prompt".to_string()));
        }

        let prompt_len = ids.len();
        for _ in 0..self.max_new_tokens {
            let next = self.runtime.last_logits(&ids)?;
            let next_id = argmax(&next)
                .ok_or_else(|| ModelError::InvalidResponse("empty logits".to_string()))?;
            #[allow(clippy::cast_possible_truncation)]
            let next_id = next_id as u32;
            if self.runtime.eos_token_ids().contains(&next_id) {
                break;
            }
            ids.push(next_id);
        }

        let text = self.runtime.decode(&ids[prompt_len..])?;
        Ok(text.trim().to_string())
    }
}
