//! Token- and sentence-level surprisal values.
//!
//! A [`SentenceSurprisal`] is always built from its tokens, so the total is
//! the left-to-right sum of the per-token values and `token_id` is the
//! zero-based position of each token.

use serde::{Deserialize, Serialize};
use std::f64::consts::LN_2;

/// Unit surprisal values are reported in
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SurprisalUnit {
    /// Negative log2 probability
    #[default]
    Bits,
    /// Negative natural-log probability
    Nats,
}

impl SurprisalUnit {
    /// Convert a natural-log probability into a surprisal in this unit.
    ///
    /// Log-probabilities are never positive; rounding noise above zero is
    /// clamped so surprisal stays non-negative.
    #[must_use]
    pub fn from_ln_prob(self, ln_prob: f64) -> f64 {
        let nats = -ln_prob;
        if nats <= 0.0 {
            return 0.0;
        }
        match self {
            Self::Bits => nats / LN_2,
            Self::Nats => nats,
        }
    }

    /// Unit name as written in logs and reports
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Bits => "bits",
            Self::Nats => "nats",
        }
    }
}

impl std::str::FromStr for SurprisalUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bits" | "bit" => Ok(Self::Bits),
            "nats" | "nat" => Ok(Self::Nats),
            other => Err(format!("unknown surprisal unit: {other}")),
        }
    }
}

/// Surprisal of a single token in its left context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenSurprisal {
    /// Token text as produced by the backend's tokenizer
    pub token: String,
    /// Surprisal of the token given the preceding tokens
    pub surprisal: f64,
    /// Zero-based position in the sentence's tokenization
    pub token_id: usize,
}

/// Surprisal of a whole sentence together with its per-token breakdown
#[derive(Debug, Clone, PartialEq)]
pub struct SentenceSurprisal {
    total: f64,
    tokens: Vec<TokenSurprisal>,
}

impl SentenceSurprisal {
    /// Build from `(token, surprisal)` pairs in left-to-right order.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let tokens: Vec<TokenSurprisal> = pairs
            .into_iter()
            .enumerate()
            .map(|(token_id, (token, surprisal))| TokenSurprisal {
                token: token.into(),
                surprisal,
                token_id,
            })
            .collect();
        let total = tokens.iter().map(|t| t.surprisal).sum();
        Self { total, tokens }
    }

    /// Sum of all token surprisals
    #[must_use]
    pub const fn total(&self) -> f64 {
        self.total
    }

    /// Per-token surprisals in sentence order
    #[must_use]
    pub fn tokens(&self) -> &[TokenSurprisal] {
        &self.tokens
    }

    /// Number of tokens scored
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether no tokens were scored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Split into the total and the owned token sequence
    #[must_use]
    pub fn into_parts(self) -> (f64, Vec<TokenSurprisal>) {
        (self.total, self.tokens)
    }
}

/// Natural-log probability of `index` under the softmax of `logits`.
///
/// Returns `None` when `index` is out of range or the logits are empty.
#[must_use]
pub fn log_softmax_at(logits: &[f32], index: usize) -> Option<f64> {
    let target = f64::from(*logits.get(index)?);
    let max = logits
        .iter()
        .copied()
        .map(f64::from)
        .fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return None;
    }
    let sum_exp: f64 = logits.iter().map(|&l| (f64::from(l) - max).exp()).sum();
    Some(target - max - sum_exp.ln())
}

/// Index of the largest logit (greedy decoding step)
#[must_use]
pub fn argmax(logits: &[f32]) -> Option<usize> {
    logits
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(idx, _)| idx)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn test_total_is_sum_of_tokens() {
        let s = SentenceSurprisal::from_pairs([("The", 0.1), ("Ġcat", 7.25), ("Ġsat", 3.3)]);
        let summed: f64 = s.tokens().iter().map(|t| t.surprisal).sum();
        assert_eq!(s.total(), summed);
        assert_eq!(s.len(), 3);
    }

    #[test]
    fn test_token_ids_are_contiguous() {
        let s = SentenceSurprisal::from_pairs(["a", "b", "c", "d"].into_iter().map(|t| (t, 1.0)));
        for (i, tok) in s.tokens().iter().enumerate() {
            assert_eq!(tok.token_id, i);
        }
    }

    #[test]
    fn test_empty_sentence() {
        let s = SentenceSurprisal::from_pairs(Vec::<(String, f64)>::new());
        assert!(s.is_empty());
        assert_eq!(s.total(), 0.0);
    }

    #[test]
    fn test_unit_conversion() {
        let half = 0.5_f64.ln();
        assert!((SurprisalUnit::Bits.from_ln_prob(half) - 1.0).abs() < 1e-12);
        assert!((SurprisalUnit::Nats.from_ln_prob(half) - 2.0_f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn test_unit_conversion_clamps_positive_noise() {
        assert_eq!(SurprisalUnit::Bits.from_ln_prob(1e-9), 0.0);
        assert_eq!(SurprisalUnit::Nats.from_ln_prob(0.0), 0.0);
    }

    #[test]
    fn test_unit_parse() {
        assert_eq!("BITS".parse::<SurprisalUnit>().unwrap(), SurprisalUnit::Bits);
        assert_eq!("nats".parse::<SurprisalUnit>().unwrap(), SurprisalUnit::Nats);
        assert!("hartleys".parse::<SurprisalUnit>().is_err());
    }

    #[test]
    fn test_log_softmax_uniform() {
        let logits = [0.0_f32; 4];
        let lp = log_softmax_at(&logits, 2).unwrap();
        assert!((lp - 0.25_f64.ln()).abs() < 1e-9);
    }

    #[test]
    fn test_log_softmax_is_shift_invariant() {
        let a = [1.0_f32, 2.0, 3.0];
        let b = [101.0_f32, 102.0, 103.0];
        let la = log_softmax_at(&a, 0).unwrap();
        let lb = log_softmax_at(&b, 0).unwrap();
        assert!((la - lb).abs() < 1e-6);
    }

    #[test]
    fn test_log_softmax_out_of_range() {
        assert!(log_softmax_at(&[0.0, 1.0], 5).is_none());
        assert!(log_softmax_at(&[], 0).is_none());
    }

    #[test]
    fn test_argmax() {
        assert_eq!(argmax(&[0.1, 3.0, -2.0]), Some(1));
        assert_eq!(argmax(&[]), None);
    }
}
