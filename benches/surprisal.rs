//! Benchmarks for surprisal scoring over synthetic logits

#![allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]

use acceptability_eval::surprisal::log_softmax_at;
use acceptability_eval::{CausalLm, LanguageModel, LocalBackend, ModelError, SurprisalUnit, Token};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

/// Deterministic runtime: each word is its own id, logits are a fixed ramp.
struct SyntheticLm {
    vocab: usize,
}

impl CausalLm for SyntheticLm {
    fn tokenize(&self, text: &str) -> Result<Vec<Token>, ModelError> {
        Ok(text
            .split_whitespace()
            .enumerate()
            .map(|(i, w)| Token {
                id: (i % self.vocab) as u32,
                text: w.to_string(),
            })
            .collect())
    }

    fn bos_token_id(&self) -> Option<u32> {
        Some(0)
    }

    fn eos_token_ids(&self) -> &[u32] {
        &[]
    }

    fn logits(&self, ids: &[u32]) -> Result<Vec<Vec<f32>>, ModelError> {
        Ok(ids
            .iter()
            .map(|&id| {
                (0..self.vocab)
                    .map(|v| ((v as u32 ^ id) % 97) as f32 * 0.1)
                    .collect()
            })
            .collect())
    }

    fn decode(&self, ids: &[u32]) -> Result<String, ModelError> {
        Ok(ids.iter().map(u32::to_string).collect::<Vec<_>>().join(" "))
    }
}

fn benchmark_log_softmax(c: &mut Criterion) {
    let mut group = c.benchmark_group("log_softmax");

    for vocab in &[1_000, 32_000, 128_000] {
        let logits: Vec<f32> = (0..*vocab).map(|i| (i % 113) as f32 * 0.05).collect();
        group.bench_function(format!("vocab_{vocab}"), |b| {
            b.iter(|| log_softmax_at(black_box(&logits), black_box(vocab / 2)));
        });
    }

    group.finish();
}

fn benchmark_sentence_surprisal(c: &mut Criterion) {
    let mut group = c.benchmark_group("sentence_surprisal");
    let backend = LocalBackend::new("synthetic", SyntheticLm { vocab: 32_000 }, SurprisalUnit::Bits);

    for words in &[5, 20, 50] {
        let sentence = vec!["word"; *words].join(" ");
        group.bench_function(format!("{words}_tokens"), |b| {
            b.iter(|| backend.sentence_surprisal(black_box(&sentence)));
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_log_softmax, benchmark_sentence_surprisal);
criterion_main!(benches);
