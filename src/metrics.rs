//! Statistics for result summaries.
//!
//! - Minimal-pair accuracy over complete pairs
//! - Seeded percentile bootstrap confidence intervals
//! - Paired t-test with Cohen's d

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};

/// Surprisal totals for one complete minimal pair
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairScore {
    pub grammatical: f64,
    pub ungrammatical: f64,
}

impl PairScore {
    /// The model prefers the grammatical sentence (strictly lower surprisal)
    #[must_use]
    pub fn is_correct(&self) -> bool {
        self.grammatical < self.ungrammatical
    }

    /// Ungrammatical minus grammatical surprisal
    #[must_use]
    pub fn difference(&self) -> f64 {
        self.ungrammatical - self.grammatical
    }
}

/// 1.0 for every correctly ordered pair, 0.0 otherwise
#[must_use]
pub fn correctness(pairs: &[PairScore]) -> Vec<f64> {
    pairs
        .iter()
        .map(|p| if p.is_correct() { 1.0 } else { 0.0 })
        .collect()
}

/// Mean, or 0 for no samples
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn mean(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

/// Sample standard deviation (n - 1)
#[allow(clippy::cast_precision_loss)]
fn sample_std(samples: &[f64]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let m = mean(samples);
    let variance = samples.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (samples.len() - 1) as f64;
    variance.sqrt()
}

/// Statistical settings for summaries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatConfig {
    /// Number of bootstrap resamples
    pub bootstrap_n: usize,
    /// Confidence level (e.g., 0.95)
    pub confidence: f64,
    /// Significance threshold
    pub alpha: f64,
    /// Random seed for reproducibility
    pub seed: u64,
}

impl Default for StatConfig {
    fn default() -> Self {
        Self {
            bootstrap_n: 10_000,
            confidence: 0.95,
            alpha: 0.05,
            seed: 42,
        }
    }
}

/// Percentile bootstrap confidence interval of the mean.
///
/// Fewer than two samples collapse to `(mean, mean)`.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::cast_possible_truncation
)]
pub fn bootstrap_ci(samples: &[f64], config: &StatConfig) -> (f64, f64) {
    if samples.len() < 2 || config.bootstrap_n == 0 {
        let m = mean(samples);
        return (m, m);
    }

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let n = samples.len();
    let mut means: Vec<f64> = (0..config.bootstrap_n)
        .map(|_| (0..n).map(|_| samples[rng.gen_range(0..n)]).sum::<f64>() / n as f64)
        .collect();
    means.sort_by(f64::total_cmp);

    let tail = (1.0 - config.confidence) / 2.0;
    let last = means.len() - 1;
    let lower_idx = ((means.len() as f64 * tail).floor() as usize).min(last);
    let upper_idx = ((means.len() as f64 * (1.0 - tail)).ceil() as usize).min(last);

    (means[lower_idx], means[upper_idx])
}

/// Magnitude label for Cohen's d
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EffectSize {
    Negligible,
    Small,
    Medium,
    Large,
}

impl EffectSize {
    #[must_use]
    pub fn from_cohens_d(d: f64) -> Self {
        match d.abs() {
            x if x < 0.2 => Self::Negligible,
            x if x < 0.5 => Self::Small,
            x if x < 0.8 => Self::Medium,
            _ => Self::Large,
        }
    }
}

impl std::fmt::Display for EffectSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Negligible => "negligible",
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
        };
        f.write_str(label)
    }
}

/// Result of a significance test
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignificanceResult {
    pub t_statistic: f64,
    /// Two-tailed
    pub p_value: f64,
    pub degrees_of_freedom: f64,
    /// `p_value < alpha`
    pub is_significant: bool,
    pub cohens_d: f64,
    pub effect: EffectSize,
}

/// Paired t-test on `after - before`.
///
/// Returns `None` for unequal lengths, fewer than two pairs, or zero
/// variance in the differences.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn paired_t_test(before: &[f64], after: &[f64], alpha: f64) -> Option<SignificanceResult> {
    if before.len() != after.len() || before.len() < 2 {
        return None;
    }

    let differences: Vec<f64> = before.iter().zip(after).map(|(b, a)| a - b).collect();
    let mean_diff = mean(&differences);
    let std_diff = sample_std(&differences);
    if std_diff < f64::EPSILON {
        return None;
    }

    let n = differences.len() as f64;
    let t_statistic = mean_diff / (std_diff / n.sqrt());
    let df = n - 1.0;

    let t_dist = StudentsT::new(0.0, 1.0, df).ok()?;
    let p_value = 2.0 * (1.0 - t_dist.cdf(t_statistic.abs()));
    let cohens_d = mean_diff / std_diff;

    Some(SignificanceResult {
        t_statistic,
        p_value,
        degrees_of_freedom: df,
        is_significant: p_value < alpha,
        cohens_d,
        effect: EffectSize::from_cohens_d(cohens_d),
    })
}
