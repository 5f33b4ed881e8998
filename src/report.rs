//! Summaries of written evaluation tables.
//!
//! Minimal-pair tables are summarized per phenomenon: accuracy with a
//! bootstrap interval and a paired t-test of ungrammatical against
//! grammatical surprisal. Prompting tables are summarized per phenomenon and
//! condition as counts of `C`, `N` and other responses.

use crate::metrics::{bootstrap_ci, correctness, mean, paired_t_test, PairScore, SignificanceResult, StatConfig};
use crate::runner::{PromptRecord, SentenceSurprisalRow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as FmtWrite;
use tabled::{Table, Tabled};

/// Output format for [`SummaryReport`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    #[default]
    Markdown,
    Text,
    Json,
}

impl std::str::FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "markdown" | "md" => Ok(Self::Markdown),
            "text" | "txt" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown report format: {other}")),
        }
    }
}

/// Minimal-pair results for one phenomenon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhenomenonAccuracy {
    pub phenomenon: String,
    /// Rows with both sums present
    pub pairs: usize,
    /// Rows missing at least one sum
    pub incomplete: usize,
    /// Fraction of pairs with lower grammatical surprisal
    pub accuracy: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
    /// Mean of ungrammatical minus grammatical surprisal
    pub mean_difference: f64,
    pub significance: Option<SignificanceResult>,
}

/// Response tallies for one phenomenon and condition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseCounts {
    pub phenomenon: String,
    pub condition: String,
    pub correct: usize,
    pub not_correct: usize,
    pub other: usize,
}

impl ResponseCounts {
    #[must_use]
    pub const fn total(&self) -> usize {
        self.correct + self.not_correct + self.other
    }
}

/// Judgment read from a free-text response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Judgment {
    Correct,
    NotCorrect,
    Other,
}

impl Judgment {
    /// Classify by the first non-whitespace character, ignoring quotes
    #[must_use]
    pub fn from_response(response: &str) -> Self {
        let first = response
            .trim_start_matches(|c: char| c.is_whitespace() || c == '"' || c == '\'')
            .chars()
            .next();
        match first {
            Some('C' | 'c') => Self::Correct,
            Some('N' | 'n') => Self::NotCorrect,
            _ => Self::Other,
        }
    }
}

/// Report metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    /// Source table
    pub source: String,
    pub generated_at: DateTime<Utc>,
    pub tool_version: String,
    pub stat_config: StatConfig,
}

/// Summary of one output table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryReport {
    pub metadata: ReportMetadata,
    pub minimal_pairs: Vec<PhenomenonAccuracy>,
    pub prompting: Vec<ResponseCounts>,
}

/// Per-phenomenon accuracy, phenomena in lexical order
#[must_use]
pub fn summarize_minimal_pairs(
    rows: &[SentenceSurprisalRow],
    config: &StatConfig,
) -> Vec<PhenomenonAccuracy> {
    let mut groups: BTreeMap<&str, (Vec<PairScore>, usize)> = BTreeMap::new();
    for row in rows {
        let entry = groups.entry(row.phenomenon.as_str()).or_default();
        match (row.sum_surprisal_grammatical, row.sum_surprisal_ungrammatical) {
            (Some(grammatical), Some(ungrammatical)) => entry.0.push(PairScore {
                grammatical,
                ungrammatical,
            }),
            _ => entry.1 += 1,
        }
    }

    groups
        .into_iter()
        .map(|(phenomenon, (pairs, incomplete))| {
            let hits = correctness(&pairs);
            let (ci_lower, ci_upper) = bootstrap_ci(&hits, config);
            let grammatical: Vec<f64> = pairs.iter().map(|p| p.grammatical).collect();
            let ungrammatical: Vec<f64> = pairs.iter().map(|p| p.ungrammatical).collect();
            let differences: Vec<f64> = pairs.iter().map(PairScore::difference).collect();

            PhenomenonAccuracy {
                phenomenon: phenomenon.to_string(),
                pairs: pairs.len(),
                incomplete,
                accuracy: mean(&hits),
                ci_lower,
                ci_upper,
                mean_difference: mean(&differences),
                significance: paired_t_test(&grammatical, &ungrammatical, config.alpha),
            }
        })
        .collect()
}

/// Per-(phenomenon, condition) response counts in lexical order
#[must_use]
pub fn summarize_prompts(records: &[PromptRecord]) -> Vec<ResponseCounts> {
    let mut groups: BTreeMap<(&str, &str), ResponseCounts> = BTreeMap::new();
    for record in records {
        let counts = groups
            .entry((record.phenomenon.as_str(), record.condition.as_str()))
            .or_insert_with(|| ResponseCounts {
                phenomenon: record.phenomenon.clone(),
                condition: record.condition.clone(),
                correct: 0,
                not_correct: 0,
                other: 0,
            });
        match Judgment::from_response(&record.response) {
            Judgment::Correct => counts.correct += 1,
            Judgment::NotCorrect => counts.not_correct += 1,
            Judgment::Other => counts.other += 1,
        }
    }
    groups.into_values().collect()
}

#[derive(Tabled)]
struct AccuracyTableRow {
    #[tabled(rename = "Phenomenon")]
    phenomenon: String,
    #[tabled(rename = "Pairs")]
    pairs: usize,
    #[tabled(rename = "Accuracy")]
    accuracy: String,
    #[tabled(rename = "Mean Δ")]
    mean_difference: String,
    #[tabled(rename = "p-value")]
    p_value: String,
}

#[derive(Tabled)]
struct ResponseTableRow {
    #[tabled(rename = "Phenomenon")]
    phenomenon: String,
    #[tabled(rename = "Condition")]
    condition: String,
    #[tabled(rename = "C")]
    correct: usize,
    #[tabled(rename = "N")]
    not_correct: usize,
    #[tabled(rename = "Other")]
    other: usize,
}

impl SummaryReport {
    /// Empty report stamped with the current time
    #[must_use]
    pub fn new(source: impl Into<String>, stat_config: StatConfig) -> Self {
        Self {
            metadata: ReportMetadata {
                source: source.into(),
                generated_at: Utc::now(),
                tool_version: env!("CARGO_PKG_VERSION").to_string(),
                stat_config,
            },
            minimal_pairs: Vec::new(),
            prompting: Vec::new(),
        }
    }

    /// Summary of a sentence-level surprisal table
    #[must_use]
    pub fn from_sentence_rows(
        source: impl Into<String>,
        rows: &[SentenceSurprisalRow],
        stat_config: StatConfig,
    ) -> Self {
        let mut report = Self::new(source, stat_config);
        report.minimal_pairs = summarize_minimal_pairs(rows, &report.metadata.stat_config);
        report
    }

    /// Summary of a prompting table
    #[must_use]
    pub fn from_prompt_records(
        source: impl Into<String>,
        records: &[PromptRecord],
        stat_config: StatConfig,
    ) -> Self {
        let mut report = Self::new(source, stat_config);
        report.prompting = summarize_prompts(records);
        report
    }

    /// Render in `format`
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn render(&self, format: ReportFormat) -> Result<String, serde_json::Error> {
        match format {
            ReportFormat::Markdown => Ok(self.to_markdown()),
            ReportFormat::Text => Ok(self.to_text()),
            ReportFormat::Json => self.to_json(),
        }
    }

    /// Render report as JSON
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    fn accuracy_rows(&self) -> Vec<AccuracyTableRow> {
        self.minimal_pairs
            .iter()
            .map(|p| AccuracyTableRow {
                phenomenon: p.phenomenon.clone(),
                pairs: p.pairs,
                accuracy: format!(
                    "{:.1}% [{:.1}-{:.1}]",
                    p.accuracy * 100.0,
                    p.ci_lower * 100.0,
                    p.ci_upper * 100.0
                ),
                mean_difference: format!("{:.3}", p.mean_difference),
                p_value: p
                    .significance
                    .as_ref()
                    .map_or_else(|| "-".to_string(), |s| format!("{:.4}", s.p_value)),
            })
            .collect()
    }

    fn response_rows(&self) -> Vec<ResponseTableRow> {
        self.prompting
            .iter()
            .map(|c| ResponseTableRow {
                phenomenon: c.phenomenon.clone(),
                condition: c.condition.clone(),
                correct: c.correct,
                not_correct: c.not_correct,
                other: c.other,
            })
            .collect()
    }

    /// Render report as markdown
    #[must_use]
    pub fn to_markdown(&self) -> String {
        let mut output = String::new();

        writeln!(output, "# Acceptability Summary").ok();
        writeln!(output).ok();
        writeln!(output, "**Source:** `{}`", self.metadata.source).ok();
        writeln!(
            output,
            "**Generated:** {}",
            self.metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
        )
        .ok();
        writeln!(output, "**Version:** {}", self.metadata.tool_version).ok();
        writeln!(output).ok();

        if !self.minimal_pairs.is_empty() {
            writeln!(output, "## Minimal Pairs").ok();
            writeln!(output).ok();
            let table = Table::new(self.accuracy_rows())
                .with(tabled::settings::Style::markdown())
                .to_string();
            writeln!(output, "{table}").ok();
            writeln!(output).ok();

            let incomplete: usize = self.minimal_pairs.iter().map(|p| p.incomplete).sum();
            if incomplete > 0 {
                writeln!(output, "_{incomplete} incomplete pair(s) excluded._").ok();
                writeln!(output).ok();
            }
        }

        if !self.prompting.is_empty() {
            writeln!(output, "## Prompted Judgments").ok();
            writeln!(output).ok();
            let table = Table::new(self.response_rows())
                .with(tabled::settings::Style::markdown())
                .to_string();
            writeln!(output, "{table}").ok();
            writeln!(output).ok();
        }

        writeln!(output, "## Configuration").ok();
        writeln!(output).ok();
        let config = &self.metadata.stat_config;
        writeln!(output, "- Bootstrap resamples: {}", config.bootstrap_n).ok();
        writeln!(output, "- Confidence level: {}%", config.confidence * 100.0).ok();
        writeln!(output, "- Significance threshold (α): {}", config.alpha).ok();

        output
    }

    /// Render report as plain text
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut output = String::new();
        let rule = "─".repeat(63);

        writeln!(output, "ACCEPTABILITY SUMMARY  {}", self.metadata.source).ok();
        writeln!(output, "{rule}").ok();

        for p in &self.minimal_pairs {
            writeln!(
                output,
                "  {:<32} {:>5} pairs  {:>6.1}%  [{:.1}-{:.1}]",
                p.phenomenon,
                p.pairs,
                p.accuracy * 100.0,
                p.ci_lower * 100.0,
                p.ci_upper * 100.0
            )
            .ok();
        }

        for c in &self.prompting {
            writeln!(
                output,
                "  {:<24} {:<14} C={:<4} N={:<4} other={}",
                c.phenomenon, c.condition, c.correct, c.not_correct, c.other
            )
            .ok();
        }

        writeln!(output, "{rule}").ok();
        writeln!(
            output,
            "  generated {} (v{})",
            self.metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC"),
            self.metadata.tool_version
        )
        .ok();
        output
    }
}
