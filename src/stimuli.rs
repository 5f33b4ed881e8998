//! Stimulus tables: loading, validation and ordering.
//!
//! Two input shapes exist: the canonical stimuli table (one sentence per
//! phenomenon / test item / condition) used for prompting, and the
//! minimal-pair table used for surprisal comparisons. The
//! [`extract_stimuli`] utility builds the canonical table from a raw
//! experiment export.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur while reading or reshaping stimuli
#[derive(Error, Debug)]
pub enum StimulusError {
    /// `row` is 1-based over data rows; 0 means the header
    #[error("Malformed input at row {row}: {reason}")]
    MalformedInput { row: usize, reason: String },

    #[error("Conflicting sentences for ({phenomenon}, {test_item}, {condition})")]
    ConflictingSentences {
        phenomenon: String,
        test_item: String,
        condition: String,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One sentence of the canonical stimuli table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stimulus {
    /// Linguistic phenomenon under test
    pub phenomenon: String,
    /// Item identifier with a trailing number, e.g. `item 12`
    pub test_item: String,
    /// Experimental condition label
    pub condition: String,
    /// Sentence text (no final period)
    pub sentence: String,
}

/// One row of the minimal-pair table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinimalPairRow {
    pub phenomenon: String,
    pub test_item: String,
    pub original_condition: String,
    /// Empty cells load as `None`
    pub sentence_grammatical: Option<String>,
    pub sentence_ungrammatical: Option<String>,
}

/// Side of a minimal pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairCondition {
    Grammatical,
    Ungrammatical,
}

impl PairCondition {
    /// Evaluation order within a row
    pub const ALL: [Self; 2] = [Self::Grammatical, Self::Ungrammatical];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Grammatical => "grammatical",
            Self::Ungrammatical => "ungrammatical",
        }
    }
}

impl MinimalPairRow {
    /// Sentence for one side of the pair, if present
    #[must_use]
    pub fn sentence(&self, condition: PairCondition) -> Option<&str> {
        match condition {
            PairCondition::Grammatical => self.sentence_grammatical.as_deref(),
            PairCondition::Ungrammatical => self.sentence_ungrammatical.as_deref(),
        }
    }
}

/// Load the canonical stimuli table from a CSV file
///
/// # Errors
///
/// Returns an error if the file cannot be read, a required column is missing,
/// or a required field is empty.
pub fn load_stimuli<P: AsRef<Path>>(path: P) -> Result<Vec<Stimulus>, StimulusError> {
    let file = std::fs::File::open(path)?;
    read_stimuli(file)
}

/// Read the canonical stimuli table from any reader
///
/// # Errors
///
/// See [`load_stimuli`].
pub fn read_stimuli<R: Read>(reader: R) -> Result<Vec<Stimulus>, StimulusError> {
    let rows: Vec<Stimulus> = deserialize_rows(reader, &STIMULUS_COLUMNS)?;
    for (idx, row) in rows.iter().enumerate() {
        require_fields(
            idx + 1,
            &[
                ("phenomenon", &row.phenomenon),
                ("test_item", &row.test_item),
                ("condition", &row.condition),
                ("sentence", &row.sentence),
            ],
        )?;
    }
    Ok(rows)
}

/// Load the minimal-pair table from a CSV file
///
/// # Errors
///
/// Returns an error if the file cannot be read, a required column is missing,
/// or one of `phenomenon`, `test_item`, `original_condition` is empty.
/// Empty sentence cells are not errors.
pub fn load_minimal_pairs<P: AsRef<Path>>(path: P) -> Result<Vec<MinimalPairRow>, StimulusError> {
    let file = std::fs::File::open(path)?;
    read_minimal_pairs(file)
}

/// Read the minimal-pair table from any reader
///
/// # Errors
///
/// See [`load_minimal_pairs`].
pub fn read_minimal_pairs<R: Read>(reader: R) -> Result<Vec<MinimalPairRow>, StimulusError> {
    let mut rows: Vec<MinimalPairRow> = deserialize_rows(reader, &MINIMAL_PAIR_COLUMNS)?;
    for (idx, row) in rows.iter_mut().enumerate() {
        require_fields(
            idx + 1,
            &[
                ("phenomenon", &row.phenomenon),
                ("test_item", &row.test_item),
                ("original_condition", &row.original_condition),
            ],
        )?;
        blank_to_none(&mut row.sentence_grammatical);
        blank_to_none(&mut row.sentence_ungrammatical);
    }
    Ok(rows)
}

/// Columns the canonical stimuli table must carry
pub const STIMULUS_COLUMNS: [&str; 4] = ["phenomenon", "test_item", "condition", "sentence"];

/// Columns the minimal-pair table must carry
pub const MINIMAL_PAIR_COLUMNS: [&str; 5] = [
    "phenomenon",
    "test_item",
    "original_condition",
    "sentence_grammatical",
    "sentence_ungrammatical",
];

fn deserialize_rows<T, R>(reader: R, required: &[&str]) -> Result<Vec<T>, StimulusError>
where
    T: serde::de::DeserializeOwned,
    R: Read,
{
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::None).from_reader(reader);
    let headers = rdr.headers()?;
    if let Some(missing) = required.iter().find(|col| !headers.iter().any(|h| h == **col)) {
        return Err(StimulusError::MalformedInput {
            row: 0,
            reason: format!("missing required column `{missing}`"),
        });
    }

    let mut rows = Vec::new();
    for (idx, record) in rdr.deserialize().enumerate() {
        let row: T = record.map_err(|e| match e.kind() {
            csv::ErrorKind::Deserialize { .. } => StimulusError::MalformedInput {
                row: idx + 1,
                reason: e.to_string(),
            },
            _ => StimulusError::Csv(e),
        })?;
        rows.push(row);
    }
    Ok(rows)
}

/// Whitespace-only sentence cells count as absent
fn blank_to_none(cell: &mut Option<String>) {
    if cell.as_deref().is_some_and(|s| s.trim().is_empty()) {
        *cell = None;
    }
}

fn require_fields(row: usize, fields: &[(&str, &String)]) -> Result<(), StimulusError> {
    for (name, value) in fields {
        if value.trim().is_empty() {
            return Err(StimulusError::MalformedInput {
                row,
                reason: format!("missing required field `{name}`"),
            });
        }
    }
    Ok(())
}

/// Trailing integer of an item identifier (`"item 10"` -> 10)
///
/// # Errors
///
/// Returns `MalformedInput` if the last whitespace-separated segment is not an integer.
pub fn item_number(test_item: &str) -> Result<u64, StimulusError> {
    test_item
        .split_whitespace()
        .last()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| StimulusError::MalformedInput {
            row: 0,
            reason: format!("test_item `{test_item}` has no numeric suffix"),
        })
}

/// Sort stimuli by phenomenon, then numerically by item suffix.
///
/// The sort is stable, so conditions of the same item keep their order.
///
/// # Errors
///
/// Returns `MalformedInput` if an item identifier lacks a numeric suffix.
pub fn sort_stimuli(stimuli: &mut [Stimulus]) -> Result<(), StimulusError> {
    let mut keyed = Vec::with_capacity(stimuli.len());
    for (idx, s) in stimuli.iter().enumerate() {
        let number = item_number(&s.test_item).map_err(|e| match e {
            StimulusError::MalformedInput { reason, .. } => StimulusError::MalformedInput {
                row: idx + 1,
                reason,
            },
            other => other,
        })?;
        keyed.push((s.phenomenon.clone(), number, idx));
    }
    keyed.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    let reordered: Vec<Stimulus> = keyed.iter().map(|(_, _, idx)| stimuli[*idx].clone()).collect();
    stimuli.clone_from_slice(&reordered);
    Ok(())
}

/// Raw export row; extra columns are ignored
#[derive(Debug, Deserialize)]
struct RawRow {
    phenomenon: String,
    test_item: String,
    condition: String,
    sentence: String,
}

/// Build the canonical stimuli table from a raw experiment export.
///
/// Rows are grouped by (phenomenon, test item, condition); every row in a
/// group must carry the same sentence. Groups are returned sorted with
/// [`sort_stimuli`].
///
/// # Errors
///
/// Returns `ConflictingSentences` when a group disagrees, or
/// `MalformedInput` for missing columns, empty fields or non-numeric items.
pub fn extract_stimuli<R: Read>(reader: R) -> Result<Vec<Stimulus>, StimulusError> {
    let raw: Vec<RawRow> = deserialize_rows(reader, &STIMULUS_COLUMNS)?;

    let mut stimuli: Vec<Stimulus> = Vec::new();
    let mut seen: HashMap<(String, String, String), usize> = HashMap::new();

    for (idx, row) in raw.into_iter().enumerate() {
        require_fields(
            idx + 1,
            &[
                ("phenomenon", &row.phenomenon),
                ("test_item", &row.test_item),
                ("condition", &row.condition),
                ("sentence", &row.sentence),
            ],
        )?;

        let key = (
            row.phenomenon.clone(),
            row.test_item.clone(),
            row.condition.clone(),
        );
        if let Some(&pos) = seen.get(&key) {
            if stimuli[pos].sentence != row.sentence {
                return Err(StimulusError::ConflictingSentences {
                    phenomenon: row.phenomenon,
                    test_item: row.test_item,
                    condition: row.condition,
                });
            }
            continue;
        }

        seen.insert(key, stimuli.len());
        stimuli.push(Stimulus {
            phenomenon: row.phenomenon,
            test_item: row.test_item,
            condition: row.condition,
            sentence: row.sentence,
        });
    }

    sort_stimuli(&mut stimuli)?;

    tracing::info!(unique = stimuli.len(), "Extracted stimuli");
    Ok(stimuli)
}

/// Write stimuli as CSV with a header row
///
/// # Errors
///
/// Returns an error if writing fails.
pub fn write_stimuli<W: Write>(writer: W, stimuli: &[Stimulus]) -> Result<(), StimulusError> {
    let mut wtr = csv::Writer::from_writer(writer);
    for s in stimuli {
        wtr.serialize(s)?;
    }
    wtr.flush()?;
    Ok(())
}
