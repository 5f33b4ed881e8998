//! Output locations and CSV writers.
//!
//! ```text
//! <root>/minimal_pairs/sentence_surprisals/<model>.csv
//! <root>/minimal_pairs/token_surprisals/<model>.csv
//! <root>/original/<model>.csv
//! ```

use crate::runner::{PromptRecord, SentenceSurprisalRow, TokenSurprisalRow};
use serde::Serialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while writing results
#[derive(Error, Debug)]
pub enum ResultsError {
    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

impl ResultsError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn csv(path: &Path, source: csv::Error) -> Self {
        Self::Csv {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// File stem for a model identifier: namespace dropped, lower-cased,
/// remaining path-unsafe characters replaced with `_`.
///
/// `org/model-Name` becomes `model-name`.
#[must_use]
pub fn safe_model_name(model_id: &str) -> String {
    let last = model_id.rsplit('/').next().unwrap_or(model_id);
    last.chars()
        .map(|c| match c {
            '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect::<String>()
        .to_lowercase()
}

/// Output paths for one model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    root: PathBuf,
    file_name: String,
}

impl OutputLayout {
    #[must_use]
    pub fn new(root: impl AsRef<Path>, model_id: &str) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            file_name: format!("{}.csv", safe_model_name(model_id)),
        }
    }

    /// Sentence-level minimal-pair table
    #[must_use]
    pub fn sentence_surprisals(&self) -> PathBuf {
        self.root
            .join("minimal_pairs")
            .join("sentence_surprisals")
            .join(&self.file_name)
    }

    /// Token-level minimal-pair table
    #[must_use]
    pub fn token_surprisals(&self) -> PathBuf {
        self.root
            .join("minimal_pairs")
            .join("token_surprisals")
            .join(&self.file_name)
    }

    /// Prompted-judgment table
    #[must_use]
    pub fn prompting(&self) -> PathBuf {
        self.root.join("original").join(&self.file_name)
    }

    #[must_use]
    pub fn file_name(&self) -> &str {
        &self.file_name
    }
}

fn create_parent(path: &Path) -> Result<(), ResultsError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ResultsError::io(parent, e))?;
    }
    Ok(())
}

fn open_writer(path: &Path, headers: &[&str]) -> Result<csv::Writer<File>, ResultsError> {
    create_parent(path)?;
    let file = File::create(path).map_err(|e| ResultsError::io(path, e))?;
    let mut wtr = csv::WriterBuilder::new().has_headers(false).from_writer(file);
    wtr.write_record(headers)
        .map_err(|e| ResultsError::csv(path, e))?;
    Ok(wtr)
}

/// Write `rows` under an explicit header (written even when `rows` is empty).
///
/// # Errors
///
/// Returns an error if the directory or file cannot be created or written.
pub fn write_table<T: Serialize>(
    path: &Path,
    headers: &[&str],
    rows: &[T],
) -> Result<(), ResultsError> {
    let mut wtr = open_writer(path, headers)?;
    for row in rows {
        wtr.serialize(row).map_err(|e| ResultsError::csv(path, e))?;
    }
    wtr.flush().map_err(|e| ResultsError::io(path, e))?;
    tracing::info!(path = %path.display(), rows = rows.len(), "Wrote table");
    Ok(())
}

/// Write the sentence-level minimal-pair table
///
/// # Errors
///
/// See [`write_table`].
pub fn write_sentence_surprisals(
    path: &Path,
    rows: &[SentenceSurprisalRow],
) -> Result<(), ResultsError> {
    write_table(path, &SentenceSurprisalRow::HEADERS, rows)
}

/// Write the token-level minimal-pair table
///
/// # Errors
///
/// See [`write_table`].
pub fn write_token_surprisals(path: &Path, rows: &[TokenSurprisalRow]) -> Result<(), ResultsError> {
    write_table(path, &TokenSurprisalRow::HEADERS, rows)
}

/// Write the prompted-judgment table
///
/// # Errors
///
/// See [`write_table`].
pub fn write_prompt_records(path: &Path, rows: &[PromptRecord]) -> Result<(), ResultsError> {
    write_table(path, &PromptRecord::HEADERS, rows)
}

/// Read a sentence-level table back
///
/// # Errors
///
/// Returns an error if the file cannot be opened or parsed.
pub fn read_sentence_surprisals(path: &Path) -> Result<Vec<SentenceSurprisalRow>, ResultsError> {
    read_table(path)
}

/// Read a prompted-judgment table back
///
/// # Errors
///
/// Returns an error if the file cannot be opened or parsed.
pub fn read_prompt_records(path: &Path) -> Result<Vec<PromptRecord>, ResultsError> {
    read_table(path)
}

fn read_table<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>, ResultsError> {
    let mut rdr = csv::Reader::from_path(path).map_err(|e| ResultsError::csv(path, e))?;
    rdr.deserialize()
        .collect::<Result<Vec<T>, _>>()
        .map_err(|e| ResultsError::csv(path, e))
}

/// Path of the in-progress copy of `path`
#[must_use]
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

/// Sentence-level rows streamed to `<name>.csv.partial` as they are computed.
///
/// [`SentenceStream::finish`] writes the final table and removes the partial
/// file. If the run fails first, only the partial file exists.
pub struct SentenceStream {
    final_path: PathBuf,
    partial_path: PathBuf,
    writer: csv::Writer<File>,
    rows: usize,
}

impl SentenceStream {
    /// Open the partial file and write its header
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn create(final_path: &Path) -> Result<Self, ResultsError> {
        let partial = partial_path(final_path);
        let writer = open_writer(&partial, &SentenceSurprisalRow::HEADERS)?;
        tracing::debug!(path = %partial.display(), "Streaming sentence surprisals");
        Ok(Self {
            final_path: final_path.to_path_buf(),
            partial_path: partial,
            writer,
            rows: 0,
        })
    }

    /// Append and flush one row
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be written.
    pub fn append(&mut self, row: &SentenceSurprisalRow) -> Result<(), ResultsError> {
        self.writer
            .serialize(row)
            .map_err(|e| ResultsError::csv(&self.partial_path, e))?;
        self.writer
            .flush()
            .map_err(|e| ResultsError::io(&self.partial_path, e))?;
        self.rows += 1;
        Ok(())
    }

    /// Rows streamed so far
    #[must_use]
    pub const fn rows(&self) -> usize {
        self.rows
    }

    /// Write the complete table to its final path and drop the partial file.
    ///
    /// # Errors
    ///
    /// Returns an error if the final table cannot be written.
    pub fn finish(self, rows: &[SentenceSurprisalRow]) -> Result<PathBuf, ResultsError> {
        drop(self.writer);
        write_sentence_surprisals(&self.final_path, rows)?;
        std::fs::remove_file(&self.partial_path)
            .map_err(|e| ResultsError::io(&self.partial_path, e))?;
        Ok(self.final_path)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sentence_row(item: &str, g: Option<f64>) -> SentenceSurprisalRow {
        SentenceSurprisalRow {
            phenomenon: "A".to_string(),
            test_item: item.to_string(),
            original_condition: "X".to_string(),
            sentence_grammatical: Some("A.".to_string()),
            sentence_ungrammatical: None,
            sum_surprisal_grammatical: g,
            sum_surprisal_ungrammatical: None,
        }
    }

    #[test]
    fn test_safe_model_name() {
        assert_eq!(safe_model_name("org/model-Name"), "model-name");
        assert_eq!(safe_model_name("text-davinci-002"), "text-davinci-002");
        assert_eq!(safe_model_name("a/b/C"), "c");
        assert_eq!(safe_model_name("ns/weird:name"), "weird_name");
    }

    #[test]
    fn test_output_layout() {
        let layout = OutputLayout::new("out", "meta-llama/Llama-3.2-1B");
        assert_eq!(layout.file_name(), "llama-3.2-1b.csv");
        assert_eq!(
            layout.sentence_surprisals(),
            PathBuf::from("out/minimal_pairs/sentence_surprisals/llama-3.2-1b.csv")
        );
        assert_eq!(
            layout.token_surprisals(),
            PathBuf::from("out/minimal_pairs/token_surprisals/llama-3.2-1b.csv")
        );
        assert_eq!(
            layout.prompting(),
            PathBuf::from("out/original/llama-3.2-1b.csv")
        );
    }

    #[test]
    fn test_partial_path() {
        assert_eq!(
            partial_path(Path::new("out/gpt2.csv")),
            PathBuf::from("out/gpt2.csv.partial")
        );
    }

    #[test]
    fn test_write_sentence_table_nulls_are_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("m.csv");
        write_sentence_surprisals(&path, &[sentence_row("item 2", Some(4.5))]).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "phenomenon,test_item,original_condition,sentence_grammatical,sentence_ungrammatical,sum_surprisal_grammatical,sum_surprisal_ungrammatical"
        );
        assert_eq!(lines.next().unwrap(), "A,item 2,X,A.,,4.5,");
        assert!(lines.next().is_none());
    }

    #[test]
    fn test_empty_table_still_has_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.csv");
        write_token_surprisals(&path, &[]).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            text.trim_end(),
            "token,surprisal,token_id,model,condition,phenomenon,test_item,original_condition"
        );
    }

    #[test]
    fn test_sentence_table_roundtrip_keeps_nulls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.csv");
        let rows = vec![sentence_row("item 1", Some(1.25)), sentence_row("item 2", None)];
        write_sentence_surprisals(&path, &rows).unwrap();
        assert_eq!(read_sentence_surprisals(&path).unwrap(), rows);
    }

    #[test]
    fn test_stream_finish_replaces_partial() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("s").join("m.csv");
        let rows = vec![sentence_row("item 1", Some(2.0))];

        let mut stream = SentenceStream::create(&final_path).unwrap();
        stream.append(&rows[0]).unwrap();
        assert_eq!(stream.rows(), 1);
        assert!(partial_path(&final_path).exists());
        assert!(!final_path.exists());

        let written = stream.finish(&rows).unwrap();
        assert_eq!(written, final_path);
        assert!(final_path.exists());
        assert!(!partial_path(&final_path).exists());
    }

    #[test]
    fn test_stream_abandoned_leaves_only_partial() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("m.csv");
        let mut stream = SentenceStream::create(&final_path).unwrap();
        stream.append(&sentence_row("item 1", None)).unwrap();
        drop(stream);

        assert!(!final_path.exists());
        let partial = std::fs::read_to_string(partial_path(&final_path)).unwrap();
        assert_eq!(partial.lines().count(), 2);
    }
}
