//! Dataset index
//!
//! A tabular index of clip identifiers, labels and time boundaries, built
//! fresh per run from a tab-separated metadata file with a header line.
//! Strongly labeled splits carry `onset`, `offset` and `event_label`
//! columns; rows with an empty label (clips with no events) keep the clip
//! in the index without contributing an event.

use std::fs;
use std::path::Path;

use crate::error::EvalError;

/// One metadata row
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRow {
    /// Clip filename (relative to the split's audio directory)
    pub filename: String,
    /// Event onset in seconds, when strongly labeled
    pub onset: Option<f32>,
    /// Event offset in seconds, when strongly labeled
    pub offset: Option<f32>,
    /// Event label, when present
    pub event_label: Option<String>,
}

/// Tabular index over one split's metadata
#[derive(Debug, Clone)]
pub struct DatasetIndex {
    rows: Vec<IndexRow>,
}

impl DatasetIndex {
    /// Build an index from a tab-separated metadata file.
    ///
    /// When `subpart_data` is given, the index keeps only the first N rows.
    /// This is a head-truncation for fast iteration, not a random sample.
    ///
    /// # Errors
    ///
    /// Returns `EvalError::Dataset` for a missing file, an empty file, or
    /// a header without a `filename` column.
    pub fn from_metadata(path: &Path, subpart_data: Option<usize>) -> Result<Self, EvalError> {
        let content = fs::read_to_string(path)
            .map_err(|e| EvalError::Dataset(format!("cannot read {}: {}", path.display(), e)))?;

        let mut lines = content.lines();
        let header = lines
            .next()
            .ok_or_else(|| EvalError::Dataset(format!("{} is empty", path.display())))?;
        let columns: Vec<&str> = header.split('\t').map(str::trim).collect();

        let filename_col = columns
            .iter()
            .position(|&c| c == "filename")
            .ok_or_else(|| {
                EvalError::Dataset(format!("{} has no filename column", path.display()))
            })?;
        let onset_col = columns.iter().position(|&c| c == "onset");
        let offset_col = columns.iter().position(|&c| c == "offset");
        let label_col = columns.iter().position(|&c| c == "event_label");

        let mut rows = Vec::new();
        for (lineno, line) in lines.enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            let filename = fields
                .get(filename_col)
                .map(|f| f.trim())
                .filter(|f| !f.is_empty())
                .ok_or_else(|| {
                    EvalError::Dataset(format!(
                        "{}: line {} has no filename",
                        path.display(),
                        lineno + 2
                    ))
                })?;

            let parse_time = |col: Option<usize>, name: &str| -> Result<Option<f32>, EvalError> {
                let Some(col) = col else { return Ok(None) };
                let Some(field) = fields.get(col).map(|f| f.trim()).filter(|f| !f.is_empty())
                else {
                    return Ok(None);
                };
                field.parse::<f32>().map(Some).map_err(|_| {
                    EvalError::Dataset(format!(
                        "{}: line {} has malformed {} '{}'",
                        path.display(),
                        lineno + 2,
                        name,
                        field
                    ))
                })
            };

            rows.push(IndexRow {
                filename: filename.to_string(),
                onset: parse_time(onset_col, "onset")?,
                offset: parse_time(offset_col, "offset")?,
                event_label: label_col
                    .and_then(|col| fields.get(col))
                    .map(|f| f.trim())
                    .filter(|f| !f.is_empty())
                    .map(str::to_string),
            });
        }

        if let Some(n) = subpart_data {
            if n < rows.len() {
                log::info!(
                    "Restricting {} to the first {} of {} rows",
                    path.display(),
                    n,
                    rows.len()
                );
                rows.truncate(n);
            }
        }

        log::debug!("Indexed {}: {} rows", path.display(), rows.len());
        Ok(Self { rows })
    }

    /// All index rows, in file order
    pub fn rows(&self) -> &[IndexRow] {
        &self.rows
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when the index has no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Unique clip filenames in order of first appearance
    pub fn filenames(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.rows
            .iter()
            .filter(|row| seen.insert(row.filename.as_str()))
            .map(|row| row.filename.clone())
            .collect()
    }

    /// Timed labeled events for one clip: `(label, onset, offset)` triples
    pub fn events_for(&self, filename: &str) -> Vec<(String, f32, f32)> {
        self.rows
            .iter()
            .filter(|row| row.filename == filename)
            .filter_map(|row| {
                match (&row.event_label, row.onset, row.offset) {
                    (Some(label), Some(onset), Some(offset)) => {
                        Some((label.clone(), onset, offset))
                    }
                    _ => None,
                }
            })
            .collect()
    }

    /// Deduplicated clip-level labels for one clip, in order of first appearance
    pub fn weak_labels_for(&self, filename: &str) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.rows
            .iter()
            .filter(|row| row.filename == filename)
            .filter_map(|row| row.event_label.as_deref())
            .filter(|label| seen.insert(label.to_string()))
            .map(str::to_string)
            .collect()
    }
}
