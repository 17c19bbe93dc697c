//! Term source: loads the study term table from a CSV file.
//!
//! The file needs a header row with `TERM` and `SCHEMA` columns (case-sensitive).
//! Any other columns are carried along and ignored.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::models::TermRecord;

pub const TERM_COLUMN: &str = "TERM";
pub const SCHEMA_COLUMN: &str = "SCHEMA";

#[derive(Error, Debug)]
pub enum TermsError {
    #[error("could not read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{name} is not valid UTF-8 text")]
    Encoding { name: String },

    #[error("malformed CSV in {name}: {source}")]
    Csv {
        name: String,
        #[source]
        source: csv::Error,
    },

    #[error("{name} is missing required column(s): {missing}")]
    MissingColumns { name: String, missing: String },

    #[error("{name} line {line} has {found} fields, more than the {expected} columns in the header")]
    TooManyFields {
        name: String,
        line: u64,
        expected: usize,
        found: usize,
    },

    #[error("{name} is too large ({size} bytes, limit {limit})")]
    TooLarge {
        name: String,
        size: usize,
        limit: usize,
    },
}

/// Where a term table comes from.
#[derive(Debug, Clone)]
pub enum TermSource {
    /// The bundled default file.
    File(PathBuf),
    /// A file supplied by the student.
    Upload { name: String, content: Vec<u8> },
}

impl TermSource {
    pub fn name(&self) -> String {
        match self {
            TermSource::File(path) => path.display().to_string(),
            TermSource::Upload { name, .. } => name.clone(),
        }
    }
}

/// Rows of a term file, keyed by position. Terms need not be unique.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TermTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl TermTable {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { headers, rows }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a table with just the two required columns.
    pub fn from_records(records: impl IntoIterator<Item = TermRecord>) -> Self {
        let rows = records
            .into_iter()
            .map(|r| vec![r.term, r.schema])
            .collect();
        Self {
            headers: vec![TERM_COLUMN.to_string(), SCHEMA_COLUMN.to_string()],
            rows,
        }
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn has_required_columns(&self) -> bool {
        self.column(TERM_COLUMN).is_some() && self.column(SCHEMA_COLUMN).is_some()
    }

    /// The record at `index`, or `None` when out of range or the required
    /// columns are absent.
    pub fn record(&self, index: usize) -> Option<TermRecord> {
        let term_idx = self.column(TERM_COLUMN)?;
        let schema_idx = self.column(SCHEMA_COLUMN)?;
        let row = self.rows.get(index)?;
        Some(TermRecord {
            term: row.get(term_idx).cloned().unwrap_or_default(),
            schema: row.get(schema_idx).cloned().unwrap_or_default(),
        })
    }

    pub fn records(&self) -> impl Iterator<Item = TermRecord> + '_ {
        (0..self.rows.len()).filter_map(|i| self.record(i))
    }
}

/// Load and validate a term table.
pub fn load(source: &TermSource) -> Result<TermTable, TermsError> {
    let name = source.name();
    let table = match source {
        TermSource::File(path) => {
            let bytes = std::fs::read(path).map_err(|e| TermsError::Read {
                path: name.clone(),
                source: e,
            })?;
            parse(&name, &bytes)?
        }
        TermSource::Upload { content, .. } => parse(&name, content)?,
    };

    tracing::info!(source = %name, rows = table.len(), "Loaded term table");
    Ok(table)
}

/// Load an uploaded file, rejecting it up front when over `limit` bytes.
pub fn load_upload(name: &str, content: Vec<u8>, limit: usize) -> Result<TermTable, TermsError> {
    if content.len() > limit {
        return Err(TermsError::TooLarge {
            name: name.to_string(),
            size: content.len(),
            limit,
        });
    }
    load(&TermSource::Upload {
        name: name.to_string(),
        content,
    })
}

/// Raw bytes of the default file, offered to students as a template.
pub fn template_bytes(path: &Path) -> Result<Vec<u8>, TermsError> {
    std::fs::read(path).map_err(|e| TermsError::Read {
        path: path.display().to_string(),
        source: e,
    })
}

fn parse(name: &str, bytes: &[u8]) -> Result<TermTable, TermsError> {
    let text = std::str::from_utf8(bytes).map_err(|_| TermsError::Encoding {
        name: name.to_string(),
    })?;
    // Spreadsheet exports often start with a byte-order mark.
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let csv_err = |e: csv::Error| TermsError::Csv {
        name: name.to_string(),
        source: e,
    };

    // Short rows are kept; their missing cells read as empty.
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(csv_err)?
        .iter()
        .map(str::to_string)
        .collect();

    let missing: Vec<&str> = [TERM_COLUMN, SCHEMA_COLUMN]
        .into_iter()
        .filter(|col| !headers.iter().any(|h| h == col))
        .collect();
    if !missing.is_empty() {
        return Err(TermsError::MissingColumns {
            name: name.to_string(),
            missing: missing.join(", "),
        });
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(csv_err)?;
        if record.len() > headers.len() {
            return Err(TermsError::TooManyFields {
                name: name.to_string(),
                line: record.position().map(|p| p.line()).unwrap_or_default(),
                expected: headers.len(),
                found: record.len(),
            });
        }
        rows.push(record.iter().map(str::to_string).collect());
    }

    Ok(TermTable::new(headers, rows))
}
