//! Store file encoding.
//!
//! The store file is UTF-8 CSV with the header
//! `filepath,watched,resume_time,last_updated`. Booleans are the literals
//! `True`/`False`; numbers are decimal floats.
//!
//! Updates go through [`StoreTable`], which keeps every field as the text
//! that was read so rows not touched by an update are written back verbatim.

use crate::error::{Result, StoreError};
use crate::types::{PlaybackRecord, PlaybackUpdate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Column names, in file order.
pub const HEADER: [&str; 4] = ["filepath", "watched", "resume_time", "last_updated"];

/// One row of the store file, as text.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreRow {
    pub filepath: String,
    pub watched: String,
    pub resume_time: String,
    pub last_updated: String,
    /// Fields past the fourth column, carried through unchanged.
    #[serde(skip)]
    pub extra: Vec<String>,
}

impl StoreRow {
    pub fn new(filepath: &str, update: PlaybackUpdate, now: f64) -> Self {
        Self {
            filepath: filepath.to_string(),
            watched: format_bool(update.watched).to_string(),
            resume_time: format_float(update.resume_position),
            last_updated: format_float(now),
            extra: Vec::new(),
        }
    }

    /// Build a row from a record of any width. Missing columns are empty.
    fn from_record(record: &csv::StringRecord) -> Option<Self> {
        let filepath = record.get(0)?.to_string();
        let field = |i: usize| record.get(i).unwrap_or_default().to_string();
        Some(Self {
            filepath,
            watched: field(1),
            resume_time: field(2),
            last_updated: field(3),
            extra: record.iter().skip(HEADER.len()).map(str::to_string).collect(),
        })
    }

    /// Whether the row has exactly the expected columns with parseable values.
    pub fn is_well_formed(&self) -> bool {
        self.extra.is_empty() && self.to_record().is_ok()
    }

    pub fn watched(&self) -> bool {
        self.watched.trim() == "True"
    }

    pub fn resume_position(&self) -> Result<f64> {
        parse_float("resume_time", &self.resume_time)
    }

    pub fn to_record(&self) -> Result<PlaybackRecord> {
        Ok(PlaybackRecord {
            watched: self.watched(),
            resume_position: self.resume_position()?,
            last_updated: parse_float("last_updated", &self.last_updated)?,
        })
    }
}

/// In-memory copy of a store file, ordered as on disk, one row per key.
#[derive(Clone, Debug, Default)]
pub struct StoreTable {
    rows: Vec<StoreRow>,
    index: HashMap<String, usize>,
}

impl StoreTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a complete store file for rewriting.
    ///
    /// Rows of the wrong width or with unparseable values are kept as text
    /// (short rows padded with empty fields) so a write carries them through.
    /// Only content that is not readable CSV at all, such as invalid UTF-8,
    /// is an error.
    ///
    /// A key that appears more than once keeps its first position and its
    /// last values.
    pub fn parse(content: &[u8]) -> Result<Self> {
        let mut table = Self::new();
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(content);
        for record in reader.records() {
            let record = record?;
            if let Some(row) = StoreRow::from_record(&record) {
                if !row.is_well_formed() {
                    tracing::warn!(
                        filepath = %row.filepath,
                        fields = record.len(),
                        "malformed store row; keeping it as is"
                    );
                }
                table.put(row);
            }
        }
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&StoreRow> {
        self.index.get(key).map(|&i| &self.rows[i])
    }

    pub fn rows(&self) -> &[StoreRow] {
        &self.rows
    }

    /// Insert or replace the row for `key`, stamping it with `now`.
    pub fn upsert(&mut self, key: &str, update: PlaybackUpdate, now: f64) {
        self.put(StoreRow::new(key, update, now));
    }

    fn put(&mut self, row: StoreRow) {
        match self.index.get(&row.filepath) {
            Some(&i) => self.rows[i] = row,
            None => {
                self.index.insert(row.filepath.clone(), self.rows.len());
                self.rows.push(row);
            }
        }
    }

    /// Serialize with header, CRLF line endings.
    pub fn encode(&self) -> Result<String> {
        let mut writer = csv::WriterBuilder::new()
            .terminator(csv::Terminator::CRLF)
            .flexible(true)
            .from_writer(Vec::new());
        writer.write_record(HEADER)?;
        for row in &self.rows {
            let fields = [
                &row.filepath,
                &row.watched,
                &row.resume_time,
                &row.last_updated,
            ];
            writer.write_record(fields.into_iter().chain(&row.extra))?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| StoreError::Io(e.into_error()))?;
        String::from_utf8(bytes).map_err(|e| StoreError::InvalidFormat(e.to_string()))
    }
}

/// Decode records for a full read.
///
/// Stops at the first row that fails to parse, returning what was decoded
/// before it along with the error.
pub fn decode_records(content: &[u8]) -> (HashMap<String, PlaybackRecord>, Option<StoreError>) {
    let mut records = HashMap::new();
    let mut reader = csv::ReaderBuilder::new().from_reader(content);

    for row in reader.deserialize::<StoreRow>() {
        let parsed = row
            .map_err(StoreError::from)
            .and_then(|row| row.to_record().map(|record| (row.filepath, record)));
        match parsed {
            Ok((key, record)) => {
                records.insert(key, record);
            }
            Err(e) => return (records, Some(e)),
        }
    }

    (records, None)
}

/// Number of non-blank lines, header included.
pub fn line_count(content: &str) -> usize {
    content.trim().lines().count()
}

pub fn format_bool(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

/// Decimal text for a float; integral values keep a trailing `.0`.
pub fn format_float(value: f64) -> String {
    let s = value.to_string();
    if value.is_finite() && !s.contains('.') {
        format!("{}.0", s)
    } else {
        s
    }
}

fn parse_float(field: &str, text: &str) -> Result<f64> {
    text.trim()
        .parse::<f64>()
        .map_err(|_| StoreError::InvalidFormat(format!("bad {} value: {:?}", field, text)))
}
