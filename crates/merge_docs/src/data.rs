use anyhow::{Context, Result};
use calamine::{Data, Reader, open_workbook_auto_from_rs};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::io::Cursor;
use std::path::Path;
use tracing::{debug, info};

use merge_core::MergeError;

use crate::format::{format_plain_number, parse_date, to_number};

/// A single spreadsheet cell.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    Date(NaiveDateTime),
}

impl CellValue {
    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.trim().is_empty() || s.trim().eq_ignore_ascii_case("nan"),
            _ => false,
        }
    }

    /// Numeric value, parsing text when needed.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            CellValue::Text(s) => to_number(s),
            _ => None,
        }
    }

    fn from_text(s: &str) -> Self {
        if s.trim().is_empty() {
            CellValue::Empty
        } else {
            CellValue::Text(s.to_string())
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::Text(s) => write!(f, "{s}"),
            CellValue::Number(n) => write!(f, "{}", format_plain_number(*n)),
            CellValue::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            CellValue::Date(dt) => write!(f, "{}", dt.format("%Y-%m-%d")),
        }
    }
}

/// Inferred type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ColumnKind {
    Empty,
    Text,
    Number,
    Date,
    Mixed,
}

/// Summary of one column's content.
#[derive(Debug, Clone, Serialize)]
pub struct ColumnProfile {
    pub name: String,
    pub kind: ColumnKind,
    pub non_empty: usize,
    pub unique_ratio: f64,
    pub sample: String,
}

/// Rows of named fields, loaded from CSV or a spreadsheet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

impl DataTable {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<CellValue>>) -> Self {
        let width = headers.len();
        let rows = rows
            .into_iter()
            .map(|mut r| {
                r.resize(width, CellValue::Empty);
                r
            })
            .filter(|r| !r.iter().all(CellValue::is_empty))
            .collect();
        Self {
            headers: unique_headers(headers),
            rows,
        }
    }

    /// Load a data file, choosing the reader by extension.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read data file: {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();

        let table = match ext.as_str() {
            "csv" | "txt" => Self::from_csv_bytes(&bytes, None),
            "tsv" => Self::from_csv_bytes(&bytes, Some(b'\t')),
            "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => Self::from_spreadsheet_bytes(bytes),
            other => Err(MergeError::InvalidData(format!("unsupported file type '.{other}'")).into()),
        }
        .with_context(|| format!("Failed to load data file: {}", path.display()))?;

        info!(
            "Loaded {} rows x {} columns from {}",
            table.rows.len(),
            table.headers.len(),
            path.display()
        );
        Ok(table)
    }

    /// Parse delimited text. Every cell is kept as text.
    ///
    /// Without an explicit delimiter, `;` is used when the header line has
    /// more semicolons than commas.
    pub fn from_csv_bytes(bytes: &[u8], delimiter: Option<u8>) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| MergeError::InvalidData(format!("file is not UTF-8 text ({e})")))?;
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);

        let delimiter = delimiter.unwrap_or_else(|| sniff_delimiter(text));
        let (headers, rows) = crate::csv::parse_delimited(text, delimiter)
            .map_err(|e| MergeError::InvalidData(format!("{e:#}")))?;
        if headers.iter().all(|h| h.trim().is_empty()) {
            return Err(MergeError::InvalidData("no header row found".into()).into());
        }

        let rows = rows
            .into_iter()
            .map(|r| r.iter().map(|c| CellValue::from_text(c)).collect())
            .collect();
        Ok(Self::new(headers, rows))
    }

    /// Parse the first sheet of an Excel or OpenDocument workbook.
    pub fn from_spreadsheet_bytes(bytes: Vec<u8>) -> Result<Self> {
        let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))
            .map_err(|e| MergeError::InvalidData(format!("unreadable spreadsheet ({e})")))?;
        let sheet = workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| MergeError::InvalidData("workbook has no sheets".into()))?;
        let range = workbook
            .worksheet_range(&sheet)
            .map_err(|e| MergeError::InvalidData(format!("sheet '{sheet}' unreadable ({e})")))?;

        let mut rows = range.rows();
        let headers: Vec<String> = rows
            .next()
            .ok_or_else(|| MergeError::InvalidData(format!("sheet '{sheet}' is empty")))?
            .iter()
            .map(|c| cell_from_sheet(c).to_string().trim().to_string())
            .collect();
        let rows = rows
            .map(|r| r.iter().map(cell_from_sheet).collect())
            .collect();

        debug!("Read sheet '{sheet}'");
        Ok(Self::new(headers, rows))
    }

    /// Trim headers and replace spaces with underscores.
    pub fn normalize_column_names(&mut self) {
        for h in &mut self.headers {
            *h = h.trim().replace(' ', "_");
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn cell(&self, row: usize, column: &str) -> Option<&CellValue> {
        let col = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(col))
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Infer a kind per column.
    pub fn profile_columns(&self) -> Vec<ColumnProfile> {
        self.headers
            .iter()
            .enumerate()
            .map(|(col, name)| {
                let values: Vec<&CellValue> = self
                    .rows
                    .iter()
                    .map(|r| &r[col])
                    .filter(|v| !v.is_empty())
                    .collect();

                let (mut numbers, mut dates) = (0, 0);
                for v in &values {
                    match v {
                        CellValue::Number(_) => numbers += 1,
                        CellValue::Date(_) => dates += 1,
                        CellValue::Text(s) if parse_date(s).is_some() => dates += 1,
                        CellValue::Text(s) if to_number(s).is_some() => numbers += 1,
                        _ => {}
                    }
                }
                let kind = match (values.len(), numbers, dates) {
                    (0, _, _) => ColumnKind::Empty,
                    (n, k, 0) if k == n => ColumnKind::Number,
                    (n, 0, k) if k == n => ColumnKind::Date,
                    (_, 0, 0) => ColumnKind::Text,
                    _ => ColumnKind::Mixed,
                };

                let unique: HashSet<String> = values.iter().map(|v| v.to_string()).collect();
                let unique_ratio = if values.is_empty() {
                    0.0
                } else {
                    unique.len() as f64 / values.len() as f64
                };

                ColumnProfile {
                    name: name.clone(),
                    kind,
                    non_empty: values.len(),
                    unique_ratio,
                    sample: values.first().map(|v| v.to_string()).unwrap_or_default(),
                }
            })
            .collect()
    }
}

fn sniff_delimiter(text: &str) -> u8 {
    let first = text.lines().next().unwrap_or_default();
    if first.matches(';').count() > first.matches(',').count() {
        b';'
    } else {
        b','
    }
}

/// Blank headers become `Unnamed_N`; repeats get `.1`, `.2` suffixes.
fn unique_headers(headers: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    headers
        .into_iter()
        .enumerate()
        .map(|(i, h)| {
            let base = if h.trim().is_empty() {
                format!("Unnamed_{i}")
            } else {
                h
            };
            let mut name = base.clone();
            let mut n = 1;
            while !seen.insert(name.clone()) {
                name = format!("{base}.{n}");
                n += 1;
            }
            name
        })
        .collect()
}

fn cell_from_sheet(cell: &Data) -> CellValue {
    match cell {
        Data::Empty => CellValue::Empty,
        Data::String(s) => CellValue::from_text(s),
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::Float(f) => CellValue::Number(*f),
        Data::Bool(b) => CellValue::Bool(*b),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(value) => CellValue::Date(value),
            None => CellValue::Number(dt.as_f64()),
        },
        Data::DateTimeIso(s) => match parse_date(s) {
            Some(value) => CellValue::Date(value),
            None => CellValue::Text(s.clone()),
        },
        Data::DurationIso(s) => CellValue::Text(s.clone()),
        Data::Error(e) => CellValue::Text(format!("#{e:?}")),
    }
}
