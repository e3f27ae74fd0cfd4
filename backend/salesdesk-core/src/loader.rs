// src/loader.rs
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error reading sheet ({context}): {source}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },
}

// --- Sheet ---

/// The first table of an uploaded file, held as raw text cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sheet {
    rows: Vec<Vec<String>>,
}

impl Sheet {
    pub fn from_rows(rows: Vec<Vec<String>>) -> Self {
        Self { rows }
    }

    pub fn from_csv_bytes(bytes: &[u8]) -> Result<Self, LoaderError> {
        let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(bytes);

        let mut rows = Vec::new();
        for record in reader.byte_records() {
            let record = record?;
            rows.push(
                record
                    .iter()
                    .map(|cell| String::from_utf8_lossy(cell).into_owned())
                    .collect(),
            );
        }
        debug!("Loaded sheet with {} raw rows", rows.len());
        Ok(Self { rows })
    }

    pub fn from_path(path: &Path) -> Result<Self, LoaderError> {
        let bytes = std::fs::read(path).map_err(|e| LoaderError::Io {
            source: e,
            context: format!("reading {}", path.display()),
        })?;
        Self::from_csv_bytes(&bytes)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.iter().all(|row| is_blank(row))
    }

    pub fn raw_rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// Rows below `start_row` keyed by the labels found on `start_row`.
    /// Blank rows are skipped and short rows are padded with `default`.
    pub fn keyed_rows(&self, start_row: usize, default: &str) -> Vec<SheetRow> {
        let Some(header_row) = self.rows.get(start_row) else {
            return Vec::new();
        };
        let headers = header_labels(header_row);

        self.rows
            .iter()
            .skip(start_row + 1)
            .filter(|row| !is_blank(row))
            .map(|row| SheetRow {
                cells: headers
                    .iter()
                    .enumerate()
                    .map(|(i, header)| {
                        let value = row.get(i).map(String::as_str).unwrap_or(default);
                        (header.clone(), value.to_string())
                    })
                    .collect(),
            })
            .collect()
    }
}

fn is_blank(row: &[String]) -> bool {
    row.iter().all(|cell| cell.trim().is_empty())
}

// Empty labels become `__EMPTY`, `__EMPTY_1`...; repeated labels get `_1`, `_2`...
fn header_labels(row: &[String]) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    row.iter()
        .map(|cell| {
            let base = if cell.trim().is_empty() {
                "__EMPTY".to_string()
            } else {
                cell.clone()
            };
            let count = seen.entry(base.clone()).or_insert(0);
            let label = if *count == 0 {
                base
            } else {
                format!("{}_{}", base, count)
            };
            *count += 1;
            label
        })
        .collect()
}

// --- SheetRow ---

/// One data row as ordered `(header, value)` pairs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SheetRow {
    cells: Vec<(String, String)>,
}

pub fn normalize_header(header: &str) -> String {
    header.trim().to_lowercase()
}

impl SheetRow {
    pub fn new<I, K, V>(cells: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            cells: cells
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Value under a header, compared after trim + lower-case.
    pub fn get(&self, header: &str) -> Option<&str> {
        let wanted = normalize_header(header);
        self.cells
            .iter()
            .find(|(key, _)| normalize_header(key) == wanted)
            .map(|(_, value)| value.as_str())
    }

    pub fn has_header(&self, header: &str) -> bool {
        self.get(header).is_some()
    }

    pub fn first_value(&self) -> Option<&str> {
        self.cells.first().map(|(_, value)| value.as_str())
    }

    pub fn headers(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(key, _)| key.as_str())
    }

    pub fn cells(&self) -> &[(String, String)] {
        &self.cells
    }
}

impl Serialize for SheetRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.cells.len()))?;
        for (key, value) in &self.cells {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

struct SheetRowVisitor;

impl<'de> Visitor<'de> for SheetRowVisitor {
    type Value = SheetRow;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a map of column header to cell text")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut cells = Vec::with_capacity(access.size_hint().unwrap_or(0));
        while let Some((key, value)) = access.next_entry::<String, serde_json::Value>()? {
            let text = match value {
                serde_json::Value::String(s) => s,
                serde_json::Value::Null => String::new(),
                other => other.to_string(),
            };
            cells.push((key, text));
        }
        Ok(SheetRow { cells })
    }
}

impl<'de> Deserialize<'de> for SheetRow {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(SheetRowVisitor)
    }
}
