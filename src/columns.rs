// Column mapping tables for delimited sources.
//
// Each tabular input is described by a static list of `ColumnSpec`s. The
// header is checked once against that list and every cell is decoded once
// into a typed `Cell`; loaders then build their records from the decoded
// rows instead of poking at raw string maps.
use std::borrow::Cow;
use std::path::Path;

use csv::{ByteRecord, ReaderBuilder};
use serde_json::{Map, Value};

use crate::error::{PipelineError, Result};
use crate::util::{parse_f64_safe, parse_i64_lenient};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeKind {
    Text,
    Int,
    Float,
}

#[derive(Debug, Clone, Copy)]
pub struct ColumnSpec {
    /// Name used by the loaders.
    pub field: &'static str,
    /// Header text in the source file.
    pub source: &'static str,
    pub kind: DecodeKind,
    pub required: bool,
}

impl ColumnSpec {
    pub const fn required(field: &'static str, source: &'static str, kind: DecodeKind) -> Self {
        ColumnSpec {
            field,
            source,
            kind,
            required: true,
        }
    }

    pub const fn optional(field: &'static str, source: &'static str, kind: DecodeKind) -> Self {
        ColumnSpec {
            field,
            source,
            kind,
            required: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Int(i64),
    Float(f64),
    /// Optional column not present in this file.
    Absent,
}

impl Cell {
    fn decode(kind: DecodeKind, raw: &str) -> Cell {
        match kind {
            DecodeKind::Text => Cell::Text(raw.trim().to_string()),
            DecodeKind::Int => Cell::Int(parse_i64_lenient(Some(raw)).unwrap_or(0)),
            DecodeKind::Float => Cell::Float(parse_f64_safe(Some(raw)).unwrap_or(0.0)),
        }
    }

    fn to_json(&self) -> Value {
        match self {
            Cell::Text(s) => Value::String(s.clone()),
            Cell::Int(i) => Value::from(*i),
            Cell::Float(f) => Value::from(*f),
            Cell::Absent => Value::Null,
        }
    }
}

/// One source row decoded against its column table.
#[derive(Debug, Clone)]
pub struct DecodedRow {
    specs: &'static [ColumnSpec],
    cells: Vec<Cell>,
}

static ABSENT: Cell = Cell::Absent;

impl DecodedRow {
    fn cell(&self, field: &str) -> &Cell {
        self.specs
            .iter()
            .position(|s| s.field == field)
            .and_then(|i| self.cells.get(i))
            .unwrap_or(&ABSENT)
    }

    pub fn text(&self, field: &str) -> Option<&str> {
        match self.cell(field) {
            Cell::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn int(&self, field: &str) -> Option<i64> {
        match self.cell(field) {
            Cell::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn float(&self, field: &str) -> Option<f64> {
        match self.cell(field) {
            Cell::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Row as a JSON object keyed by field name, kept on missing-join records.
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        for (spec, cell) in self.specs.iter().zip(&self.cells) {
            if *cell != Cell::Absent {
                map.insert(spec.field.to_string(), cell.to_json());
            }
        }
        Value::Object(map)
    }
}

/// UTF-8 when valid, otherwise one byte per char. Census extracts ship as
/// Windows-1252, whose letters sit where Latin-1 puts them.
fn decode_text(bytes: &[u8]) -> Cow<'_, str> {
    match std::str::from_utf8(bytes) {
        Ok(s) => Cow::Borrowed(s),
        Err(_) => Cow::Owned(bytes.iter().map(|&b| char::from(b)).collect()),
    }
}

/// Read a headed, comma-delimited file and decode every row.
pub fn read_table(path: &Path, specs: &'static [ColumnSpec]) -> Result<Vec<DecodedRow>> {
    if !path.is_file() {
        return Err(PipelineError::MissingFile {
            path: path.to_path_buf(),
        });
    }
    let mut rdr = ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| PipelineError::csv(path, e))?;

    let headers: Vec<String> = rdr
        .byte_headers()
        .map_err(|e| PipelineError::csv(path, e))?
        .iter()
        .map(|h| decode_text(h).trim_start_matches('\u{feff}').trim().to_string())
        .collect();

    let mut positions = Vec::with_capacity(specs.len());
    for spec in specs {
        let pos = headers.iter().position(|h| h == spec.source);
        if pos.is_none() && spec.required {
            return Err(PipelineError::MissingColumn {
                path: path.to_path_buf(),
                column: spec.source.to_string(),
            });
        }
        positions.push(pos);
    }

    let mut rows = Vec::new();
    let mut record = ByteRecord::new();
    while rdr
        .read_byte_record(&mut record)
        .map_err(|e| PipelineError::csv(path, e))?
    {
        let cells = specs
            .iter()
            .zip(&positions)
            .map(|(spec, pos)| match pos {
                Some(i) => Cell::decode(spec.kind, &decode_text(record.get(*i).unwrap_or_default())),
                None => Cell::Absent,
            })
            .collect();
        rows.push(DecodedRow { specs, cells });
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    static SPECS: &[ColumnSpec] = &[
        ColumnSpec::required("name", "Name", DecodeKind::Text),
        ColumnSpec::required("count", "Count", DecodeKind::Int),
        ColumnSpec::optional("area", "Area", DecodeKind::Float),
    ];

    #[test]
    fn decodes_cells_by_kind() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.csv");
        fs::write(&path, "\u{feff}Name,Count,Area\n Ohio ,\"11,689,100\",40860.7\nGuam,n/a,\n").unwrap();

        let rows = read_table(&path, SPECS).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].text("name"), Some("Ohio"));
        assert_eq!(rows[0].int("count"), Some(11_689_100));
        assert_eq!(rows[0].float("area"), Some(40860.7));
        assert_eq!(rows[1].int("count"), Some(0));
        assert_eq!(rows[1].float("area"), Some(0.0));
    }

    #[test]
    fn optional_columns_may_be_absent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.csv");
        fs::write(&path, "Count,Name\n3,Utah\n").unwrap();

        let rows = read_table(&path, SPECS).unwrap();
        assert_eq!(rows[0].text("name"), Some("Utah"));
        assert_eq!(rows[0].float("area"), None);
        assert_eq!(
            rows[0].to_json(),
            serde_json::json!({ "name": "Utah", "count": 3 })
        );
    }

    #[test]
    fn legacy_encoded_text_is_kept() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.csv");
        fs::write(&path, b"Name,Count\nDo\xf1a Ana County,218195\n").unwrap();

        let rows = read_table(&path, SPECS).unwrap();
        assert_eq!(rows[0].text("name"), Some("Do\u{f1}a Ana County"));
        assert_eq!(rows[0].int("count"), Some(218_195));
    }

    #[test]
    fn missing_required_column_is_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.csv");
        fs::write(&path, "Name,Area\nUtah,1.0\n").unwrap();

        match read_table(&path, SPECS) {
            Err(PipelineError::MissingColumn { column, .. }) => assert_eq!(column, "Count"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn missing_file_is_fatal() {
        let dir = tempdir().unwrap();
        let err = read_table(&dir.path().join("nope.csv"), SPECS).unwrap_err();
        assert!(matches!(err, PipelineError::MissingFile { .. }));
    }
}
