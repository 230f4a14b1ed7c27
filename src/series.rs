// Time-series ingestion.
//
// Snapshot sources are ingested one after another into per-region builders.
// A builder only appends; `finish` sorts by date and keeps the last point
// written for any date, so later sources override earlier ones.
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::NaiveDate;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::columns::{read_table, ColumnSpec, DecodeKind, DecodedRow};
use crate::error::{PipelineError, Result};
use crate::reference::RegionTable;
use crate::types::{MissingJoinRecord, MissingKind, RegionSeries, SeriesPoint};
use crate::util::{format_int, json_count, parse_compact_date, parse_snapshot_file_date};

#[derive(Debug, Default)]
pub struct SeriesBuilder {
    points: Vec<SeriesPoint>,
}

impl SeriesBuilder {
    pub fn push(&mut self, point: SeriesPoint) {
        self.points.push(point);
    }

    pub fn finish(self) -> RegionSeries {
        let mut points = self.points;
        // Stable, so equal dates keep insertion order and the last one wins.
        points.sort_by_key(|p| p.date);
        let mut unique: Vec<SeriesPoint> = Vec::with_capacity(points.len());
        for point in points {
            match unique.last_mut() {
                Some(prev) if prev.date == point.date => *prev = point,
                _ => unique.push(point),
            }
        }
        RegionSeries { points: unique }
    }
}

/// Builders for every region seen so far plus the rows that did not resolve.
#[derive(Debug, Default)]
pub struct SeriesSet {
    builders: BTreeMap<String, SeriesBuilder>,
    missing: Vec<MissingJoinRecord>,
}

impl SeriesSet {
    pub fn upsert(&mut self, id: &str, point: SeriesPoint) {
        self.builders.entry(id.to_string()).or_default().push(point);
    }

    fn record_missing(&mut self, key: &str, row: Value) {
        self.missing.push(MissingJoinRecord {
            key_type: MissingKind::Snapshot,
            key: key.to_string(),
            row,
        });
    }

    pub fn finish(self) -> (BTreeMap<String, RegionSeries>, Vec<MissingJoinRecord>) {
        let series = self
            .builders
            .into_iter()
            .map(|(id, builder)| (id, builder.finish()))
            .collect();
        (series, self.missing)
    }
}

/// One row of the daily JSON document. Dates arrive as `YYYYMMDD`.
#[derive(Debug, Deserialize, Serialize)]
struct DailyRow {
    #[serde(default)]
    date: Value,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    positive: Option<Value>,
    #[serde(default)]
    death: Option<Value>,
    #[serde(default)]
    recovered: Option<Value>,
}

impl DailyRow {
    fn to_point(&self, date: NaiveDate) -> SeriesPoint {
        SeriesPoint {
            date,
            confirmed: json_count(self.positive.as_ref()),
            deaths: json_count(self.death.as_ref()),
            recovered: self.recovered.as_ref().map(|v| json_count(Some(v))),
            last_updated: None,
        }
    }
}

/// Ingest a JSON array of daily rows keyed by region id. Returns the number
/// of rows added to a series.
pub fn load_daily_json(set: &mut SeriesSet, table: &RegionTable, path: &Path) -> Result<usize> {
    let text = fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
    let rows: Vec<DailyRow> =
        serde_json::from_str(&text).map_err(|e| PipelineError::json(path, e))?;

    let mut ingested = 0usize;
    for row in rows {
        let key = row.state.clone().unwrap_or_default();
        let Some(id) = table.resolve(&key) else {
            debug!("daily row for unknown region '{}' dropped", key);
            set.record_missing(&key, serde_json::to_value(&row).unwrap_or(Value::Null));
            continue;
        };
        let Some(date) = parse_compact_date(&row.date) else {
            debug!("daily row for '{}' has unusable date {}", key, row.date);
            set.record_missing(&key, serde_json::to_value(&row).unwrap_or(Value::Null));
            continue;
        };
        set.upsert(id, row.to_point(date));
        ingested += 1;
    }
    info!(
        "Ingested {} daily rows from {}",
        format_int(ingested),
        path.display()
    );
    Ok(ingested)
}

static SNAPSHOT_COLUMNS: &[ColumnSpec] = &[
    ColumnSpec::required("region", "Province/State", DecodeKind::Text),
    ColumnSpec::required("country", "Country/Region", DecodeKind::Text),
    ColumnSpec::optional("last_updated", "Last Update", DecodeKind::Text),
    ColumnSpec::optional("confirmed", "Confirmed", DecodeKind::Int),
    ColumnSpec::optional("deaths", "Deaths", DecodeKind::Int),
    ColumnSpec::optional("recovered", "Recovered", DecodeKind::Int),
    ColumnSpec::optional("latitude", "Latitude", DecodeKind::Float),
    ColumnSpec::optional("longitude", "Longitude", DecodeKind::Float),
];

/// A decoded per-date snapshot row. Coordinates stay in the decoded table
/// row (and so in missing-join records) but never reach a series point.
#[derive(Debug, Clone)]
struct SnapshotRow {
    region: String,
    country: String,
    last_updated: Option<String>,
    confirmed: u64,
    deaths: u64,
    recovered: Option<u64>,
}

fn non_negative(v: Option<i64>) -> Option<u64> {
    v.map(|n| u64::try_from(n).unwrap_or(0))
}

impl SnapshotRow {
    fn decode(row: &DecodedRow) -> Self {
        SnapshotRow {
            region: row.text("region").unwrap_or_default().to_string(),
            country: row.text("country").unwrap_or_default().to_string(),
            last_updated: row
                .text("last_updated")
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            confirmed: non_negative(row.int("confirmed")).unwrap_or(0),
            deaths: non_negative(row.int("deaths")).unwrap_or(0),
            recovered: non_negative(row.int("recovered")),
        }
    }

    fn into_point(self, date: NaiveDate) -> SeriesPoint {
        SeriesPoint {
            date,
            confirmed: self.confirmed,
            deaths: self.deaths,
            recovered: self.recovered,
            last_updated: self.last_updated,
        }
    }
}

/// Ingest every `MM-DD-YYYY.csv` file in `dir`, in file-name order, keeping
/// rows for `country` only. A file whose header lacks the region or country
/// column is skipped with a warning. Returns the number of rows added to a
/// series.
pub fn load_snapshot_dir(
    set: &mut SeriesSet,
    table: &RegionTable,
    dir: &Path,
    country: &str,
) -> Result<usize> {
    let mut files: Vec<(String, NaiveDate)> = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| PipelineError::io(dir, e))? {
        let entry = entry.map_err(|e| PipelineError::io(dir, e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        match parse_snapshot_file_date(&name) {
            Some(date) => files.push((name, date)),
            None => debug!("ignoring non-snapshot file {}", name),
        }
    }
    files.sort();

    let mut ingested = 0usize;
    let mut skipped = 0usize;
    for (name, date) in &files {
        let path = dir.join(name);
        let rows = match read_table(&path, SNAPSHOT_COLUMNS) {
            Ok(rows) => rows,
            Err(PipelineError::MissingColumn { column, .. }) => {
                warn!("{}: no '{}' column, file skipped", path.display(), column);
                skipped += 1;
                continue;
            }
            Err(e) => return Err(e),
        };
        for decoded in rows {
            let row = SnapshotRow::decode(&decoded);
            if row.country != country {
                continue;
            }
            let Some(id) = table.resolve(&row.region).map(str::to_string) else {
                debug!("{}: snapshot row for unknown region '{}'", name, row.region);
                set.record_missing(&row.region, decoded.to_json());
                continue;
            };
            set.upsert(&id, row.into_point(*date));
            ingested += 1;
        }
    }
    info!(
        "Ingested {} snapshot rows from {} files in {} ({} skipped)",
        format_int(ingested),
        format_int(files.len() - skipped),
        dir.display(),
        format_int(skipped)
    );
    Ok(ingested)
}
