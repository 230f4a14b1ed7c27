use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tabled::Tabled;

/// Geographic tier a region table and a geometry layer belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationKind {
    States,
    Counties,
}

impl LocationKind {
    /// Plural name, used in file names.
    pub fn key(self) -> &'static str {
        match self {
            LocationKind::States => "states",
            LocationKind::Counties => "counties",
        }
    }

    /// Singular name, written into each feature's `type` property.
    pub fn singular(self) -> &'static str {
        match self {
            LocationKind::States => "state",
            LocationKind::Counties => "county",
        }
    }
}

/// One geographic unit from the reference table. Attributes other than the
/// id and name are merged in from secondary reference files.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Region {
    pub id: String,
    pub name: String,
    /// Name of the containing state; set for counties only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub population: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub births: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deaths: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub land_area: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_area: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub density: Option<f64>,
}

impl Region {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Region {
            id: id.into(),
            name: name.into(),
            state: None,
            population: None,
            births: None,
            deaths: None,
            land_area: None,
            total_area: None,
            density: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub date: NaiveDate,
    pub confirmed: u64,
    pub deaths: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovered: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
}

/// Chronological, duplicate-free series for one region. Only produced by
/// `SeriesBuilder::finish`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct RegionSeries {
    pub(crate) points: Vec<SeriesPoint>,
}

impl RegionSeries {
    pub fn points(&self) -> &[SeriesPoint] {
        &self.points
    }

    pub fn latest(&self) -> Option<&SeriesPoint> {
        self.points.last()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingKind {
    LandArea,
    Snapshot,
    Geometry,
    StateMetadata,
    StateCurrent,
    CountiesCurrent,
}

/// A source row that could not be matched to a known region.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissingJoinRecord {
    pub key_type: MissingKind,
    pub key: String,
    pub row: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankEntry {
    pub id: String,
    pub value: f64,
}

/// Region ids ordered by value ascending, ties broken by id ascending.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricRanking {
    pub entries: Vec<RankEntry>,
}

impl MetricRanking {
    pub fn ids(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.id.clone()).collect()
    }

    pub fn max_value(&self) -> Option<f64> {
        self.entries.last().map(|e| e.value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bucket {
    pub min: f64,
    pub max: f64,
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Histogram {
    pub buckets: Vec<Bucket>,
}

/// Observed range of one region attribute.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AttributeRange {
    pub min: f64,
    pub max: f64,
}

impl AttributeRange {
    pub fn add(range: &mut Option<AttributeRange>, value: f64) {
        match range {
            Some(r) => {
                r.min = r.min.min(value);
                r.max = r.max.max(value);
            }
            None => {
                *range = Some(AttributeRange {
                    min: value,
                    max: value,
                })
            }
        }
    }
}

/// One emitted output file, as reported in the run manifest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileStat {
    pub path: String,
    pub size: u64,
    pub time: f64,
}

#[derive(Debug, Clone, Tabled)]
pub struct RankingPreviewRow {
    #[tabled(rename = "Metric")]
    pub metric: String,
    #[tabled(rename = "Ranked")]
    pub ranked: usize,
    #[tabled(rename = "Lowest")]
    pub lowest: String,
    #[tabled(rename = "Highest")]
    pub highest: String,
    #[tabled(rename = "MaxValue")]
    pub max_value: String,
    #[tabled(rename = "Unbucketed")]
    pub unbucketed: usize,
}
