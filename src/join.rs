// Join engine.
//
// Loading a secondary source can fail (that is a load error), but merging
// it never does: every row that does not resolve to a known region becomes
// a `MissingJoinRecord` and the merge carries on.
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use log::{debug, info};
use serde::Serialize;
use serde_json::Value;

use crate::columns::{read_table, ColumnSpec, DecodeKind, DecodedRow};
use crate::county::CountyTier;
use crate::error::{PipelineError, Result};
use crate::reference::RegionTable;
use crate::types::{
    AttributeRange, LocationKind, MissingJoinRecord, MissingKind, Region, RegionSeries,
};
use crate::util::format_int;

static AREA_COLUMNS: &[ColumnSpec] = &[
    ColumnSpec::required("name", "name", DecodeKind::Text),
    ColumnSpec::optional("total_area", "area_all_sq_mi", DecodeKind::Float),
    ColumnSpec::required("land_area", "area_land_sq_mi", DecodeKind::Float),
];

pub fn load_area_rows(path: &Path) -> Result<Vec<DecodedRow>> {
    read_table(path, AREA_COLUMNS)
}

/// Merge area rows into the table. Rows may name a region or carry its id.
pub fn merge_areas(
    table: &mut RegionTable,
    rows: &[DecodedRow],
    missing: &mut Vec<MissingJoinRecord>,
) -> usize {
    let mut matched = 0usize;
    for row in rows {
        let key = row.text("name").unwrap_or_default();
        let Some(id) = table.resolve(key).map(str::to_string) else {
            debug!("area row for unknown region '{}'", key);
            missing.push(MissingJoinRecord {
                key_type: MissingKind::LandArea,
                key: key.to_string(),
                row: row.to_json(),
            });
            continue;
        };
        if let Some(region) = table.get_mut(&id) {
            region.land_area = row.float("land_area");
            region.total_area = row.float("total_area");
            matched += 1;
        }
    }
    info!(
        "Matched {} area rows, {} unmatched",
        format_int(matched),
        format_int(rows.len() - matched)
    );
    matched
}

/// Per-topic auxiliary documents keyed by region abbreviation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuxTopic {
    Metadata,
    Current,
}

impl AuxTopic {
    fn missing_kind(self) -> MissingKind {
        match self {
            AuxTopic::Metadata => MissingKind::StateMetadata,
            AuxTopic::Current => MissingKind::StateCurrent,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AuxRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<Value>,
}

pub fn load_aux_rows(path: &Path) -> Result<Vec<Value>> {
    let text = fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
    serde_json::from_str(&text).map_err(|e| PipelineError::json(path, e))
}

pub fn merge_aux(
    table: &RegionTable,
    aux: &mut BTreeMap<String, AuxRecord>,
    topic: AuxTopic,
    rows: Vec<Value>,
    missing: &mut Vec<MissingJoinRecord>,
) -> usize {
    let mut matched = 0usize;
    for row in rows {
        let key = row
            .get("state")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let Some(id) = table.resolve(&key) else {
            missing.push(MissingJoinRecord {
                key_type: topic.missing_kind(),
                key,
                row,
            });
            continue;
        };
        let record = aux.entry(id.to_string()).or_default();
        match topic {
            AuxTopic::Metadata => record.metadata = Some(row),
            AuxTopic::Current => record.current = Some(row),
        }
        matched += 1;
    }
    matched
}

/// Everything downstream stages need, keyed by region id. Rankings and
/// series cover the state tier; counties carry reference attributes and
/// current counts only.
#[derive(Debug, Clone, Default)]
pub struct JoinedTable {
    pub regions: RegionTable,
    pub series: BTreeMap<String, RegionSeries>,
    pub aux: BTreeMap<String, AuxRecord>,
    pub counties: CountyTier,
    pub missing: Vec<MissingJoinRecord>,
}

impl JoinedTable {
    pub fn region(&self, id: &str) -> Option<&Region> {
        self.regions.get(id)
    }

    /// Region table of one tier.
    pub fn table(&self, kind: LocationKind) -> &RegionTable {
        match kind {
            LocationKind::States => &self.regions,
            LocationKind::Counties => &self.counties.table,
        }
    }

    /// Series for a region; empty when no snapshot source mentioned it.
    pub fn series_for(&self, id: &str) -> Option<&RegionSeries> {
        self.series.get(id).filter(|s| !s.is_empty())
    }

    /// Min/max of the numeric reference attributes over states that have them.
    pub fn stats(&self) -> BTreeMap<&'static str, AttributeRange> {
        attribute_ranges(self.regions.regions())
    }
}

pub fn attribute_ranges(regions: &[Region]) -> BTreeMap<&'static str, AttributeRange> {
    let mut population = None;
    let mut land_area = None;
    let mut density = None;
    for region in regions {
        if let Some(p) = region.population {
            AttributeRange::add(&mut population, p as f64);
        }
        if let Some(a) = region.land_area {
            AttributeRange::add(&mut land_area, a);
        }
        if let Some(d) = region.density {
            AttributeRange::add(&mut density, d);
        }
    }
    [
        ("population", population),
        ("land_area", land_area),
        ("density", density),
    ]
    .into_iter()
    .filter_map(|(k, v)| v.map(|v| (k, v)))
    .collect()
}

fn derive_density(region: &Region) -> Option<f64> {
    let population = region.population? as f64;
    let land_area = region.land_area.filter(|a| *a > 0.0)?;
    Some(population / land_area).filter(|d| d.is_finite())
}

/// Recompute `density` for every region in the table.
pub fn apply_density(table: &mut RegionTable) {
    let ids: Vec<String> = table.regions().iter().map(|r| r.id.clone()).collect();
    for id in &ids {
        if let Some(region) = table.get_mut(id) {
            region.density = derive_density(region);
        }
    }
}

/// Combine the reference table with the finished series and any auxiliary
/// attributes. Series for ids outside the table are recorded as missing.
pub fn join(
    mut regions: RegionTable,
    series: BTreeMap<String, RegionSeries>,
    aux: BTreeMap<String, AuxRecord>,
    mut missing: Vec<MissingJoinRecord>,
) -> JoinedTable {
    apply_density(&mut regions);

    let mut joined_series = BTreeMap::new();
    for (id, s) in series {
        if regions.contains(&id) {
            joined_series.insert(id, s);
        } else {
            missing.push(MissingJoinRecord {
                key_type: MissingKind::Snapshot,
                key: id.clone(),
                row: serde_json::to_value(&s).unwrap_or(Value::Null),
            });
        }
    }

    let without_series = regions.len() - joined_series.len();
    let points: usize = joined_series.values().map(|s| s.points().len()).sum();
    info!(
        "Joined {} regions ({} without series, {} series points), {} missing-join records",
        format_int(regions.len()),
        format_int(without_series),
        format_int(points),
        format_int(missing.len())
    );
    JoinedTable {
        regions,
        series: joined_series,
        aux,
        counties: CountyTier::default(),
        missing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::tempdir;

    fn table() -> RegionTable {
        let mut va = Region::new("VA", "Virginia");
        va.population = Some(8_000);
        let mut ak = Region::new("AK", "Alaska");
        ak.population = Some(700);
        RegionTable::from_regions(vec![va, ak]).unwrap()
    }

    #[test]
    fn areas_merge_by_name_and_record_unknowns() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("areas.csv");
        fs::write(
            &path,
            "name,area_all_sq_mi,area_land_sq_mi\nVirginia,42774.9,39490.1\nAlaska,665384,0\nNarnia,10,9\n",
        )
        .unwrap();

        let mut table = table();
        let mut missing = Vec::new();
        let rows = load_area_rows(&path).unwrap();
        assert_eq!(merge_areas(&mut table, &rows, &mut missing), 2);
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].key_type, MissingKind::LandArea);
        assert_eq!(missing[0].key, "Narnia");
        assert_eq!(missing[0].row["land_area"], json!(9.0));

        let joined = join(table, BTreeMap::new(), BTreeMap::new(), missing);
        let va = joined.region("VA").unwrap();
        assert_eq!(va.land_area, Some(39490.1));
        assert_eq!(va.total_area, Some(42774.9));
        assert!((va.density.unwrap() - 8_000.0 / 39490.1).abs() < 1e-12);
        // zero land area leaves density undefined
        assert_eq!(joined.region("AK").unwrap().density, None);
    }

    #[test]
    fn aux_rows_attach_by_abbreviation() {
        let table = table();
        let mut aux = BTreeMap::new();
        let mut missing = Vec::new();
        let rows = vec![
            json!({"state": "VA", "name": "Virginia", "twitter": "@VDHgov"}),
            json!({"state": "GU", "name": "Guam"}),
        ];
        assert_eq!(
            merge_aux(&table, &mut aux, AuxTopic::Metadata, rows, &mut missing),
            1
        );
        merge_aux(
            &table,
            &mut aux,
            AuxTopic::Current,
            vec![json!({"state": "VA", "positive": 10})],
            &mut missing,
        );

        let va = aux.get("VA").unwrap();
        assert_eq!(va.metadata.as_ref().unwrap()["twitter"], "@VDHgov");
        assert_eq!(va.current.as_ref().unwrap()["positive"], 10);
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].key_type, MissingKind::StateMetadata);
        assert_eq!(missing[0].key, "GU");
    }

    #[test]
    fn stats_cover_defined_values_only() {
        let mut table = table();
        table.get_mut("VA").unwrap().land_area = Some(4.0);
        let joined = join(table, BTreeMap::new(), BTreeMap::new(), Vec::new());
        let stats = joined.stats();
        assert_eq!(stats["population"].min, 700.0);
        assert_eq!(stats["population"].max, 8_000.0);
        assert_eq!(stats["land_area"].min, 4.0);
        assert_eq!(stats["density"].max, 2_000.0);
    }
}
