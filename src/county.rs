// County tier.
//
// Counties are keyed by five-digit FIPS code. The census estimates file
// lists states and counties together; only county-level rows (`SUMLEV`
// 050) become regions here. Land area and current counts join by FIPS, and
// anything that does not resolve becomes a missing-join record.
use std::collections::BTreeMap;
use std::path::Path;

use log::{debug, info, warn};
use serde_json::Value;

use crate::columns::{read_table, ColumnSpec, DecodeKind, DecodedRow};
use crate::error::Result;
use crate::join::{apply_density, attribute_ranges};
use crate::reference::RegionTable;
use crate::types::{AttributeRange, MissingJoinRecord, MissingKind, Region};
use crate::util::{county_fips, fips_code, format_int};

const COUNTY_LEVEL: &str = "050";
const NATION_FIPS: &str = "00000";

static COUNTY_COLUMNS: &[ColumnSpec] = &[
    ColumnSpec::required("level", "SUMLEV", DecodeKind::Text),
    ColumnSpec::required("state_fips", "STATE", DecodeKind::Text),
    ColumnSpec::required("county_fips", "COUNTY", DecodeKind::Text),
    ColumnSpec::required("state", "STNAME", DecodeKind::Text),
    ColumnSpec::required("name", "CTYNAME", DecodeKind::Text),
    ColumnSpec::required("population", "POPESTIMATE2019", DecodeKind::Int),
    ColumnSpec::optional("births", "BIRTHS2019", DecodeKind::Int),
    ColumnSpec::optional("deaths", "DEATHS2019", DecodeKind::Int),
];

static LAND_AREA_COLUMNS: &[ColumnSpec] = &[
    ColumnSpec::optional("name", "Areaname", DecodeKind::Text),
    ColumnSpec::required("fips", "STCOU", DecodeKind::Text),
    ColumnSpec::required("land_area", "LND110210D", DecodeKind::Float),
];

static CURRENT_COLUMNS: &[ColumnSpec] = &[
    ColumnSpec::required("date", "date", DecodeKind::Text),
    ColumnSpec::optional("county", "county", DecodeKind::Text),
    ColumnSpec::optional("state", "state", DecodeKind::Text),
    ColumnSpec::required("fips", "fips", DecodeKind::Text),
    ColumnSpec::required("cases", "cases", DecodeKind::Int),
    ColumnSpec::required("deaths", "deaths", DecodeKind::Int),
    ColumnSpec::optional("confirmed_cases", "confirmed_cases", DecodeKind::Int),
    ColumnSpec::optional("confirmed_deaths", "confirmed_deaths", DecodeKind::Int),
    ColumnSpec::optional("probable_cases", "probable_cases", DecodeKind::Int),
    ColumnSpec::optional("probable_deaths", "probable_deaths", DecodeKind::Int),
];

/// County reference table plus the latest reported counts per county.
#[derive(Debug, Clone, Default)]
pub struct CountyTier {
    pub table: RegionTable,
    pub current: BTreeMap<String, Value>,
}

impl CountyTier {
    pub fn stats(&self) -> BTreeMap<&'static str, AttributeRange> {
        attribute_ranges(self.table.regions())
    }
}

/// Load county rows from the census estimates file. Rows with an unusable
/// FIPS code are skipped; duplicate codes are fatal.
pub fn load_counties(path: &Path) -> Result<RegionTable> {
    let rows = read_table(path, COUNTY_COLUMNS)?;
    let mut counties = Vec::new();
    for row in &rows {
        if row.text("level") != Some(COUNTY_LEVEL) {
            continue;
        }
        let state = row.text("state_fips").unwrap_or_default();
        let county = row.text("county_fips").unwrap_or_default();
        let Some(id) = county_fips(state, county) else {
            debug!("county row with unusable FIPS '{}{}' skipped", state, county);
            continue;
        };
        let mut region = Region::new(id, row.text("name").unwrap_or_default());
        region.state = row.text("state").map(str::to_string);
        region.population = row.int("population");
        region.births = row.int("births");
        region.deaths = row.int("deaths");
        counties.push(region);
    }
    let table = RegionTable::from_regions(counties)?;
    if table.is_empty() {
        warn!("{} lists no county rows", path.display());
    }
    info!(
        "Loaded {} counties from {}",
        format_int(table.len()),
        path.display()
    );
    Ok(table)
}

pub fn load_land_area_rows(path: &Path) -> Result<Vec<DecodedRow>> {
    read_table(path, LAND_AREA_COLUMNS)
}

/// Merge land areas by FIPS. The national row and state-level rows (codes
/// ending in `000`) are not counties and are passed over.
pub fn merge_land_areas(
    table: &mut RegionTable,
    rows: &[DecodedRow],
    missing: &mut Vec<MissingJoinRecord>,
) -> usize {
    let mut matched = 0usize;
    for row in rows {
        let raw = row.text("fips").unwrap_or_default();
        let Some(code) = fips_code(raw) else {
            debug!("land area row with unusable FIPS '{}' skipped", raw);
            continue;
        };
        if code == NATION_FIPS || code.ends_with("000") {
            continue;
        }
        match table.get_mut(&code) {
            Some(region) => {
                region.land_area = row.float("land_area");
                matched += 1;
            }
            None => missing.push(MissingJoinRecord {
                key_type: MissingKind::LandArea,
                key: code,
                row: row.to_json(),
            }),
        }
    }
    info!(
        "Matched {} county land areas of {} rows",
        format_int(matched),
        format_int(rows.len())
    );
    matched
}

pub fn load_current_rows(path: &Path) -> Result<Vec<DecodedRow>> {
    read_table(path, CURRENT_COLUMNS)
}

/// Attach current counts by FIPS. Rows without a FIPS code (unassigned or
/// city-level aggregates) carry no county and are dropped.
pub fn merge_current(
    table: &RegionTable,
    current: &mut BTreeMap<String, Value>,
    rows: &[DecodedRow],
    missing: &mut Vec<MissingJoinRecord>,
) -> usize {
    let mut matched = 0usize;
    for row in rows {
        let raw = row.text("fips").unwrap_or_default();
        if raw.is_empty() {
            continue;
        }
        let code = fips_code(raw).unwrap_or_else(|| raw.to_string());
        if !table.contains(&code) {
            missing.push(MissingJoinRecord {
                key_type: MissingKind::CountiesCurrent,
                key: code,
                row: row.to_json(),
            });
            continue;
        }
        current.insert(code, row.to_json());
        matched += 1;
    }
    info!(
        "Attached current counts to {} of {} counties",
        format_int(matched),
        format_int(table.len())
    );
    matched
}

/// Assemble the county tier from its three sources; density is derived once
/// land areas are in.
pub fn build_tier(
    mut table: RegionTable,
    land_areas: Option<&[DecodedRow]>,
    current_rows: Option<&[DecodedRow]>,
    missing: &mut Vec<MissingJoinRecord>,
) -> CountyTier {
    if let Some(rows) = land_areas {
        merge_land_areas(&mut table, rows, missing);
    }
    apply_density(&mut table);
    let mut current = BTreeMap::new();
    if let Some(rows) = current_rows {
        merge_current(&table, &mut current, rows, missing);
    }
    CountyTier { table, current }
}
