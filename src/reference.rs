use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use log::{debug, info};

use crate::columns::{read_table, ColumnSpec, DecodeKind};
use crate::error::{PipelineError, Result};
use crate::types::Region;
use crate::util::format_int;

static REGION_COLUMNS: &[ColumnSpec] = &[
    ColumnSpec::required("id", "state", DecodeKind::Text),
    ColumnSpec::required("name", "name", DecodeKind::Text),
];

// Population estimates are keyed by region name, not id.
static POPULATION_COLUMNS: &[ColumnSpec] = &[
    ColumnSpec::required("name", "state", DecodeKind::Text),
    ColumnSpec::required("population", "population", DecodeKind::Int),
    ColumnSpec::optional("births", "births", DecodeKind::Int),
    ColumnSpec::optional("deaths", "deaths", DecodeKind::Int),
];

/// Regions in reference-file order plus the id and name indexes used to
/// join every other source.
#[derive(Debug, Clone, Default)]
pub struct RegionTable {
    regions: Vec<Region>,
    index: BTreeMap<String, usize>,
    names: HashMap<String, String>,
}

impl RegionTable {
    pub fn from_regions(regions: Vec<Region>) -> Result<Self> {
        let mut table = RegionTable::default();
        for region in regions {
            table.push(region)?;
        }
        Ok(table)
    }

    fn push(&mut self, region: Region) -> Result<()> {
        if region.id.is_empty() {
            return Err(PipelineError::Sanity(format!(
                "region '{}' has an empty id",
                region.name
            )));
        }
        if self.index.contains_key(&region.id) {
            return Err(PipelineError::Sanity(format!(
                "duplicate region id '{}'",
                region.id
            )));
        }
        self.index.insert(region.id.clone(), self.regions.len());
        self.names.insert(region.name.clone(), region.id.clone());
        self.regions.push(region);
        Ok(())
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// Region id to offset in `regions()`.
    pub fn index(&self) -> &BTreeMap<String, usize> {
        &self.index
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Region> {
        self.index.get(id).map(|&i| &self.regions[i])
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Region> {
        match self.index.get(id) {
            Some(&i) => self.regions.get_mut(i),
            None => None,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn id_for_name(&self, name: &str) -> Option<&str> {
        self.names.get(name).map(String::as_str)
    }

    /// The stored id equal to `key`, if any.
    pub fn lookup_id(&self, key: &str) -> Option<&str> {
        self.index.get_key_value(key).map(|(id, _)| id.as_str())
    }

    /// Resolve a key that may be either a region id or a region name.
    pub fn resolve(&self, key: &str) -> Option<&str> {
        self.lookup_id(key).or_else(|| self.id_for_name(key))
    }
}

/// Load the primary reference file. Any failure here aborts the run.
pub fn load_regions(path: &Path) -> Result<RegionTable> {
    let rows = read_table(path, REGION_COLUMNS)?;
    let regions = rows
        .iter()
        .map(|row| {
            Region::new(
                row.text("id").unwrap_or_default(),
                row.text("name").unwrap_or_default(),
            )
        })
        .collect();
    let table = RegionTable::from_regions(regions)?;
    if table.is_empty() {
        return Err(PipelineError::Sanity(format!(
            "reference file {} lists no regions",
            path.display()
        )));
    }
    info!(
        "Loaded {} regions from {}",
        format_int(table.len()),
        path.display()
    );
    Ok(table)
}

/// Merge population estimates matched by region name. Rows whose name is
/// not in the table are skipped. Returns the number of regions updated.
pub fn apply_populations(table: &mut RegionTable, path: &Path) -> Result<usize> {
    let rows = read_table(path, POPULATION_COLUMNS)?;
    let mut matched = 0usize;
    for row in &rows {
        let name = row.text("name").unwrap_or_default();
        let Some(id) = table.id_for_name(name).map(str::to_string) else {
            debug!("population row for unknown region '{}' skipped", name);
            continue;
        };
        if let Some(region) = table.get_mut(&id) {
            region.population = row.int("population");
            region.births = row.int("births");
            region.deaths = row.int("deaths");
            matched += 1;
        }
    }
    info!(
        "Applied populations to {} of {} regions",
        format_int(matched),
        format_int(table.len())
    );
    Ok(matched)
}
