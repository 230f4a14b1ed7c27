use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::time::Instant;

use log::info;
use rayon::prelude::*;
use serde::Serialize;
use serde_json::Value;
use tabled::{settings::Style, Table, Tabled};

use crate::error::{PipelineError, Result};
use crate::geo::FeatureCollection;
use crate::join::AuxRecord;
use crate::types::{
    AttributeRange, FileStat, Histogram, MissingJoinRecord, MissingKind, Region, RegionSeries,
};
use crate::util::format_int;

pub const SUMMARY_FILE: &str = "data.json";
pub const MISSING_FILE: &str = "missing.json";

#[derive(Debug, Serialize)]
pub struct RegionsSection<'a> {
    pub data: &'a [Region],
    pub index: &'a BTreeMap<String, usize>,
}

/// The consolidated document consumed by the visualization layer.
#[derive(Debug, Serialize)]
pub struct SummaryDocument<'a> {
    pub regions: RegionsSection<'a>,
    /// Metric name to region ids in ranking order.
    pub rankings: BTreeMap<String, Vec<String>>,
    pub num_buckets: usize,
    pub histograms: &'a BTreeMap<String, Histogram>,
    pub series: &'a BTreeMap<String, RegionSeries>,
    pub stats: BTreeMap<&'static str, AttributeRange>,
    #[serde(skip_serializing_if = "no_aux")]
    pub aux: &'a BTreeMap<String, AuxRecord>,
    /// County FIPS code to its latest reported counts.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub counties: BTreeMap<&'a str, CountyEntry<'a>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub county_stats: BTreeMap<&'static str, AttributeRange>,
}

#[derive(Debug, Serialize)]
pub struct CountyEntry<'a> {
    pub current: Option<&'a Value>,
}

fn no_aux(aux: &&BTreeMap<String, AuxRecord>) -> bool {
    aux.is_empty()
}

#[derive(Debug, Serialize)]
pub struct Manifest {
    pub files: Vec<FileStat>,
}

fn missing_by_kind(missing: &[MissingJoinRecord]) -> BTreeMap<MissingKind, Vec<&MissingJoinRecord>> {
    let mut grouped: BTreeMap<MissingKind, Vec<&MissingJoinRecord>> = BTreeMap::new();
    for record in missing {
        grouped.entry(record.key_type).or_default().push(record);
    }
    grouped
}

pub fn to_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| PipelineError::json(SUMMARY_FILE, e))
}

/// Write a document to stdout, newline terminated.
pub fn write_stdout<T: Serialize>(value: &T) -> Result<()> {
    let bytes = to_json_bytes(value)?;
    let write = || -> io::Result<()> {
        let mut out = io::stdout().lock();
        out.write_all(&bytes)?;
        out.write_all(b"\n")?;
        out.flush()
    };
    write().map_err(|e| PipelineError::io("<stdout>", e))
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<u64> {
    let bytes = to_json_bytes(value)?;
    fs::write(path, &bytes).map_err(|e| PipelineError::io(path, e))?;
    Ok(bytes.len() as u64)
}

/// One independent output file of the multi-file run. Every document is
/// fully built before emission starts, so a task can only fail on I/O.
pub enum Emission<'a> {
    Summary(&'a SummaryDocument<'a>),
    Layer {
        name: String,
        collection: &'a FeatureCollection,
    },
    Missing(&'a [MissingJoinRecord]),
}

impl Emission<'_> {
    pub fn file_name(&self) -> String {
        match self {
            Emission::Summary(_) => SUMMARY_FILE.to_string(),
            Emission::Layer { name, .. } => name.clone(),
            Emission::Missing(_) => MISSING_FILE.to_string(),
        }
    }

    fn write(&self, path: &Path) -> Result<u64> {
        match self {
            Emission::Summary(doc) => write_json(path, doc),
            Emission::Layer { collection, .. } => write_json(path, collection),
            Emission::Missing(missing) => write_json(path, &missing_by_kind(missing)),
        }
    }
}

/// Write every emission into `out_dir` in parallel. Each task only reads
/// finished data and owns its target file; per-file stats come back as task
/// results and are returned sorted by path once all tasks have finished.
pub fn emit_all(out_dir: &Path, emissions: &[Emission<'_>]) -> Result<Vec<FileStat>> {
    fs::create_dir_all(out_dir).map_err(|e| PipelineError::io(out_dir, e))?;
    let mut stats = emissions
        .par_iter()
        .map(|emission| -> Result<FileStat> {
            let start = Instant::now();
            let name = emission.file_name();
            let size = emission.write(&out_dir.join(&name))?;
            Ok(FileStat {
                path: name,
                size,
                time: start.elapsed().as_secs_f64(),
            })
        })
        .collect::<Result<Vec<FileStat>>>()?;
    stats.sort_by(|a, b| a.path.cmp(&b.path));
    info!(
        "Wrote {} files ({} bytes) to {}",
        format_int(stats.len()),
        format_int(stats.iter().map(|s| s.size).sum::<u64>()),
        out_dir.display()
    );
    Ok(stats)
}

pub fn print_manifest(manifest: &Manifest) -> Result<()> {
    let text = serde_json::to_string_pretty(manifest)
        .map_err(|e| PipelineError::json("<manifest>", e))?;
    println!("{}", text);
    Ok(())
}

/// Markdown preview on stderr; stdout is reserved for JSON.
pub fn preview_table_rows<T>(rows: &[T])
where
    T: Tabled + Clone,
{
    if rows.is_empty() {
        eprintln!("(no rows)\n");
        return;
    }
    let table_str = Table::new(rows.to_vec()).with(Style::markdown()).to_string();
    eprintln!("{}\n", table_str);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::join::{join, JoinedTable};
    use crate::reference::RegionTable;
    use serde_json::json;
    use tempfile::tempdir;

    fn joined_with_missing() -> JoinedTable {
        let table = RegionTable::from_regions(vec![Region::new("VA", "Virginia")]).unwrap();
        let missing = vec![
            MissingJoinRecord {
                key_type: MissingKind::Snapshot,
                key: "PR".into(),
                row: json!({"state": "PR"}),
            },
            MissingJoinRecord {
                key_type: MissingKind::LandArea,
                key: "Narnia".into(),
                row: json!({"name": "Narnia"}),
            },
        ];
        join(table, BTreeMap::new(), BTreeMap::new(), missing)
    }

    #[test]
    fn missing_records_group_by_key_type() {
        let joined = joined_with_missing();
        let doc = serde_json::to_value(missing_by_kind(&joined.missing)).unwrap();
        assert_eq!(doc["land_area"][0]["key"], "Narnia");
        assert_eq!(doc["snapshot"][0]["row"]["state"], "PR");
    }

    #[test]
    fn emissions_report_sizes_sorted_by_path() {
        let dir = tempdir().unwrap();
        let joined = joined_with_missing();
        let histograms = BTreeMap::new();
        let aux = BTreeMap::new();
        let doc = SummaryDocument {
            regions: RegionsSection {
                data: joined.regions.regions(),
                index: joined.regions.index(),
            },
            rankings: BTreeMap::new(),
            num_buckets: 8,
            histograms: &histograms,
            series: &joined.series,
            stats: joined.stats(),
            aux: &aux,
            counties: BTreeMap::new(),
            county_stats: BTreeMap::new(),
        };
        let layer = FeatureCollection {
            kind: "FeatureCollection",
            features: Vec::new(),
        };
        let emissions = [
            Emission::Summary(&doc),
            Emission::Missing(&joined.missing),
            Emission::Layer {
                name: "counties-5m.json".to_string(),
                collection: &layer,
            },
        ];

        let stats = emit_all(dir.path(), &emissions).unwrap();
        let paths: Vec<&str> = stats.iter().map(|s| s.path.as_str()).collect();
        assert_eq!(paths, vec!["counties-5m.json", "data.json", "missing.json"]);
        for stat in &stats {
            let bytes = fs::read(dir.path().join(&stat.path)).unwrap();
            assert_eq!(stat.size, bytes.len() as u64);
            assert!(stat.time >= 0.0);
        }

        let written: Value =
            serde_json::from_slice(&fs::read(dir.path().join("data.json")).unwrap()).unwrap();
        assert_eq!(written["regions"]["index"]["VA"], 0);
        assert_eq!(written["num_buckets"], 8);
        assert!(written.get("aux").is_none());
        assert!(written.get("counties").is_none());
    }
}
