// Batch run: load, join, compute, emit.
//
// Loading and joining are sequential; ranking and bucketing only start once
// the joined table is complete. Emission of the multi-file output is the
// only parallel stage.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::config::PipelineConfig;
use crate::county::{build_tier, load_counties, load_current_rows, load_land_area_rows, CountyTier};
use crate::error::Result;
use crate::geo::{feature_collection, load_layer, FeatureCollection, GeometryLayer};
use crate::join::{join, load_area_rows, load_aux_rows, merge_areas, merge_aux, AuxTopic, JoinedTable};
use crate::metrics::compute_all;
use crate::output::{
    emit_all, preview_table_rows, write_json, write_stdout, CountyEntry, Emission, Manifest,
    RegionsSection, SummaryDocument,
};
use crate::ranking::{boundary_excluded, histogram, rank};
use crate::reference::{apply_populations, load_regions};
use crate::series::{load_daily_json, load_snapshot_dir, SeriesSet};
use crate::types::{Histogram, MetricRanking, MissingJoinRecord, RankingPreviewRow};
use crate::util::{format_int, format_number};

/// Rankings and histograms for every configured metric, keyed by metric name.
#[derive(Debug, Clone, Default)]
pub struct Analysis {
    pub num_buckets: usize,
    pub rankings: BTreeMap<String, MetricRanking>,
    pub histograms: BTreeMap<String, Histogram>,
}

impl Analysis {
    pub fn preview_rows(&self) -> Vec<RankingPreviewRow> {
        self.rankings
            .iter()
            .map(|(metric, ranking)| {
                let unbucketed = self
                    .histograms
                    .get(metric)
                    .map(|h| boundary_excluded(ranking, h).len())
                    .unwrap_or(0);
                RankingPreviewRow {
                    metric: metric.clone(),
                    ranked: ranking.len(),
                    lowest: ranking.entries.first().map(|e| e.id.clone()).unwrap_or_default(),
                    highest: ranking.entries.last().map(|e| e.id.clone()).unwrap_or_default(),
                    max_value: format_number(ranking.max_value().unwrap_or(0.0), 4),
                    unbucketed,
                }
            })
            .collect()
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    data_dir: PathBuf,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, data_dir: impl Into<PathBuf>) -> Result<Self> {
        config.validate()?;
        Ok(Pipeline {
            config,
            data_dir: data_dir.into(),
        })
    }

    /// Resolve an optional input. Configured but absent inputs are skipped.
    fn optional_input(&self, relative: Option<&Path>, what: &str) -> Option<PathBuf> {
        let path = self.data_dir.join(relative?);
        if path.exists() {
            Some(path)
        } else {
            warn!("{} '{}' not found, skipping", what, path.display());
            None
        }
    }

    /// Run every loader and the join engine.
    pub fn load(&self) -> Result<JoinedTable> {
        let mut table = load_regions(&self.data_dir.join(&self.config.regions_path))?;
        if let Some(path) = self.optional_input(self.config.populations_path.as_deref(), "populations") {
            apply_populations(&mut table, &path)?;
        }

        let mut series = SeriesSet::default();
        if let Some(path) = self.optional_input(self.config.daily_json_path.as_deref(), "daily series") {
            load_daily_json(&mut series, &table, &path)?;
        }
        if let Some(dir) = self.optional_input(self.config.snapshot_dir.as_deref(), "snapshot directory") {
            load_snapshot_dir(&mut series, &table, &dir, &self.config.country)?;
        }
        let (series, mut missing) = series.finish();

        if let Some(path) = self.optional_input(self.config.areas_path.as_deref(), "areas") {
            let rows = load_area_rows(&path)?;
            merge_areas(&mut table, &rows, &mut missing);
        }

        let mut aux = BTreeMap::new();
        let topics = [
            (AuxTopic::Metadata, self.config.info_path.as_deref()),
            (AuxTopic::Current, self.config.current_path.as_deref()),
        ];
        for (topic, relative) in topics {
            if let Some(path) = self.optional_input(relative, "auxiliary document") {
                let rows = load_aux_rows(&path)?;
                merge_aux(&table, &mut aux, topic, rows, &mut missing);
            }
        }

        let counties = self.load_county_tier(&mut missing)?;
        let mut joined = join(table, series, aux, missing);
        joined.counties = counties;
        Ok(joined)
    }

    /// County reference, land area and current counts. Without the county
    /// reference file the tier stays empty.
    fn load_county_tier(&self, missing: &mut Vec<MissingJoinRecord>) -> Result<CountyTier> {
        let sources = &self.config.counties;
        let Some(path) = self.optional_input(sources.reference_path.as_deref(), "county reference")
        else {
            return Ok(CountyTier::default());
        };
        let table = load_counties(&path)?;
        let land_areas = match self.optional_input(sources.land_area_path.as_deref(), "county land area") {
            Some(path) => Some(load_land_area_rows(&path)?),
            None => None,
        };
        let current = match self.optional_input(sources.current_path.as_deref(), "county counts") {
            Some(path) => Some(load_current_rows(&path)?),
            None => None,
        };
        Ok(build_tier(
            table,
            land_areas.as_deref(),
            current.as_deref(),
            missing,
        ))
    }

    pub fn analyze(&self, joined: &JoinedTable) -> Result<Analysis> {
        let keys = self.config.metric_keys()?;
        let num_buckets = self.config.num_buckets;
        let mut analysis = Analysis {
            num_buckets,
            ..Analysis::default()
        };
        for (metric, values) in compute_all(joined, &keys) {
            let ranking = rank(&values);
            let hist = histogram(&ranking, num_buckets);
            if ranking.is_empty() {
                warn!("{}: no region has a defined value", metric);
            }
            let excluded = boundary_excluded(&ranking, &hist);
            if !excluded.is_empty() {
                warn!(
                    "{}: {} region(s) at the maximum value fall outside every bucket: {}",
                    metric,
                    excluded.len(),
                    excluded.join(", ")
                );
            }
            analysis.rankings.insert(metric.clone(), ranking);
            analysis.histograms.insert(metric, hist);
        }
        info!(
            "Ranked {} metrics into {} buckets each",
            format_int(analysis.rankings.len()),
            num_buckets
        );
        Ok(analysis)
    }

    /// Load geometry layers, recording unmatched features on the joined table.
    pub fn load_geometries(&self, joined: &mut JoinedTable) -> Result<Vec<GeometryLayer>> {
        let mut layers = Vec::new();
        let mut missing = Vec::new();
        for source in &self.config.geometries {
            let table = joined.table(source.feature_type);
            if table.is_empty() {
                warn!(
                    "no {} loaded, skipping {}",
                    source.feature_type.key(),
                    source.output_name()
                );
                continue;
            }
            let Some(path) = self.optional_input(Some(source.path.as_path()), "geometry") else {
                continue;
            };
            layers.push(load_layer(source, &path, table, &mut missing)?);
        }
        joined.missing.extend(missing);
        Ok(layers)
    }

    /// Single-document variant: write the summary to `output` or stdout.
    pub fn run_single(&self, output: Option<&Path>, preview: bool) -> Result<()> {
        let joined = self.load()?;
        let analysis = self.analyze(&joined)?;
        if preview {
            preview_table_rows(&analysis.preview_rows());
        }
        let doc = summary_document(&joined, &analysis);
        match output {
            Some(path) => {
                let size = write_json(path, &doc)?;
                info!("Wrote {} bytes to {}", format_int(size), path.display());
            }
            None => write_stdout(&doc)?,
        }
        Ok(())
    }

    /// Multi-file variant: summary, geometry layers and missing records are
    /// written to `out_dir`; the returned manifest lists what was written.
    /// Every document is built before the first file is written.
    pub fn run_multi(&self, out_dir: &Path, preview: bool) -> Result<Manifest> {
        let mut joined = self.load()?;
        let layers = self.load_geometries(&mut joined)?;
        let analysis = self.analyze(&joined)?;
        if preview {
            preview_table_rows(&analysis.preview_rows());
        }

        let collections = layers
            .iter()
            .map(|layer| -> Result<(String, FeatureCollection)> {
                Ok((layer.source.output_name(), feature_collection(layer, &joined)?))
            })
            .collect::<Result<Vec<_>>>()?;
        let doc = summary_document(&joined, &analysis);
        let mut emissions: Vec<Emission<'_>> = collections
            .iter()
            .map(|(name, collection)| Emission::Layer {
                name: name.clone(),
                collection,
            })
            .collect();
        emissions.push(Emission::Summary(&doc));
        emissions.push(Emission::Missing(&joined.missing));

        let files = emit_all(out_dir, &emissions)?;
        Ok(Manifest { files })
    }
}

pub fn summary_document<'a>(joined: &'a JoinedTable, analysis: &'a Analysis) -> SummaryDocument<'a> {
    SummaryDocument {
        regions: RegionsSection {
            data: joined.regions.regions(),
            index: joined.regions.index(),
        },
        rankings: analysis
            .rankings
            .iter()
            .map(|(k, r)| (k.clone(), r.ids()))
            .collect(),
        num_buckets: analysis.num_buckets,
        histograms: &analysis.histograms,
        series: &joined.series,
        stats: joined.stats(),
        aux: &joined.aux,
        counties: joined
            .counties
            .table
            .regions()
            .iter()
            .map(|county| {
                let entry = CountyEntry {
                    current: joined.counties.current.get(&county.id),
                };
                (county.id.as_str(), entry)
            })
            .collect(),
        county_stats: joined.counties.stats(),
    }
}
