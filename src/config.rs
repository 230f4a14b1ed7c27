// Run configuration.
//
// Every field has a default matching the canonical data directory layout,
// so a run with no config file needs only `--data-dir`. Paths are relative
// to the data directory.
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{PipelineError, Result};
use crate::metrics::{Denominator, MetricKey, Numerator};
use crate::types::LocationKind;

pub const DEFAULT_NUM_BUCKETS: usize = 8;

/// Reference attribute copied onto a geometry feature's properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeoProperty {
    Name,
    /// Containing state name; counties only.
    State,
    Population,
    Births,
    Deaths,
    LandArea,
    TotalArea,
    Density,
}

impl GeoProperty {
    pub const STATE_SET: [GeoProperty; 6] = [
        GeoProperty::Name,
        GeoProperty::Population,
        GeoProperty::Births,
        GeoProperty::Deaths,
        GeoProperty::LandArea,
        GeoProperty::Density,
    ];

    pub const COUNTY_SET: [GeoProperty; 7] = [
        GeoProperty::Name,
        GeoProperty::State,
        GeoProperty::Population,
        GeoProperty::Births,
        GeoProperty::Deaths,
        GeoProperty::LandArea,
        GeoProperty::Density,
    ];

    /// Properties emitted for a feature type when the layer names none.
    pub fn defaults_for(kind: LocationKind) -> &'static [GeoProperty] {
        match kind {
            LocationKind::States => &Self::STATE_SET,
            LocationKind::Counties => &Self::COUNTY_SET,
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            GeoProperty::Name => "name",
            GeoProperty::State => "state",
            GeoProperty::Population => "population",
            GeoProperty::Births => "births",
            GeoProperty::Deaths => "deaths",
            GeoProperty::LandArea => "land_area",
            GeoProperty::TotalArea => "total_area",
            GeoProperty::Density => "density",
        }
    }
}

/// One GeoJSON input: a feature type at one resolution.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeometrySource {
    pub feature_type: LocationKind,
    pub resolution: String,
    pub path: PathBuf,
    #[serde(default)]
    pub properties: Option<Vec<GeoProperty>>,
}

impl GeometrySource {
    pub fn new(feature_type: LocationKind, resolution: &str) -> Self {
        GeometrySource {
            feature_type,
            resolution: resolution.to_string(),
            path: PathBuf::from(format!("geo/{}-{}.json", feature_type.key(), resolution)),
            properties: None,
        }
    }

    /// File name of the emitted document, e.g. `states-20m.json`.
    pub fn output_name(&self) -> String {
        format!("{}-{}.json", self.feature_type.key(), self.resolution)
    }

    pub fn properties(&self) -> &[GeoProperty] {
        match &self.properties {
            Some(properties) => properties.as_slice(),
            None => GeoProperty::defaults_for(self.feature_type),
        }
    }
}

/// County-level inputs. Without the reference file the county tier is
/// skipped entirely.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CountySources {
    /// Census county estimates (`SUMLEV`, `STATE`, `COUNTY`, `CTYNAME`, ...).
    pub reference_path: Option<PathBuf>,
    /// Land area keyed by FIPS in `STCOU`.
    pub land_area_path: Option<PathBuf>,
    /// Current counts keyed by FIPS in `fips`.
    pub current_path: Option<PathBuf>,
}

impl Default for CountySources {
    fn default() -> Self {
        CountySources {
            reference_path: Some(PathBuf::from("counties/co-est2019-alldata.csv")),
            land_area_path: Some(PathBuf::from("counties/LND01.csv")),
            current_path: Some(PathBuf::from("counties/us-counties.csv")),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub regions_path: PathBuf,
    pub populations_path: Option<PathBuf>,
    pub areas_path: Option<PathBuf>,
    pub daily_json_path: Option<PathBuf>,
    pub snapshot_dir: Option<PathBuf>,
    /// Country column value kept from per-date snapshot files.
    pub country: String,
    pub num_buckets: usize,
    pub numerators: Vec<String>,
    pub denominators: Vec<String>,
    pub geometries: Vec<GeometrySource>,
    pub info_path: Option<PathBuf>,
    pub current_path: Option<PathBuf>,
    pub counties: CountySources,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let geometries = [LocationKind::States, LocationKind::Counties]
            .into_iter()
            .flat_map(|kind| {
                ["500k", "5m", "20m"]
                    .into_iter()
                    .map(move |res| GeometrySource::new(kind, res))
            })
            .collect();
        PipelineConfig {
            regions_path: PathBuf::from("states.csv"),
            populations_path: Some(PathBuf::from("populations.csv")),
            areas_path: Some(PathBuf::from("areas.csv")),
            daily_json_path: Some(PathBuf::from("daily.json")),
            snapshot_dir: Some(PathBuf::from("csse-daily")),
            country: "US".to_string(),
            num_buckets: DEFAULT_NUM_BUCKETS,
            numerators: vec!["cases".into(), "deaths".into(), "population".into()],
            denominators: vec!["one".into(), "population".into(), "area_land".into()],
            geometries,
            info_path: Some(PathBuf::from("states-info.json")),
            current_path: Some(PathBuf::from("states-current.json")),
            counties: CountySources::default(),
        }
    }
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        let config: PipelineConfig =
            serde_json::from_str(&text).map_err(|e| PipelineError::json(path, e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_buckets == 0 {
            return Err(PipelineError::Config("num_buckets must be positive".into()));
        }
        if self.numerators.is_empty() || self.denominators.is_empty() {
            return Err(PipelineError::Config(
                "at least one numerator and one denominator are required".into(),
            ));
        }
        self.metric_keys().map(|_| ())
    }

    /// Cross product of the configured numerator and denominator kinds, in
    /// configuration order. Unknown kind names are fatal.
    pub fn metric_keys(&self) -> Result<Vec<MetricKey>> {
        let numerators = self
            .numerators
            .iter()
            .map(|s| s.parse::<Numerator>())
            .collect::<Result<Vec<_>>>()?;
        let denominators = self
            .denominators
            .iter()
            .map(|s| s.parse::<Denominator>())
            .collect::<Result<Vec<_>>>()?;
        Ok(numerators
            .iter()
            .flat_map(|&n| denominators.iter().map(move |&d| MetricKey::new(n, d)))
            .collect())
    }
}
