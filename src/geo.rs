// GeoJSON layers for the multi-file output.
//
// State features are matched by id first and by `NAME` second; county
// features by FIPS code only, since county names repeat across states. The
// emitted collection keeps matched features only, annotated with the
// reference properties configured for the layer's feature type.
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::{GeoProperty, GeometrySource};
use crate::error::{PipelineError, Result};
use crate::join::JoinedTable;
use crate::reference::RegionTable;
use crate::types::{LocationKind, MissingJoinRecord, MissingKind, Region};
use crate::util::{county_fips, format_int};

#[derive(Debug, Deserialize)]
struct SourceCollection {
    #[serde(default)]
    features: Vec<SourceFeature>,
}

#[derive(Debug, Deserialize)]
struct SourceFeature {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    properties: Map<String, Value>,
    #[serde(default)]
    geometry: Value,
}

fn key_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl SourceFeature {
    fn property_text(&self, key: &str) -> Option<String> {
        self.properties.get(key).and_then(key_text)
    }

    fn candidate_keys(&self, kind: LocationKind) -> Vec<String> {
        let mut keys: Vec<String> = [self.id.as_ref(), self.properties.get("id")]
            .into_iter()
            .flatten()
            .filter_map(key_text)
            .collect();
        match kind {
            LocationKind::States => {
                keys.extend(self.property_text("NAME"));
                keys.extend(self.property_text("name"));
            }
            LocationKind::Counties => {
                let code = self
                    .property_text("STATE")
                    .zip(self.property_text("COUNTY"))
                    .and_then(|(state, county)| county_fips(&state, &county));
                keys.extend(code);
            }
        }
        keys.retain(|k| !k.is_empty());
        keys
    }
}

/// Geometries of one (feature type, resolution) input, keyed by region id.
#[derive(Debug, Clone)]
pub struct GeometryLayer {
    pub source: GeometrySource,
    pub geometries: BTreeMap<String, Value>,
}

pub fn load_layer(
    source: &GeometrySource,
    path: &Path,
    table: &RegionTable,
    missing: &mut Vec<MissingJoinRecord>,
) -> Result<GeometryLayer> {
    let text = fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
    let collection: SourceCollection =
        serde_json::from_str(&text).map_err(|e| PipelineError::json(path, e))?;

    let total = collection.features.len();
    let mut geometries = BTreeMap::new();
    let kind = source.feature_type;
    for feature in collection.features {
        let keys = feature.candidate_keys(kind);
        let matched = keys.iter().find_map(|k| match kind {
            LocationKind::States => table.resolve(k),
            LocationKind::Counties => table.lookup_id(k),
        });
        match matched {
            Some(id) => {
                geometries.insert(id.to_string(), feature.geometry);
            }
            None => {
                debug!("{}: unmatched feature {:?}", source.output_name(), keys);
                missing.push(MissingJoinRecord {
                    key_type: MissingKind::Geometry,
                    key: keys.first().cloned().unwrap_or_default(),
                    row: Value::Object(feature.properties),
                });
            }
        }
    }
    info!(
        "{}: matched {} of {} features",
        source.output_name(),
        format_int(geometries.len()),
        format_int(total)
    );
    Ok(GeometryLayer {
        source: source.clone(),
        geometries,
    })
}

#[derive(Debug, Serialize)]
pub struct FeatureCollection {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub features: Vec<Feature>,
}

#[derive(Debug, Serialize)]
pub struct Feature {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub id: String,
    pub geometry: Value,
    pub properties: Map<String, Value>,
}

fn property_value(region: &Region, property: GeoProperty) -> Value {
    match property {
        GeoProperty::Name => Value::from(region.name.clone()),
        GeoProperty::State => region.state.clone().map_or(Value::Null, Value::from),
        GeoProperty::Population => region.population.map_or(Value::Null, Value::from),
        GeoProperty::Births => region.births.map_or(Value::Null, Value::from),
        GeoProperty::Deaths => region.deaths.map_or(Value::Null, Value::from),
        GeoProperty::LandArea => region.land_area.map_or(Value::Null, Value::from),
        GeoProperty::TotalArea => region.total_area.map_or(Value::Null, Value::from),
        GeoProperty::Density => region.density.map_or(Value::Null, Value::from),
    }
}

/// Build the output collection for a layer, features ordered by region id.
/// A matched region without a name is treated as corrupt input.
pub fn feature_collection(layer: &GeometryLayer, joined: &JoinedTable) -> Result<FeatureCollection> {
    let kind = layer.source.feature_type;
    let table = joined.table(kind);
    let mut features = Vec::with_capacity(layer.geometries.len());
    for (id, geometry) in &layer.geometries {
        let Some(region) = table.get(id) else {
            continue;
        };
        if region.name.trim().is_empty() {
            return Err(PipelineError::Sanity(format!(
                "{}: feature '{}' maps to a region with no name",
                layer.source.output_name(),
                id
            )));
        }
        let mut properties = Map::new();
        properties.insert("id".to_string(), Value::from(id.clone()));
        properties.insert("type".to_string(), Value::from(kind.singular()));
        for &property in layer.source.properties() {
            properties.insert(property.key().to_string(), property_value(region, property));
        }
        features.push(Feature {
            kind: "Feature",
            id: id.clone(),
            geometry: geometry.clone(),
            properties,
        });
    }
    Ok(FeatureCollection {
        kind: "FeatureCollection",
        features,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::join::join;
    use serde_json::json;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn source(properties: Option<Vec<GeoProperty>>) -> GeometrySource {
        GeometrySource {
            properties,
            ..GeometrySource::new(LocationKind::States, "20m")
        }
    }

    fn table() -> RegionTable {
        let mut va = Region::new("VA", "Virginia");
        va.population = Some(8_535_519);
        va.land_area = Some(39_490.1);
        RegionTable::from_regions(vec![va, Region::new("AK", "Alaska")]).unwrap()
    }

    fn write_collection(dir: &Path) -> PathBuf {
        let path = dir.join("states-20m.json");
        let doc = json!({
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "properties": {"NAME": "Virginia", "STATE": "51"},
                 "geometry": {"type": "Point", "coordinates": [-78.0, 37.5]}},
                {"type": "Feature", "id": "AK", "properties": {"NAME": "Alaska"},
                 "geometry": {"type": "Point", "coordinates": [-150.0, 64.0]}},
                {"type": "Feature", "properties": {"NAME": "Puerto Rico"},
                 "geometry": {"type": "Point", "coordinates": [-66.5, 18.2]}}
            ]
        });
        fs::write(&path, doc.to_string()).unwrap();
        path
    }

    #[test]
    fn features_match_by_id_or_name() {
        let dir = tempdir().unwrap();
        let path = write_collection(dir.path());
        let table = table();
        let mut missing = Vec::new();

        let layer = load_layer(&source(None), &path, &table, &mut missing)
            .unwrap();
        assert_eq!(layer.geometries.keys().collect::<Vec<_>>(), vec!["AK", "VA"]);
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].key_type, MissingKind::Geometry);
        assert_eq!(missing[0].key, "Puerto Rico");
        assert!(missing[0].row.get("geometry").is_none());
    }

    #[test]
    fn output_carries_configured_properties() {
        let dir = tempdir().unwrap();
        let path = write_collection(dir.path());
        let mut missing = Vec::new();
        let table = table();
        let src = source(Some(vec![
            GeoProperty::Name,
            GeoProperty::Population,
            GeoProperty::Density,
        ]));
        let layer = load_layer(&src, &path, &table, &mut missing).unwrap();
        let joined = join(table, BTreeMap::new(), BTreeMap::new(), missing);

        let doc = serde_json::to_value(feature_collection(&layer, &joined).unwrap()).unwrap();
        assert_eq!(doc["type"], "FeatureCollection");
        let features = doc["features"].as_array().unwrap();
        assert_eq!(features.len(), 2);
        assert_eq!(features[0]["id"], "AK");
        assert_eq!(features[0]["properties"]["population"], Value::Null);
        let va = &features[1]["properties"];
        assert_eq!(va["id"], "VA");
        assert_eq!(va["type"], "state");
        assert_eq!(va["name"], "Virginia");
        assert_eq!(va["population"], 8_535_519);
        assert!(va["density"].as_f64().unwrap() > 216.0);
        assert!(va.get("births").is_none());
    }

    #[test]
    fn nameless_region_is_fatal() {
        let table = RegionTable::from_regions(vec![Region::new("VA", "")]).unwrap();
        let mut geometries = BTreeMap::new();
        geometries.insert("VA".to_string(), json!({"type": "Point", "coordinates": [0, 0]}));
        let layer = GeometryLayer {
            source: source(Some(vec![GeoProperty::Name])),
            geometries,
        };
        let joined = join(table, BTreeMap::new(), BTreeMap::new(), Vec::new());
        assert!(matches!(
            feature_collection(&layer, &joined),
            Err(PipelineError::Sanity(_))
        ));
    }

    #[test]
    fn county_features_match_by_fips_and_carry_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("counties-20m.json");
        let doc = json!({
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature",
                 "properties": {"GEO_ID": "0500000US51001", "STATE": "51", "COUNTY": "001", "NAME": "Accomack"},
                 "geometry": {"type": "Point", "coordinates": [-75.6, 37.7]}},
                {"type": "Feature",
                 "properties": {"STATE": "72", "COUNTY": "001", "NAME": "Adjuntas"},
                 "geometry": {"type": "Point", "coordinates": [-66.7, 18.2]}},
                {"type": "Feature",
                 "properties": {"STATE": "02", "NAME": "Accomack County"},
                 "geometry": {"type": "Point", "coordinates": [0.0, 0.0]}}
            ]
        });
        fs::write(&path, doc.to_string()).unwrap();

        let mut accomack = Region::new("51001", "Accomack County");
        accomack.state = Some("Virginia".to_string());
        accomack.population = Some(32_316);
        let counties = RegionTable::from_regions(vec![accomack]).unwrap();

        let mut missing = Vec::new();
        let src = GeometrySource::new(LocationKind::Counties, "20m");
        let layer = load_layer(&src, &path, &counties, &mut missing).unwrap();
        assert_eq!(layer.geometries.keys().collect::<Vec<_>>(), vec!["51001"]);
        // names never match counties
        assert_eq!(missing.len(), 2);
        assert_eq!(missing[0].key, "72001");

        let mut joined = join(table(), BTreeMap::new(), BTreeMap::new(), Vec::new());
        joined.counties.table = counties;
        let doc = serde_json::to_value(feature_collection(&layer, &joined).unwrap()).unwrap();
        let props = &doc["features"][0]["properties"];
        assert_eq!(props["id"], "51001");
        assert_eq!(props["type"], "county");
        assert_eq!(props["state"], "Virginia");
        assert_eq!(props["population"], 32_316);
        assert_eq!(props["land_area"], Value::Null);
    }
}
