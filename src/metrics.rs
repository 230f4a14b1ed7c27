// Derived per-region ratios.
//
// Metric kinds are a closed set; configuration strings are parsed into them
// once and anything unrecognized is a fatal `UnknownMetric`.
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use log::debug;

use crate::error::PipelineError;
use crate::join::JoinedTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Numerator {
    /// Latest cumulative confirmed count.
    Cases,
    /// Latest cumulative death count.
    Deaths,
    Population,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Denominator {
    One,
    Population,
    AreaLand,
}

impl Numerator {
    pub const ALL: [Numerator; 3] = [Numerator::Cases, Numerator::Deaths, Numerator::Population];

    pub fn key(self) -> &'static str {
        match self {
            Numerator::Cases => "cases",
            Numerator::Deaths => "deaths",
            Numerator::Population => "population",
        }
    }

    fn value(self, joined: &JoinedTable, id: &str) -> Option<f64> {
        match self {
            Numerator::Cases => joined
                .series_for(id)
                .and_then(|s| s.latest())
                .map(|p| p.confirmed as f64),
            Numerator::Deaths => joined
                .series_for(id)
                .and_then(|s| s.latest())
                .map(|p| p.deaths as f64),
            Numerator::Population => joined.region(id)?.population.map(|p| p as f64),
        }
    }
}

impl Denominator {
    pub const ALL: [Denominator; 3] = [
        Denominator::One,
        Denominator::Population,
        Denominator::AreaLand,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Denominator::One => "one",
            Denominator::Population => "population",
            Denominator::AreaLand => "area_land",
        }
    }

    fn value(self, joined: &JoinedTable, id: &str) -> Option<f64> {
        match self {
            Denominator::One => Some(1.0),
            Denominator::Population => joined.region(id)?.population.map(|p| p as f64),
            Denominator::AreaLand => joined.region(id)?.land_area,
        }
    }
}

impl FromStr for Numerator {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Numerator::ALL
            .into_iter()
            .find(|n| n.key() == s)
            .ok_or_else(|| PipelineError::UnknownMetric(s.to_string()))
    }
}

impl FromStr for Denominator {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Denominator::ALL
            .into_iter()
            .find(|d| d.key() == s)
            .ok_or_else(|| PipelineError::UnknownMetric(s.to_string()))
    }
}

/// A numerator/denominator pair, rendered as `<numerator>_<denominator>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricKey {
    pub numerator: Numerator,
    pub denominator: Denominator,
}

impl MetricKey {
    pub fn new(numerator: Numerator, denominator: Denominator) -> Self {
        MetricKey {
            numerator,
            denominator,
        }
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.numerator.key(), self.denominator.key())
    }
}

/// Value of one metric for every region that has both sides defined.
///
/// Only regions with at least one series point are candidates. A missing,
/// zero or non-finite denominator excludes the region, as does a
/// non-finite quotient.
pub fn metric_values(joined: &JoinedTable, key: MetricKey) -> BTreeMap<String, f64> {
    let mut values = BTreeMap::new();
    for region in joined.regions.regions() {
        let id = region.id.as_str();
        if joined.series_for(id).is_none() {
            continue;
        }
        let Some(numerator) = key.numerator.value(joined, id) else {
            debug!("{}: no {} value for {}", key, key.numerator.key(), id);
            continue;
        };
        let denominator = match key.denominator.value(joined, id) {
            Some(d) if d != 0.0 && d.is_finite() => d,
            other => {
                debug!("{}: unusable denominator {:?} for {}", key, other, id);
                continue;
            }
        };
        let value = numerator / denominator;
        if value.is_finite() {
            values.insert(id.to_string(), value);
        }
    }
    values
}

/// Values for every configured metric, keyed by metric name.
pub fn compute_all(
    joined: &JoinedTable,
    keys: &[MetricKey],
) -> BTreeMap<String, BTreeMap<String, f64>> {
    keys.iter()
        .map(|&key| (key.to_string(), metric_values(joined, key)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::join::join;
    use crate::reference::RegionTable;
    use crate::series::SeriesBuilder;
    use crate::types::{Region, SeriesPoint};
    use chrono::NaiveDate;

    fn region(id: &str, population: Option<i64>, land_area: Option<f64>) -> Region {
        let mut r = Region::new(id, format!("Region {id}"));
        r.population = population;
        r.land_area = land_area;
        r
    }

    fn series(points: &[(u32, u64, u64)]) -> crate::types::RegionSeries {
        let mut b = SeriesBuilder::default();
        for &(d, confirmed, deaths) in points {
            b.push(SeriesPoint {
                date: NaiveDate::from_ymd_opt(2020, 4, d).unwrap(),
                confirmed,
                deaths,
                recovered: None,
                last_updated: None,
            });
        }
        b.finish()
    }

    fn joined() -> JoinedTable {
        let table = RegionTable::from_regions(vec![
            region("A", Some(10), Some(2.0)),
            region("B", Some(100), Some(0.0)),
            region("C", None, None),
            region("D", Some(50), Some(5.0)),
        ])
        .unwrap();
        let mut s = BTreeMap::new();
        s.insert("A".to_string(), series(&[(2, 5, 1), (1, 3, 0)]));
        s.insert("B".to_string(), series(&[(1, 5, 2)]));
        s.insert("C".to_string(), series(&[(1, 7, 0)]));
        join(table, s, BTreeMap::new(), Vec::new())
    }

    fn key(numerator: &str, denominator: &str) -> MetricKey {
        MetricKey::new(numerator.parse().unwrap(), denominator.parse().unwrap())
    }

    #[test]
    fn kinds_parse_and_keys_render() {
        let parsed = key("deaths", "area_land");
        assert_eq!(parsed, MetricKey::new(Numerator::Deaths, Denominator::AreaLand));
        assert_eq!(parsed.to_string(), "deaths_area_land");
        assert!(matches!(
            "households".parse::<Denominator>(),
            Err(PipelineError::UnknownMetric(_))
        ));
        assert!(matches!(
            "hospitalized".parse::<Numerator>(),
            Err(PipelineError::UnknownMetric(_))
        ));
    }

    #[test]
    fn latest_point_drives_case_metrics() {
        let joined = joined();
        let values = metric_values(&joined, key("cases", "population"));
        assert_eq!(values.get("A"), Some(&0.5));
        assert_eq!(values.get("B"), Some(&0.05));
        // no population
        assert_eq!(values.get("C"), None);
        // no series
        assert_eq!(values.get("D"), None);

        let counts = metric_values(&joined, key("cases", "one"));
        assert_eq!(counts.len(), 3);
        assert_eq!(counts["C"], 7.0);
    }

    #[test]
    fn zero_and_missing_denominators_are_excluded() {
        let joined = joined();
        let values = metric_values(&joined, key("deaths", "area_land"));
        assert_eq!(values.len(), 1);
        assert_eq!(values["A"], 0.5);
    }

    #[test]
    fn regions_without_series_never_rank() {
        let joined = joined();
        let all = compute_all(
            &joined,
            &[
                key("population", "one"),
                key("population", "area_land"),
            ],
        );
        assert!(all.values().all(|v| !v.contains_key("D")));
        assert_eq!(all["population_one"].len(), 2);
    }
}
