// Rankings and fixed-width histograms over metric values.
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

use crate::types::{Bucket, Histogram, MetricRanking, RankEntry};

fn compare(a: &RankEntry, b: &RankEntry) -> Ordering {
    a.value
        .total_cmp(&b.value)
        .then_with(|| a.id.cmp(&b.id))
}

/// Order region ids by value ascending, ties broken by id ascending.
pub fn rank(values: &BTreeMap<String, f64>) -> MetricRanking {
    let mut entries: Vec<RankEntry> = values
        .iter()
        .map(|(id, value)| RankEntry {
            id: id.clone(),
            value: *value,
        })
        .collect();
    entries.sort_by(compare);
    MetricRanking { entries }
}

/// Split `[0, max]` into `num_buckets` equal-width buckets and assign every
/// ranked id whose value lies in `[min, max)` of a bucket.
///
/// Each bucket rescans the whole ranking, so ids keep ranking order within a
/// bucket. The intervals are half-open: ids whose value equals the global
/// maximum fall outside every bucket (see `boundary_excluded`).
pub fn histogram(ranking: &MetricRanking, num_buckets: usize) -> Histogram {
    let width = ranking.max_value().unwrap_or(0.0) / num_buckets as f64;
    let buckets = (0..num_buckets)
        .map(|i| {
            let min = width * i as f64;
            let max = width * (i + 1) as f64;
            let ids = ranking
                .entries
                .iter()
                .filter(|e| e.value >= min && e.value < max)
                .map(|e| e.id.clone())
                .collect();
            Bucket { min, max, ids }
        })
        .collect();
    Histogram { buckets }
}

/// Ranked ids that appear in no bucket of `hist`.
pub fn boundary_excluded(ranking: &MetricRanking, hist: &Histogram) -> Vec<String> {
    let bucketed: HashSet<&str> = hist
        .buckets
        .iter()
        .flat_map(|b| b.ids.iter().map(String::as_str))
        .collect();
    ranking
        .entries
        .iter()
        .filter(|e| !bucketed.contains(e.id.as_str()))
        .map(|e| e.id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn assert_total_order(ranking: &MetricRanking) {
        for pair in ranking.entries.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            assert!(a.value < b.value || (a.value == b.value && a.id < b.id));
        }
    }

    #[test]
    fn ranks_ascending_with_id_tie_break() {
        let ranking = rank(&values(&[
            ("WY", 3.0),
            ("AK", 3.0),
            ("VA", 0.5),
            ("CA", 10.0),
            ("AL", 3.0),
        ]));
        assert_eq!(ranking.ids(), vec!["VA", "AK", "AL", "WY", "CA"]);
        assert_total_order(&ranking);
    }

    #[test]
    fn per_capita_example_ranks_smaller_ratio_first() {
        let ranking = rank(&values(&[("A", 5.0 / 10.0), ("B", 5.0 / 100.0)]));
        assert_eq!(ranking.ids(), vec!["B", "A"]);
    }

    #[test]
    fn value_equal_to_maximum_lands_in_no_bucket() {
        let ranking = rank(&values(&[("A", 0.0), ("B", 5.0), ("C", 10.0)]));
        let hist = histogram(&ranking, 2);

        assert_eq!(hist.buckets.len(), 2);
        assert_eq!((hist.buckets[0].min, hist.buckets[0].max), (0.0, 5.0));
        assert_eq!(hist.buckets[0].ids, vec!["A"]);
        assert_eq!((hist.buckets[1].min, hist.buckets[1].max), (5.0, 10.0));
        assert_eq!(hist.buckets[1].ids, vec!["B"]);
        assert_eq!(boundary_excluded(&ranking, &hist), vec!["C"]);
    }

    #[test]
    fn only_maximum_ties_are_lost() {
        let ranking = rank(&values(&[
            ("A", 1.0),
            ("B", 2.5),
            ("C", 7.9),
            ("D", 8.0),
            ("E", 8.0),
            ("F", 4.0),
            ("G", 2.5),
        ]));
        let hist = histogram(&ranking, 8);

        for bucket in &hist.buckets {
            for id in &bucket.ids {
                let v = ranking.entries.iter().find(|e| &e.id == id).unwrap().value;
                assert!(bucket.min <= v && v < bucket.max);
            }
        }
        assert_eq!(boundary_excluded(&ranking, &hist), vec!["D", "E"]);
        // ties inside a bucket keep ranking order
        assert_eq!(hist.buckets[2].ids, vec!["B", "G"]);
    }

    #[test]
    fn empty_and_all_zero_rankings() {
        let empty = histogram(&MetricRanking::default(), 4);
        assert_eq!(empty.buckets.len(), 4);
        assert!(empty
            .buckets
            .iter()
            .all(|b| b.min == 0.0 && b.max == 0.0 && b.ids.is_empty()));

        let zeros = rank(&values(&[("A", 0.0), ("B", 0.0)]));
        let hist = histogram(&zeros, 3);
        assert_eq!(boundary_excluded(&zeros, &hist), vec!["A", "B"]);
    }
}
