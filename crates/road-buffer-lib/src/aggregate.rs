//! Grouping of overlay records by distance and parcel

use crate::{FeatureId, OverlayRecord};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Per-distance statistics
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DistanceSummary {
    pub distance: f64,
    /// Distinct parcels with at least one record
    pub intersecting_parcels: usize,
    pub record_count: usize,
    /// Sum over records; parcels touched by several road buffers count once per road
    pub total_intersection_area: f64,
    /// Sum of the buffer polygon areas at this distance
    pub buffer_area: f64,
}

/// Records of one distance with their summary
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DistanceGroup {
    pub summary: DistanceSummary,
    /// Sorted by parcel layer position, then road layer position
    pub records: Vec<OverlayRecord>,
}

/// Final, sorted result of a run
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AggregatedResult {
    groups: Vec<DistanceGroup>,
}

impl AggregatedResult {
    /// Groups in ascending distance order
    pub fn groups(&self) -> &[DistanceGroup] {
        &self.groups
    }

    pub fn summaries(&self) -> impl Iterator<Item = &DistanceSummary> {
        self.groups.iter().map(|g| &g.summary)
    }

    pub fn summary(&self, distance: f64) -> Option<&DistanceSummary> {
        self.group(distance).map(|g| &g.summary)
    }

    /// All records, grouped by distance
    pub fn records(&self) -> impl Iterator<Item = &OverlayRecord> {
        self.groups.iter().flat_map(|g| g.records.iter())
    }

    /// Records of one distance, empty when the distance was not processed
    pub fn records_for(&self, distance: f64) -> &[OverlayRecord] {
        self.group(distance)
            .map(|g| g.records.as_slice())
            .unwrap_or(&[])
    }

    /// Distinct parcels intersecting the buffers of `distance`, in parcel layer order
    pub fn intersecting_parcel_ids(&self, distance: f64) -> Vec<FeatureId> {
        let mut ids: Vec<FeatureId> = Vec::new();
        let mut last = None;
        for record in self.records_for(distance) {
            if last != Some(record.parcel_index) {
                ids.push(record.parcel_id.clone());
                last = Some(record.parcel_index);
            }
        }
        ids
    }

    /// Every record of one parcel at one distance, one per intersected buffer
    pub fn records_for_parcel(&self, distance: f64, parcel: &FeatureId) -> Vec<&OverlayRecord> {
        self.records_for(distance)
            .iter()
            .filter(|r| &r.parcel_id == parcel)
            .collect()
    }

    pub fn distances(&self) -> Vec<f64> {
        self.groups.iter().map(|g| g.summary.distance).collect()
    }

    /// True when no record was produced at any distance
    pub fn is_empty(&self) -> bool {
        self.groups.iter().all(|g| g.records.is_empty())
    }

    fn group(&self, distance: f64) -> Option<&DistanceGroup> {
        self.groups.iter().find(|g| g.summary.distance == distance)
    }
}

/// Collects overlay records distance by distance
#[derive(Debug, Clone, Default)]
pub struct ResultAggregator {
    pending: Vec<(f64, f64, Vec<OverlayRecord>)>,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the records of one distance; pushing a distance twice merges the batches
    pub fn push(&mut self, distance: f64, buffer_area: f64, records: Vec<OverlayRecord>) {
        match self.pending.iter_mut().find(|(d, _, _)| *d == distance) {
            Some((_, area, existing)) => {
                *area += buffer_area;
                existing.extend(records);
            }
            None => self.pending.push((distance, buffer_area, records)),
        }
    }

    /// Sort everything and compute the per-distance summaries
    pub fn finish(self) -> AggregatedResult {
        let mut groups: Vec<DistanceGroup> = self
            .pending
            .into_iter()
            .map(|(distance, buffer_area, mut records)| {
                // Stable, so records of one parcel/road pair keep their buffer order
                records.sort_by_key(|r| (r.parcel_index, r.road_index));

                let mut intersecting_parcels = 0;
                let mut last = None;
                for record in &records {
                    if last != Some(record.parcel_index) {
                        intersecting_parcels += 1;
                        last = Some(record.parcel_index);
                    }
                }

                DistanceGroup {
                    summary: DistanceSummary {
                        distance,
                        intersecting_parcels,
                        record_count: records.len(),
                        total_intersection_area: records.iter().map(|r| r.intersection_area).sum(),
                        buffer_area,
                    },
                    records,
                }
            })
            .collect();
        groups.sort_by(|a, b| a.summary.distance.total_cmp(&b.summary.distance));

        for group in &groups {
            tracing::debug!(
                "Distance {}: {} parcels, {} records, intersection area {:.3}",
                group.summary.distance,
                group.summary.intersecting_parcels,
                group.summary.record_count,
                group.summary.total_intersection_area
            );
        }
        AggregatedResult { groups }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::MultiPolygon;

    fn record(parcel: usize, road: Option<usize>, distance: f64, area: f64) -> OverlayRecord {
        OverlayRecord {
            parcel_id: FeatureId::from(format!("p{}", parcel)),
            parcel_index: parcel,
            distance,
            road_id: road.map(|r| FeatureId::from(format!("r{}", r))),
            road_index: road,
            intersection: MultiPolygon::new(vec![]),
            intersection_area: area,
            parcel_area: 10.0,
            fraction: area / 10.0,
        }
    }

    #[test]
    fn test_groups_sorted_by_distance() {
        let mut aggregator = ResultAggregator::new();
        aggregator.push(50.0, 500.0, vec![record(0, Some(0), 50.0, 5.0)]);
        aggregator.push(10.0, 100.0, vec![]);
        aggregator.push(25.0, 250.0, vec![record(1, Some(0), 25.0, 1.0)]);
        let result = aggregator.finish();

        assert_eq!(result.distances(), vec![10.0, 25.0, 50.0]);
        assert_eq!(result.summary(10.0).unwrap().record_count, 0);
        assert!(result.records_for(75.0).is_empty());
        assert!(result.summary(75.0).is_none());
        assert!(!result.is_empty());
    }

    #[test]
    fn test_records_sorted_by_parcel_then_road() {
        let mut aggregator = ResultAggregator::new();
        aggregator.push(
            10.0,
            100.0,
            vec![
                record(2, Some(1), 10.0, 1.0),
                record(0, Some(1), 10.0, 2.0),
                record(2, Some(0), 10.0, 3.0),
                record(0, Some(0), 10.0, 4.0),
            ],
        );
        let result = aggregator.finish();

        let order: Vec<(usize, Option<usize>)> = result
            .records_for(10.0)
            .iter()
            .map(|r| (r.parcel_index, r.road_index))
            .collect();
        assert_eq!(order, vec![(0, Some(0)), (0, Some(1)), (2, Some(0)), (2, Some(1))]);
    }

    #[test]
    fn test_summary_counts_distinct_parcels() {
        let mut aggregator = ResultAggregator::new();
        aggregator.push(
            10.0,
            100.0,
            vec![
                record(0, Some(0), 10.0, 2.0),
                record(0, Some(1), 10.0, 3.0),
                record(3, Some(1), 10.0, 1.5),
            ],
        );
        let result = aggregator.finish();
        let summary = result.summary(10.0).unwrap();

        assert_eq!(summary.intersecting_parcels, 2);
        assert_eq!(summary.record_count, 3);
        assert!((summary.total_intersection_area - 6.5).abs() < 1e-12);
        assert_eq!(summary.buffer_area, 100.0);
        assert_eq!(
            result.intersecting_parcel_ids(10.0),
            vec![FeatureId::from("p0"), FeatureId::from("p3")]
        );
        assert_eq!(result.records_for_parcel(10.0, &FeatureId::from("p0")).len(), 2);
        assert!(result.records_for_parcel(10.0, &FeatureId::from("p9")).is_empty());
    }

    #[test]
    fn test_push_same_distance_merges() {
        let mut aggregator = ResultAggregator::new();
        aggregator.push(10.0, 100.0, vec![record(1, None, 10.0, 1.0)]);
        aggregator.push(10.0, 50.0, vec![record(0, None, 10.0, 1.0)]);
        let result = aggregator.finish();

        assert_eq!(result.groups().len(), 1);
        assert_eq!(result.summary(10.0).unwrap().buffer_area, 150.0);
        assert_eq!(result.records_for(10.0)[0].parcel_index, 0);
    }

    #[test]
    fn test_empty_result() {
        let result = ResultAggregator::new().finish();
        assert!(result.is_empty());
        assert_eq!(result.records().count(), 0);
        assert_eq!(result.summaries().count(), 0);
    }
}
