//! Exact parcel/buffer intersections
//!
//! Parcels are repaired and measured once per run ([`PreparedParcels`]). For each buffer
//! polygon the [`OverlayEngine`] asks the [`SpatialIndex`] for bounding-box candidates and
//! intersects only those.

use crate::{
    BufferResult, BufferSet, Diagnostic, FeatureId, GeometryError, Layer, SpatialIndex, Stage,
    make_valid,
};
use geo::{Area, BooleanOps, BoundingRect, MultiPolygon, Rect, Validation};
use rayon::prelude::*;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A repaired parcel with its area and bounding box
#[derive(Debug, Clone)]
pub struct PreparedParcel {
    /// Position of the parcel in its layer
    pub index: usize,
    pub id: FeatureId,
    pub geometry: MultiPolygon<f64>,
    pub area: f64,
    pub bbox: Rect<f64>,
}

/// Valid parcels of one layer, in layer order
///
/// Parcels that could not be repaired are left out; slots therefore differ from layer
/// positions once anything was skipped.
#[derive(Debug, Clone, Default)]
pub struct PreparedParcels {
    parcels: Vec<PreparedParcel>,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl PreparedParcels {
    /// Repair every parcel of `layer`, reporting the ones that have to be skipped
    pub fn prepare(layer: &Layer) -> (Self, Vec<Diagnostic>) {
        #[cfg(feature = "profiling")]
        profiling::scope!("overlay::prepare");

        let results: Vec<Result<PreparedParcel, Diagnostic>> = layer
            .features()
            .par_iter()
            .enumerate()
            .map(|(index, feature)| {
                let geometry = make_valid(feature)
                    .map_err(|err| Diagnostic::new(feature.id().clone(), Stage::Repair, None, err))?;
                let bbox = geometry.bounding_rect().ok_or_else(|| {
                    Diagnostic::new(
                        feature.id().clone(),
                        Stage::Repair,
                        None,
                        GeometryError::Empty {
                            id: feature.id().clone(),
                        },
                    )
                })?;
                Ok(PreparedParcel {
                    index,
                    id: feature.id().clone(),
                    area: geometry.unsigned_area(),
                    geometry,
                    bbox,
                })
            })
            .collect();

        let mut parcels = Vec::with_capacity(results.len());
        let mut diagnostics = Vec::new();
        for result in results {
            match result {
                Ok(parcel) => parcels.push(parcel),
                Err(diagnostic) => {
                    tracing::warn!("Skipping parcel: {}", diagnostic);
                    diagnostics.push(diagnostic);
                }
            }
        }

        tracing::debug!(
            "Prepared {} of {} parcels of layer '{}'",
            parcels.len(),
            layer.len(),
            layer.name()
        );
        (Self { parcels }, diagnostics)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.parcels.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.parcels.is_empty()
    }

    #[inline]
    pub fn get(&self, slot: usize) -> Option<&PreparedParcel> {
        self.parcels.get(slot)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PreparedParcel> {
        self.parcels.iter()
    }
}

/// Intersection of one parcel with one buffer polygon
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct OverlayRecord {
    pub parcel_id: FeatureId,
    /// Position of the parcel in its layer
    pub parcel_index: usize,
    pub distance: f64,
    /// Road whose buffer was intersected, `None` for a dissolved footprint
    pub road_id: Option<FeatureId>,
    pub road_index: Option<usize>,
    pub intersection: MultiPolygon<f64>,
    pub intersection_area: f64,
    pub parcel_area: f64,
    /// `intersection_area / parcel_area`, clamped to `[0, 1]`
    pub fraction: f64,
}

/// Records of one buffer set plus the buffers that had to be skipped
#[derive(Debug, Clone, Default)]
pub struct OverlayOutcome {
    pub records: Vec<OverlayRecord>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Intersects buffer sets with an indexed parcel layer
///
/// Borrows the index and the parcels, so one engine serves every distance of a run.
#[derive(Debug, Clone, Copy)]
pub struct OverlayEngine<'a> {
    index: &'a SpatialIndex,
    parcels: &'a PreparedParcels,
    area_epsilon: f64,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl<'a> OverlayEngine<'a> {
    /// `area_epsilon` is relative to each parcel's area
    pub fn new(index: &'a SpatialIndex, parcels: &'a PreparedParcels, area_epsilon: f64) -> Self {
        Self {
            index,
            parcels,
            area_epsilon,
        }
    }

    /// Intersect every buffer of `set` with the parcels it touches
    ///
    /// Records come out in buffer order, then parcel order. Each qualifying
    /// (parcel, buffer) pair yields its own record.
    pub fn overlay(&self, set: &BufferSet) -> OverlayOutcome {
        #[cfg(feature = "profiling")]
        profiling::scope!("overlay::overlay");

        let per_buffer: Vec<Result<Vec<OverlayRecord>, Diagnostic>> = set
            .buffers
            .par_iter()
            .map(|buffer| self.overlay_buffer(buffer))
            .collect();

        let mut outcome = OverlayOutcome::default();
        for result in per_buffer {
            match result {
                Ok(records) => outcome.records.extend(records),
                Err(diagnostic) => {
                    tracing::warn!("Skipping buffer: {}", diagnostic);
                    outcome.diagnostics.push(diagnostic);
                }
            }
        }

        tracing::debug!(
            "Overlay at distance {}: {} buffers, {} records",
            set.distance,
            set.len(),
            outcome.records.len()
        );
        outcome
    }

    fn overlay_buffer(&self, buffer: &BufferResult) -> Result<Vec<OverlayRecord>, Diagnostic> {
        let source = buffer
            .source
            .clone()
            .unwrap_or_else(|| FeatureId::new("dissolved"));
        if !buffer.geometry.is_valid() {
            let err = GeometryError::Malformed {
                id: source.clone(),
                reason: "buffer polygon is invalid".to_string(),
            };
            return Err(Diagnostic::new(
                source,
                Stage::Overlay,
                Some(buffer.distance),
                err,
            ));
        }
        let Some(bbox) = buffer.geometry.bounding_rect() else {
            return Ok(Vec::new());
        };

        let records = self
            .index
            .query(bbox)
            .into_iter()
            .filter_map(|slot| self.parcels.get(slot))
            .filter_map(|parcel| self.intersect(parcel, buffer))
            .collect();
        Ok(records)
    }

    fn intersect(&self, parcel: &PreparedParcel, buffer: &BufferResult) -> Option<OverlayRecord> {
        let intersection = parcel.geometry.intersection(&buffer.geometry);
        let intersection_area = intersection.unsigned_area();
        // Boundary-only touches leave slivers with no real area
        if intersection_area <= self.area_epsilon * parcel.area {
            return None;
        }

        Some(OverlayRecord {
            parcel_id: parcel.id.clone(),
            parcel_index: parcel.index,
            distance: buffer.distance,
            road_id: buffer.source.clone(),
            road_index: buffer.source_index,
            intersection,
            intersection_area,
            parcel_area: parcel.area,
            fraction: (intersection_area / parcel.area).clamp(0.0, 1.0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BufferMode, Crs, Feature, GeometryKind};
    use geo::{LineString, Polygon, polygon};

    fn square(x: f64, y: f64, size: f64) -> Polygon<f64> {
        polygon![
            (x: x, y: y),
            (x: x + size, y: y),
            (x: x + size, y: y + size),
            (x: x, y: y + size),
        ]
    }

    fn parcel_layer(features: Vec<Feature>) -> Layer {
        Layer::new(
            "parcels",
            GeometryKind::Polygon,
            Some(Crs::WebMercator),
            features,
        )
        .unwrap()
    }

    fn buffer(source: &str, index: usize, polygon: Polygon<f64>, distance: f64) -> BufferResult {
        BufferResult {
            source: Some(FeatureId::from(source)),
            source_index: Some(index),
            distance,
            geometry: MultiPolygon::new(vec![polygon]),
        }
    }

    fn set(distance: f64, buffers: Vec<BufferResult>) -> BufferSet {
        BufferSet {
            distance,
            mode: BufferMode::PerFeature,
            buffers,
        }
    }

    #[test]
    fn test_prepare_skips_unrepairable() {
        let layer = parcel_layer(vec![
            Feature::new("ok", square(0.0, 0.0, 10.0)),
            Feature::new("empty", Polygon::new(LineString::new(vec![]), vec![])),
            Feature::new(
                "bowtie",
                polygon![(x: 0.0, y: 0.0), (x: 10.0, y: 10.0), (x: 10.0, y: 0.0), (x: 0.0, y: 10.0)],
            ),
        ]);
        let (parcels, diagnostics) = PreparedParcels::prepare(&layer);

        assert_eq!(parcels.len(), 2);
        assert_eq!(parcels.get(1).unwrap().index, 2);
        assert!((parcels.get(1).unwrap().area - 50.0).abs() < 1e-9);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].feature_id.as_str(), "empty");
        assert_eq!(diagnostics[0].stage, Stage::Repair);
    }

    #[test]
    fn test_overlay_records() {
        let layer = parcel_layer(vec![
            Feature::new("inside", square(2.0, 2.0, 2.0)),
            Feature::new("half", square(8.0, 0.0, 4.0)),
            Feature::new("outside", square(50.0, 50.0, 5.0)),
        ]);
        let (parcels, _) = PreparedParcels::prepare(&layer);
        let index = SpatialIndex::from_parcels(&parcels, 2);
        let engine = OverlayEngine::new(&index, &parcels, 1e-9);

        let outcome = engine.overlay(&set(5.0, vec![buffer("r1", 0, square(0.0, 0.0, 10.0), 5.0)]));
        assert!(outcome.diagnostics.is_empty());
        assert_eq!(outcome.records.len(), 2);

        let inside = &outcome.records[0];
        assert_eq!(inside.parcel_id.as_str(), "inside");
        assert!((inside.intersection_area - 4.0).abs() < 1e-9);
        assert!((inside.fraction - 1.0).abs() < 1e-12);
        assert_eq!(inside.road_id, Some(FeatureId::from("r1")));

        let half = &outcome.records[1];
        assert_eq!(half.parcel_index, 1);
        assert!((half.fraction - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_boundary_touch_is_not_a_record() {
        let layer = parcel_layer(vec![Feature::new("touching", square(10.0, 0.0, 5.0))]);
        let (parcels, _) = PreparedParcels::prepare(&layer);
        let index = SpatialIndex::from_parcels(&parcels, 2);
        let engine = OverlayEngine::new(&index, &parcels, 1e-9);

        let outcome = engine.overlay(&set(1.0, vec![buffer("r1", 0, square(0.0, 0.0, 10.0), 1.0)]));
        assert!(outcome.records.is_empty());
    }

    #[test]
    fn test_overlapping_buffers_are_not_deduplicated() {
        let layer = parcel_layer(vec![Feature::new("corner", square(4.0, 4.0, 2.0))]);
        let (parcels, _) = PreparedParcels::prepare(&layer);
        let index = SpatialIndex::from_parcels(&parcels, 2);
        let engine = OverlayEngine::new(&index, &parcels, 1e-9);

        let outcome = engine.overlay(&set(
            5.0,
            vec![
                buffer("r1", 0, square(0.0, 0.0, 10.0), 5.0),
                buffer("r2", 1, square(3.0, 3.0, 10.0), 5.0),
            ],
        ));
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.records[0].road_index, Some(0));
        assert_eq!(outcome.records[1].road_index, Some(1));
    }

    #[test]
    fn test_invalid_buffer_is_skipped() {
        let layer = parcel_layer(vec![Feature::new("p", square(0.0, 0.0, 10.0))]);
        let (parcels, _) = PreparedParcels::prepare(&layer);
        let index = SpatialIndex::from_parcels(&parcels, 2);
        let engine = OverlayEngine::new(&index, &parcels, 1e-9);

        let bowtie = polygon![(x: 0.0, y: 0.0), (x: 10.0, y: 10.0), (x: 10.0, y: 0.0), (x: 0.0, y: 10.0)];
        let outcome = engine.overlay(&set(
            2.0,
            vec![
                buffer("bad", 0, bowtie, 2.0),
                buffer("good", 1, square(0.0, 0.0, 5.0), 2.0),
            ],
        ));
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.diagnostics.len(), 1);
        assert_eq!(outcome.diagnostics[0].feature_id.as_str(), "bad");
        assert_eq!(outcome.diagnostics[0].stage, Stage::Overlay);
        assert_eq!(outcome.diagnostics[0].distance, Some(2.0));
    }
}
