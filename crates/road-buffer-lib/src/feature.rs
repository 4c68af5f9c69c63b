//! Features and layers
//!
//! This module provides the immutable `Feature` and `Layer` values the rest of the engine
//! consumes, plus the validity repair applied to polygonal geometries.

use crate::{Crs, GeometryError};
use geo::line_intersection::{LineIntersection, line_intersection};
use geo::orient::{Direction, Orient};
use geo::{
    Area, BooleanOps, BoundingRect, Coord, CoordsIter, Geometry, Intersects, Line, LineString,
    MultiPolygon, Polygon, Rect, Validation, unary_union,
};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::{DefaultHasher, Hash, Hasher};

/// Stable identifier of a feature, unique within its layer
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FeatureId(String);

impl FeatureId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FeatureId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for FeatureId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<usize> for FeatureId {
    fn from(id: usize) -> Self {
        Self(id.to_string())
    }
}

/// Attribute value types
///
/// Input attributes are schema-less; keys the engine does not know about are carried
/// through untouched.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AttributeValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

/// Ordered attribute mapping of a feature
pub type Attributes = BTreeMap<String, AttributeValue>;

/// Geometry kind shared by all features of a layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum GeometryKind {
    /// Line strings (roads)
    Line,
    /// Polygons (parcels)
    Polygon,
}

impl GeometryKind {
    /// Kind of a geometry, or `None` for points and mixed collections
    pub fn of(geometry: &Geometry<f64>) -> Option<Self> {
        match geometry {
            Geometry::Line(_) | Geometry::LineString(_) | Geometry::MultiLineString(_) => {
                Some(GeometryKind::Line)
            }
            Geometry::Polygon(_)
            | Geometry::MultiPolygon(_)
            | Geometry::Rect(_)
            | Geometry::Triangle(_) => Some(GeometryKind::Polygon),
            Geometry::Point(_) | Geometry::MultiPoint(_) | Geometry::GeometryCollection(_) => {
                None
            }
        }
    }
}

/// A geometry with an identifier and attributes
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Feature {
    id: FeatureId,
    geometry: Geometry<f64>,
    attributes: Attributes,
}

impl Feature {
    /// Create a new feature with no attributes
    pub fn new(id: impl Into<FeatureId>, geometry: impl Into<Geometry<f64>>) -> Self {
        Self {
            id: id.into(),
            geometry: geometry.into(),
            attributes: Attributes::new(),
        }
    }

    /// Return a copy of this feature with an extra attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: AttributeValue) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Return a copy of this feature with a replaced geometry
    pub fn with_geometry(&self, geometry: Geometry<f64>) -> Self {
        Self {
            id: self.id.clone(),
            geometry,
            attributes: self.attributes.clone(),
        }
    }

    #[inline]
    pub fn id(&self) -> &FeatureId {
        &self.id
    }

    #[inline]
    pub fn geometry(&self) -> &Geometry<f64> {
        &self.geometry
    }

    #[inline]
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    #[inline]
    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }
}

/// Ordered collection of features sharing one CRS and one geometry kind
#[derive(Debug, Clone)]
pub struct Layer {
    name: String,
    kind: GeometryKind,
    crs: Option<Crs>,
    features: Vec<Feature>,
    /// Position of each feature id in `features`
    positions: HashMap<FeatureId, usize>,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl Layer {
    /// Create a new layer
    ///
    /// Fails when two features share an id or a geometry does not match `kind`.
    pub fn new(
        name: impl Into<String>,
        kind: GeometryKind,
        crs: Option<Crs>,
        features: Vec<Feature>,
    ) -> Result<Self, GeometryError> {
        let name = name.into();
        let mut positions = HashMap::with_capacity(features.len());

        for (i, feature) in features.iter().enumerate() {
            if GeometryKind::of(feature.geometry()) != Some(kind) {
                return Err(GeometryError::KindMismatch {
                    id: feature.id().clone(),
                    expected: kind,
                });
            }
            if positions.insert(feature.id().clone(), i).is_some() {
                return Err(GeometryError::DuplicateId {
                    id: feature.id().clone(),
                    layer: name,
                });
            }
        }

        Ok(Self {
            name,
            kind,
            crs,
            features,
            positions,
        })
    }

    /// Rebuild a layer from features that already satisfy the layer invariants
    pub(crate) fn from_parts(
        name: String,
        kind: GeometryKind,
        crs: Option<Crs>,
        features: Vec<Feature>,
    ) -> Self {
        let positions = features
            .iter()
            .enumerate()
            .map(|(i, f)| (f.id().clone(), i))
            .collect();
        Self {
            name,
            kind,
            crs,
            features,
            positions,
        }
    }

    /// Copy of this layer tagged with a different CRS (coordinates unchanged)
    pub fn with_crs(&self, crs: Crs) -> Self {
        Self {
            crs: Some(crs),
            ..self.clone()
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn kind(&self) -> GeometryKind {
        self.kind
    }

    #[inline]
    pub fn crs(&self) -> Option<Crs> {
        self.crs
    }

    #[inline]
    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Position of a feature in layer order
    #[inline]
    pub fn position(&self, id: &FeatureId) -> Option<usize> {
        self.positions.get(id).copied()
    }

    /// Get a feature by id
    pub fn get(&self, id: &FeatureId) -> Option<&Feature> {
        self.position(id).map(|i| &self.features[i])
    }

    /// Combined bounding box of all features, `None` if there is no coordinate
    pub fn bounding_rect(&self) -> Option<Rect<f64>> {
        self.features
            .iter()
            .filter_map(|f| f.geometry().bounding_rect())
            .reduce(crate::crs::merge_rects)
    }

    /// Content hash of the layer's CRS, kind, ids and coordinates
    ///
    /// Any change to the data changes the fingerprint, which is what keys
    /// [`crate::BufferCache`] entries.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.crs.map(|c| c.epsg()).hash(&mut hasher);
        self.kind.hash(&mut hasher);
        self.features.len().hash(&mut hasher);
        for feature in &self.features {
            feature.id().hash(&mut hasher);
            feature.geometry().coords_count().hash(&mut hasher);
            for c in feature.geometry().coords_iter() {
                c.x.to_bits().hash(&mut hasher);
                c.y.to_bits().hash(&mut hasher);
            }
        }
        hasher.finish()
    }
}

/// Return a valid polygonal version of a feature's geometry
///
/// Valid geometries with a positive area are returned as-is. Invalid ones (self-intersections,
/// bowties, overlapping parts) go through [`repair_polygons`].
pub fn make_valid(feature: &Feature) -> Result<MultiPolygon<f64>, GeometryError> {
    let id = feature.id();
    let multi = match feature.geometry() {
        Geometry::Polygon(p) => MultiPolygon::new(vec![p.clone()]),
        Geometry::MultiPolygon(mp) => mp.clone(),
        Geometry::Rect(r) => MultiPolygon::new(vec![r.to_polygon()]),
        Geometry::Triangle(t) => MultiPolygon::new(vec![t.to_polygon()]),
        _ => {
            return Err(GeometryError::KindMismatch {
                id: id.clone(),
                expected: GeometryKind::Polygon,
            });
        }
    };

    if multi.coords_count() == 0 {
        return Err(GeometryError::Empty { id: id.clone() });
    }
    if multi.coords_iter().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
        return Err(GeometryError::Malformed {
            id: id.clone(),
            reason: "non-finite coordinate".to_string(),
        });
    }

    repair_polygons(id, multi)
}

/// Validity-fixing pass shared by parcels and buffers
///
/// Every ring is split at its self-intersections into simple loops, so each enclosed lobe
/// of a bowtie becomes its own part. Overlapping shell loops are unioned and hole loops
/// subtracted. Fails when nothing with a positive area is left or the result is still
/// invalid.
pub(crate) fn repair_polygons(
    id: &FeatureId,
    multi: MultiPolygon<f64>,
) -> Result<MultiPolygon<f64>, GeometryError> {
    if multi.is_valid() && multi.unsigned_area() > 0.0 {
        return Ok(multi);
    }

    let parts: Vec<Polygon<f64>> = multi
        .0
        .iter()
        .flat_map(|polygon| {
            let shell = merge_polygons(simple_loops(polygon.exterior()));
            let holes: Vec<Polygon<f64>> =
                polygon.interiors().iter().flat_map(simple_loops).collect();
            if holes.is_empty() {
                shell.0
            } else {
                shell.difference(&unary_union(&holes)).0
            }
        })
        .collect();
    let repaired = merge_polygons(parts);

    if repaired.0.is_empty() || repaired.unsigned_area() <= 0.0 || !repaired.is_valid() {
        return Err(GeometryError::Unrepairable { id: id.clone() });
    }
    tracing::debug!(
        "Repaired invalid geometry of feature '{}' ({} -> {} parts)",
        id,
        multi.0.len(),
        repaired.0.len()
    );
    Ok(repaired)
}

/// Split a ring at its self-intersections into simple, counter-clockwise loops
///
/// Zero-area loops (spikes, flat rings) are dropped.
fn simple_loops(ring: &LineString<f64>) -> Vec<Polygon<f64>> {
    let mut coords: Vec<Coord<f64>> = Vec::with_capacity(ring.0.len());
    for &c in &ring.0 {
        if coords.last() != Some(&c) {
            coords.push(c);
        }
    }
    if coords.len() > 1 && coords.first() == coords.last() {
        coords.pop();
    }
    let n = coords.len();
    if n < 3 {
        return Vec::new();
    }
    let segment = |i: usize| Line::new(coords[i], coords[(i + 1) % n]);

    // Crossing points are computed once per segment pair so both segments share the
    // exact same coordinate
    let mut splits: Vec<Vec<Coord<f64>>> = vec![Vec::new(); n];
    for i in 0..n {
        for j in (i + 2)..n {
            if i == 0 && j == n - 1 {
                continue;
            }
            match line_intersection(segment(i), segment(j)) {
                Some(LineIntersection::SinglePoint { intersection, .. }) => {
                    splits[i].push(intersection);
                    splits[j].push(intersection);
                }
                Some(LineIntersection::Collinear { intersection }) => {
                    for c in [intersection.start, intersection.end] {
                        splits[i].push(c);
                        splits[j].push(c);
                    }
                }
                None => {}
            }
        }
    }

    let mut noded = Vec::with_capacity(n * 2 + 1);
    for (i, mut points) in splits.into_iter().enumerate() {
        let line = segment(i);
        noded.push(line.start);
        points.retain(|p| *p != line.start && *p != line.end);
        points.sort_by(|a, b| {
            squared_distance(line.start, *a).total_cmp(&squared_distance(line.start, *b))
        });
        points.dedup();
        noded.extend(points);
    }
    noded.push(coords[0]);

    // Walk the noded ring and cut a loop off every time a vertex repeats
    let mut loops = Vec::new();
    let mut path: Vec<Coord<f64>> = Vec::with_capacity(noded.len());
    for c in noded {
        let Some(k) = path.iter().position(|p| *p == c) else {
            path.push(c);
            continue;
        };
        let mut cycle = path.split_off(k);
        cycle.push(c);
        path.push(c);
        if cycle.len() >= 4 {
            let polygon = Polygon::new(LineString::new(cycle), vec![]);
            if polygon.unsigned_area() > 0.0 {
                loops.push(polygon.orient(Direction::Default));
            }
        }
    }
    loops
}

/// Union polygons that overlap; parts that at most touch are kept as they are
fn merge_polygons(polygons: Vec<Polygon<f64>>) -> MultiPolygon<f64> {
    let overlapping = polygons.iter().enumerate().any(|(i, a)| {
        polygons[i + 1..].iter().any(|b| {
            a.bounding_rect()
                .zip(b.bounding_rect())
                .is_some_and(|(ra, rb)| ra.intersects(&rb))
                && a.intersection(b).unsigned_area() > 0.0
        })
    });
    if overlapping {
        unary_union(&polygons)
    } else {
        MultiPolygon::new(polygons)
    }
}

fn squared_distance(a: Coord<f64>, b: Coord<f64>) -> f64 {
    let d = b - a;
    d.x * d.x + d.y * d.y
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{LineString, Point, Polygon, polygon};

    fn square(x: f64, y: f64, size: f64) -> Polygon<f64> {
        polygon![
            (x: x, y: y),
            (x: x + size, y: y),
            (x: x + size, y: y + size),
            (x: x, y: y + size),
        ]
    }

    #[test]
    fn test_layer_creation() {
        let layer = Layer::new(
            "parcels",
            GeometryKind::Polygon,
            Some(Crs::WebMercator),
            vec![
                Feature::new("a", square(0.0, 0.0, 10.0)),
                Feature::new("b", square(20.0, 0.0, 10.0)),
            ],
        )
        .unwrap();

        assert_eq!(layer.len(), 2);
        assert_eq!(layer.position(&FeatureId::from("b")), Some(1));
        assert!(layer.get(&FeatureId::from("c")).is_none());

        let bbox = layer.bounding_rect().unwrap();
        assert_eq!(bbox.min().x, 0.0);
        assert_eq!(bbox.max().x, 30.0);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let result = Layer::new(
            "parcels",
            GeometryKind::Polygon,
            None,
            vec![
                Feature::new("a", square(0.0, 0.0, 1.0)),
                Feature::new("a", square(5.0, 0.0, 1.0)),
            ],
        );
        assert!(matches!(result, Err(GeometryError::DuplicateId { .. })));
    }

    #[test]
    fn test_kind_mismatch_rejected() {
        let result = Layer::new(
            "roads",
            GeometryKind::Line,
            None,
            vec![Feature::new("p", Point::new(0.0, 0.0))],
        );
        assert!(matches!(result, Err(GeometryError::KindMismatch { .. })));
    }

    #[test]
    fn test_attributes_pass_through() {
        let feature = Feature::new("r1", LineString::from(vec![(0.0, 0.0), (1.0, 0.0)]))
            .with_attribute("highway", AttributeValue::String("primary".into()))
            .with_attribute("lanes", AttributeValue::Int(2));

        let moved = feature.with_geometry(Geometry::LineString(LineString::from(vec![
            (5.0, 5.0),
            (6.0, 5.0),
        ])));
        assert_eq!(moved.attribute("lanes"), Some(&AttributeValue::Int(2)));
        assert_eq!(moved.attributes().len(), 2);
        assert_eq!(moved.id(), feature.id());
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let make = |x: f64| {
            Layer::new(
                "parcels",
                GeometryKind::Polygon,
                Some(Crs::WebMercator),
                vec![Feature::new("a", square(x, 0.0, 10.0))],
            )
            .unwrap()
        };
        assert_eq!(make(0.0).fingerprint(), make(0.0).fingerprint());
        assert_ne!(make(0.0).fingerprint(), make(0.5).fingerprint());
    }

    #[test]
    fn test_make_valid_keeps_valid_polygon() {
        let feature = Feature::new("a", square(0.0, 0.0, 10.0));
        let valid = make_valid(&feature).unwrap();
        assert_eq!(valid.0.len(), 1);
        assert!((valid.unsigned_area() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_make_valid_repairs_bowtie() {
        let bowtie = Polygon::new(
            LineString::from(vec![(0.0, 0.0), (10.0, 10.0), (10.0, 0.0), (0.0, 10.0)]),
            vec![],
        );
        assert!(!bowtie.is_valid());

        let repaired = make_valid(&Feature::new("bowtie", bowtie)).unwrap();
        assert!(repaired.is_valid());
        // Two triangular lobes of 25 units² each
        assert!(
            (repaired.unsigned_area() - 50.0).abs() < 1e-6,
            "repaired area was {}",
            repaired.unsigned_area()
        );
        let bbox = repaired.bounding_rect().unwrap();
        assert!(bbox.min().x.abs() < 1e-9);
        assert!((bbox.max().x - 10.0).abs() < 1e-9);

        // The lobe right of the crossing point is kept
        let right_lobe = polygon![(x: 5.0, y: 5.0), (x: 10.0, y: 0.0), (x: 10.0, y: 10.0)];
        let kept = repaired.intersection(&MultiPolygon::new(vec![right_lobe]));
        assert!((kept.unsigned_area() - 25.0).abs() < 1e-6);
    }

    #[test]
    fn test_make_valid_repairs_pinched_ring() {
        // Two squares whose connecting edges cross at (6, 2)
        let ring = Polygon::new(
            LineString::from(vec![
                (0.0, 0.0),
                (4.0, 0.0),
                (8.0, 4.0),
                (12.0, 4.0),
                (12.0, 0.0),
                (8.0, 0.0),
                (4.0, 4.0),
                (0.0, 4.0),
            ]),
            vec![],
        );
        assert!(!ring.is_valid());

        let repaired = make_valid(&Feature::new("pinched", ring)).unwrap();
        assert!(repaired.is_valid());
        // Two 4x4 squares plus two triangles of 4 units² on either side of the crossing
        assert!(
            (repaired.unsigned_area() - 40.0).abs() < 1e-6,
            "repaired area was {}",
            repaired.unsigned_area()
        );
    }

    #[test]
    fn test_make_valid_merges_overlapping_parts() {
        let overlapping = MultiPolygon::new(vec![square(0.0, 0.0, 10.0), square(5.0, 0.0, 10.0)]);
        assert!(!overlapping.is_valid());

        let repaired = make_valid(&Feature::new("overlap", overlapping)).unwrap();
        assert!(repaired.is_valid());
        assert!((repaired.unsigned_area() - 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_make_valid_keeps_holes() {
        let outer = LineString::from(vec![(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)]);
        let hole = LineString::from(vec![(2.0, 2.0), (4.0, 2.0), (4.0, 4.0), (2.0, 4.0)]);
        // An invalid second part forces the repair path
        let bowtie = Polygon::new(
            LineString::from(vec![(20.0, 0.0), (30.0, 10.0), (30.0, 0.0), (20.0, 10.0)]),
            vec![],
        );
        let multi = MultiPolygon::new(vec![Polygon::new(outer, vec![hole]), bowtie]);

        let repaired = make_valid(&Feature::new("holed", multi)).unwrap();
        assert!((repaired.unsigned_area() - (100.0 - 4.0 + 50.0)).abs() < 1e-6);
    }

    #[test]
    fn test_repair_polygons_rejects_flat_result() {
        let flat = MultiPolygon::new(vec![Polygon::new(
            LineString::from(vec![(0.0, 0.0), (5.0, 5.0), (10.0, 10.0), (5.0, 5.0)]),
            vec![],
        )]);
        let result = repair_polygons(&FeatureId::from("spike"), flat);
        assert!(matches!(result, Err(GeometryError::Unrepairable { .. })));
    }

    #[test]
    fn test_make_valid_rejects_empty() {
        let empty = Feature::new("e", MultiPolygon::<f64>::new(vec![]));
        assert!(matches!(make_valid(&empty), Err(GeometryError::Empty { .. })));
    }

    #[test]
    fn test_make_valid_rejects_degenerate() {
        let flat = Polygon::new(
            LineString::from(vec![(0.0, 0.0), (10.0, 0.0), (20.0, 0.0)]),
            vec![],
        );
        assert!(matches!(
            make_valid(&Feature::new("flat", flat)),
            Err(GeometryError::Unrepairable { .. })
        ));
    }
}
