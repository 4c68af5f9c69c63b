//! Buffer polygons around road lines
//!
//! Each line feature is offset with `geo`'s buffer operation at the requested distance.
//! In dissolved mode the per-feature buffers of one distance are merged into a single
//! footprint.

use crate::feature::repair_polygons;
use crate::{
    ConfigError, Diagnostic, Feature, FeatureId, GeometryError, GeometryKind, Layer, Stage,
};
use geo::algorithm::buffer::{Buffer, BufferStyle as GeoBufferStyle, LineCap, LineJoin};
use geo::{
    Area, CoordsIter, Geometry, LineString, MultiLineString, MultiPolygon, unary_union,
};
use rayon::prelude::*;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;
use std::str::FromStr;

/// Shape of the buffer at the open ends of a line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CapStyle {
    #[default]
    Round,
    /// Cut square at the end point
    Flat,
    /// Extended by the buffer distance past the end point
    Square,
}

/// Shape of the buffer at line vertices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum JoinStyle {
    #[default]
    Round,
    Mitre,
    Bevel,
}

impl FromStr for CapStyle {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "round" => Ok(CapStyle::Round),
            "flat" | "butt" => Ok(CapStyle::Flat),
            "square" => Ok(CapStyle::Square),
            _ => Err(ConfigError::UnknownStyle {
                kind: "cap",
                value: s.to_string(),
            }),
        }
    }
}

impl FromStr for JoinStyle {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "round" => Ok(JoinStyle::Round),
            "mitre" | "miter" => Ok(JoinStyle::Mitre),
            "bevel" => Ok(JoinStyle::Bevel),
            _ => Err(ConfigError::UnknownStyle {
                kind: "join",
                value: s.to_string(),
            }),
        }
    }
}

/// Buffering parameters shared by all distances of a run
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BufferStyle {
    pub cap: CapStyle,
    pub join: JoinStyle,
    /// Number of segments approximating a full circle for round caps and joins
    pub arc_segments: u32,
    /// Limit passed to mitre joins before they are cut off
    pub mitre_limit: f64,
}

impl Default for BufferStyle {
    fn default() -> Self {
        Self {
            cap: CapStyle::Round,
            join: JoinStyle::Round,
            arc_segments: 32,
            mitre_limit: 2.0,
        }
    }
}

impl BufferStyle {
    fn to_geo(self, distance: f64) -> GeoBufferStyle<f64> {
        let arc_angle = TAU / self.arc_segments.max(4) as f64;
        let cap = match self.cap {
            CapStyle::Round => LineCap::Round(arc_angle),
            CapStyle::Flat => LineCap::Butt,
            CapStyle::Square => LineCap::Square,
        };
        let join = match self.join {
            JoinStyle::Round => LineJoin::Round(arc_angle),
            JoinStyle::Mitre => LineJoin::Miter(self.mitre_limit),
            JoinStyle::Bevel => LineJoin::Bevel,
        };
        GeoBufferStyle::new(distance).line_cap(cap).line_join(join)
    }
}

/// Whether buffers are kept per road or merged into one footprint per distance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BufferMode {
    #[default]
    PerFeature,
    Dissolved,
}

/// One buffer polygon at one distance
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BufferResult {
    /// Originating road, `None` for a dissolved footprint
    pub source: Option<FeatureId>,
    /// Position of the originating road in its layer
    pub source_index: Option<usize>,
    pub distance: f64,
    pub geometry: MultiPolygon<f64>,
}

impl BufferResult {
    pub fn area(&self) -> f64 {
        self.geometry.unsigned_area()
    }
}

/// All buffers produced for one distance
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BufferSet {
    pub distance: f64,
    pub mode: BufferMode,
    pub buffers: Vec<BufferResult>,
}

impl BufferSet {
    fn empty(distance: f64, mode: BufferMode) -> Self {
        Self {
            distance,
            mode,
            buffers: Vec::new(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BufferResult> {
        self.buffers.iter()
    }

    /// Sum of buffer polygon areas
    ///
    /// In per-feature mode overlapping buffers of neighbouring roads are counted once per road.
    pub fn total_area(&self) -> f64 {
        self.buffers.iter().map(BufferResult::area).sum()
    }
}

/// Buffers for one distance plus the features that had to be skipped
#[derive(Debug, Clone)]
pub struct BufferOutcome {
    pub set: BufferSet,
    pub diagnostics: Vec<Diagnostic>,
}

/// Produces buffer polygons around the features of a line layer
#[derive(Debug, Clone, Default)]
pub struct BufferGenerator {
    style: BufferStyle,
    mode: BufferMode,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl BufferGenerator {
    pub fn new(style: BufferStyle, mode: BufferMode) -> Self {
        Self { style, mode }
    }

    #[inline]
    pub fn style(&self) -> &BufferStyle {
        &self.style
    }

    #[inline]
    pub fn mode(&self) -> BufferMode {
        self.mode
    }

    /// Buffer every road of `roads` at `distance`
    ///
    /// Features that cannot be buffered are skipped and reported as diagnostics.
    /// A distance of zero yields an empty set, since lines have no area.
    pub fn generate(&self, roads: &Layer, distance: f64) -> Result<BufferOutcome, ConfigError> {
        #[cfg(feature = "profiling")]
        profiling::scope!("buffer::generate");

        if !distance.is_finite() || distance < 0.0 {
            return Err(ConfigError::NonPositiveDistance(distance));
        }
        if roads.kind() != GeometryKind::Line {
            return Err(ConfigError::LayerKind {
                layer: roads.name().to_string(),
                expected: GeometryKind::Line,
                found: roads.kind(),
            });
        }
        if distance == 0.0 {
            return Ok(BufferOutcome {
                set: BufferSet::empty(distance, self.mode),
                diagnostics: Vec::new(),
            });
        }

        let results: Vec<std::result::Result<BufferResult, Diagnostic>> = roads
            .features()
            .par_iter()
            .enumerate()
            .map(|(index, feature)| {
                self.buffer_feature(feature, distance)
                    .map(|geometry| BufferResult {
                        source: Some(feature.id().clone()),
                        source_index: Some(index),
                        distance,
                        geometry,
                    })
                    .map_err(|err| {
                        Diagnostic::new(feature.id().clone(), Stage::Buffer, Some(distance), err)
                    })
            })
            .collect();

        let mut buffers = Vec::with_capacity(results.len());
        let mut diagnostics = Vec::new();
        for result in results {
            match result {
                Ok(buffer) => buffers.push(buffer),
                Err(diagnostic) => {
                    tracing::warn!("Skipping road: {}", diagnostic);
                    diagnostics.push(diagnostic);
                }
            }
        }

        let buffers = match self.mode {
            BufferMode::PerFeature => buffers,
            BufferMode::Dissolved if buffers.is_empty() => buffers,
            BufferMode::Dissolved => {
                let footprint = unary_union(buffers.iter().flat_map(|b| b.geometry.0.iter()));
                vec![BufferResult {
                    source: None,
                    source_index: None,
                    distance,
                    geometry: footprint,
                }]
            }
        };

        tracing::debug!(
            "Buffered {} roads at distance {} into {} polygons ({} skipped)",
            roads.len(),
            distance,
            buffers.len(),
            diagnostics.len()
        );

        Ok(BufferOutcome {
            set: BufferSet {
                distance,
                mode: self.mode,
                buffers,
            },
            diagnostics,
        })
    }

    /// Buffer a single line feature, repairing the result if needed
    ///
    /// Fails with [`GeometryError::Unrepairable`] when the buffer is empty or stays invalid.
    pub fn buffer_feature(
        &self,
        feature: &Feature,
        distance: f64,
    ) -> Result<MultiPolygon<f64>, GeometryError> {
        let lines = line_parts(feature)?;
        let buffered = lines.buffer_with_style(self.style.to_geo(distance));
        repair_polygons(feature.id(), buffered)
    }
}

/// Line parts of a road feature, rejecting empty or degenerate input
fn line_parts(feature: &Feature) -> Result<MultiLineString<f64>, GeometryError> {
    let id = feature.id();
    let lines = match feature.geometry() {
        Geometry::Line(line) => {
            MultiLineString::new(vec![LineString::from(vec![line.start, line.end])])
        }
        Geometry::LineString(ls) => MultiLineString::new(vec![ls.clone()]),
        Geometry::MultiLineString(mls) => mls.clone(),
        _ => {
            return Err(GeometryError::KindMismatch {
                id: id.clone(),
                expected: GeometryKind::Line,
            });
        }
    };

    if lines.coords_count() == 0 {
        return Err(GeometryError::Empty { id: id.clone() });
    }
    if lines.coords_iter().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
        return Err(GeometryError::Malformed {
            id: id.clone(),
            reason: "non-finite coordinate".to_string(),
        });
    }
    if lines.0.iter().any(|ls| !ls.0.windows(2).any(|w| w[0] != w[1])) {
        return Err(GeometryError::Malformed {
            id: id.clone(),
            reason: "line part with fewer than two distinct points".to_string(),
        });
    }
    Ok(lines)
}
