//! Road Buffer Library - Buffer zones around roads and the parcels they touch
//!
//! This library computes buffer polygons around linear features (roads) at one or more
//! distances and finds the polygonal features (parcels) that intersect those buffers.
//! Everything runs in-process on already-decoded layers; no file or network I/O happens here.
//!
//! # Architecture
//!
//! - **[`CrsNormalizer`]**: Reprojects layers into one linear-unit working CRS
//! - **[`BufferGenerator`]**: Per-feature or dissolved buffer polygons for each distance
//! - **[`SpatialIndex`]**: Bounding-box quadtree over parcels, built once per run
//! - **[`OverlayEngine`]**: Exact parcel/buffer intersections for index candidates
//! - **[`ResultAggregator`]**: Groups records by distance and parcel, computes summaries
//! - **[`Analysis`]**: Runs the whole pipeline for an [`AnalysisConfig`]
//!
//! # Determinism
//!
//! Work is spread over rayon workers, but every parallel stage collects its results in
//! input order, so identical inputs always produce identical outputs.

mod aggregate;
mod analysis;
mod buffer;
mod cache;
mod crs;
mod feature;
mod overlay;
mod quadtree;
pub mod utils;

// Public API exports
pub use aggregate::{AggregatedResult, DistanceGroup, DistanceSummary, ResultAggregator};
pub use analysis::{
    Analysis, AnalysisConfig, AnalysisOutput, CancellationToken, Diagnostic, Stage,
};
pub use buffer::{
    BufferGenerator, BufferMode, BufferOutcome, BufferResult, BufferSet, BufferStyle, CapStyle,
    JoinStyle,
};
pub use cache::{BufferCache, BufferCacheKey};
pub use crs::{Crs, CrsNormalizer, WorkingCrs};
pub use feature::{
    AttributeValue, Attributes, Feature, FeatureId, GeometryKind, Layer, make_valid,
};
pub use overlay::{OverlayEngine, OverlayOutcome, OverlayRecord, PreparedParcel, PreparedParcels};
pub use quadtree::{DEFAULT_NODE_CAPACITY, SpatialIndex};

/// Coordinate reference system failures. Always fatal to a run.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CrsError {
    #[error("Layer '{layer}' declares no CRS and none can be inferred")]
    Missing { layer: String },

    #[error("{crs} is geographic; buffering needs a projected CRS with linear units")]
    Geographic { crs: Crs },

    #[error("Unsupported reprojection from {from} to {to}")]
    UnsupportedTransform { from: Crs, to: Crs },

    #[error("CRS mismatch between layers: {left} vs {right}")]
    Mismatch { left: Crs, right: Crs },

    #[error("Unknown CRS identifier: {0}")]
    UnknownIdentifier(String),

    #[error("Coordinate ({x}, {y}) is outside the valid domain of {crs}")]
    OutOfDomain { crs: Crs, x: f64, y: f64 },
}

/// Invalid analysis configuration. Always fatal to a run.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("No buffer distances requested")]
    NoDistances,

    #[error("Buffer distance must be a positive finite number, got {0}")]
    NonPositiveDistance(f64),

    #[error("Buffer distance {0} requested more than once")]
    DuplicateDistance(f64),

    #[error("Invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("Layer '{layer}' holds {found:?} geometries, expected {expected:?}")]
    LayerKind {
        layer: String,
        expected: GeometryKind,
        found: GeometryKind,
    },

    #[error("Unknown {kind} style: {value}")]
    UnknownStyle { kind: &'static str, value: String },
}

/// Malformed or unrepairable geometry. Recovered per feature during a run.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeometryError {
    #[error("Feature '{id}' has an empty geometry")]
    Empty { id: FeatureId },

    #[error("Feature '{id}' is malformed: {reason}")]
    Malformed { id: FeatureId, reason: String },

    #[error("Feature '{id}' is invalid and could not be repaired")]
    Unrepairable { id: FeatureId },

    #[error("Feature '{id}' is not a {expected:?} geometry")]
    KindMismatch { id: FeatureId, expected: GeometryKind },

    #[error("Duplicate feature id '{id}' in layer '{layer}'")]
    DuplicateId { id: FeatureId, layer: String },
}

/// Top-level error returned by an analysis run
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AnalysisError {
    #[error("CRS error: {0}")]
    Crs(#[from] CrsError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Geometry error: {0}")]
    Geometry(#[from] GeometryError),
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
