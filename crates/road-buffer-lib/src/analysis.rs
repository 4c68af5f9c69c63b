//! Analysis pipeline tying the components together
//!
//! An [`Analysis`] validates its configuration up front, then for each run: resolves the
//! working CRS, normalizes both layers, repairs parcels, builds the parcel index once and
//! buffers and overlays every distance in turn before aggregating the records.

use crate::{
    AggregatedResult, BufferCache, BufferCacheKey, BufferGenerator, BufferMode, BufferOutcome,
    BufferSet, BufferStyle, ConfigError, Crs, CrsNormalizer, DEFAULT_NODE_CAPACITY, FeatureId,
    GeometryKind, Layer, OverlayEngine, PreparedParcels, Result, ResultAggregator, SpatialIndex,
    WorkingCrs,
};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Pipeline stage at which a feature was skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Stage {
    /// Parcel validity repair before indexing
    Repair,
    Buffer,
    Overlay,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Repair => write!(f, "repair"),
            Stage::Buffer => write!(f, "buffer"),
            Stage::Overlay => write!(f, "overlay"),
        }
    }
}

/// A feature skipped during a run, with the reason
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Diagnostic {
    pub feature_id: FeatureId,
    pub stage: Stage,
    /// Buffer distance being processed, `None` for distance-independent stages
    pub distance: Option<f64>,
    pub reason: String,
}

impl Diagnostic {
    pub fn new(
        feature_id: FeatureId,
        stage: Stage,
        distance: Option<f64>,
        reason: impl fmt::Display,
    ) -> Self {
        Self {
            feature_id,
            stage,
            distance,
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.distance {
            Some(d) => write!(
                f,
                "feature '{}' skipped at {} stage (distance {}): {}",
                self.feature_id, self.stage, d, self.reason
            ),
            None => write!(
                f,
                "feature '{}' skipped at {} stage: {}",
                self.feature_id, self.stage, self.reason
            ),
        }
    }
}

/// Configuration for an analysis run
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AnalysisConfig {
    /// Buffer distances in working CRS units, processed in this order
    pub distances: Vec<f64>,
    pub style: BufferStyle,
    pub mode: BufferMode,
    pub working_crs: WorkingCrs,
    /// CRS for layers that declare none
    pub assume_crs: Option<Crs>,
    /// Intersections at or below `area_epsilon * parcel area` count as boundary touches
    pub area_epsilon: f64,
    pub index_node_capacity: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            distances: vec![100.0],
            style: BufferStyle::default(),
            mode: BufferMode::PerFeature,
            working_crs: WorkingCrs::Auto,
            assume_crs: None,
            area_epsilon: 1e-9,
            index_node_capacity: DEFAULT_NODE_CAPACITY,
        }
    }
}

impl AnalysisConfig {
    /// Configuration with the given distances and defaults for everything else
    pub fn with_distances(distances: impl IntoIterator<Item = f64>) -> Self {
        Self {
            distances: distances.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Check the configuration before any work starts
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.distances.is_empty() {
            return Err(ConfigError::NoDistances);
        }
        for (i, &d) in self.distances.iter().enumerate() {
            if !d.is_finite() || d <= 0.0 {
                return Err(ConfigError::NonPositiveDistance(d));
            }
            if self.distances[..i].contains(&d) {
                return Err(ConfigError::DuplicateDistance(d));
            }
        }
        if self.style.arc_segments < 4 {
            return Err(ConfigError::InvalidParameter {
                name: "arc_segments",
                value: self.style.arc_segments.to_string(),
                reason: "at least 4 segments are needed to approximate a circle".to_string(),
            });
        }
        if !self.style.mitre_limit.is_finite() || self.style.mitre_limit < 1.0 {
            return Err(ConfigError::InvalidParameter {
                name: "mitre_limit",
                value: self.style.mitre_limit.to_string(),
                reason: "must be a finite value of at least 1".to_string(),
            });
        }
        if !self.area_epsilon.is_finite() || !(0.0..1.0).contains(&self.area_epsilon) {
            return Err(ConfigError::InvalidParameter {
                name: "area_epsilon",
                value: self.area_epsilon.to_string(),
                reason: "must lie in [0, 1)".to_string(),
            });
        }
        if self.index_node_capacity == 0 {
            return Err(ConfigError::InvalidParameter {
                name: "index_node_capacity",
                value: "0".to_string(),
                reason: "nodes must hold at least one item".to_string(),
            });
        }
        Ok(())
    }
}

/// Shared flag a caller sets to stop a run before its next distance
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything a run produces
#[derive(Debug, Clone)]
pub struct AnalysisOutput {
    /// CRS all geometries below are expressed in
    pub working_crs: Crs,
    /// Buffer sets of the completed distances, ascending by distance
    pub buffers: Vec<BufferSet>,
    pub result: AggregatedResult,
    /// Skipped features, in the order they were encountered
    pub diagnostics: Vec<Diagnostic>,
    /// `(lon, lat)` center of the parcel extent, or of the roads when there are no parcels
    pub center_wgs84: Option<(f64, f64)>,
    /// Set when the run stopped early; completed distances are still intact
    pub cancelled: bool,
}

impl AnalysisOutput {
    pub fn buffers_for(&self, distance: f64) -> Option<&BufferSet> {
        self.buffers.iter().find(|b| b.distance == distance)
    }
}

/// A validated, reusable analysis
#[derive(Debug, Clone)]
pub struct Analysis {
    config: AnalysisConfig,
    normalizer: CrsNormalizer,
    generator: BufferGenerator,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl Analysis {
    /// Validate `config` and prepare an analysis
    pub fn new(config: AnalysisConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            normalizer: CrsNormalizer::new(config.assume_crs),
            generator: BufferGenerator::new(config.style, config.mode),
            config,
        })
    }

    #[inline]
    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Run the full pipeline on a road layer and a parcel layer
    pub fn run(&self, roads: &Layer, parcels: &Layer) -> Result<AnalysisOutput> {
        self.execute(roads, parcels, None, None, None)
    }

    /// Like [`Analysis::run`], stopping before the next distance once `token` is cancelled
    pub fn run_with_cancel(
        &self,
        roads: &Layer,
        parcels: &Layer,
        token: &CancellationToken,
    ) -> Result<AnalysisOutput> {
        self.execute(roads, parcels, None, Some(token), None)
    }

    /// Like [`Analysis::run_with_cancel`], calling `on_distance(distance, done, total)` after
    /// each distance has been buffered, overlaid and aggregated
    pub fn run_with_progress(
        &self,
        roads: &Layer,
        parcels: &Layer,
        token: &CancellationToken,
        mut on_distance: impl FnMut(f64, usize, usize),
    ) -> Result<AnalysisOutput> {
        let progress: &mut dyn FnMut(f64, usize, usize) = &mut on_distance;
        self.execute(roads, parcels, None, Some(token), Some(progress))
    }

    /// Like [`Analysis::run`], reusing and filling a caller-owned buffer cache
    pub fn run_cached(
        &self,
        roads: &Layer,
        parcels: &Layer,
        cache: &mut BufferCache,
    ) -> Result<AnalysisOutput> {
        self.execute(roads, parcels, Some(cache), None, None)
    }

    fn execute(
        &self,
        roads: &Layer,
        parcels: &Layer,
        mut cache: Option<&mut BufferCache>,
        cancel: Option<&CancellationToken>,
        mut progress: Option<&mut dyn FnMut(f64, usize, usize)>,
    ) -> Result<AnalysisOutput> {
        #[cfg(feature = "profiling")]
        profiling::scope!("analysis::run");

        let started = Instant::now();
        check_kind(roads, GeometryKind::Line)?;
        check_kind(parcels, GeometryKind::Polygon)?;

        let working_crs = self
            .normalizer
            .resolve_working_crs(&self.config.working_crs, &[roads, parcels])?;
        let roads = self.normalizer.normalize(roads, &working_crs)?;
        let parcels = self.normalizer.normalize(parcels, &working_crs)?;
        CrsNormalizer::check_compatible(&roads, &parcels)?;
        tracing::debug!(
            "Normalized layers to {} in {:?}",
            working_crs,
            started.elapsed()
        );

        let (prepared, mut diagnostics) = PreparedParcels::prepare(&parcels);
        let index = SpatialIndex::from_parcels(&prepared, self.config.index_node_capacity);
        let engine = OverlayEngine::new(&index, &prepared, self.config.area_epsilon);

        let mut aggregator = ResultAggregator::new();
        let mut buffers = Vec::with_capacity(self.config.distances.len());
        let mut cancelled = false;

        for &distance in &self.config.distances {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                tracing::warn!(
                    "Analysis cancelled after {} of {} distances",
                    buffers.len(),
                    self.config.distances.len()
                );
                cancelled = true;
                break;
            }

            let outcome = match cache.as_deref_mut() {
                Some(cache) => self.buffer_cached(cache, &roads, working_crs, distance)?,
                None => Arc::new(self.generator.generate(&roads, distance)?),
            };
            diagnostics.extend(outcome.diagnostics.iter().cloned());

            let overlay = engine.overlay(&outcome.set);
            diagnostics.extend(overlay.diagnostics);
            aggregator.push(distance, outcome.set.total_area(), overlay.records);
            buffers.push(outcome.set.clone());
            if let Some(progress) = progress.as_deref_mut() {
                progress(distance, buffers.len(), self.config.distances.len());
            }
        }

        buffers.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        let result = aggregator.finish();
        let center_wgs84 = center_lonlat(&parcels, working_crs)
            .or_else(|| center_lonlat(&roads, working_crs));

        tracing::info!(
            "Analysis of {} roads and {} parcels in {} finished in {:?}: {} records over {} distances, {} diagnostics",
            roads.len(),
            parcels.len(),
            working_crs,
            started.elapsed(),
            result.records().count(),
            buffers.len(),
            diagnostics.len()
        );

        Ok(AnalysisOutput {
            working_crs,
            buffers,
            result,
            diagnostics,
            center_wgs84,
            cancelled,
        })
    }

    fn buffer_cached(
        &self,
        cache: &mut BufferCache,
        roads: &Layer,
        crs: Crs,
        distance: f64,
    ) -> Result<Arc<BufferOutcome>> {
        let key = BufferCacheKey::new(roads, crs, distance, &self.config.style, self.config.mode);
        if let Some(hit) = cache.get(&key) {
            tracing::debug!("Buffer cache hit for distance {}", distance);
            return Ok(hit);
        }
        let outcome = Arc::new(self.generator.generate(roads, distance)?);
        cache.insert(key, Arc::clone(&outcome));
        Ok(outcome)
    }
}

fn check_kind(layer: &Layer, expected: GeometryKind) -> std::result::Result<(), ConfigError> {
    if layer.kind() != expected {
        return Err(ConfigError::LayerKind {
            layer: layer.name().to_string(),
            expected,
            found: layer.kind(),
        });
    }
    Ok(())
}

fn center_lonlat(layer: &Layer, crs: Crs) -> Option<(f64, f64)> {
    let center = layer.bounding_rect()?.center();
    let lonlat = crs.transform(center, &Crs::Wgs84).ok()?;
    Some((lonlat.x, lonlat.y))
}
