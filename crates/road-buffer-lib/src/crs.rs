//! Coordinate reference systems and layer normalization
//!
//! Buffering only makes sense in a projected CRS with linear units, so every layer is
//! reprojected into one working CRS before any distance-based operation runs.

use crate::{CrsError, Layer, utils};
use geo::{BoundingRect, Coord, MapCoords, Rect};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// EPSG codes of common geographic (degree-based) datums other than WGS84
const GEOGRAPHIC_EPSG: &[u32] = &[4019, 4148, 4258, 4269, 4283, 4490, 4612, 4617, 4674, 4755, 4759];

/// Coordinate Reference System identifier
///
/// Only WGS84, Web Mercator and the UTM zones on WGS84 can be reprojected. Any other
/// code is accepted as a declared CRS and only ever used as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Crs {
    /// EPSG:4326, longitude/latitude in degrees
    Wgs84,
    /// EPSG:3857, spherical Web Mercator in meters
    WebMercator,
    /// EPSG:326xx (north) or EPSG:327xx (south), meters
    Utm { zone: u8, north: bool },
    /// Another geographic CRS in degrees
    Geographic { epsg: u32 },
    /// Another projected CRS, assumed to use linear units
    Projected { epsg: u32 },
}

impl Crs {
    /// Create a CRS from an EPSG code
    pub fn from_epsg(code: u32) -> Self {
        match code {
            4326 => Crs::Wgs84,
            3857 | 900913 => Crs::WebMercator,
            32601..=32660 => Crs::Utm {
                zone: (code - 32600) as u8,
                north: true,
            },
            32701..=32760 => Crs::Utm {
                zone: (code - 32700) as u8,
                north: false,
            },
            c if GEOGRAPHIC_EPSG.contains(&c) => Crs::Geographic { epsg: c },
            c => Crs::Projected { epsg: c },
        }
    }

    /// Get the EPSG code
    pub fn epsg(&self) -> u32 {
        match *self {
            Crs::Wgs84 => 4326,
            Crs::WebMercator => 3857,
            Crs::Utm { zone, north: true } => 32600 + zone as u32,
            Crs::Utm { zone, north: false } => 32700 + zone as u32,
            Crs::Geographic { epsg } | Crs::Projected { epsg } => epsg,
        }
    }

    /// Whether coordinates are angular (degrees) rather than linear
    pub fn is_geographic(&self) -> bool {
        matches!(self, Crs::Wgs84 | Crs::Geographic { .. })
    }

    /// UTM zone covering the given WGS84 position
    ///
    /// Zone = floor((lon + 180) / 6) + 1, northern hemisphere when lat >= 0.
    /// Returns `None` for positions outside the WGS84 domain.
    pub fn utm_for_lonlat(lon: f64, lat: f64) -> Option<Self> {
        if !utils::is_valid_lonlat(Coord { x: lon, y: lat }) {
            return None;
        }
        Some(Crs::Utm {
            zone: utils::utm_zone_for_lon(lon),
            north: lat >= 0.0,
        })
    }

    fn to_lonlat(&self, c: Coord<f64>) -> Result<Coord<f64>, CrsError> {
        let out = match *self {
            Crs::Wgs84 => c,
            Crs::WebMercator => {
                if !utils::is_valid_mercator(c) {
                    return Err(self.out_of_domain(c));
                }
                utils::mercator_to_lonlat(c)
            }
            Crs::Utm { zone, north } => utils::utm_to_lonlat(c, zone, north),
            other => {
                return Err(CrsError::UnsupportedTransform {
                    from: other,
                    to: Crs::Wgs84,
                });
            }
        };
        if !utils::is_valid_lonlat(out) {
            return Err(self.out_of_domain(c));
        }
        Ok(out)
    }

    fn from_lonlat(&self, c: Coord<f64>) -> Result<Coord<f64>, CrsError> {
        let out = match *self {
            Crs::Wgs84 => c,
            Crs::WebMercator => utils::lonlat_to_mercator(c),
            Crs::Utm { zone, north } => utils::lonlat_to_utm(c, zone, north),
            other => {
                return Err(CrsError::UnsupportedTransform {
                    from: Crs::Wgs84,
                    to: other,
                });
            }
        };
        if !out.x.is_finite() || !out.y.is_finite() {
            return Err(Crs::Wgs84.out_of_domain(c));
        }
        Ok(out)
    }

    fn out_of_domain(&self, c: Coord<f64>) -> CrsError {
        CrsError::OutOfDomain {
            crs: *self,
            x: c.x,
            y: c.y,
        }
    }

    /// Reproject a single coordinate from `self` into `to`
    ///
    /// Transforms pivot through WGS84, so both ends must be WGS84, Web Mercator or UTM.
    pub fn transform(&self, c: Coord<f64>, to: &Crs) -> Result<Coord<f64>, CrsError> {
        if self == to {
            return Ok(c);
        }
        match (self.is_supported(), to.is_supported()) {
            (true, true) => to.from_lonlat(self.to_lonlat(c)?),
            _ => Err(CrsError::UnsupportedTransform {
                from: *self,
                to: *to,
            }),
        }
    }

    /// Reproject every coordinate of a geometry, producing a new geometry
    pub fn transform_geometry<G>(&self, geometry: &G, to: &Crs) -> Result<G, CrsError>
    where
        G: MapCoords<f64, f64, Output = G> + Clone,
    {
        if self == to {
            return Ok(geometry.clone());
        }
        geometry.try_map_coords(|c| self.transform(c, to))
    }

    fn is_supported(&self) -> bool {
        matches!(self, Crs::Wgs84 | Crs::WebMercator | Crs::Utm { .. })
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}

impl FromStr for Crs {
    type Err = CrsError;

    /// Parses `EPSG:nnnn` (case-insensitive prefix) or a bare EPSG number
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let code = match trimmed.get(..5) {
            Some(prefix) if prefix.eq_ignore_ascii_case("epsg:") => &trimmed[5..],
            _ => trimmed,
        };
        match code.parse::<u32>() {
            Ok(0) | Err(_) => Err(CrsError::UnknownIdentifier(s.to_string())),
            Ok(code) => Ok(Crs::from_epsg(code)),
        }
    }
}

/// How the working CRS of an analysis is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum WorkingCrs {
    /// Keep a shared projected input CRS, otherwise the UTM zone of the data's center
    #[default]
    Auto,
    /// Always reproject into this CRS (must be projected)
    Fixed(Crs),
}

impl FromStr for WorkingCrs {
    type Err = CrsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("auto") {
            Ok(WorkingCrs::Auto)
        } else {
            s.parse().map(WorkingCrs::Fixed)
        }
    }
}

/// Reprojects layers into a single linear-unit CRS
#[derive(Debug, Clone, Default)]
pub struct CrsNormalizer {
    /// CRS assumed for layers that declare none
    assume_crs: Option<Crs>,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl CrsNormalizer {
    /// Create a normalizer; `assume_crs` is used for layers without a declared CRS
    pub fn new(assume_crs: Option<Crs>) -> Self {
        Self { assume_crs }
    }

    /// The CRS a layer's coordinates are in: declared, else assumed
    pub fn source_crs(&self, layer: &Layer) -> Result<Crs, CrsError> {
        layer
            .crs()
            .or(self.assume_crs)
            .ok_or_else(|| CrsError::Missing {
                layer: layer.name().to_string(),
            })
    }

    /// Pick the working CRS for a set of layers
    ///
    /// `Fixed` targets are rejected when geographic. `Auto` keeps a UTM or other projected
    /// CRS that all layers already share (never Web Mercator); otherwise it takes the UTM
    /// zone of the center of the layers' combined WGS84 extent, falling back to Web Mercator
    /// when no zone can be derived.
    pub fn resolve_working_crs(
        &self,
        policy: &WorkingCrs,
        layers: &[&Layer],
    ) -> Result<Crs, CrsError> {
        let sources = layers
            .iter()
            .map(|layer| self.source_crs(layer))
            .collect::<Result<Vec<_>, _>>()?;

        match policy {
            WorkingCrs::Fixed(crs) => {
                if crs.is_geographic() {
                    return Err(CrsError::Geographic { crs: *crs });
                }
                Ok(*crs)
            }
            WorkingCrs::Auto => {
                // Web Mercator units are not meters away from the equator
                if let Some(first) = sources.first() {
                    let metric = matches!(first, Crs::Utm { .. } | Crs::Projected { .. });
                    if metric && sources.iter().all(|crs| crs == first) {
                        tracing::debug!("All layers already share projected CRS {}", first);
                        return Ok(*first);
                    }
                }

                let mut extent: Option<Rect<f64>> = None;
                for (layer, source) in layers.iter().zip(&sources) {
                    let Some(bbox) = layer.bounding_rect() else {
                        continue;
                    };
                    let lonlat = rect_to_lonlat(bbox, source)?;
                    extent = Some(match extent {
                        Some(e) => merge_rects(e, lonlat),
                        None => lonlat,
                    });
                }

                let center = extent.map(|e| e.center());
                match center.and_then(|c| Crs::utm_for_lonlat(c.x, c.y)) {
                    Some(utm) => {
                        tracing::debug!("Selected working CRS {} from data center", utm);
                        Ok(utm)
                    }
                    None => {
                        tracing::debug!(
                            "No UTM zone for data center {:?}, using Web Mercator",
                            center
                        );
                        Ok(Crs::WebMercator)
                    }
                }
            }
        }
    }

    /// Reproject every feature of a layer into `target`
    ///
    /// Identifiers, attributes and feature order are preserved.
    pub fn normalize(&self, layer: &Layer, target: &Crs) -> Result<Layer, CrsError> {
        #[cfg(feature = "profiling")]
        profiling::scope!("crs::normalize");

        if target.is_geographic() {
            return Err(CrsError::Geographic { crs: *target });
        }
        let source = self.source_crs(layer)?;
        if source == *target {
            return Ok(layer.with_crs(*target));
        }

        tracing::debug!(
            "Reprojecting layer '{}' ({} features) from {} to {}",
            layer.name(),
            layer.len(),
            source,
            target
        );
        let features = layer
            .features()
            .iter()
            .map(|feature| {
                let geometry = source.transform_geometry(feature.geometry(), target)?;
                Ok(feature.with_geometry(geometry))
            })
            .collect::<Result<Vec<_>, CrsError>>()?;

        Ok(Layer::from_parts(
            layer.name().to_string(),
            layer.kind(),
            Some(*target),
            features,
        ))
    }

    /// Ensure two normalized layers share the same CRS
    pub fn check_compatible(a: &Layer, b: &Layer) -> Result<Crs, CrsError> {
        let left = a.crs().ok_or_else(|| CrsError::Missing {
            layer: a.name().to_string(),
        })?;
        let right = b.crs().ok_or_else(|| CrsError::Missing {
            layer: b.name().to_string(),
        })?;
        if left != right {
            return Err(CrsError::Mismatch { left, right });
        }
        Ok(left)
    }
}

/// Envelope of a rectangle's corners after reprojection to WGS84
fn rect_to_lonlat(rect: Rect<f64>, source: &Crs) -> Result<Rect<f64>, CrsError> {
    let corners = rect.to_polygon();
    let projected = source.transform_geometry(&corners, &Crs::Wgs84)?;
    Ok(projected.bounding_rect().unwrap_or(rect))
}

pub(crate) fn merge_rects(a: Rect<f64>, b: Rect<f64>) -> Rect<f64> {
    Rect::new(
        Coord {
            x: a.min().x.min(b.min().x),
            y: a.min().y.min(b.min().y),
        },
        Coord {
            x: a.max().x.max(b.max().x),
            y: a.max().y.max(b.max().y),
        },
    )
}
