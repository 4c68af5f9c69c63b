//! Utility functions for coordinate conversions
//!
//! All conversions pivot through WGS84 longitude/latitude in degrees, stored as
//! `Coord { x: lon, y: lat }`.

use geo::Coord;

/// Web Mercator bounds in meters (EPSG:3857)
pub const EARTH_MERCATOR_MAX: f64 = 20037508.34;
pub const EARTH_MERCATOR_MIN: f64 = -20037508.34;

/// Maximum latitude that can be represented in Web Mercator
pub const MAX_LATITUDE: f64 = 85.05112878;

/// Precomputed constant: EARTH_MERCATOR_MAX / 180.0
const LON_TO_X_FACTOR: f64 = EARTH_MERCATOR_MAX / 180.0;

/// Precomputed constant: EARTH_MERCATOR_MAX / PI
const Y_FACTOR: f64 = EARTH_MERCATOR_MAX / std::f64::consts::PI;

/// Precomputed constant: 180.0 / EARTH_MERCATOR_MAX
const X_TO_LON_FACTOR: f64 = 180.0 / EARTH_MERCATOR_MAX;

/// Precomputed constant: PI / EARTH_MERCATOR_MAX
const Y_TO_LAT_FACTOR: f64 = std::f64::consts::PI / EARTH_MERCATOR_MAX;

// WGS84 ellipsoid and UTM parameters
const WGS84_A: f64 = 6_378_137.0;
const WGS84_F: f64 = 1.0 / 298.257_223_563;
const E2: f64 = WGS84_F * (2.0 - WGS84_F);
const E_PRIME2: f64 = E2 / (1.0 - E2);
const UTM_K0: f64 = 0.9996;
const UTM_FALSE_EASTING: f64 = 500_000.0;
const UTM_FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

/// Convert WGS84 (lon, lat) in degrees to Web Mercator (x, y) in meters
///
/// Latitude is clamped to the Web Mercator range.
#[inline(always)]
pub fn lonlat_to_mercator(c: Coord<f64>) -> Coord<f64> {
    let lat = c.y.clamp(-MAX_LATITUDE, MAX_LATITUDE);
    let lat_rad = lat.to_radians();
    Coord {
        x: c.x * LON_TO_X_FACTOR,
        y: (lat_rad.tan() + (1.0 / lat_rad.cos())).ln() * Y_FACTOR,
    }
}

/// Convert Web Mercator (x, y) in meters to WGS84 (lon, lat) in degrees
#[inline(always)]
pub fn mercator_to_lonlat(c: Coord<f64>) -> Coord<f64> {
    let lon = c.x * X_TO_LON_FACTOR;
    let lat =
        (std::f64::consts::PI / 2.0 - 2.0 * ((-c.y * Y_TO_LAT_FACTOR).exp()).atan()).to_degrees();
    Coord { x: lon, y: lat }
}

/// Central meridian of a UTM zone, in degrees
#[inline]
pub fn utm_central_meridian(zone: u8) -> f64 {
    (zone as f64 - 1.0) * 6.0 - 180.0 + 3.0
}

/// UTM zone containing the given longitude (1..=60)
#[inline]
pub fn utm_zone_for_lon(lon: f64) -> u8 {
    let zone = ((lon + 180.0) / 6.0).floor() as i64 + 1;
    zone.clamp(1, 60) as u8
}

/// Meridian arc length from the equator to latitude `phi` (radians)
fn meridian_arc(phi: f64) -> f64 {
    let e4 = E2 * E2;
    let e6 = e4 * E2;
    WGS84_A
        * ((1.0 - E2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * phi
            - (3.0 * E2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * phi).sin()
            + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * phi).sin()
            - (35.0 * e6 / 3072.0) * (6.0 * phi).sin())
}

/// Convert WGS84 (lon, lat) in degrees to UTM easting/northing in meters
///
/// Transverse Mercator series on the WGS84 ellipsoid (Snyder 1987).
pub fn lonlat_to_utm(c: Coord<f64>, zone: u8, north: bool) -> Coord<f64> {
    let phi = c.y.to_radians();
    let lambda = c.x.to_radians();
    let lambda0 = utm_central_meridian(zone).to_radians();

    let sin_phi = phi.sin();
    let cos_phi = phi.cos();
    let tan_phi = phi.tan();

    let n = WGS84_A / (1.0 - E2 * sin_phi * sin_phi).sqrt();
    let t = tan_phi * tan_phi;
    let cc = E_PRIME2 * cos_phi * cos_phi;
    let a = cos_phi * (lambda - lambda0);
    let m = meridian_arc(phi);

    let a2 = a * a;
    let a3 = a2 * a;
    let a4 = a3 * a;
    let a5 = a4 * a;
    let a6 = a5 * a;

    let x = UTM_K0
        * n
        * (a + (1.0 - t + cc) * a3 / 6.0
            + (5.0 - 18.0 * t + t * t + 72.0 * cc - 58.0 * E_PRIME2) * a5 / 120.0)
        + UTM_FALSE_EASTING;

    let mut y = UTM_K0
        * (m + n
            * tan_phi
            * (a2 / 2.0
                + (5.0 - t + 9.0 * cc + 4.0 * cc * cc) * a4 / 24.0
                + (61.0 - 58.0 * t + t * t + 600.0 * cc - 330.0 * E_PRIME2) * a6 / 720.0));
    if !north {
        y += UTM_FALSE_NORTHING_SOUTH;
    }

    Coord { x, y }
}

/// Convert UTM easting/northing in meters to WGS84 (lon, lat) in degrees
pub fn utm_to_lonlat(c: Coord<f64>, zone: u8, north: bool) -> Coord<f64> {
    let x = c.x - UTM_FALSE_EASTING;
    let y = if north {
        c.y
    } else {
        c.y - UTM_FALSE_NORTHING_SOUTH
    };

    let e4 = E2 * E2;
    let e6 = e4 * E2;
    let m = y / UTM_K0;
    let mu = m / (WGS84_A * (1.0 - E2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0));

    let sqrt_1_e2 = (1.0 - E2).sqrt();
    let e1 = (1.0 - sqrt_1_e2) / (1.0 + sqrt_1_e2);
    let e1_2 = e1 * e1;
    let e1_3 = e1_2 * e1;
    let e1_4 = e1_3 * e1;

    // Footpoint latitude
    let phi1 = mu
        + (3.0 * e1 / 2.0 - 27.0 * e1_3 / 32.0) * (2.0 * mu).sin()
        + (21.0 * e1_2 / 16.0 - 55.0 * e1_4 / 32.0) * (4.0 * mu).sin()
        + (151.0 * e1_3 / 96.0) * (6.0 * mu).sin()
        + (1097.0 * e1_4 / 512.0) * (8.0 * mu).sin();

    let sin_phi1 = phi1.sin();
    let cos_phi1 = phi1.cos();
    let tan_phi1 = phi1.tan();

    let n1 = WGS84_A / (1.0 - E2 * sin_phi1 * sin_phi1).sqrt();
    let t1 = tan_phi1 * tan_phi1;
    let c1 = E_PRIME2 * cos_phi1 * cos_phi1;
    let r1 = WGS84_A * (1.0 - E2) / (1.0 - E2 * sin_phi1 * sin_phi1).powf(1.5);
    let d = x / (n1 * UTM_K0);

    let d2 = d * d;
    let d3 = d2 * d;
    let d4 = d3 * d;
    let d5 = d4 * d;
    let d6 = d5 * d;

    let phi = phi1
        - (n1 * tan_phi1 / r1)
            * (d2 / 2.0
                - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * E_PRIME2) * d4 / 24.0
                + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1
                    - 252.0 * E_PRIME2
                    - 3.0 * c1 * c1)
                    * d6
                    / 720.0);

    let lambda = utm_central_meridian(zone).to_radians()
        + (d - (1.0 + 2.0 * t1 + c1) * d3 / 6.0
            + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * E_PRIME2 + 24.0 * t1 * t1)
                * d5
                / 120.0)
            / cos_phi1;

    Coord {
        x: lambda.to_degrees(),
        y: phi.to_degrees(),
    }
}

/// Check if a (lon, lat) coordinate lies within the WGS84 domain
#[inline(always)]
pub fn is_valid_lonlat(c: Coord<f64>) -> bool {
    c.x.is_finite() && c.y.is_finite() && (-180.0..=180.0).contains(&c.x) && (-90.0..=90.0).contains(&c.y)
}

/// Check if a point is within Web Mercator bounds
#[inline(always)]
pub fn is_valid_mercator(c: Coord<f64>) -> bool {
    c.x >= EARTH_MERCATOR_MIN
        && c.x <= EARTH_MERCATOR_MAX
        && c.y >= EARTH_MERCATOR_MIN
        && c.y <= EARTH_MERCATOR_MAX
}
