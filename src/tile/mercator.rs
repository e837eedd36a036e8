use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};

use serde::{Deserialize, Serialize};

/// Semi-major axis of the WGS84 ellipsoid, in meters.
pub const R_MAJOR: f64 = 6378137.0;
/// Semi-minor axis of the WGS84 ellipsoid, in meters.
pub const R_MINOR: f64 = 6356752.3142;

/// Latitude bound applied before the forward projection.
const LAT_LIMIT: f64 = 89.5;

/// Eccentricity of the ellipsoid, sqrt(1 - (R_MINOR/R_MAJOR)^2).
#[inline]
pub fn eccentricity() -> f64 {
    let ratio = R_MINOR / R_MAJOR;
    (1.0 - ratio * ratio).sqrt()
}

/// Longitude in degrees to Mercator x in meters.
#[inline]
pub fn lon_to_x(lon: f64) -> f64 { R_MAJOR * lon.to_radians() }

/// Mercator x in meters back to longitude in degrees.
#[inline]
pub fn x_to_lon(x: f64) -> f64 { (x / R_MAJOR).to_degrees() }

/// Latitude in degrees to ellipsoidal Mercator y in meters.
/// Latitude is clamped to +/-89.5 degrees first.
pub fn lat_to_y(lat: f64) -> f64 {
    let ecc = eccentricity();
    let phi = lat.clamp(-LAT_LIMIT, LAT_LIMIT).to_radians();
    let con = ecc * phi.sin();
    let con = ((1.0 - con) / (1.0 + con)).powf(0.5 * ecc);
    let ts = (FRAC_PI_4 - 0.5 * phi).tan() / con;
    -R_MAJOR * ts.ln()
}

/// Ellipsoidal Mercator y in meters back to latitude in degrees.
pub fn y_to_lat(y: f64) -> f64 {
    let ecc = eccentricity();
    let ts = (-y / R_MAJOR).exp();
    let mut phi = FRAC_PI_2 - 2.0 * ts.atan();
    for _ in 0..15 {
        let con = ecc * phi.sin();
        let dphi = FRAC_PI_2 - 2.0 * (ts * ((1.0 - con) / (1.0 + con)).powf(0.5 * ecc)).atan() - phi;
        phi += dphi;
        if dphi.abs() <= 1e-9 {
            break;
        }
    }
    phi.to_degrees()
}

/// Latitude in degrees to spherical (EPSG:3857) Mercator y in meters.
pub fn lat_to_y_spherical(lat: f64) -> f64 {
    let phi = lat.clamp(-LAT_LIMIT, LAT_LIMIT).to_radians();
    R_MAJOR * (FRAC_PI_4 + 0.5 * phi).tan().ln()
}

/// Spherical Mercator y in meters back to latitude in degrees.
#[inline]
pub fn y_to_lat_spherical(y: f64) -> f64 {
    (2.0 * (y / R_MAJOR).exp().atan() - FRAC_PI_2).to_degrees()
}

/// Linear "Mercator degrees" to true WGS84 latitude: degrees(atan(sinh(radians(y)))).
#[inline]
pub fn mercator_degrees_to_lat(y: f64) -> f64 { y.to_radians().sinh().atan().to_degrees() }

/// Which Mercator surface tiles and datasets are projected onto.
///
/// `Spherical` is the web map grid (EPSG:3857) and reproduces the usual
/// tile bounds. `Ellipsoidal` uses the WGS84 ellipsoid (EPSG:3395 style).
/// A tile envelope and the datasets it is cut from must use the same model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mercator {
    #[default]
    Spherical,
    Ellipsoidal,
}

impl Mercator {
    /// Project (lon, lat) degrees to (x, y) meters.
    #[inline]
    pub fn project(self, lon: f64, lat: f64) -> (f64, f64) {
        match self {
            Mercator::Spherical => (lon_to_x(lon), lat_to_y_spherical(lat)),
            Mercator::Ellipsoidal => (lon_to_x(lon), lat_to_y(lat)),
        }
    }

    /// Unproject (x, y) meters to (lon, lat) degrees.
    #[inline]
    pub fn unproject(self, x: f64, y: f64) -> (f64, f64) {
        match self {
            Mercator::Spherical => (x_to_lon(x), y_to_lat_spherical(y)),
            Mercator::Ellipsoidal => (x_to_lon(x), y_to_lat(y)),
        }
    }
}
