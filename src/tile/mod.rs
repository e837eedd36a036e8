//! Slippy-map tile coordinates and their geographic envelopes.
mod mercator;

use geo::{Coord, Rect};

pub use mercator::{
    eccentricity, lat_to_y, lat_to_y_spherical, lon_to_x, mercator_degrees_to_lat, x_to_lon,
    y_to_lat, y_to_lat_spherical, Mercator, R_MAJOR, R_MINOR,
};

/// A (zoom, x, y) tile address with the origin at the top left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoord {
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

impl TileCoord {
    pub fn new(z: u8, x: u32, y: u32) -> Self { Self { z, x, y } }

    /// Number of tiles along one side at this zoom.
    #[inline]
    pub fn tiles_per_side(&self) -> u64 { 1u64 << self.z }

    /// True if x and y are inside the grid for this zoom.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.z < 32 && (self.x as u64) < self.tiles_per_side() && (self.y as u64) < self.tiles_per_side()
    }
}

impl std::fmt::Display for TileCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

/// The two bounding boxes of one tile: WGS84 degrees and Mercator meters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileEnvelope {
    wgs84: Rect<f64>,
    mercator: Rect<f64>,
}

impl TileEnvelope {
    /// Envelope of `tile` on the spherical web-map grid.
    pub fn for_tile(tile: TileCoord) -> Self { Self::for_tile_with(Mercator::default(), tile) }

    /// Envelope of `tile`, projecting the corners with `model`.
    pub fn for_tile_with(model: Mercator, tile: TileCoord) -> Self {
        let side = tile.tiles_per_side() as f64;
        let (x, y) = (tile.x as f64, tile.y as f64);

        let lon_min = 360.0 / side * x - 180.0;
        let lon_max = 360.0 / side * (x + 1.0) - 180.0;

        // y runs linearly in "Mercator degrees" from the top of the grid
        let lat_max = mercator_degrees_to_lat(180.0 - 360.0 / side * y);
        let lat_min = mercator_degrees_to_lat(180.0 - 360.0 / side * (y + 1.0));

        let (x_min, y_min) = model.project(lon_min, lat_min);
        let (x_max, y_max) = model.project(lon_max, lat_max);

        Self {
            wgs84: Rect::new(Coord { x: lon_min, y: lat_min }, Coord { x: lon_max, y: lat_max }),
            mercator: Rect::new(Coord { x: x_min, y: y_min }, Coord { x: x_max, y: y_max }),
        }
    }

    /// Bounds in WGS84 degrees (x = longitude, y = latitude).
    #[inline] pub fn wgs84(&self) -> &Rect<f64> { &self.wgs84 }

    /// Bounds in Mercator meters.
    #[inline] pub fn mercator(&self) -> &Rect<f64> { &self.mercator }
}

/// Compute the (WGS84, Mercator) envelopes of tile `z/x/y`.
pub fn envelope_for_tile(z: u8, x: u32, y: u32) -> TileEnvelope {
    TileEnvelope::for_tile(TileCoord::new(z, x, y))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_rect(actual: &Rect<f64>, expected: [f64; 4], tol: f64) {
        let got = [actual.min().x, actual.max().x, actual.min().y, actual.max().y];
        for (g, e) in got.iter().zip(expected) {
            assert!((g - e).abs() < tol, "got {got:?}, expected {expected:?}");
        }
    }

    #[test]
    fn envelope_z6_x31_y21() {
        let env = envelope_for_tile(6, 31, 21);
        assert_rect(env.wgs84(), [-5.625, 0.0, 48.922499263758254, 52.482780222078205], 0.01);
        assert_rect(env.mercator(), [-626172.1357121654, 0.0, 6261721.357121639, 6887893.492833804], 0.1);
    }

    #[test]
    fn zoom_zero_covers_the_world() {
        let env = envelope_for_tile(0, 0, 0);
        assert_rect(env.wgs84(), [-180.0, 180.0, -85.0511287798, 85.0511287798], 1e-6);
        assert!((env.mercator().width() - 2.0 * std::f64::consts::PI * R_MAJOR).abs() < 1e-6);
        assert!((env.mercator().height() - env.mercator().width()).abs() < 1e-3);
    }

    #[test]
    fn ellipsoidal_envelope_is_shifted_south() {
        let tile = TileCoord::new(6, 31, 21);
        let sph = TileEnvelope::for_tile_with(Mercator::Spherical, tile);
        let ell = TileEnvelope::for_tile_with(Mercator::Ellipsoidal, tile);
        assert_eq!(sph.wgs84(), ell.wgs84());
        assert!(ell.mercator().max().y < sph.mercator().max().y);
    }

    #[test]
    fn tile_validity() {
        assert!(TileCoord::new(0, 0, 0).is_valid());
        assert!(TileCoord::new(3, 7, 7).is_valid());
        assert!(!TileCoord::new(3, 8, 0).is_valid());
        assert_eq!(TileCoord::new(6, 31, 21).to_string(), "6/31/21");
    }
}
