//! Geodesy Utility: topocentric ↔ geodetic conversions (spec §4's
//! "Geodesy Utility", grounded on `original_source/hyscancore/hyscan-geo.c`).
//!
//! The core only needs this for one purpose: shifting the Navigation
//! Model's antenna fix to the vessel center (spec §4.6 step 4). A local
//! tangent-plane (topocentric) frame is erected at the antenna with its
//! X axis along the ship's heading; offsets in that frame are converted
//! back to geodetic lat/lon through a first-order ellipsoidal
//! approximation. Ship planning coordinates beyond this offset use
//! (datum transforms, multi-ellipsoid arithmetic) are out of scope per
//! spec §1.

use serde::{Deserialize, Serialize};

/// Ellipsoid semi-major axis and flattening. The original supports three
/// named ellipsoids (WGS84, Krassovsky 1942, PZ-90); the core keeps the
/// shape generic over `(a, f)` so a caller could supply any of them
/// without core changes, but only instantiates WGS84.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ellipsoid {
    /// Semi-major axis, meters.
    pub a: f64,
    /// Flattening (1/f is the usual tabulated constant).
    pub f: f64,
}

impl Ellipsoid {
    pub const WGS84: Ellipsoid = Ellipsoid {
        a: 6_378_137.0,
        f: 1.0 / 298.257_223_563,
    };

    /// Radius of curvature in the meridian at latitude `lat` (radians).
    fn meridian_radius(self, lat: f64) -> f64 {
        let e2 = self.f * (2.0 - self.f);
        let s = lat.sin();
        self.a * (1.0 - e2) / (1.0 - e2 * s * s).powf(1.5)
    }

    /// Radius of curvature in the prime vertical at latitude `lat` (radians).
    fn prime_vertical_radius(self, lat: f64) -> f64 {
        let e2 = self.f * (2.0 - self.f);
        let s = lat.sin();
        self.a / (1.0 - e2 * s * s).sqrt()
    }
}

/// A topocentric frame: origin at `(lat0, lon0)` (radians) on `ellipsoid`,
/// X axis pointing along `heading` (radians, clockwise from north).
#[derive(Debug, Clone, Copy)]
pub struct Geo {
    pub lat0: f64,
    pub lon0: f64,
    pub heading: f64,
    pub ellipsoid: Ellipsoid,
    /// Iterative height-correction pass count for `topo_xy_to_geo`
    /// (original_source's `topoXY2geo` re-iterates to correct for
    /// ellipsoid curvature at non-zero height). Default 0: a single
    /// spherical-cap pass, sufficient for the meter-scale antenna
    /// offsets the Navigation Model applies.
    pub iterations: u32,
}

impl Geo {
    pub fn new(lat0: f64, lon0: f64, heading: f64, ellipsoid: Ellipsoid) -> Self {
        Geo {
            lat0,
            lon0,
            heading,
            ellipsoid,
            iterations: 0,
        }
    }

    /// Convert geodetic `(lat, lon)` (radians) to local topocentric
    /// `(x, y)` meters, X along `heading`, Y to its left (90° ccw).
    pub fn geo_to_topo_xy(&self, lat: f64, lon: f64) -> (f64, f64) {
        let m = self.ellipsoid.meridian_radius(self.lat0);
        let n = self.ellipsoid.prime_vertical_radius(self.lat0);
        let north = (lat - self.lat0) * m;
        let east = (lon - self.lon0) * n * self.lat0.cos();
        rotate(north, east, self.heading)
    }

    /// Inverse of [`Self::geo_to_topo_xy`]: local topocentric `(x, y)`
    /// meters back to geodetic `(lat, lon)` radians.
    pub fn topo_xy_to_geo(&self, x: f64, y: f64) -> (f64, f64) {
        let (north, east) = rotate_inverse(x, y, self.heading);
        let mut lat = self.lat0;
        let mut lon = self.lon0;
        // Re-derive radii at the updated latitude each pass; with
        // `iterations == 0` this runs once (a single spherical-cap step).
        for _ in 0..=self.iterations {
            let m = self.ellipsoid.meridian_radius(lat);
            let n = self.ellipsoid.prime_vertical_radius(lat);
            lat = self.lat0 + north / m;
            lon = self.lon0 + east / (n * self.lat0.cos());
        }
        (lat, lon)
    }
}

/// Rotate `(north, east)` into a frame whose X axis points along `heading`
/// (clockwise from north) and whose Y axis is 90° counter-clockwise from X.
fn rotate(north: f64, east: f64, heading: f64) -> (f64, f64) {
    let (s, c) = heading.sin_cos();
    let x = north * c + east * s;
    let y = -north * s + east * c;
    (x, y)
}

fn rotate_inverse(x: f64, y: f64, heading: f64) -> (f64, f64) {
    let (s, c) = heading.sin_cos();
    let north = x * c - y * s;
    let east = x * s + y * c;
    (north, east)
}
