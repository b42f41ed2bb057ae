//! Pixel to latitude/longitude conversion.
//!
//! The detector only needs two things from the scene's georeferencing: the
//! ground resolution of an affine image-to-map transform (for border sizing)
//! and the geographic position of every pixel in a tile (for measuring ground
//! distances along shadow rays).

use ndarray::Array2;

use crate::error::{Error, Result};
use crate::geometry::Rect;

/// Mean Earth radius in metres.
pub const EARTH_RADIUS: f64 = 6_371_008.8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPos {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPos {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// Scene georeferencing collaborator.
pub trait GeoCoding: Send + Sync {
    /// Position of the centre of pixel (x, y), or `None` outside the valid
    /// area of the coding.
    fn pixel_to_geo(&self, x: f64, y: f64) -> Option<GeoPos>;

    /// Metres per pixel if the image-to-map transform is affine.
    fn affine_resolution(&self) -> Option<f64>;
}

/// Resolution of the scene, failing for codings without an affine transform.
pub fn scene_resolution(geocoding: &dyn GeoCoding) -> Result<f64> {
    match geocoding.affine_resolution() {
        Some(res) if res.is_finite() && res > 0.0 => Ok(res),
        Some(res) => Err(Error::InvalidGeoCoding(format!(
            "affine resolution {res} is not a positive number"
        ))),
        None => Err(Error::InvalidGeoCoding(
            "image-to-map transform is not affine".to_string(),
        )),
    }
}

/// North-up grid with square pixels, mapped to geographic coordinates with a
/// local equirectangular approximation around the upper-left corner.
#[derive(Debug, Clone, PartialEq)]
pub struct AffineGeoCoding {
    origin: GeoPos,
    pixel_size: f64,
    cos_origin_lat: f64,
}

impl AffineGeoCoding {
    /// `origin` is the upper-left corner of pixel (0, 0); `pixel_size` in metres.
    pub fn new(origin: GeoPos, pixel_size: f64) -> Result<Self> {
        if !(pixel_size.is_finite() && pixel_size > 0.0) {
            return Err(Error::InvalidGeoCoding(format!(
                "pixel size {pixel_size} must be a positive number of metres"
            )));
        }
        if !(origin.lat.is_finite() && origin.lat.abs() < 89.0 && origin.lon.is_finite()) {
            return Err(Error::InvalidGeoCoding(format!(
                "origin ({}, {}) outside the supported latitude range",
                origin.lat, origin.lon
            )));
        }
        Ok(Self {
            origin,
            pixel_size,
            cos_origin_lat: origin.lat.to_radians().cos(),
        })
    }
}

impl GeoCoding for AffineGeoCoding {
    fn pixel_to_geo(&self, x: f64, y: f64) -> Option<GeoPos> {
        let east = (x + 0.5) * self.pixel_size;
        let south = (y + 0.5) * self.pixel_size;
        let lat = self.origin.lat - (south / EARTH_RADIUS).to_degrees();
        let lon = self.origin.lon + (east / (EARTH_RADIUS * self.cos_origin_lat)).to_degrees();
        if lat.abs() > 90.0 {
            return None;
        }
        Some(GeoPos::new(lat, lon))
    }

    fn affine_resolution(&self) -> Option<f64> {
        Some(self.pixel_size)
    }
}

/// Latitude and longitude grids for a rectangle, NaN where the coding has
/// no position.
pub fn geo_grids(geocoding: &dyn GeoCoding, rect: &Rect) -> (Array2<f64>, Array2<f64>) {
    let mut lat = Array2::<f64>::from_elem(rect.shape(), f64::NAN);
    let mut lon = Array2::<f64>::from_elem(rect.shape(), f64::NAN);
    for row in 0..rect.height {
        for col in 0..rect.width {
            let x = (rect.x + col as isize) as f64;
            let y = (rect.y + row as isize) as f64;
            if let Some(pos) = geocoding.pixel_to_geo(x, y) {
                lat[[row, col]] = pos.lat;
                lon[[row, col]] = pos.lon;
            }
        }
    }
    (lat, lon)
}

/// Great-circle distance in metres (haversine).
#[inline]
pub fn ground_distance(a: GeoPos, b: GeoPos) -> f64 {
    let phi_a = a.lat.to_radians();
    let phi_b = b.lat.to_radians();
    let d_phi = phi_b - phi_a;
    let d_lambda = (b.lon - a.lon).to_radians();
    let h = (d_phi / 2.0).sin().powi(2) + phi_a.cos() * phi_b.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS * h.sqrt().min(1.0).asin()
}
