//! Ray stepping across the pixel grid and the per-pixel geometry rays read.

use ndarray::ArrayView2;

use crate::error::Result;
use crate::flags::check_shape;
use crate::geocoding::GeoPos;
use crate::geometry::Rect;
use crate::labeling::neighbour;

const PI_OVER_4: f64 = std::f64::consts::FRAC_PI_4;
const THREE_PI_OVER_4: f64 = 3.0 * PI_OVER_4;
const FIVE_PI_OVER_4: f64 = 5.0 * PI_OVER_4;
const SEVEN_PI_OVER_4: f64 = 7.0 * PI_OVER_4;

/// Walks a straight line one pixel per step along its dominant axis.
///
/// Bearings are compass directions of travel in degrees (0 = north = up,
/// 90 = east = right).
#[derive(Debug, Clone, Copy)]
pub(crate) struct RayStepper {
    col_dominant: bool,
    sign_sin: f64,
    sign_cos: f64,
    /// |tan| for row-dominant rays, |1/tan| for column-dominant ones.
    ratio: f64,
}

impl RayStepper {
    pub fn new(bearing_deg: f64) -> Self {
        let bearing = bearing_deg.rem_euclid(360.0).to_radians();
        let (sin_b, cos_b) = bearing.sin_cos();
        let col_dominant = (PI_OVER_4..THREE_PI_OVER_4).contains(&bearing)
            || (FIVE_PI_OVER_4..SEVEN_PI_OVER_4).contains(&bearing);
        let tan_b = bearing.tan();
        Self {
            col_dominant,
            sign_sin: sin_b.signum(),
            sign_cos: cos_b.signum(),
            ratio: if col_dominant {
                (1.0 / tan_b).abs()
            } else {
                tan_b.abs()
            },
        }
    }

    /// (d_row, d_col) of the pixel reached after `step` steps.
    #[inline]
    pub fn offset(&self, step: usize) -> (isize, isize) {
        let k = step as f64;
        let minor = (k * self.ratio).round();
        if self.col_dominant {
            ((-self.sign_cos * minor) as isize, (self.sign_sin * k) as isize)
        } else {
            ((-self.sign_cos * k) as isize, (self.sign_sin * minor) as isize)
        }
    }
}

/// Sun angles, terrain height and pixel positions of one source rectangle.
#[derive(Debug, Clone, Copy)]
pub struct GroundGeometry<'a> {
    /// Degrees.
    pub sun_zenith: ArrayView2<'a, f32>,
    /// Degrees clockwise from north.
    pub sun_azimuth: ArrayView2<'a, f32>,
    /// Metres.
    pub altitude: ArrayView2<'a, f32>,
    pub latitude: ArrayView2<'a, f64>,
    pub longitude: ArrayView2<'a, f64>,
}

impl<'a> GroundGeometry<'a> {
    pub fn check(&self, source: &Rect) -> Result<()> {
        check_shape("sun zenith", self.sun_zenith.dim(), source)?;
        check_shape("sun azimuth", self.sun_azimuth.dim(), source)?;
        check_shape("altitude", self.altitude.dim(), source)?;
        check_shape("latitude", self.latitude.dim(), source)?;
        check_shape("longitude", self.longitude.dim(), source)
    }

    pub fn dim(&self) -> (usize, usize) {
        self.altitude.dim()
    }

    #[inline]
    pub fn geo_pos(&self, row: usize, col: usize) -> Option<GeoPos> {
        let lat = self.latitude[[row, col]];
        let lon = self.longitude[[row, col]];
        (lat.is_finite() && lon.is_finite()).then(|| GeoPos::new(lat, lon))
    }

    /// (zenith, azimuth, altitude) when all three are valid.
    #[inline]
    pub fn sun_and_height(&self, row: usize, col: usize) -> Option<(f64, f64, f64)> {
        let zenith = self.sun_zenith[[row, col]];
        let azimuth = self.sun_azimuth[[row, col]];
        let altitude = self.altitude[[row, col]];
        if zenith.is_nan() || azimuth.is_nan() || altitude.is_nan() {
            return None;
        }
        Some((zenith as f64, azimuth as f64, altitude as f64))
    }
}

/// Pixel reached from (row, col) after `step` steps, if still inside `dim`.
#[inline]
pub(crate) fn step_from(
    stepper: &RayStepper,
    row: usize,
    col: usize,
    step: usize,
    dim: (usize, usize),
) -> Option<(usize, usize)> {
    neighbour(row, col, stepper.offset(step), dim)
}
