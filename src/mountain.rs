//! Terrain self-shadow: a pixel is in mountain shadow when the terrain between
//! it and the sun rises above the line of sight.

use log::debug;
use ndarray::{Array2, Zip};
use ndarray_stats::QuantileExt;

use crate::geocoding::ground_distance;
use crate::ray::{step_from, GroundGeometry, RayStepper};

/// Mountain shadow mask of a source rectangle.
pub fn compute_mountain_shadow(geometry: &GroundGeometry) -> Array2<bool> {
    let dim = geometry.dim();
    let max_altitude = *geometry.altitude.max_skipnan() as f64;
    let mut shadow = Array2::from_elem(dim, false);
    if max_altitude.is_nan() {
        return shadow;
    }

    Zip::indexed(&mut shadow).par_for_each(|(row, col), shaded| {
        *shaded = is_terrain_shadowed(geometry, max_altitude, row, col);
    });

    debug!(
        "Mountain shadow: {} of {} pixels",
        shadow.iter().filter(|&&s| s).count(),
        shadow.len()
    );
    shadow
}

fn is_terrain_shadowed(geometry: &GroundGeometry, max_altitude: f64, row: usize, col: usize) -> bool {
    let Some((zenith, azimuth, altitude)) = geometry.sun_and_height(row, col) else {
        return false;
    };
    let Some(origin) = geometry.geo_pos(row, col) else {
        return false;
    };
    if !(0.0..90.0).contains(&zenith) {
        return false;
    }
    let tan_zenith = zenith.to_radians().tan();
    let stepper = RayStepper::new(azimuth);
    let dim = geometry.dim();

    let mut step = 1;
    while let Some((r, c)) = step_from(&stepper, row, col, step, dim) {
        step += 1;
        let terrain = geometry.altitude[[r, c]];
        let Some(pos) = geometry.geo_pos(r, c) else {
            continue;
        };
        let ray_height = altitude + ground_distance(origin, pos) / tan_zenith;
        if ray_height > max_altitude {
            return false;
        }
        if !terrain.is_nan() && terrain as f64 > ray_height {
            return true;
        }
    }
    false
}
