//! Shadow caster: projects every cloud cluster onto the ground along the
//! anti-solar direction and tags the pixels its shadow can reach.

use log::debug;
use ndarray::Array2;
use rayon::prelude::*;

use crate::config::ShadowConfig;
use crate::flags::PixelFlag;
use crate::geocoding::ground_distance;
use crate::geometry::Rect;
use crate::ray::{step_from, GroundGeometry, RayStepper};
use crate::segmentation::is_cluster_boundary;

/// Candidate shadow pixels of one tile.
#[derive(Debug, Clone, PartialEq)]
pub struct ShadowCandidates {
    /// Casting cluster of each candidate pixel, 0 elsewhere.
    pub shadow_ids: Array2<u32>,
    /// Bounding rectangle (tile pixel coordinates) of each cluster's
    /// candidates. Index 0 is unused.
    pub bounds: Vec<Option<Rect>>,
}

impl ShadowCandidates {
    pub fn candidate_count(&self) -> usize {
        self.shadow_ids.iter().filter(|&&id| id != 0).count()
    }
}

/// Traces the shadow rays of every cluster.
///
/// Clusters are traced in parallel; the marks are then applied in cluster
/// order and a pixel keeps the first cluster that reached it.
pub fn cast_shadows(
    flags: &Array2<PixelFlag>,
    cloud_ids: &Array2<u32>,
    cluster_count: usize,
    geometry: &GroundGeometry,
    config: &ShadowConfig,
) -> ShadowCandidates {
    let dim = flags.dim();
    let mut origins: Vec<Vec<(usize, usize)>> = vec![Vec::new(); cluster_count + 1];
    for ((row, col), &id) in cloud_ids.indexed_iter() {
        if id != 0 && is_cluster_boundary(cloud_ids, row, col) {
            origins[id as usize].push((row, col));
        }
    }

    let marks: Vec<Vec<(usize, usize)>> = origins
        .par_iter()
        .map(|cluster_origins| {
            let mut hits = Vec::new();
            for &(row, col) in cluster_origins {
                trace_ray(flags, geometry, config, row, col, &mut hits);
            }
            hits
        })
        .collect();

    let mut shadow_ids = Array2::<u32>::zeros(dim);
    let mut bounds = vec![None; cluster_count + 1];
    for (id, hits) in marks.iter().enumerate().skip(1) {
        for &(row, col) in hits {
            if shadow_ids[[row, col]] != 0 {
                continue;
            }
            shadow_ids[[row, col]] = id as u32;
            let pixel = Rect::new(col as isize, row as isize, 1, 1);
            bounds[id] = Some(match bounds[id] {
                Some(rect) => pixel.union(&rect),
                None => pixel,
            });
        }
    }

    let candidates = ShadowCandidates { shadow_ids, bounds };
    debug!(
        "Cast {} clusters: {} candidate pixels",
        cluster_count,
        candidates.candidate_count()
    );
    candidates
}

/// Walks away from the sun starting at one cloud pixel.
fn trace_ray(
    flags: &Array2<PixelFlag>,
    geometry: &GroundGeometry,
    config: &ShadowConfig,
    row: usize,
    col: usize,
    hits: &mut Vec<(usize, usize)>,
) {
    let Some((zenith, azimuth, origin_altitude)) = geometry.sun_and_height(row, col) else {
        return;
    };
    let Some(origin) = geometry.geo_pos(row, col) else {
        return;
    };
    if !(0.0..90.0).contains(&zenith) {
        return;
    }
    let tan_zenith = zenith.to_radians().tan();
    let min_base = config.min_cloud_base as f64;
    let max_top = config.max_cloud_top as f64;
    let stepper = RayStepper::new(azimuth + 180.0);
    let dim = flags.dim();

    let mut step = 1;
    while let Some((r, c)) = step_from(&stepper, row, col, step, dim) {
        step += 1;
        let altitude = geometry.altitude[[r, c]];
        let Some(pos) = geometry.geo_pos(r, c) else {
            continue;
        };
        if altitude.is_nan() {
            continue;
        }
        let distance = ground_distance(origin, pos);
        let height = (altitude as f64 - origin_altitude) + distance / tan_zenith;
        if height > max_top {
            break;
        }
        if height >= min_base && flags[[r, c]].is_clear_surface() {
            hits.push((r, c));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geocoding::{geo_grids, AffineGeoCoding, GeoPos};
    use crate::segmentation::compute_cloud_ids;

    struct Samples {
        zenith: Array2<f32>,
        azimuth: Array2<f32>,
        altitude: Array2<f32>,
        lat: Array2<f64>,
        lon: Array2<f64>,
    }

    impl Samples {
        fn flat(shape: (usize, usize), zenith: f32, azimuth: f32) -> Self {
            let coding = AffineGeoCoding::new(GeoPos::new(45.0, 7.0), 10.0).unwrap();
            let (lat, lon) = geo_grids(&coding, &Rect::new(0, 0, shape.1, shape.0));
            Self {
                zenith: Array2::from_elem(shape, zenith),
                azimuth: Array2::from_elem(shape, azimuth),
                altitude: Array2::zeros(shape),
                lat,
                lon,
            }
        }

        fn geometry(&self) -> GroundGeometry<'_> {
            GroundGeometry {
                sun_zenith: self.zenith.view(),
                sun_azimuth: self.azimuth.view(),
                altitude: self.altitude.view(),
                latitude: self.lat.view(),
                longitude: self.lon.view(),
            }
        }
    }

    fn low_cloud_config() -> ShadowConfig {
        ShadowConfig {
            min_cloud_base: 1.0,
            max_cloud_top: 1000.0,
            ..ShadowConfig::default()
        }
    }

    fn centre_cloud() -> Array2<PixelFlag> {
        let mut flags = Array2::from_elem((8, 8), PixelFlag::Land);
        for r in 3..5 {
            for c in 3..5 {
                flags[[r, c]] = PixelFlag::Cloud;
            }
        }
        flags
    }

    #[test]
    fn test_shadow_falls_south_of_cloud() {
        let flags = centre_cloud();
        let (ids, count) = compute_cloud_ids(&flags);
        let samples = Samples::flat((8, 8), 45.0, 0.0);
        let candidates = cast_shadows(&flags, &ids, count, &samples.geometry(), &low_cloud_config());

        for ((r, c), &id) in candidates.shadow_ids.indexed_iter() {
            let expected = r >= 5 && (3..5).contains(&c);
            assert_eq!(id != 0, expected, "pixel ({r}, {c})");
        }
        assert_eq!(candidates.bounds[1], Some(Rect::new(3, 5, 2, 3)));
    }

    #[test]
    fn test_cloud_base_excludes_near_pixels() {
        let flags = centre_cloud();
        let (ids, count) = compute_cloud_ids(&flags);
        let samples = Samples::flat((8, 8), 45.0, 0.0);
        let config = ShadowConfig {
            min_cloud_base: 25.0,
            ..low_cloud_config()
        };
        let candidates = cast_shadows(&flags, &ids, count, &samples.geometry(), &config);
        // Row 5 is at most 20 m from either cloud row.
        assert_eq!(candidates.shadow_ids[[5, 3]], 0);
        assert_eq!(candidates.shadow_ids[[6, 3]], 1);
    }

    #[test]
    fn test_nan_sun_skips_rays() {
        let flags = centre_cloud();
        let (ids, count) = compute_cloud_ids(&flags);
        let mut samples = Samples::flat((8, 8), 45.0, 0.0);
        samples.zenith.fill(f32::NAN);
        let candidates = cast_shadows(&flags, &ids, count, &samples.geometry(), &low_cloud_config());
        assert_eq!(candidates.candidate_count(), 0);
        assert_eq!(candidates.bounds[1], None);
    }

    #[test]
    fn test_first_cluster_keeps_overlap() {
        // Two clouds in one column; both shadows sweep the rows below.
        let mut flags = Array2::from_elem((8, 3), PixelFlag::Land);
        flags[[0, 1]] = PixelFlag::Cloud;
        flags[[2, 1]] = PixelFlag::Cloud;
        let (ids, count) = compute_cloud_ids(&flags);
        assert_eq!(count, 2);
        let samples = Samples::flat((8, 3), 45.0, 0.0);
        let candidates = cast_shadows(&flags, &ids, count, &samples.geometry(), &low_cloud_config());
        assert_eq!(candidates.shadow_ids[[1, 1]], 1);
        assert_eq!(candidates.shadow_ids[[3, 1]], 1);
        assert_eq!(candidates.shadow_ids[[7, 1]], 1);
        assert_eq!(candidates.bounds[2], None);
    }

    #[test]
    fn test_invalid_pixels_never_become_candidates() {
        let mut flags = centre_cloud();
        flags[[6, 3]] = PixelFlag::Invalid;
        let (ids, count) = compute_cloud_ids(&flags);
        let samples = Samples::flat((8, 8), 45.0, 0.0);
        let candidates = cast_shadows(&flags, &ids, count, &samples.geometry(), &low_cloud_config());
        assert_eq!(candidates.shadow_ids[[6, 3]], 0);
        assert_eq!(candidates.shadow_ids[[7, 3]], 1);
    }
}
