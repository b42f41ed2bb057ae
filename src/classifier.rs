//! Spectral confirmation of candidate shadow regions and their consolidation
//! into long shadows.
//!
//! A region is compared against the clear ground around it: it has to be
//! darker on average by more than `darkness_threshold` (relative contrast)
//! and almost all of its pixels have to be individually darker than the
//! reference, so that a few dark outliers cannot confirm a bright region.

use log::debug;
use ndarray::{Array1, Array2, ArrayView2};
use ndarray_stats::SummaryStatisticsExt;

use crate::caster::ShadowCandidates;
use crate::config::{AnalysisMode, ShadowConfig};
use crate::error::Result;
use crate::flags::{check_shape, PixelFlag};
use crate::geometry::{BorderExtensions, Rect};
use crate::labeling::{neighbour, Connectivity, DisjointSet};

/// The two spectral cluster bands of a source rectangle.
#[derive(Debug, Clone, Copy)]
pub struct ClusterBands<'a> {
    pub a: ArrayView2<'a, f32>,
    pub b: ArrayView2<'a, f32>,
}

impl<'a> ClusterBands<'a> {
    pub fn check(&self, source: &Rect) -> Result<()> {
        check_shape("cluster band A", self.a.dim(), source)?;
        check_shape("cluster band B", self.b.dim(), source)
    }

    /// Brightness used by `mode`, `None` for no-data samples.
    #[inline]
    fn value(&self, mode: AnalysisMode, row: usize, col: usize) -> Option<f64> {
        let a = self.a[[row, col]] as f64;
        let v = match mode {
            AnalysisMode::SingleBand => a,
            AnalysisMode::MultiBand | AnalysisMode::LandWater => a + self.b[[row, col]] as f64,
        };
        v.is_finite().then_some(v)
    }
}

/// Outcome of the spectral test for one tile.
#[derive(Debug, Clone, PartialEq)]
pub struct ShadowClassification {
    /// Per shadow id; index 0 is unused.
    pub confirmed: Vec<bool>,
    /// Long-shadow group of each confirmed pixel, 0 elsewhere.
    pub long_shadow_ids: Array2<u32>,
    pub long_shadow_count: usize,
}

impl ShadowClassification {
    pub fn confirmed_count(&self) -> usize {
        self.confirmed.iter().filter(|&&c| c).count()
    }
}

/// Surface classes compared against separate references.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Surface {
    Any,
    Water,
    Land,
}

impl Surface {
    fn of(mode: AnalysisMode, flag: PixelFlag) -> Surface {
        match (mode, flag) {
            (AnalysisMode::LandWater, PixelFlag::Water) => Surface::Water,
            (AnalysisMode::LandWater, _) => Surface::Land,
            _ => Surface::Any,
        }
    }

    fn index(self) -> usize {
        match self {
            Surface::Any | Surface::Land => 0,
            Surface::Water => 1,
        }
    }
}

#[derive(Debug, Default)]
struct Samples {
    region: Vec<f64>,
    reference: Vec<f64>,
}

/// Relative contrast and agreement of one region, if it can be judged.
fn region_statistics(classes: &[Samples; 2]) -> Option<(f64, f64)> {
    let mut contrasts = Vec::with_capacity(2);
    let mut weights = Vec::with_capacity(2);
    let mut darker = 0usize;
    let mut total = 0usize;
    for samples in classes.iter().filter(|s| !s.region.is_empty()) {
        total += samples.region.len();
        let reference = Array1::from(samples.reference.clone());
        let Some(reference_mean) = reference.mean() else {
            continue;
        };
        if reference_mean == 0.0 {
            continue;
        }
        let region = Array1::from(samples.region.clone());
        let region_mean = region.mean()?;
        darker += region.iter().filter(|&&v| v < reference_mean).count();
        contrasts.push((region_mean - reference_mean) / reference_mean.abs());
        weights.push(region.len() as f64);
    }
    if contrasts.is_empty() || total == 0 {
        return None;
    }
    let contrast = Array1::from(contrasts)
        .weighted_mean(&Array1::from(weights))
        .ok()?;
    Some((contrast, darker as f64 / total as f64))
}

/// Confirms or rejects every candidate region, writes `CloudShadow` into
/// `flags` for the confirmed ones and groups them into long shadows.
///
/// Rejected candidates keep their flag.
pub fn classify_shadows(
    flags: &mut Array2<PixelFlag>,
    candidates: &ShadowCandidates,
    bands: &ClusterBands,
    config: &ShadowConfig,
) -> ShadowClassification {
    let shadow_ids = &candidates.shadow_ids;
    let dim = flags.dim();
    let tile = Rect::new(0, 0, dim.1, dim.0);
    let mut confirmed = vec![false; candidates.bounds.len()];

    for (id, bounds) in candidates.bounds.iter().enumerate().skip(1) {
        let Some(bounds) = bounds else {
            continue;
        };
        let extent = bounds.width.max(bounds.height).max(1);
        let window = clip(&bounds.grow(&BorderExtensions::symmetric(extent)), &tile);

        let mut classes: [Samples; 2] = Default::default();
        for row in window.y as usize..window.y as usize + window.height {
            for col in window.x as usize..window.x as usize + window.width {
                let flag = flags[[row, col]];
                if !flag.is_clear_surface() {
                    continue;
                }
                let Some(value) = bands.value(config.mode, row, col) else {
                    continue;
                };
                let samples = &mut classes[Surface::of(config.mode, flag).index()];
                match shadow_ids[[row, col]] {
                    0 => samples.reference.push(value),
                    owner if owner as usize == id => samples.region.push(value),
                    _ => {}
                }
            }
        }

        if let Some((contrast, agreement)) = region_statistics(&classes) {
            confirmed[id] = contrast < config.darkness_threshold as f64
                && agreement >= config.outlier_threshold as f64;
        }
    }

    let (long_shadow_ids, long_shadow_count) = merge_long_shadows(shadow_ids, &confirmed);
    for (flag, &long_id) in flags.iter_mut().zip(long_shadow_ids.iter()) {
        if long_id != 0 {
            *flag = PixelFlag::CloudShadow;
        }
    }

    let classification = ShadowClassification {
        confirmed,
        long_shadow_ids,
        long_shadow_count,
    };
    debug!(
        "Confirmed {} of {} shadow regions, {} long shadows",
        classification.confirmed_count(),
        candidates.bounds.iter().filter(|b| b.is_some()).count(),
        long_shadow_count
    );
    classification
}

/// Unions confirmed regions whose pixels touch and numbers the groups in
/// raster order.
fn merge_long_shadows(shadow_ids: &Array2<u32>, confirmed: &[bool]) -> (Array2<u32>, usize) {
    let dim = shadow_ids.dim();
    let is_confirmed = |id: u32| id != 0 && confirmed[id as usize];
    let mut dsu = DisjointSet::with_labels(confirmed.len().saturating_sub(1));

    for ((row, col), &id) in shadow_ids.indexed_iter() {
        if !is_confirmed(id) {
            continue;
        }
        for &offset in Connectivity::Eight.offsets() {
            if let Some((r, c)) = neighbour(row, col, offset, dim) {
                let other = shadow_ids[[r, c]];
                if other != id && is_confirmed(other) {
                    dsu.union(id, other);
                }
            }
        }
    }

    let mut root_to_long = vec![0u32; confirmed.len()];
    let mut count = 0usize;
    let mut long_ids = Array2::<u32>::zeros(dim);
    for ((row, col), &id) in shadow_ids.indexed_iter() {
        if !is_confirmed(id) {
            continue;
        }
        let root = dsu.find(id) as usize;
        if root_to_long[root] == 0 {
            count += 1;
            root_to_long[root] = count as u32;
        }
        long_ids[[row, col]] = root_to_long[root];
    }
    (long_ids, count)
}

fn clip(rect: &Rect, bounds: &Rect) -> Rect {
    let x0 = rect.x.max(bounds.x);
    let y0 = rect.y.max(bounds.y);
    let x1 = (rect.x + rect.width as isize).min(bounds.x + bounds.width as isize);
    let y1 = (rect.y + rect.height as isize).min(bounds.y + bounds.height as isize);
    Rect::new(x0, y0, (x1 - x0).max(0) as usize, (y1 - y0).max(0) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Candidate region 1 at rows 5..8, cols 3..5 below a 2x2 cloud.
    fn tile() -> (Array2<PixelFlag>, ShadowCandidates) {
        let mut flags = Array2::from_elem((8, 8), PixelFlag::Land);
        let mut shadow_ids = Array2::<u32>::zeros((8, 8));
        for r in 3..5 {
            for c in 3..5 {
                flags[[r, c]] = PixelFlag::Cloud;
            }
        }
        for r in 5..8 {
            for c in 3..5 {
                shadow_ids[[r, c]] = 1;
            }
        }
        let candidates = ShadowCandidates {
            shadow_ids,
            bounds: vec![None, Some(Rect::new(3, 5, 2, 3))],
        };
        (flags, candidates)
    }

    fn config(mode: AnalysisMode) -> ShadowConfig {
        ShadowConfig {
            mode,
            ..ShadowConfig::default()
        }
    }

    /// Band A is flat; band B drops inside the region only.
    fn bands_dark_in_b(candidates: &ShadowCandidates) -> (Array2<f32>, Array2<f32>) {
        let a = Array2::from_elem((8, 8), 0.3f32);
        let b = candidates
            .shadow_ids
            .mapv(|id| if id == 1 { 0.05f32 } else { 0.3 });
        (a, b)
    }

    #[test]
    fn test_mode_changes_outcome() {
        let (flags, candidates) = tile();
        let (a, b) = bands_dark_in_b(&candidates);
        let bands = ClusterBands {
            a: a.view(),
            b: b.view(),
        };

        let mut multi = flags.clone();
        let result = classify_shadows(&mut multi, &candidates, &bands, &config(AnalysisMode::MultiBand));
        assert!(result.confirmed[1]);
        assert_eq!(multi[[6, 3]], PixelFlag::CloudShadow);
        assert_eq!(result.long_shadow_count, 1);

        let mut single = flags.clone();
        let result = classify_shadows(&mut single, &candidates, &bands, &config(AnalysisMode::SingleBand));
        assert!(!result.confirmed[1]);
        assert_eq!(single, flags);
        assert!(result.long_shadow_ids.iter().all(|&id| id == 0));
    }

    #[test]
    fn test_water_judged_against_water() {
        // Water on the left half, land on the right; the region lies in water
        // and is exactly as bright as the surrounding water.
        let mut flags = Array2::from_elem((6, 6), PixelFlag::Land);
        for r in 0..6 {
            for c in 0..3 {
                flags[[r, c]] = PixelFlag::Water;
            }
        }
        let mut shadow_ids = Array2::<u32>::zeros((6, 6));
        shadow_ids[[2, 1]] = 1;
        shadow_ids[[3, 1]] = 1;
        let candidates = ShadowCandidates {
            shadow_ids,
            bounds: vec![None, Some(Rect::new(1, 2, 1, 2))],
        };
        let band = flags.mapv(|f| if f == PixelFlag::Water { 0.05f32 } else { 0.3 });
        let bands = ClusterBands {
            a: band.view(),
            b: band.view(),
        };

        let mut land_water = flags.clone();
        let result = classify_shadows(
            &mut land_water,
            &candidates,
            &bands,
            &config(AnalysisMode::LandWater),
        );
        assert!(!result.confirmed[1]);

        let mut multi = flags.clone();
        let result = classify_shadows(&mut multi, &candidates, &bands, &config(AnalysisMode::MultiBand));
        assert!(result.confirmed[1]);
    }

    #[test]
    fn test_nan_samples_are_ignored() {
        let (flags, candidates) = tile();
        let (mut a, b) = bands_dark_in_b(&candidates);
        // A bright no-data pixel must not count as bright.
        a[[7, 4]] = f32::NAN;
        let bands = ClusterBands {
            a: a.view(),
            b: b.view(),
        };
        let mut out = flags.clone();
        let result = classify_shadows(&mut out, &candidates, &bands, &config(AnalysisMode::MultiBand));
        assert!(result.confirmed[1]);

        let all_nan = Array2::from_elem((8, 8), f32::NAN);
        let bands = ClusterBands {
            a: all_nan.view(),
            b: all_nan.view(),
        };
        let mut out = flags.clone();
        let result = classify_shadows(&mut out, &candidates, &bands, &config(AnalysisMode::MultiBand));
        assert!(!result.confirmed[1]);
        assert_eq!(out, flags);
    }

    #[test]
    fn test_touching_regions_form_one_long_shadow() {
        let mut shadow_ids = Array2::<u32>::zeros((6, 6));
        shadow_ids[[1, 1]] = 1;
        shadow_ids[[2, 2]] = 2;
        shadow_ids[[4, 5]] = 3;
        shadow_ids[[5, 0]] = 4;
        let confirmed = vec![false, true, true, true, false];
        let (long_ids, count) = merge_long_shadows(&shadow_ids, &confirmed);
        assert_eq!(count, 2);
        assert_eq!(long_ids[[1, 1]], 1);
        assert_eq!(long_ids[[2, 2]], 1);
        assert_eq!(long_ids[[4, 5]], 2);
        assert_eq!(long_ids[[5, 0]], 0);
    }

    #[test]
    fn test_clip_to_tile() {
        let tile = Rect::new(0, 0, 8, 8);
        assert_eq!(clip(&Rect::new(-2, 5, 4, 6), &tile), Rect::new(0, 5, 2, 3));
        assert!(clip(&Rect::new(9, 9, 2, 2), &tile).is_empty());
    }
}
