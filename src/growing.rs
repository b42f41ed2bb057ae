//! Shadow growing: dilates confirmed cloud shadow into clear neighbours, then
//! drops shadow fragments too small to be trusted.

use log::debug;
use ndarray::{s, Array2, ArrayView2, Zip};

use crate::flags::PixelFlag;
use crate::labeling::{component_sizes, label_components, Connectivity};

/// Pixels changed by [`grow_shadows`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GrowthSummary {
    pub grown_pixels: usize,
    pub removed_fragments: usize,
    pub removed_pixels: usize,
}

/// 3x3 binary dilation restricted to `allowed` pixels.
///
/// Each pass shifts the whole mask by every neighbour offset and ORs it into
/// the result, so the hot loop is a slice-wise `Zip`.
pub(crate) fn dilate_within(
    mask: ArrayView2<bool>,
    allowed: ArrayView2<bool>,
    iterations: usize,
) -> Array2<bool> {
    let (rows, cols) = mask.dim();
    let mut current = mask.to_owned();

    for _ in 0..iterations {
        let mut next = current.clone();
        for &(dr, dc) in Connectivity::Eight.offsets() {
            let (src_r, dst_r, h) = shift_range(dr, rows);
            let (src_c, dst_c, w) = shift_range(dc, cols);
            if h == 0 || w == 0 {
                continue;
            }
            Zip::from(next.slice_mut(s![dst_r..dst_r + h, dst_c..dst_c + w]))
                .and(current.slice(s![src_r..src_r + h, src_c..src_c + w]))
                .and(allowed.slice(s![dst_r..dst_r + h, dst_c..dst_c + w]))
                .for_each(|dst, &src, &ok| *dst |= src && ok);
        }
        if next == current {
            break;
        }
        current = next;
    }
    current
}

/// Source start, destination start and length of a shift by `offset`.
#[inline]
fn shift_range(offset: isize, size: usize) -> (usize, usize, usize) {
    let magnitude = offset.unsigned_abs();
    let len = size.saturating_sub(magnitude);
    if offset >= 0 {
        (0, magnitude, len)
    } else {
        (magnitude, 0, len)
    }
}

/// Grows `CloudShadow` by `iterations` dilations into water, land and haze,
/// then reverts 8-connected shadow components smaller than
/// `fragmentation_threshold` to their `extracted` flag.
pub fn grow_shadows(
    flags: &mut Array2<PixelFlag>,
    extracted: &Array2<PixelFlag>,
    iterations: usize,
    fragmentation_threshold: usize,
) -> GrowthSummary {
    let mut summary = GrowthSummary::default();

    if iterations > 0 {
        let shadow = flags.mapv(|f| f == PixelFlag::CloudShadow);
        let allowed = flags.mapv(PixelFlag::is_clear_surface);
        let grown = dilate_within(shadow.view(), allowed.view(), iterations);
        Zip::from(&mut *flags).and(&grown).for_each(|flag, &g| {
            if g && *flag != PixelFlag::CloudShadow {
                *flag = PixelFlag::CloudShadow;
                summary.grown_pixels += 1;
            }
        });
    }

    let (labels, count) = label_components(flags.dim(), Connectivity::Eight, |r, c| {
        flags[[r, c]] == PixelFlag::CloudShadow
    });
    let sizes = component_sizes(&labels, count);
    let is_fragment: Vec<bool> = sizes
        .iter()
        .enumerate()
        .map(|(label, &size)| label != 0 && size < fragmentation_threshold)
        .collect();
    summary.removed_fragments = is_fragment.iter().filter(|&&f| f).count();

    Zip::from(&mut *flags)
        .and(&labels)
        .and(extracted)
        .for_each(|flag, &label, &original| {
            if is_fragment[label as usize] {
                *flag = original;
                summary.removed_pixels += 1;
            }
        });

    debug!(
        "Shadow growing: {} pixels added, {} fragments ({} pixels) removed",
        summary.grown_pixels, summary.removed_fragments, summary.removed_pixels
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::PixelFlag::{Cloud as C, CloudShadow as S, Invalid as I, Land as L, Water as W};
    use ndarray::array;

    #[test]
    fn test_dilation_respects_allowed() {
        let mask = array![
            [false, false, false, false],
            [false, true, false, false],
            [false, false, false, false],
        ];
        let mut allowed = Array2::from_elem((3, 4), true);
        allowed[[0, 0]] = false;
        let grown = dilate_within(mask.view(), allowed.view(), 1);
        assert_eq!(
            grown,
            array![
                [false, true, true, false],
                [true, true, true, false],
                [true, true, true, false],
            ]
        );
        let twice = dilate_within(mask.view(), allowed.view(), 2);
        assert!(twice[[1, 3]]);
        assert!(!twice[[0, 0]]);
    }

    #[test]
    fn test_shift_range_larger_than_grid() {
        assert_eq!(shift_range(1, 1), (0, 1, 0));
        assert_eq!(shift_range(-1, 4), (1, 0, 3));
    }

    #[test]
    fn test_grow_into_clear_surface_only() {
        let extracted = array![
            [L, L, C, L],
            [L, L, L, L],
            [W, I, L, L],
            [L, L, L, L],
        ];
        let mut flags = extracted.clone();
        flags[[1, 1]] = S;
        flags[[1, 2]] = S;
        let summary = grow_shadows(&mut flags, &extracted, 1, 1);
        assert_eq!(
            flags,
            array![
                [S, S, C, S],
                [S, S, S, S],
                [S, I, S, S],
                [L, L, L, L],
            ]
        );
        assert_eq!(summary.grown_pixels, 8);
        assert_eq!(summary.removed_fragments, 0);
    }

    #[test]
    fn test_small_region_reverts() {
        let extracted = Array2::from_elem((5, 5), W);
        let mut flags = extracted.clone();
        flags[[2, 1]] = S;
        flags[[2, 2]] = S;
        flags[[3, 3]] = S;
        let summary = grow_shadows(&mut flags, &extracted, 0, 4);
        assert_eq!(flags, extracted);
        assert_eq!(summary.removed_fragments, 1);
        assert_eq!(summary.removed_pixels, 3);
    }

    #[test]
    fn test_large_region_survives() {
        let extracted = Array2::from_elem((4, 4), L);
        let mut flags = extracted.clone();
        for c in 0..4 {
            flags[[0, c]] = S;
        }
        flags[[3, 3]] = S;
        grow_shadows(&mut flags, &extracted, 0, 4);
        assert!((0..4).all(|c| flags[[0, c]] == S));
        assert_eq!(flags[[3, 3]], L);
    }
}
