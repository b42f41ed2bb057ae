//! Cloud segmentation: groups 8-connected cloud pixels into numbered clusters.

use ndarray::Array2;

use crate::flags::PixelFlag;
use crate::labeling::{label_components, Connectivity};

/// Cluster id per pixel (0 = no cloud) and the number of clusters.
pub fn compute_cloud_ids(flags: &Array2<PixelFlag>) -> (Array2<u32>, usize) {
    label_components(flags.dim(), Connectivity::Eight, |row, col| {
        flags[[row, col]] == PixelFlag::Cloud
    })
}

/// Cloud pixels touching a non-cloud pixel or the tile edge.
pub fn is_cluster_boundary(cloud_ids: &Array2<u32>, row: usize, col: usize) -> bool {
    let id = cloud_ids[[row, col]];
    if id == 0 {
        return false;
    }
    let (rows, cols) = cloud_ids.dim();
    if row == 0 || col == 0 || row + 1 == rows || col + 1 == cols {
        return true;
    }
    Connectivity::Eight
        .offsets()
        .iter()
        .any(|&(dr, dc)| cloud_ids[[(row as isize + dr) as usize, (col as isize + dc) as usize]] != id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::PixelFlag::{Cloud as C, Land as L, Water as W};
    use ndarray::array;
    use std::collections::HashMap;

    fn scene() -> Array2<PixelFlag> {
        array![
            [C, C, L, L, L, C],
            [L, C, L, W, L, C],
            [L, L, L, W, C, L],
            [C, L, L, L, L, L],
            [C, C, L, L, C, C],
        ]
    }

    #[test]
    fn test_diagonal_clouds_form_one_cluster() {
        let (ids, count) = compute_cloud_ids(&scene());
        assert_eq!(count, 4);
        // (0,5), (1,5) and (2,4) touch diagonally.
        assert_eq!(ids[[0, 5]], ids[[2, 4]]);
        assert_ne!(ids[[0, 0]], ids[[3, 0]]);
        assert_eq!(ids[[3, 0]], ids[[4, 1]]);
        assert_eq!(ids[[2, 2]], 0);
    }

    #[test]
    fn test_segmentation_is_idempotent() {
        let flags = scene();
        let (first, n1) = compute_cloud_ids(&flags);
        let (second, n2) = compute_cloud_ids(&flags);
        assert_eq!(n1, n2);
        assert_eq!(first, second);

        // Same partition regardless of numbering.
        let mut pairing: HashMap<u32, u32> = HashMap::new();
        for (&a, &b) in first.iter().zip(second.iter()) {
            assert_eq!(*pairing.entry(a).or_insert(b), b);
        }
    }

    #[test]
    fn test_cloud_free_tile_has_no_clusters() {
        let flags = Array2::from_elem((4, 4), PixelFlag::Land);
        let (ids, count) = compute_cloud_ids(&flags);
        assert_eq!(count, 0);
        assert!(ids.iter().all(|&id| id == 0));
    }

    #[test]
    fn test_boundary_pixels() {
        let mut flags = Array2::from_elem((5, 5), PixelFlag::Land);
        for r in 1..4 {
            for c in 1..4 {
                flags[[r, c]] = PixelFlag::Cloud;
            }
        }
        let (ids, _) = compute_cloud_ids(&flags);
        assert!(is_cluster_boundary(&ids, 1, 1));
        assert!(is_cluster_boundary(&ids, 1, 2));
        assert!(!is_cluster_boundary(&ids, 2, 2));
        assert!(!is_cluster_boundary(&ids, 0, 0));
    }
}
