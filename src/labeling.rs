//! Connected-component labelling over a pixel grid.
//!
//! Shared by cloud segmentation, long-shadow consolidation and fragment
//! removal. Labels are provisional during a single raster scan, merged with a
//! disjoint set, then compacted to `1..=n` in order of first appearance so the
//! numbering depends only on pixel content.

use ndarray::Array2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Four,
    Eight,
}

impl Connectivity {
    /// Neighbours already visited in a raster scan, as (d_row, d_col).
    fn backward_offsets(self) -> &'static [(isize, isize)] {
        match self {
            Connectivity::Four => &[(0, -1), (-1, 0)],
            Connectivity::Eight => &[(0, -1), (-1, -1), (-1, 0), (-1, 1)],
        }
    }

    /// All neighbours, as (d_row, d_col).
    pub fn offsets(self) -> &'static [(isize, isize)] {
        match self {
            Connectivity::Four => &[(-1, 0), (0, -1), (0, 1), (1, 0)],
            Connectivity::Eight => &[
                (-1, -1),
                (-1, 0),
                (-1, 1),
                (0, -1),
                (0, 1),
                (1, -1),
                (1, 0),
                (1, 1),
            ],
        }
    }
}

/// Union-find over `u32` labels. Label 0 is reserved for "no label".
#[derive(Debug, Clone)]
pub struct DisjointSet {
    parent: Vec<u32>,
    rank: Vec<u8>,
}

impl Default for DisjointSet {
    fn default() -> Self {
        Self::new()
    }
}

impl DisjointSet {
    pub fn new() -> Self {
        Self {
            parent: vec![0],
            rank: vec![0],
        }
    }

    /// Set holding the labels `1..=n`, each on its own.
    pub fn with_labels(n: usize) -> Self {
        Self {
            parent: (0..=n as u32).collect(),
            rank: vec![0; n + 1],
        }
    }

    /// Number of slots including the reserved label 0.
    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.len() <= 1
    }

    pub fn make_set(&mut self) -> u32 {
        let label = self.parent.len() as u32;
        self.parent.push(label);
        self.rank.push(0);
        label
    }

    pub fn find(&mut self, label: u32) -> u32 {
        let mut x = label;
        while self.parent[x as usize] != x {
            let grandparent = self.parent[self.parent[x as usize] as usize];
            self.parent[x as usize] = grandparent;
            x = grandparent;
        }
        x
    }

    pub fn union(&mut self, a: u32, b: u32) {
        let mut root_a = self.find(a);
        let mut root_b = self.find(b);
        if root_a == root_b {
            return;
        }
        let rank_a = self.rank[root_a as usize];
        let rank_b = self.rank[root_b as usize];
        if rank_a < rank_b {
            std::mem::swap(&mut root_a, &mut root_b);
        }
        self.parent[root_b as usize] = root_a;
        if rank_a == rank_b {
            self.rank[root_a as usize] = rank_a + 1;
        }
    }

    /// Dense relabelling `old label -> 1..=n` in ascending order of the
    /// smallest member of each set. Entry 0 stays 0.
    pub fn compact(&mut self) -> (Vec<u32>, usize) {
        let mut root_to_dense = vec![0u32; self.parent.len()];
        let mut mapping = vec![0u32; self.parent.len()];
        let mut count = 0usize;
        for label in 1..self.parent.len() as u32 {
            let root = self.find(label);
            if root_to_dense[root as usize] == 0 {
                count += 1;
                root_to_dense[root as usize] = count as u32;
            }
            mapping[label as usize] = root_to_dense[root as usize];
        }
        (mapping, count)
    }
}

#[inline]
pub(crate) fn neighbour(
    row: usize,
    col: usize,
    (d_row, d_col): (isize, isize),
    (rows, cols): (usize, usize),
) -> Option<(usize, usize)> {
    let r = row.checked_add_signed(d_row)?;
    let c = col.checked_add_signed(d_col)?;
    (r < rows && c < cols).then_some((r, c))
}

/// Labels the connected components of the pixels for which `include` holds.
///
/// Returns the label grid (0 for excluded pixels) and the number of
/// components. Components are numbered by the raster position of their first
/// pixel.
pub fn label_components<F>(
    shape: (usize, usize),
    connectivity: Connectivity,
    include: F,
) -> (Array2<u32>, usize)
where
    F: Fn(usize, usize) -> bool,
{
    let (rows, cols) = shape;
    let mut labels = Array2::<u32>::zeros(shape);
    let mut dsu = DisjointSet::new();

    for row in 0..rows {
        for col in 0..cols {
            if !include(row, col) {
                continue;
            }
            let mut label = 0u32;
            for &offset in connectivity.backward_offsets() {
                let Some((r, c)) = neighbour(row, col, offset, shape) else {
                    continue;
                };
                let other = labels[[r, c]];
                if other == 0 {
                    continue;
                }
                if label == 0 {
                    label = other;
                } else {
                    dsu.union(label, other);
                }
            }
            if label == 0 {
                label = dsu.make_set();
            }
            labels[[row, col]] = label;
        }
    }

    // Provisional labels are created in raster order, so compacting by
    // smallest member keeps first-appearance numbering.
    let (mapping, count) = dsu.compact();
    labels.mapv_inplace(|l| mapping[l as usize]);
    (labels, count)
}

/// Pixel count of each label `1..=count`; index 0 counts unlabelled pixels.
pub fn component_sizes(labels: &Array2<u32>, count: usize) -> Vec<usize> {
    let mut sizes = vec![0usize; count + 1];
    for &label in labels.iter() {
        sizes[label as usize] += 1;
    }
    sizes
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn label_ones(grid: &Array2<u8>, connectivity: Connectivity) -> (Array2<u32>, usize) {
        label_components(grid.dim(), connectivity, |r, c| grid[[r, c]] == 1)
    }

    #[test]
    fn test_diagonal_joins_only_with_eight() {
        let grid = array![[1u8, 0, 0], [0, 1, 0], [0, 0, 1]];
        let (_, n8) = label_ones(&grid, Connectivity::Eight);
        let (_, n4) = label_ones(&grid, Connectivity::Four);
        assert_eq!(n8, 1);
        assert_eq!(n4, 3);
    }

    #[test]
    fn test_u_shape_merges_late() {
        // Two arms meet only on the last row.
        let grid = array![
            [1u8, 0, 0, 1],
            [1, 0, 0, 1],
            [1, 1, 1, 1],
        ];
        let (labels, n) = label_ones(&grid, Connectivity::Four);
        assert_eq!(n, 1);
        assert!(labels.iter().zip(grid.iter()).all(|(&l, &g)| (l == 1) == (g == 1)));
    }

    #[test]
    fn test_labels_dense_in_first_appearance_order() {
        let grid = array![
            [0u8, 0, 1, 0, 1],
            [1, 0, 0, 0, 1],
            [1, 0, 1, 0, 0],
        ];
        let (labels, n) = label_ones(&grid, Connectivity::Four);
        assert_eq!(n, 4);
        assert_eq!(labels[[0, 2]], 1);
        assert_eq!(labels[[0, 4]], 2);
        assert_eq!(labels[[1, 4]], 2);
        assert_eq!(labels[[1, 0]], 3);
        assert_eq!(labels[[2, 2]], 4);
        assert_eq!(component_sizes(&labels, n), vec![9, 1, 2, 2, 1]);
    }

    #[test]
    fn test_relabelling_is_deterministic() {
        let grid = array![
            [1u8, 1, 0, 1, 0, 1],
            [0, 1, 0, 1, 1, 1],
            [1, 0, 0, 0, 0, 0],
            [1, 1, 0, 1, 1, 0],
        ];
        let first = label_ones(&grid, Connectivity::Eight);
        let second = label_ones(&grid, Connectivity::Eight);
        assert_eq!(first, second);
    }

    #[test]
    fn test_disjoint_set_compact() {
        let mut dsu = DisjointSet::with_labels(5);
        dsu.union(4, 2);
        dsu.union(5, 1);
        let (mapping, count) = dsu.compact();
        assert_eq!(count, 3);
        assert_eq!(mapping, vec![0, 1, 2, 3, 2, 1]);
    }
}
