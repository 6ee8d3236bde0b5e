//! Mapping of particle positions onto the ranks of a rectilinear decomposition.
//!
//! A decomposition is described by one ordered boundary sequence per axis.
//! Slab `s` along an axis covers `[b[s], b[s + 1])`; positions outside the
//! outer edges are clamped into the first or last slab, matching how the
//! particle owner is chosen for particles sitting exactly on the box edge.

/// Borrowed view of the per-axis boundary sequences of a decomposition.
#[derive(Debug, Clone, Copy)]
pub struct RankBounds<'a> {
    bounds: [&'a [f64]; 3],
}

impl<'a> RankBounds<'a> {
    /// Wrap three boundary sequences. Each must contain at least two entries.
    pub fn new(x: &'a [f64], y: &'a [f64], z: &'a [f64]) -> Self {
        debug_assert!(x.len() >= 2 && y.len() >= 2 && z.len() >= 2);
        Self { bounds: [x, y, z] }
    }

    /// Boundary sequence along `axis` (0 = x, 1 = y, 2 = z).
    pub fn axis(&self, axis: usize) -> &'a [f64] {
        self.bounds[axis]
    }

    /// Number of ranks along each axis.
    pub fn shape(&self) -> [usize; 3] {
        [
            self.bounds[0].len() - 1,
            self.bounds[1].len() - 1,
            self.bounds[2].len() - 1,
        ]
    }

    /// Total number of ranks.
    pub fn num_ranks(&self) -> usize {
        let [nx, ny, nz] = self.shape();
        nx * ny * nz
    }

    /// Rank owning position `p`.
    #[inline]
    pub fn rank_of(&self, p: [f32; 3]) -> usize {
        let [nx, ny, _] = self.shape();
        let ix = slab_index(self.bounds[0], p[0] as f64);
        let iy = slab_index(self.bounds[1], p[1] as f64);
        let iz = slab_index(self.bounds[2], p[2] as f64);
        rank_index([ix, iy, iz], [nx, ny])
    }
}

/// Slab containing coordinate `c` along an axis with boundaries `bounds`.
#[inline]
pub fn slab_index(bounds: &[f64], c: f64) -> usize {
    let n = bounds.len() - 1;
    // Number of boundaries <= c, minus the lower edge.
    let above = bounds.partition_point(|&b| b <= c);
    above.saturating_sub(1).min(n - 1)
}

/// Flat rank index from per-axis slab indices (x fastest).
#[inline]
pub fn rank_index(idx: [usize; 3], shape_xy: [usize; 2]) -> usize {
    idx[0] + shape_xy[0] * (idx[1] + shape_xy[1] * idx[2])
}

/// Per-axis slab indices from a flat rank index.
#[inline]
pub fn rank_coords(rank: usize, shape: [usize; 3]) -> [usize; 3] {
    let ix = rank % shape[0];
    let iy = (rank / shape[0]) % shape[1];
    let iz = rank / (shape[0] * shape[1]);
    [ix, iy, iz]
}

/// Count, for every rank of `bounds`, how many of the given positions it owns.
pub fn count_by_rank(x: &[f32], y: &[f32], z: &[f32], bounds: &RankBounds<'_>) -> Vec<u64> {
    let mut counts = vec![0u64; bounds.num_ranks()];
    for i in 0..x.len() {
        counts[bounds.rank_of([x[i], y[i], z[i]])] += 1;
    }
    counts
}
