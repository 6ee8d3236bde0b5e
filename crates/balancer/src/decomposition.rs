//! Rectilinear domain decomposition over a fixed rank grid.
//!
//! The grid stores, for each axis, an ordered boundary sequence of length
//! `ranks_along_axis + 1`. The first and last entries are the outer box
//! edges and never move; interior entries are what the balancer adjusts.

use std::fmt;

use balance_kernel::{rank_coords, RankBounds};

use crate::error::BalanceError;

/// Spatial axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    /// x
    X,
    /// y
    Y,
    /// z
    Z,
}

impl Axis {
    /// Fixed balancing order.
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    /// Array index of this axis.
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Axis::X => "x",
            Axis::Y => "y",
            Axis::Z => "z",
        };
        f.write_str(name)
    }
}

/// Capability the balancer needs from a decomposition: read the rank-grid
/// shape and get/set the boundary sequence of each axis.
pub trait Decomposition {
    /// Number of ranks along each axis. Fixed for the lifetime of the grid.
    fn shape(&self) -> [usize; 3];

    /// Boundary sequence along `axis` (length `shape[axis] + 1`).
    fn boundaries(&self, axis: Axis) -> &[f64];

    /// Replace the boundary sequence along `axis`.
    ///
    /// Implementations must reject sequences that change the length, move an
    /// outer edge, or are not strictly increasing.
    fn set_boundaries(&mut self, axis: Axis, boundaries: Vec<f64>) -> Result<(), BalanceError>;

    /// Total number of ranks.
    fn num_ranks(&self) -> usize {
        let [nx, ny, nz] = self.shape();
        nx * ny * nz
    }

    /// Whether more than one rank shares the volume.
    fn is_decomposed(&self) -> bool {
        self.num_ranks() > 1
    }

    /// Borrowed boundary view for the counting engines.
    fn rank_bounds(&self) -> RankBounds<'_> {
        RankBounds::new(
            self.boundaries(Axis::X),
            self.boundaries(Axis::Y),
            self.boundaries(Axis::Z),
        )
    }
}

/// Owned boundary sequences of a rank grid.
#[derive(Debug, Clone, PartialEq)]
pub struct DecompositionGrid {
    boundaries: [Vec<f64>; 3],
}

impl DecompositionGrid {
    /// Evenly divide the box `[lo, hi]` into `shape` ranks.
    pub fn uniform(lo: [f64; 3], hi: [f64; 3], shape: [usize; 3]) -> Result<Self, BalanceError> {
        let mut boundaries: [Vec<f64>; 3] = Default::default();
        for axis in Axis::ALL {
            let a = axis.index();
            let n = shape[a];
            if n == 0 {
                return Err(BalanceError::InvalidBoundaries {
                    axis,
                    reason: "at least one rank is required".into(),
                });
            }
            let width = hi[a] - lo[a];
            let mut b: Vec<f64> = (0..=n).map(|i| lo[a] + width * i as f64 / n as f64).collect();
            // Pin the upper edge exactly.
            b[n] = hi[a];
            boundaries[a] = b;
        }
        Self::from_boundaries(boundaries)
    }

    /// Build a grid from explicit boundary sequences.
    pub fn from_boundaries(boundaries: [Vec<f64>; 3]) -> Result<Self, BalanceError> {
        for axis in Axis::ALL {
            validate_sequence(axis, &boundaries[axis.index()])?;
        }
        Ok(Self { boundaries })
    }

    /// Lower and upper corner of the sub-domain owned by `rank`.
    pub fn subdomain(&self, rank: usize) -> ([f64; 3], [f64; 3]) {
        let idx = rank_coords(rank, self.shape());
        let mut lo = [0.0; 3];
        let mut hi = [0.0; 3];
        for a in 0..3 {
            lo[a] = self.boundaries[a][idx[a]];
            hi[a] = self.boundaries[a][idx[a] + 1];
        }
        (lo, hi)
    }

    /// Rank owning position `p`.
    pub fn rank_of(&self, p: [f32; 3]) -> usize {
        self.rank_bounds().rank_of(p)
    }
}

impl Decomposition for DecompositionGrid {
    fn shape(&self) -> [usize; 3] {
        [
            self.boundaries[0].len() - 1,
            self.boundaries[1].len() - 1,
            self.boundaries[2].len() - 1,
        ]
    }

    fn boundaries(&self, axis: Axis) -> &[f64] {
        &self.boundaries[axis.index()]
    }

    fn set_boundaries(&mut self, axis: Axis, boundaries: Vec<f64>) -> Result<(), BalanceError> {
        let current = &self.boundaries[axis.index()];
        if boundaries.len() != current.len() {
            return Err(BalanceError::InvalidBoundaries {
                axis,
                reason: format!(
                    "expected {} boundaries, got {}",
                    current.len(),
                    boundaries.len()
                ),
            });
        }
        if boundaries[0] != current[0] || boundaries[boundaries.len() - 1] != current[current.len() - 1] {
            return Err(BalanceError::InvalidBoundaries {
                axis,
                reason: "outer box edges cannot move".into(),
            });
        }
        validate_sequence(axis, &boundaries)?;
        self.boundaries[axis.index()] = boundaries;
        Ok(())
    }
}

fn validate_sequence(axis: Axis, b: &[f64]) -> Result<(), BalanceError> {
    if b.len() < 2 {
        return Err(BalanceError::InvalidBoundaries {
            axis,
            reason: "need at least the two outer edges".into(),
        });
    }
    if b.iter().any(|v| !v.is_finite()) {
        return Err(BalanceError::InvalidBoundaries {
            axis,
            reason: "boundaries must be finite".into(),
        });
    }
    if b.windows(2).any(|w| w[0] >= w[1]) {
        return Err(BalanceError::InvalidBoundaries {
            axis,
            reason: "boundaries must be strictly increasing".into(),
        });
    }
    Ok(())
}
