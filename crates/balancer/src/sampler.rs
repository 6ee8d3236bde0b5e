//! Collective sampling of per-rank particle counts.
//!
//! Every process bins the particles it currently holds against the grid's
//! boundaries by destination rank, then the per-rank vectors are summed
//! across processes. Because each process bins against the same (possibly
//! just adjusted) boundaries, the reduced counts are exactly what every rank
//! would own once particles migrate, without moving any particle data.

use balance_kernel::{rank_coords, BalancingEngine, ParticleArrays};

use crate::comm::{CommError, Communicator};
use crate::decomposition::{Axis, Decomposition};

/// Globally reduced per-rank particle counts for one set of boundaries.
///
/// Identical on every participating process.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadSnapshot {
    shape: [usize; 3],
    counts: Vec<u64>,
    total: u64,
}

impl LoadSnapshot {
    /// Wrap reduced counts for a grid of `shape` ranks.
    pub fn new(shape: [usize; 3], counts: Vec<u64>) -> Self {
        debug_assert_eq!(counts.len(), shape[0] * shape[1] * shape[2]);
        let total = counts.iter().sum();
        Self {
            shape,
            counts,
            total,
        }
    }

    /// Per-rank counts, indexed by flat rank.
    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Total particle count N.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Rank-grid shape these counts were taken on.
    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    /// Load of each slab along `axis`: counts summed over the other two axes.
    pub fn slab_loads(&self, axis: Axis) -> Vec<u64> {
        let a = axis.index();
        let mut loads = vec![0u64; self.shape[a]];
        for (rank, &c) in self.counts.iter().enumerate() {
            loads[rank_coords(rank, self.shape)[a]] += c;
        }
        loads
    }

    /// Imbalance factor `count(rank) / (N / P)` of every rank.
    /// All zeros when there are no particles.
    pub fn imbalance_factors(&self) -> Vec<f64> {
        imbalance_factors(&self.counts)
    }

    /// Largest imbalance factor over all ranks.
    pub fn max_imbalance(&self) -> f64 {
        self.imbalance_factors().into_iter().fold(0.0, f64::max)
    }

    /// Largest `|imbalance factor - 1|` over all ranks.
    pub fn max_deviation(&self) -> f64 {
        max_deviation(&self.counts)
    }
}

/// Imbalance factor of every entry of `loads` relative to their mean.
pub fn imbalance_factors(loads: &[u64]) -> Vec<f64> {
    let total: u64 = loads.iter().sum();
    if total == 0 || loads.is_empty() {
        return vec![0.0; loads.len()];
    }
    let average = total as f64 / loads.len() as f64;
    loads.iter().map(|&c| c as f64 / average).collect()
}

/// Largest `|imbalance factor - 1|` of `loads`; zero when there is no load.
pub fn max_deviation(loads: &[u64]) -> f64 {
    let total: u64 = loads.iter().sum();
    if total == 0 {
        return 0.0;
    }
    imbalance_factors(loads)
        .into_iter()
        .map(|f| (f - 1.0).abs())
        .fold(0.0, f64::max)
}

/// Produces [`LoadSnapshot`]s through the local engine and a collective sum.
pub struct LoadSampler<'a> {
    engine: &'a mut dyn BalancingEngine,
    comm: &'a dyn Communicator,
    reductions: u32,
}

impl<'a> LoadSampler<'a> {
    /// Sampler counting with `engine` and reducing over `comm`.
    pub fn new(engine: &'a mut dyn BalancingEngine, comm: &'a dyn Communicator) -> Self {
        Self {
            engine,
            comm,
            reductions: 0,
        }
    }

    /// Count the load of every rank of `grid`.
    ///
    /// Collective: every process must call this in lockstep.
    pub fn sample(
        &mut self,
        particles: &ParticleArrays,
        grid: &dyn Decomposition,
    ) -> Result<LoadSnapshot, CommError> {
        let bounds = grid.rank_bounds();
        let mut counts = self.engine.count_by_rank(particles, &bounds);
        self.comm.all_reduce_sum(&mut counts)?;
        self.reductions += 1;
        Ok(LoadSnapshot::new(grid.shape(), counts))
    }

    /// Number of collective reductions performed so far.
    pub fn reductions(&self) -> u32 {
        self.reductions
    }
}
