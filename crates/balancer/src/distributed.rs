//! Thread-based lockstep execution of the balancer across several ranks.
//!
//! Each rank runs in its own thread with a private [`LoadBalancer`], a private
//! copy of the decomposition grid and only the particles it owns. Ranks talk
//! solely through a [`ThreadGroup`] communicator, the same seam a network
//! transport would use. Between steps the coordinator plays the part of the
//! external layers: it checks every rank ended with bit-identical boundaries,
//! migrates particles to their new owners and moves them by a fixed drift.
//!
//! [`run_serial`] drives the same schedule with one process holding every
//! particle, for comparison.

use std::thread;

use balance_kernel::{BackendType, ExecutionContext, ParticleArrays};

use crate::comm::{SerialCommunicator, ThreadGroup};
use crate::config::BalanceConfig;
use crate::controller::BalanceReport;
use crate::decomposition::{Axis, Decomposition, DecompositionGrid};
use crate::error::BalanceError;
use crate::sampler::LoadSnapshot;
use crate::state::{BalanceStats, LoadBalancer};
use crate::trigger::Periodic;

/// Configuration for a lockstep run.
#[derive(Debug, Clone)]
pub struct DistributedConfig {
    /// Ranks along each axis
    pub shape: [usize; 3],
    /// Lower corner of the simulation box
    pub domain_min: [f64; 3],
    /// Upper corner of the simulation box
    pub domain_max: [f64; 3],
    /// Balancer options used by every rank
    pub balance: BalanceConfig,
    /// Balance every this many steps
    pub trigger_period: u64,
    /// Displacement applied to every particle after each step
    pub drift: [f32; 3],
    /// Steps to run
    pub steps: u64,
    /// Counting engine used by every rank
    pub backend: BackendType,
}

/// Outcome of a lockstep run.
#[derive(Debug, Clone)]
pub struct DistributedResult {
    /// Final decomposition (identical on every rank)
    pub grid: DecompositionGrid,
    /// Final particles of every rank, ordered by tag
    pub particles: ParticleArrays,
    /// Final per-rank particle counts
    pub rank_counts: Vec<u64>,
    /// Max imbalance factor after each step's migration
    pub imbalance_history: Vec<f64>,
    /// Rank 0's report for every invocation that fired
    pub reports: Vec<BalanceReport>,
    /// Rank 0's accumulated statistics
    pub stats: BalanceStats,
    /// Steps executed
    pub steps: u64,
}

/// Everything one rank owns between steps.
struct RankState {
    balancer: LoadBalancer,
    grid: DecompositionGrid,
    particles: ParticleArrays,
}

/// Run `config.steps` steps with one thread per rank.
///
/// Fails if a collective fails or ranks disagree on the boundaries.
pub fn run_distributed(
    config: &DistributedConfig,
    particles: &ParticleArrays,
) -> Result<DistributedResult, BalanceError> {
    let grid = DecompositionGrid::uniform(config.domain_min, config.domain_max, config.shape)?;
    let n = grid.num_ranks();

    let ctx = ExecutionContext::new(config.backend);
    let owned = particles.partition_by(n, |i| grid.rank_of(particles.position(i)));
    let mut ranks = Vec::with_capacity(n);
    for (comm, local) in ThreadGroup::communicators(n).into_iter().zip(owned) {
        let mut balancer =
            LoadBalancer::new(Periodic::new(config.trigger_period), config.balance.clone())?;
        balancer.attach(&ctx, Box::new(comm))?;
        ranks.push(RankState {
            balancer,
            grid: grid.clone(),
            particles: local,
        });
    }

    tracing::info!(
        "Lockstep run: {:?} ranks, {} particles, {} steps",
        config.shape,
        particles.len(),
        config.steps
    );

    let mut imbalance_history = Vec::with_capacity(config.steps as usize);
    let mut reports = Vec::new();

    for step in 0..config.steps {
        // a. Collective balance step on every rank
        let outcomes: Vec<Result<Option<BalanceReport>, BalanceError>> = thread::scope(|s| {
            let handles: Vec<_> = ranks
                .iter_mut()
                .map(|rank| {
                    s.spawn(move || rank.balancer.update(step, &rank.particles, &mut rank.grid))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
                .collect()
        });

        let mut step_reports = Vec::with_capacity(n);
        for outcome in outcomes {
            step_reports.push(outcome?);
        }
        if let Some(Some(report)) = step_reports.into_iter().next() {
            reports.push(report);
        }

        // b. Every rank must hold the same grid
        check_consistent(&ranks)?;

        // c. Migrate to new owners, then move
        migrate(&mut ranks);
        for rank in &mut ranks {
            drift_particles(&mut rank.particles, config.drift, config.domain_min, config.domain_max);
        }
        migrate(&mut ranks);

        let counts: Vec<u64> = ranks.iter().map(|r| r.particles.len() as u64).collect();
        let snapshot = LoadSnapshot::new(config.shape, counts);
        imbalance_history.push(snapshot.max_imbalance());

        if (step + 1) % 100 == 0 {
            tracing::debug!(
                "Lockstep step {}/{}: max imbalance {:.4}",
                step + 1,
                config.steps,
                snapshot.max_imbalance()
            );
        }
    }

    let rank_counts: Vec<u64> = ranks.iter().map(|r| r.particles.len() as u64).collect();
    let mut merged = ParticleArrays::with_capacity(particles.len());
    for rank in &ranks {
        merged.extend_from(&rank.particles);
    }
    let merged = sort_by_tag(&merged);

    let stats = ranks[0].balancer.stats().cloned().unwrap_or_default();
    let grid = ranks[0].grid.clone();

    tracing::info!(
        "Lockstep run complete: {} steps, {} invocations, final counts {:?}",
        config.steps,
        stats.invocations,
        rank_counts
    );

    Ok(DistributedResult {
        grid,
        particles: merged,
        rank_counts,
        imbalance_history,
        reports,
        stats,
        steps: config.steps,
    })
}

/// Run the same schedule in a single process holding every particle.
///
/// Because the reduction sums integers, the boundaries match
/// [`run_distributed`] exactly.
pub fn run_serial(
    config: &DistributedConfig,
    particles: &ParticleArrays,
) -> Result<DistributedResult, BalanceError> {
    let mut grid = DecompositionGrid::uniform(config.domain_min, config.domain_max, config.shape)?;
    let mut balancer = LoadBalancer::new(Periodic::new(config.trigger_period), config.balance.clone())?;
    balancer.attach(&ExecutionContext::new(config.backend), Box::new(SerialCommunicator))?;

    let mut local = particles.clone();
    let mut imbalance_history = Vec::with_capacity(config.steps as usize);
    let mut reports = Vec::new();

    for step in 0..config.steps {
        if let Some(report) = balancer.update(step, &local, &mut grid)? {
            reports.push(report);
        }
        drift_particles(&mut local, config.drift, config.domain_min, config.domain_max);

        let counts = count_owned(&local, &grid);
        imbalance_history.push(LoadSnapshot::new(config.shape, counts).max_imbalance());
    }

    let rank_counts = count_owned(&local, &grid);
    let stats = balancer.stats().cloned().unwrap_or_default();
    Ok(DistributedResult {
        grid,
        particles: sort_by_tag(&local),
        rank_counts,
        imbalance_history,
        reports,
        stats,
        steps: config.steps,
    })
}

/// Move every particle by `drift`, keeping it inside `[lo, hi]`.
pub fn drift_particles(particles: &mut ParticleArrays, drift: [f32; 3], lo: [f64; 3], hi: [f64; 3]) {
    let coords = [&mut particles.x, &mut particles.y, &mut particles.z];
    for (a, values) in coords.into_iter().enumerate() {
        if drift[a] == 0.0 {
            continue;
        }
        let (lo, hi) = (lo[a] as f32, hi[a] as f32);
        for v in values.iter_mut() {
            *v = (*v + drift[a]).clamp(lo, hi);
        }
    }
}

fn count_owned(particles: &ParticleArrays, grid: &DecompositionGrid) -> Vec<u64> {
    let mut counts = vec![0u64; grid.num_ranks()];
    for i in 0..particles.len() {
        counts[grid.rank_of(particles.position(i))] += 1;
    }
    counts
}

fn check_consistent(ranks: &[RankState]) -> Result<(), BalanceError> {
    let Some(first) = ranks.first() else {
        return Ok(());
    };
    for (rank, state) in ranks.iter().enumerate().skip(1) {
        for axis in Axis::ALL {
            let a = first.grid.boundaries(axis);
            let b = state.grid.boundaries(axis);
            if a.len() != b.len() || a.iter().zip(b).any(|(x, y)| x.to_bits() != y.to_bits()) {
                return Err(BalanceError::RankDivergence { rank, axis });
            }
        }
    }
    Ok(())
}

/// Send every particle to the rank that owns it under rank 0's grid.
fn migrate(ranks: &mut [RankState]) {
    let n = ranks.len();
    let Some(first) = ranks.first() else {
        return;
    };
    let grid = first.grid.clone();

    let mut incoming: Vec<ParticleArrays> = (0..n).map(|_| ParticleArrays::new()).collect();
    for rank in ranks.iter() {
        let p = &rank.particles;
        let outgoing = p.partition_by(n, |i| grid.rank_of(p.position(i)));
        for (dest, bucket) in outgoing.iter().enumerate() {
            incoming[dest].extend_from(bucket);
        }
    }
    for (rank, particles) in ranks.iter_mut().zip(incoming) {
        rank.particles = particles;
    }
}

fn sort_by_tag(particles: &ParticleArrays) -> ParticleArrays {
    let mut order: Vec<usize> = (0..particles.len()).collect();
    order.sort_by_key(|&i| particles.tag[i]);
    let mut sorted = ParticleArrays::with_capacity(particles.len());
    for i in order {
        let [x, y, z] = particles.position(i);
        sorted.push_particle(x, y, z, particles.tag[i]);
    }
    sorted
}
