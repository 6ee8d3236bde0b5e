//! Iteration control around the per-axis rebalancer.
//!
//! One invocation walks the phases
//! `Idle -> CheckEligible -> Sample -> Adjust -> CheckConverged -> {Adjust | Done}`.
//! Every boundary change is followed by a fresh collective sample, so the
//! controller always acts on exact counts. An iteration that makes the
//! maximum deviation worse is rolled back and ends the invocation.

use balance_kernel::ParticleArrays;

use crate::config::BalanceConfig;
use crate::decomposition::{Axis, Decomposition};
use crate::error::BalanceError;
use crate::rebalance::AxisRebalancer;
use crate::sampler::{max_deviation, LoadSampler, LoadSnapshot};

/// Controller phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Not running
    Idle,
    /// Checking that balancing can do anything
    CheckEligible,
    /// Taking the initial collective sample
    Sample,
    /// Adjusting boundaries along the enabled axes
    Adjust,
    /// Comparing the new imbalance against tolerance and budget
    CheckConverged,
    /// Invocation finished
    Done,
}

/// Why an invocation did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The grid has a single rank.
    NoDecomposition,
    /// There are no particles anywhere.
    NoParticles,
}

/// How an invocation ended. None of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceOutcome {
    /// Nothing to balance.
    Skipped(SkipReason),
    /// Already within tolerance before any adjustment; boundaries untouched.
    AlreadyBalanced,
    /// Reached tolerance.
    Converged,
    /// Ran out of iterations before reaching tolerance.
    BudgetExhausted,
    /// No iteration could reduce the imbalance further. If the last one made
    /// it worse, its boundary changes were undone.
    Stalled,
}

/// Summary of one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceReport {
    /// How the invocation ended
    pub outcome: BalanceOutcome,
    /// Adjustment passes performed, including a rolled-back one
    pub iterations: u32,
    /// Max |imbalance factor - 1| before the first pass and after each kept pass
    pub history: Vec<f64>,
    /// Largest imbalance factor before balancing
    pub initial_max_imbalance: f64,
    /// Largest imbalance factor on the boundaries left in place
    pub final_max_imbalance: f64,
    /// Axis boundary sequences replaced (rolled-back changes included)
    pub adjustments: u32,
    /// Whether the last pass was undone
    pub rolled_back: bool,
    /// Collective reductions performed
    pub reductions: u32,
}

impl BalanceReport {
    fn skipped(reason: SkipReason, reductions: u32) -> Self {
        Self {
            outcome: BalanceOutcome::Skipped(reason),
            iterations: 0,
            history: Vec::new(),
            initial_max_imbalance: 1.0,
            final_max_imbalance: 1.0,
            adjustments: 0,
            rolled_back: false,
            reductions,
        }
    }

    /// Whether any boundary in the grid differs from before the invocation.
    pub fn changed_boundaries(&self) -> bool {
        self.adjustments > 0 && !(self.rolled_back && self.iterations == 1)
    }
}

/// State kept across one adjustment pass so it can be undone.
struct Checkpoint {
    boundaries: [Vec<f64>; 3],
    snapshot: LoadSnapshot,
}

/// Drives [`AxisRebalancer`] over the enabled axes until convergence, budget
/// exhaustion or stall.
#[derive(Debug, Clone)]
pub struct IterationController {
    config: BalanceConfig,
    rebalancer: AxisRebalancer,
    phase: Phase,
}

impl IterationController {
    /// Controller for one invocation under `config`.
    pub fn new(config: BalanceConfig) -> Self {
        Self::with_rebalancer(config, AxisRebalancer::default())
    }

    /// Controller using a specific rebalancer.
    pub fn with_rebalancer(config: BalanceConfig, rebalancer: AxisRebalancer) -> Self {
        Self {
            config,
            rebalancer,
            phase: Phase::Idle,
        }
    }

    /// Current phase; `Done` after [`run`](Self::run) returns.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Balance `grid` for the local `particles`.
    ///
    /// Collective: every process calls this with the same grid and config.
    /// Only collective failures and a grid rejecting its new boundaries are
    /// errors; every other ending is reported in the returned outcome.
    pub fn run(
        &mut self,
        sampler: &mut LoadSampler<'_>,
        particles: &ParticleArrays,
        grid: &mut dyn Decomposition,
    ) -> Result<BalanceReport, BalanceError> {
        let allowed = self.config.allowed_deviation();
        let first_reduction = sampler.reductions();

        let mut current: Option<LoadSnapshot> = None;
        let mut checkpoint: Option<Checkpoint> = None;
        let mut report: Option<BalanceReport> = None;
        let mut moved = false;

        self.phase = Phase::CheckEligible;
        loop {
            match self.phase {
                Phase::Idle => self.phase = Phase::CheckEligible,

                Phase::CheckEligible => {
                    if !grid.is_decomposed() {
                        tracing::debug!("single-rank grid, nothing to balance");
                        report = Some(BalanceReport::skipped(SkipReason::NoDecomposition, 0));
                        self.phase = Phase::Done;
                    } else {
                        self.phase = Phase::Sample;
                    }
                }

                Phase::Sample => {
                    let snapshot = sampler.sample(particles, grid)?;
                    let reductions = sampler.reductions() - first_reduction;
                    if snapshot.total() == 0 {
                        tracing::debug!("no particles, nothing to balance");
                        report = Some(BalanceReport::skipped(SkipReason::NoParticles, reductions));
                        self.phase = Phase::Done;
                        continue;
                    }

                    let deviation = snapshot.max_deviation();
                    let imbalance = snapshot.max_imbalance();
                    let outcome = if deviation <= allowed {
                        self.phase = Phase::Done;
                        BalanceOutcome::AlreadyBalanced
                    } else {
                        self.phase = Phase::Adjust;
                        BalanceOutcome::BudgetExhausted
                    };
                    report = Some(BalanceReport {
                        outcome,
                        iterations: 0,
                        history: vec![deviation],
                        initial_max_imbalance: imbalance,
                        final_max_imbalance: imbalance,
                        adjustments: 0,
                        rolled_back: false,
                        reductions,
                    });
                    current = Some(snapshot);
                }

                Phase::Adjust => {
                    let (Some(snapshot), Some(rep)) = (current.take(), report.as_mut()) else {
                        self.phase = Phase::Done;
                        continue;
                    };
                    checkpoint = Some(Checkpoint {
                        boundaries: Axis::ALL.map(|a| grid.boundaries(a).to_vec()),
                        snapshot: snapshot.clone(),
                    });

                    let mut latest = snapshot;
                    moved = false;
                    for axis in Axis::ALL {
                        if !self.config.enabled(axis) || grid.shape()[axis.index()] < 2 {
                            continue;
                        }
                        let loads = latest.slab_loads(axis);
                        if max_deviation(&loads) <= allowed {
                            tracing::debug!("axis {axis}: slabs within tolerance, skipped");
                            continue;
                        }

                        let old = grid.boundaries(axis);
                        let new = self.rebalancer.rebalance(&loads, old);
                        if new.as_slice() == old {
                            continue;
                        }
                        tracing::debug!("axis {axis}: loads {loads:?} -> boundaries {new:?}");
                        grid.set_boundaries(axis, new)?;
                        rep.adjustments += 1;
                        moved = true;

                        latest = sampler.sample(particles, grid)?;
                    }

                    rep.iterations += 1;
                    rep.reductions = sampler.reductions() - first_reduction;
                    current = Some(latest);
                    self.phase = Phase::CheckConverged;
                }

                Phase::CheckConverged => {
                    let (Some(snapshot), Some(rep)) = (current.as_ref(), report.as_mut()) else {
                        self.phase = Phase::Done;
                        continue;
                    };
                    let deviation = snapshot.max_deviation();
                    let previous = rep.history.last().copied().unwrap_or(f64::INFINITY);

                    if deviation > previous {
                        if let Some(saved) = checkpoint.take() {
                            tracing::warn!(
                                "iteration {} raised max deviation {:.4} -> {:.4}, rolling back",
                                rep.iterations,
                                previous,
                                deviation
                            );
                            for axis in Axis::ALL {
                                let b = &saved.boundaries[axis.index()];
                                if grid.boundaries(axis) != b.as_slice() {
                                    grid.set_boundaries(axis, b.clone())?;
                                }
                            }
                            current = Some(saved.snapshot);
                        }
                        rep.rolled_back = true;
                        rep.outcome = BalanceOutcome::Stalled;
                        self.phase = Phase::Done;
                        continue;
                    }

                    rep.history.push(deviation);
                    rep.final_max_imbalance = snapshot.max_imbalance();
                    tracing::debug!(
                        "iteration {}: max deviation {:.4} (allowed {:.4})",
                        rep.iterations,
                        deviation,
                        allowed
                    );

                    if deviation <= allowed {
                        rep.outcome = BalanceOutcome::Converged;
                        self.phase = Phase::Done;
                    } else if !moved {
                        rep.outcome = BalanceOutcome::Stalled;
                        self.phase = Phase::Done;
                    } else if rep.iterations >= self.config.max_iterations {
                        rep.outcome = BalanceOutcome::BudgetExhausted;
                        self.phase = Phase::Done;
                    } else {
                        self.phase = Phase::Adjust;
                    }
                }

                Phase::Done => break,
            }
        }

        // Every path to Done sets the report; a single-rank skip is the fallback.
        let report = report.unwrap_or_else(|| {
            BalanceReport::skipped(SkipReason::NoDecomposition, sampler.reductions() - first_reduction)
        });
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SerialCommunicator;
    use crate::decomposition::DecompositionGrid;
    use balance_kernel::CpuEngine;

    /// Particles spread evenly inside each unit slab along x with the given counts.
    fn slab_particles(counts: &[usize]) -> ParticleArrays {
        let mut p = ParticleArrays::new();
        let mut tag = 0;
        for (k, &c) in counts.iter().enumerate() {
            for j in 0..c {
                let x = k as f32 + (j as f32 + 0.5) / c as f32;
                p.push_particle(x, 0.5, 0.5, tag);
                tag += 1;
            }
        }
        p
    }

    fn line_grid(n: usize) -> DecompositionGrid {
        DecompositionGrid::uniform([0.0; 3], [n as f64, 1.0, 1.0], [n, 1, 1]).unwrap()
    }

    fn run(config: BalanceConfig, particles: &ParticleArrays, grid: &mut DecompositionGrid) -> BalanceReport {
        let mut engine = CpuEngine;
        let comm = SerialCommunicator;
        let mut sampler = LoadSampler::new(&mut engine, &comm);
        let mut controller = IterationController::new(config);
        let report = controller.run(&mut sampler, particles, grid).unwrap();
        assert_eq!(controller.phase(), Phase::Done);
        report
    }

    #[test]
    fn one_invocation_moves_heavy_slab_boundaries() {
        let particles = slab_particles(&[100, 100, 300, 100]);
        let mut grid = line_grid(4);
        let report = run(BalanceConfig::default(), &particles, &mut grid);

        let b = grid.boundaries(Axis::X);
        assert_eq!(b[0], 0.0);
        assert_eq!(b[4], 4.0);
        assert_eq!(b[1], 1.0);
        assert!((b[2] - 2.05).abs() < 1e-9);
        assert!((b[3] - 2.95).abs() < 1e-9);

        assert_eq!(report.outcome, BalanceOutcome::BudgetExhausted);
        assert_eq!(report.iterations, 1);
        assert_eq!(report.history.len(), 2);
        assert!((report.history[0] - 1.0).abs() < 1e-12);
        assert!(report.history[1] < report.history[0]);
        assert!((report.initial_max_imbalance - 2.0).abs() < 1e-12);
        assert!(report.final_max_imbalance < 2.0);
        // Initial sample plus one re-sample after the x adjustment
        assert_eq!(report.reductions, 2);
    }

    #[test]
    fn balanced_input_is_left_alone() {
        let particles = slab_particles(&[50, 50, 50]);
        let mut grid = line_grid(3);
        let before = grid.clone();
        let report = run(BalanceConfig::default(), &particles, &mut grid);
        assert_eq!(report.outcome, BalanceOutcome::AlreadyBalanced);
        assert_eq!(grid, before);
        assert!(!report.changed_boundaries());
    }

    #[test]
    fn single_rank_grid_is_skipped_without_sampling() {
        let particles = slab_particles(&[10]);
        let mut grid = line_grid(1);
        let report = run(BalanceConfig::default(), &particles, &mut grid);
        assert_eq!(report.outcome, BalanceOutcome::Skipped(SkipReason::NoDecomposition));
        assert_eq!(report.reductions, 0);
    }

    #[test]
    fn empty_particle_set_is_skipped() {
        let mut grid = line_grid(2);
        let before = grid.clone();
        let report = run(BalanceConfig::default(), &ParticleArrays::new(), &mut grid);
        assert_eq!(report.outcome, BalanceOutcome::Skipped(SkipReason::NoParticles));
        assert_eq!(grid, before);
    }

    #[test]
    fn disabled_axis_is_untouched() {
        let particles = slab_particles(&[100, 100, 300, 100]);
        let mut grid = line_grid(4);
        let before = grid.clone();
        let config = BalanceConfig::new(false, true, true, 1.02, 5).unwrap();
        let report = run(config, &particles, &mut grid);
        assert_eq!(grid, before);
        // x is the only decomposed axis, so nothing can move
        assert_eq!(report.outcome, BalanceOutcome::Stalled);
        assert_eq!(report.adjustments, 0);
    }

    #[test]
    fn larger_budget_keeps_history_non_increasing() {
        let particles = slab_particles(&[100, 100, 300, 100]);
        let mut grid = line_grid(4);
        let config = BalanceConfig::new(true, true, true, 1.02, 50).unwrap();
        let report = run(config, &particles, &mut grid);

        assert!(report.iterations > 1);
        for w in report.history.windows(2) {
            assert!(w[1] <= w[0]);
        }
        assert!(matches!(
            report.outcome,
            BalanceOutcome::Converged | BalanceOutcome::Stalled | BalanceOutcome::BudgetExhausted
        ));
    }
}
