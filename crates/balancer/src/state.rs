//! The user-facing load balancer: configuration, attachment and invocation.
//!
//! A [`LoadBalancer`] starts detached, holding only its configuration. Once
//! attached to an execution context and a communicator it owns a counting
//! engine and accumulates statistics. Configuration accessors read and write
//! whichever copy is authoritative for the current state.

use balance_kernel::{BalancingEngine, ExecutionContext, ParticleArrays};

use crate::comm::Communicator;
use crate::config::{validate_max_iterations, validate_tolerance, BalanceConfig};
use crate::controller::{BalanceOutcome, BalanceReport, IterationController};
use crate::decomposition::{Axis, Decomposition};
use crate::error::BalanceError;
use crate::sampler::LoadSampler;
use crate::trigger::Trigger;

/// Counters accumulated while attached.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BalanceStats {
    /// Invocations that ran (trigger fired)
    pub invocations: u64,
    /// Invocations that were no-ops
    pub skipped: u64,
    /// Adjustment passes over all invocations
    pub iterations: u64,
    /// Axis boundary replacements over all invocations
    pub adjustments: u64,
    /// Passes that were undone
    pub rollbacks: u64,
    /// Collective reductions performed
    pub reductions: u64,
}

/// Live state of an attached balancer.
pub struct AttachedBalancer {
    config: BalanceConfig,
    engine: Box<dyn BalancingEngine>,
    comm: Box<dyn Communicator>,
    stats: BalanceStats,
    last_max_imbalance: f64,
}

/// Attachment state.
pub enum BalancerState {
    /// Configuration only.
    Detached(BalanceConfig),
    /// Bound to an engine and communicator.
    Attached(AttachedBalancer),
}

/// Adjusts decomposition boundaries to even out per-rank particle counts.
pub struct LoadBalancer {
    trigger: Box<dyn Trigger>,
    state: BalancerState,
}

impl LoadBalancer {
    /// Create a detached balancer. Fails if `config` is invalid.
    pub fn new(trigger: impl Trigger + 'static, config: BalanceConfig) -> Result<Self, BalanceError> {
        config.validate()?;
        Ok(Self {
            trigger: Box::new(trigger),
            state: BalancerState::Detached(config),
        })
    }

    /// Current configuration.
    pub fn config(&self) -> &BalanceConfig {
        match &self.state {
            BalancerState::Detached(config) => config,
            BalancerState::Attached(attached) => &attached.config,
        }
    }

    fn config_mut(&mut self) -> &mut BalanceConfig {
        match &mut self.state {
            BalancerState::Detached(config) => config,
            BalancerState::Attached(attached) => &mut attached.config,
        }
    }

    /// Balance along x.
    pub fn x(&self) -> bool {
        self.config().x
    }

    /// Balance along y.
    pub fn y(&self) -> bool {
        self.config().y
    }

    /// Balance along z.
    pub fn z(&self) -> bool {
        self.config().z
    }

    /// Imbalance tolerance.
    pub fn tolerance(&self) -> f64 {
        self.config().tolerance
    }

    /// Adjustment passes per invocation.
    pub fn max_iterations(&self) -> u32 {
        self.config().max_iterations
    }

    /// Enable or disable x.
    pub fn set_x(&mut self, enabled: bool) {
        self.config_mut().set_enabled(Axis::X, enabled);
    }

    /// Enable or disable y.
    pub fn set_y(&mut self, enabled: bool) {
        self.config_mut().set_enabled(Axis::Y, enabled);
    }

    /// Enable or disable z.
    pub fn set_z(&mut self, enabled: bool) {
        self.config_mut().set_enabled(Axis::Z, enabled);
    }

    /// Change the tolerance; rejects values below 1.0.
    pub fn set_tolerance(&mut self, tolerance: f64) -> Result<(), BalanceError> {
        validate_tolerance(tolerance)?;
        self.config_mut().tolerance = tolerance;
        Ok(())
    }

    /// Change the iteration budget; rejects 0.
    pub fn set_max_iterations(&mut self, max_iterations: u32) -> Result<(), BalanceError> {
        validate_max_iterations(max_iterations)?;
        self.config_mut().max_iterations = max_iterations;
        Ok(())
    }

    /// Replace the trigger.
    pub fn set_trigger(&mut self, trigger: impl Trigger + 'static) {
        self.trigger = Box::new(trigger);
    }

    /// Whether the balancer is attached.
    pub fn is_attached(&self) -> bool {
        matches!(self.state, BalancerState::Attached(_))
    }

    /// Bind to a counting engine chosen by `ctx` and to `comm`.
    ///
    /// Re-attaching replaces the engine and communicator and resets stats.
    pub fn attach(
        &mut self,
        ctx: &ExecutionContext,
        comm: Box<dyn Communicator>,
    ) -> Result<(), BalanceError> {
        let engine = ctx.create_engine()?;
        tracing::debug!(
            "load balancer attached: rank {}/{}, engine {}",
            comm.rank(),
            comm.size(),
            engine.name()
        );
        let config = self.config().clone();
        self.state = BalancerState::Attached(AttachedBalancer {
            config,
            engine,
            comm,
            stats: BalanceStats::default(),
            last_max_imbalance: 1.0,
        });
        Ok(())
    }

    /// Drop the engine and communicator, keeping the current configuration.
    pub fn detach(&mut self) {
        let config = self.config().clone();
        self.state = BalancerState::Detached(config);
    }

    /// Run one invocation if the trigger fires at `timestep`.
    ///
    /// Collective. Returns `Ok(None)` when the trigger does not fire.
    pub fn update(
        &mut self,
        timestep: u64,
        particles: &ParticleArrays,
        grid: &mut dyn Decomposition,
    ) -> Result<Option<BalanceReport>, BalanceError> {
        if !self.is_attached() {
            return Err(BalanceError::Detached);
        }
        if !self.trigger.compute(timestep) {
            return Ok(None);
        }
        self.balance(particles, grid).map(Some)
    }

    /// Run one invocation unconditionally. Collective.
    pub fn balance(
        &mut self,
        particles: &ParticleArrays,
        grid: &mut dyn Decomposition,
    ) -> Result<BalanceReport, BalanceError> {
        let BalancerState::Attached(attached) = &mut self.state else {
            return Err(BalanceError::Detached);
        };
        let AttachedBalancer {
            config,
            engine,
            comm,
            stats,
            last_max_imbalance,
        } = attached;

        let mut sampler = LoadSampler::new(&mut **engine, &**comm);
        let mut controller = IterationController::new(config.clone());
        let report = controller.run(&mut sampler, particles, grid)?;

        stats.invocations += 1;
        stats.iterations += u64::from(report.iterations);
        stats.adjustments += u64::from(report.adjustments);
        stats.reductions += u64::from(report.reductions);
        if report.rolled_back {
            stats.rollbacks += 1;
        }
        if matches!(report.outcome, BalanceOutcome::Skipped(_)) {
            stats.skipped += 1;
        }
        *last_max_imbalance = report.final_max_imbalance;

        if comm.rank() == 0 {
            tracing::info!(
                "load balance: {:?} after {} iteration(s), max imbalance {:.4} -> {:.4}",
                report.outcome,
                report.iterations,
                report.initial_max_imbalance,
                report.final_max_imbalance
            );
        }
        Ok(report)
    }

    /// Largest imbalance factor left by the most recent invocation
    /// (1.0 before the first one). `None` while detached.
    pub fn max_imbalance(&self) -> Option<f64> {
        match &self.state {
            BalancerState::Detached(_) => None,
            BalancerState::Attached(attached) => Some(attached.last_max_imbalance),
        }
    }

    /// Accumulated statistics. `None` while detached.
    pub fn stats(&self) -> Option<&BalanceStats> {
        match &self.state {
            BalancerState::Detached(_) => None,
            BalancerState::Attached(attached) => Some(&attached.stats),
        }
    }

    /// Zero the statistics and the recorded max imbalance.
    pub fn reset_stats(&mut self) {
        if let BalancerState::Attached(attached) = &mut self.state {
            attached.stats = BalanceStats::default();
            attached.last_max_imbalance = 1.0;
        }
    }
}
