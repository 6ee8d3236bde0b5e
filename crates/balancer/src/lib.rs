//! Particle-count load balancing for a rectilinear domain decomposition
//!
//! This crate adjusts the interior boundaries of a fixed rank grid so that
//! every rank owns roughly the same number of particles. An invocation is
//! collective: all processes sample per-rank counts through a global sum,
//! compute identical boundary moves from identical inputs, and write them
//! back into their copy of the grid.
//!
//! # Modules
//! - [`decomposition`] -- Boundary sequences per axis and the grid capability.
//! - [`comm`] -- Collective sum seam with serial and thread-group members.
//! - [`sampler`] -- Reduced per-rank counts and slab loads.
//! - [`rebalance`] -- Bounded boundary moves along one axis.
//! - [`controller`] -- Iteration control, convergence and rollback.
//! - [`state`] -- The user-facing [`LoadBalancer`] and its attach state.
//! - [`trigger`] -- Timestep predicates.
//! - [`config`] -- Options, defaults and JSON loading.
//! - [`distributed`] -- Lockstep multi-rank harness on threads.

#![warn(missing_docs)]

pub mod comm;
pub mod config;
pub mod controller;
pub mod decomposition;
pub mod distributed;
pub mod error;
pub mod rebalance;
pub mod sampler;
pub mod state;
pub mod trigger;

pub use comm::{CommError, Communicator, SerialCommunicator, ThreadCommunicator, ThreadGroup};
pub use config::BalanceConfig;
pub use controller::{BalanceOutcome, BalanceReport, IterationController, Phase, SkipReason};
pub use decomposition::{Axis, Decomposition, DecompositionGrid};
pub use distributed::{run_distributed, run_serial, DistributedConfig, DistributedResult};
pub use error::BalanceError;
pub use rebalance::AxisRebalancer;
pub use sampler::{LoadSampler, LoadSnapshot};
pub use state::{BalanceStats, BalancerState, LoadBalancer};
pub use trigger::{After, Before, On, Periodic, Trigger};

pub use balance_kernel::{BackendType, BalancingEngine, CpuEngine, ExecutionContext, ParticleArrays};
