//! Local Load Accumulation Kernel
//!
//! This crate provides the rank-local half of particle-count load balancing:
//! storing the particles a process owns and binning them by destination rank
//! for a candidate set of decomposition boundaries. The per-rank counts it
//! produces are folded into a collective reduction by the `balancer` crate;
//! acceleration changes only how these local counts are produced.
//!
//! # Modules
//! - [`particle`] -- Struct-of-arrays particle storage.
//! - [`binning`] -- Position-to-rank mapping over per-axis boundary sequences.
//! - `gpu` -- wgpu compute engine (behind the `gpu` feature).

#![warn(missing_docs)]

pub mod binning;
pub mod particle;

#[cfg(feature = "gpu")]
#[allow(missing_docs)]
pub mod gpu;

pub use binning::{count_by_rank, rank_coords, rank_index, slab_index, RankBounds};
pub use particle::ParticleArrays;

#[cfg(feature = "gpu")]
pub use gpu::GpuEngine;

use serde::{Deserialize, Serialize};

/// Errors raised while selecting or initializing a counting engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The accelerator was requested but no usable adapter exists.
    #[error("accelerator unavailable: {0}")]
    Unavailable(String),
    /// The accelerator was requested but this build has no `gpu` feature.
    #[error("accelerator backend requested but the 'gpu' feature is not enabled")]
    NotCompiled,
}

// ---------------------------------------------------------------------------
// BalancingEngine trait
// ---------------------------------------------------------------------------

/// Trait that all local count back-ends (CPU, GPU) must implement.
///
/// An engine turns the particles owned by this process into a vector of
/// per-rank counts for the given boundaries: entry `r` is how many local
/// particles rank `r` would own. Summing these vectors over all processes
/// gives the global per-rank load.
pub trait BalancingEngine: Send {
    /// Short backend name for logging.
    fn name(&self) -> &'static str;

    /// Count local particles by destination rank.
    fn count_by_rank(&mut self, particles: &ParticleArrays, bounds: &RankBounds<'_>) -> Vec<u64>;
}

/// Reference CPU implementation of [`BalancingEngine`].
#[derive(Debug, Default, Clone, Copy)]
pub struct CpuEngine;

impl BalancingEngine for CpuEngine {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn count_by_rank(&mut self, particles: &ParticleArrays, bounds: &RankBounds<'_>) -> Vec<u64> {
        count_by_rank(&particles.x, &particles.y, &particles.z, bounds)
    }
}

// ---------------------------------------------------------------------------
// Execution context and engine selection
// ---------------------------------------------------------------------------

/// Which compute backend to use for local counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BackendType {
    /// Always use the CPU engine
    Cpu,
    /// Require the accelerator engine
    Gpu,
    /// Use the accelerator when one is available, otherwise the CPU
    #[default]
    Auto,
}

/// Execution context handed explicitly to the balancer when it attaches.
///
/// Holds the requested backend together with the result of the accelerator
/// capability probe, so engine selection never consults global state.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionContext {
    backend: BackendType,
    accelerator_available: bool,
}

impl ExecutionContext {
    /// Create a context for `backend`, probing for an accelerator.
    pub fn new(backend: BackendType) -> Self {
        let accelerator_available = match backend {
            BackendType::Cpu => false,
            BackendType::Gpu | BackendType::Auto => probe_accelerator(),
        };
        Self {
            backend,
            accelerator_available,
        }
    }

    /// CPU-only context; never probes the accelerator.
    pub fn cpu() -> Self {
        Self {
            backend: BackendType::Cpu,
            accelerator_available: false,
        }
    }

    /// Requested backend.
    pub fn backend(&self) -> BackendType {
        self.backend
    }

    /// Whether an accelerator adapter was found when the context was created.
    pub fn has_accelerator(&self) -> bool {
        self.accelerator_available
    }

    /// Create the counting engine selected by this context.
    ///
    /// For `Auto`, tries the accelerator first and falls back to CPU.
    /// For `Gpu`, fails if the accelerator cannot be used.
    pub fn create_engine(&self) -> Result<Box<dyn BalancingEngine>, EngineError> {
        match self.backend {
            BackendType::Cpu => {
                tracing::info!("Using CPU counting engine");
                Ok(Box::new(CpuEngine))
            }
            BackendType::Gpu => {
                if !self.accelerator_available {
                    return Err(accelerator_missing());
                }
                create_accelerator_engine()
            }
            BackendType::Auto => {
                if self.accelerator_available {
                    match create_accelerator_engine() {
                        Ok(engine) => return Ok(engine),
                        Err(e) => tracing::warn!("Accelerator init failed ({e}), falling back to CPU"),
                    }
                } else {
                    tracing::info!("No accelerator available, using CPU counting engine");
                }
                Ok(Box::new(CpuEngine))
            }
        }
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::cpu()
    }
}

#[cfg(feature = "gpu")]
fn probe_accelerator() -> bool {
    gpu::gpu_available()
}

#[cfg(not(feature = "gpu"))]
fn probe_accelerator() -> bool {
    false
}

#[cfg(feature = "gpu")]
fn accelerator_missing() -> EngineError {
    EngineError::Unavailable("no suitable GPU adapter found".into())
}

#[cfg(not(feature = "gpu"))]
fn accelerator_missing() -> EngineError {
    EngineError::NotCompiled
}

#[cfg(feature = "gpu")]
fn create_accelerator_engine() -> Result<Box<dyn BalancingEngine>, EngineError> {
    tracing::info!("Creating GPU counting engine...");
    Ok(Box::new(GpuEngine::new()?))
}

#[cfg(not(feature = "gpu"))]
fn create_accelerator_engine() -> Result<Box<dyn BalancingEngine>, EngineError> {
    Err(EngineError::NotCompiled)
}
