//! Error types for the balancer.

use std::path::PathBuf;

use crate::comm::CommError;
use crate::decomposition::Axis;
use balance_kernel::EngineError;

/// Errors raised by configuration, attachment and collective communication.
///
/// Runtime conditions that merely make balancing pointless (a single rank,
/// no particles, failure to converge) are not errors; they are reported
/// through [`crate::BalanceOutcome`].
#[derive(Debug, thiserror::Error)]
pub enum BalanceError {
    /// Tolerance below 1.0 (or NaN).
    #[error("tolerance must be >= 1.0, got {0}")]
    InvalidTolerance(f64),

    /// Zero iteration budget.
    #[error("max_iterations must be at least 1, got {0}")]
    InvalidMaxIterations(u32),

    /// A boundary sequence violated the grid invariants.
    #[error("invalid boundaries along {axis}: {reason}")]
    InvalidBoundaries {
        /// Offending axis
        axis: Axis,
        /// What was wrong
        reason: String,
    },

    /// `update` was called before `attach`.
    #[error("load balancer is not attached")]
    Detached,

    /// Two ranks ended an invocation with different boundaries.
    #[error("rank {rank} disagrees with rank 0 on the {axis} boundaries")]
    RankDivergence {
        /// First disagreeing rank
        rank: usize,
        /// Axis that differs
        axis: Axis,
    },

    /// Reading a configuration file failed.
    #[error("failed to read config file {path}: {source}")]
    ConfigIo {
        /// File that could not be read
        path: PathBuf,
        /// Underlying IO error
        source: std::io::Error,
    },

    /// A configuration file was not valid JSON for the expected type.
    #[error("failed to parse config JSON: {0}")]
    ConfigParse(#[from] serde_json::Error),

    /// The collective reduction failed.
    #[error(transparent)]
    Comm(#[from] CommError),

    /// The counting engine could not be created.
    #[error(transparent)]
    Engine(#[from] EngineError),
}
