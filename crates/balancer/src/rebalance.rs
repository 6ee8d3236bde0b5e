//! Per-axis boundary adjustment.
//!
//! Each interior boundary moves into the heavier of its two adjacent slabs,
//! shrinking it. The desired shift assumes particles are spread uniformly
//! inside the heavy slab and transfers a damped fraction of the load
//! difference:
//!
//! ```text
//! shift = damping * (L_heavy - L_light) / 2 * (w_heavy / L_heavy)
//! ```
//!
//! The shift is then clamped to
//! - `max_step_fraction` of the width of the slab being shrunk, and
//! - `neighbor_fraction` of the distance to each adjacent interior boundary.
//!
//! All shifts are computed from the incoming boundaries, so two boundaries
//! closing in on the same slab can shrink it by at most twice the step
//! fraction. With the default 5% the slab keeps 90% of its width and
//! boundaries never cross or collapse.
//!
//! The light slab's load never appears in a denominator: a slab with zero
//! particles can only grow, and it grows no faster than the clamp allows.

/// Default cap on a boundary step, as a fraction of the slab it moves into.
pub const MAX_STEP_FRACTION: f64 = 0.05;

/// Default cap on a boundary step, as a fraction of the distance to a
/// neighbouring moving boundary.
pub const NEIGHBOR_FRACTION: f64 = 0.5;

/// Fraction of the pairwise-equalizing shift applied per step.
pub const DAMPING: f64 = 0.5;

/// Bounded boundary adjustment along one axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisRebalancer {
    max_step_fraction: f64,
    neighbor_fraction: f64,
    damping: f64,
}

impl Default for AxisRebalancer {
    fn default() -> Self {
        Self {
            max_step_fraction: MAX_STEP_FRACTION,
            neighbor_fraction: NEIGHBOR_FRACTION,
            damping: DAMPING,
        }
    }
}

impl AxisRebalancer {
    /// Compute new boundaries from slab loads.
    ///
    /// `boundaries` has one more entry than `loads`. The result has the same
    /// length, the same outer edges, and stays strictly increasing.
    pub fn rebalance(&self, loads: &[u64], boundaries: &[f64]) -> Vec<f64> {
        debug_assert_eq!(loads.len() + 1, boundaries.len());
        let n = loads.len();
        let mut adjusted = boundaries.to_vec();

        for i in 1..n {
            let left = loads[i - 1];
            let right = loads[i];
            if left == right {
                continue;
            }

            // Positive shift moves the boundary up into the right slab.
            let (heavy, light, heavy_width, direction) = if left > right {
                (left, right, boundaries[i] - boundaries[i - 1], -1.0)
            } else {
                (right, left, boundaries[i + 1] - boundaries[i], 1.0)
            };

            let desired =
                self.damping * 0.5 * (heavy - light) as f64 * heavy_width / heavy as f64;
            let shift = desired.min(self.shift_limit(boundaries, i, direction));
            adjusted[i] = boundaries[i] + direction * shift;
        }

        adjusted
    }

    /// Largest allowed step of interior boundary `i` in `direction` (+1 up, -1 down).
    pub fn shift_limit(&self, boundaries: &[f64], i: usize, direction: f64) -> f64 {
        let n = boundaries.len() - 1;
        let below = boundaries[i] - boundaries[i - 1];
        let above = boundaries[i + 1] - boundaries[i];

        let shrinking = if direction > 0.0 { above } else { below };
        let mut limit = self.max_step_fraction * shrinking;

        // Outer edges are fixed, so only interior neighbours count here.
        if i > 1 {
            limit = limit.min(self.neighbor_fraction * below);
        }
        if i + 1 < n {
            limit = limit.min(self.neighbor_fraction * above);
        }
        limit
    }
}
