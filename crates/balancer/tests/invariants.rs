//! Properties of a balance invocation over generated grids and particle sets.

use balancer::{
    Axis, AxisRebalancer, BalanceConfig, CpuEngine, Decomposition, DecompositionGrid,
    IterationController, LoadSampler, ParticleArrays, SerialCommunicator,
};
use proptest::prelude::*;

const EPS: f64 = 1e-12;

/// Boundary sequence starting at 0 with the given slab widths.
fn from_widths(widths: &[f64]) -> Vec<f64> {
    let mut b = Vec::with_capacity(widths.len() + 1);
    b.push(0.0);
    let mut acc = 0.0;
    for w in widths {
        acc += w;
        b.push(acc);
    }
    b
}

/// A grid with 1-4 ranks along x and y, 1-3 along z, and irregular widths.
fn grid_strategy() -> impl Strategy<Value = DecompositionGrid> {
    (1usize..=4, 1usize..=4, 1usize..=3)
        .prop_flat_map(|(nx, ny, nz)| {
            (
                prop::collection::vec(0.2f64..2.0, nx),
                prop::collection::vec(0.2f64..2.0, ny),
                prop::collection::vec(0.2f64..2.0, nz),
            )
        })
        .prop_map(|(wx, wy, wz)| {
            DecompositionGrid::from_boundaries([from_widths(&wx), from_widths(&wy), from_widths(&wz)])
                .unwrap()
        })
}

/// Unit-cube fractions; x is squared to cluster particles near the low edge.
fn fractions_strategy() -> impl Strategy<Value = Vec<(f32, f32, f32)>> {
    prop::collection::vec(
        ((0.0f32..1.0).prop_map(|u| u * u), 0.0f32..1.0, 0.0f32..1.0),
        0..300,
    )
}

fn place(fractions: &[(f32, f32, f32)], grid: &DecompositionGrid) -> ParticleArrays {
    let hi = Axis::ALL.map(|a| *grid.boundaries(a).last().unwrap() as f32);
    let mut p = ParticleArrays::new();
    for (i, &(u, v, w)) in fractions.iter().enumerate() {
        p.push_particle(u * hi[0], v * hi[1], w * hi[2], i as u64);
    }
    p
}

fn invoke(
    config: BalanceConfig,
    particles: &ParticleArrays,
    grid: &mut DecompositionGrid,
) -> balancer::BalanceReport {
    let mut engine = CpuEngine;
    let comm = SerialCommunicator;
    let mut sampler = LoadSampler::new(&mut engine, &comm);
    IterationController::new(config)
        .run(&mut sampler, particles, grid)
        .unwrap()
}

fn initial_deviation(particles: &ParticleArrays, grid: &DecompositionGrid) -> f64 {
    let mut engine = CpuEngine;
    let comm = SerialCommunicator;
    let mut sampler = LoadSampler::new(&mut engine, &comm);
    sampler.sample(particles, grid).unwrap().max_deviation()
}

proptest! {
    #[test]
    fn boundaries_stay_ordered_with_fixed_edges(
        grid in grid_strategy(),
        fractions in fractions_strategy(),
        max_iterations in 1u32..6,
    ) {
        let particles = place(&fractions, &grid);
        let mut balanced = grid.clone();
        let config = BalanceConfig::new(true, true, true, 1.02, max_iterations).unwrap();
        invoke(config, &particles, &mut balanced);

        for axis in Axis::ALL {
            let before = grid.boundaries(axis);
            let after = balanced.boundaries(axis);
            prop_assert_eq!(before.len(), after.len());
            prop_assert_eq!(before[0], after[0]);
            prop_assert_eq!(before[before.len() - 1], after[after.len() - 1]);
            prop_assert!(after.windows(2).all(|w| w[0] < w[1]), "not increasing: {:?}", after);
        }
    }

    #[test]
    fn single_step_respects_clamp(
        loads in prop::collection::vec(0u64..1000, 2..8),
        widths in prop::collection::vec(0.05f64..3.0, 8),
    ) {
        let n = loads.len();
        let old = from_widths(&widths[..n]);
        let new = AxisRebalancer::default().rebalance(&loads, &old);

        prop_assert_eq!(new[0], old[0]);
        prop_assert_eq!(new[n], old[n]);
        for i in 1..n {
            let shift = (new[i] - old[i]).abs();
            let below = old[i] - old[i - 1];
            let above = old[i + 1] - old[i];
            let own = if new[i] > old[i] { above } else { below };
            prop_assert!(shift <= 0.05 * own + EPS, "boundary {} moved {} > 5% of {}", i, shift, own);
            if i > 1 {
                prop_assert!(shift <= 0.5 * below + EPS);
            }
            if i + 1 < n {
                prop_assert!(shift <= 0.5 * above + EPS);
            }
        }
        // No slab loses more than two 5% steps
        for i in 0..n {
            prop_assert!(new[i + 1] - new[i] >= 0.9 * (old[i + 1] - old[i]) - EPS);
        }
    }

    #[test]
    fn within_tolerance_is_a_no_op(
        grid in grid_strategy(),
        fractions in fractions_strategy(),
    ) {
        let particles = place(&fractions, &grid);
        let tolerance = 1.0 + initial_deviation(&particles, &grid) + 1e-6;
        let mut balanced = grid.clone();
        invoke(BalanceConfig::new(true, true, true, tolerance, 3).unwrap(), &particles, &mut balanced);
        prop_assert_eq!(balanced, grid);
    }

    #[test]
    fn disabled_axis_never_moves(
        grid in grid_strategy(),
        fractions in fractions_strategy(),
        disabled in 0usize..3,
    ) {
        let particles = place(&fractions, &grid);
        let axis = Axis::ALL[disabled];
        let mut config = BalanceConfig::new(true, true, true, 1.0, 4).unwrap();
        config.set_enabled(axis, false);

        let mut balanced = grid.clone();
        invoke(config, &particles, &mut balanced);
        prop_assert_eq!(balanced.boundaries(axis), grid.boundaries(axis));
    }

    #[test]
    fn single_rank_returns_input(
        width in prop::collection::vec(0.2f64..2.0, 3),
        fractions in fractions_strategy(),
    ) {
        let grid = DecompositionGrid::from_boundaries([
            vec![0.0, width[0]],
            vec![0.0, width[1]],
            vec![0.0, width[2]],
        ]).unwrap();
        let particles = place(&fractions, &grid);
        let mut balanced = grid.clone();
        invoke(BalanceConfig::new(true, true, true, 1.0, 5).unwrap(), &particles, &mut balanced);
        prop_assert_eq!(balanced, grid);
    }

    #[test]
    fn deviation_history_never_increases(
        grid in grid_strategy(),
        fractions in fractions_strategy(),
        max_iterations in 1u32..10,
    ) {
        let particles = place(&fractions, &grid);
        let mut balanced = grid.clone();
        let report = invoke(
            BalanceConfig::new(true, true, true, 1.0, max_iterations).unwrap(),
            &particles,
            &mut balanced,
        );
        for w in report.history.windows(2) {
            prop_assert!(w[1] <= w[0], "history increased: {:?}", report.history);
        }
        prop_assert!(report.iterations <= max_iterations);
    }
}
