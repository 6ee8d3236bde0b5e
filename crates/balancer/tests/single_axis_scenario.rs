//! Four ranks along x with slab counts [100, 100, 300, 100].
//!
//! Average is 150, so the initial imbalance factors are
//! [0.667, 0.667, 2.0, 0.667]. One invocation must pull both boundaries of
//! the heavy slab inward by the 5% clamp, leave the edges alone, and strictly
//! reduce the heavy rank's imbalance.

use balancer::{
    Axis, BalanceConfig, BalanceOutcome, Decomposition, DecompositionGrid, ExecutionContext,
    LoadBalancer, LoadSnapshot, ParticleArrays, Periodic, SerialCommunicator,
};

/// Particles evenly spaced inside unit slabs along x.
fn slab_particles(counts: &[usize]) -> ParticleArrays {
    let mut particles = ParticleArrays::new();
    let mut tag = 0;
    for (k, &c) in counts.iter().enumerate() {
        for j in 0..c {
            let x = k as f32 + (j as f32 + 0.5) / c as f32;
            particles.push_particle(x, 0.5, 0.5, tag);
            tag += 1;
        }
    }
    particles
}

fn counts(particles: &ParticleArrays, grid: &DecompositionGrid) -> Vec<u64> {
    let mut c = vec![0u64; grid.num_ranks()];
    for i in 0..particles.len() {
        c[grid.rank_of(particles.position(i))] += 1;
    }
    c
}

fn attached_balancer(config: BalanceConfig) -> LoadBalancer {
    let mut lb = LoadBalancer::new(Periodic::new(1), config).unwrap();
    lb.attach(&ExecutionContext::cpu(), Box::new(SerialCommunicator)).unwrap();
    lb
}

#[test]
fn initial_imbalance_factors() {
    let particles = slab_particles(&[100, 100, 300, 100]);
    let grid = DecompositionGrid::uniform([0.0; 3], [4.0, 1.0, 1.0], [4, 1, 1]).unwrap();
    let snapshot = LoadSnapshot::new([4, 1, 1], counts(&particles, &grid));

    let factors = snapshot.imbalance_factors();
    let expected = [2.0 / 3.0, 2.0 / 3.0, 2.0, 2.0 / 3.0];
    for (f, e) in factors.iter().zip(expected) {
        assert!((f - e).abs() < 1e-12, "factor {f} != {e}");
    }
}

#[test]
fn one_invocation_shrinks_heavy_slab() {
    let particles = slab_particles(&[100, 100, 300, 100]);
    let mut grid = DecompositionGrid::uniform([0.0; 3], [4.0, 1.0, 1.0], [4, 1, 1]).unwrap();
    let mut lb = attached_balancer(BalanceConfig::default());

    let report = lb.update(0, &particles, &mut grid).unwrap().unwrap();
    let b = grid.boundaries(Axis::X);

    // Edges fixed, boundary between the two light slabs untouched
    assert_eq!(b[0], 0.0);
    assert_eq!(b[4], 4.0);
    assert_eq!(b[1], 1.0);

    // Boundary between slab 1 and slab 2 moved up into slab 2; the one
    // between slab 2 and slab 3 moved down into slab 2. Both by 5% of 1.0.
    assert!((b[2] - 2.05).abs() < 1e-9, "b[2] = {}", b[2]);
    assert!((b[3] - 2.95).abs() < 1e-9, "b[3] = {}", b[3]);

    let after = counts(&particles, &grid);
    assert_eq!(after, vec![100, 115, 270, 115]);
    assert!(after[2] as f64 / 150.0 < 2.0);

    assert_eq!(report.outcome, BalanceOutcome::BudgetExhausted);
    assert!((report.final_max_imbalance - 1.8).abs() < 1e-12);
    assert_eq!(lb.max_imbalance(), Some(report.final_max_imbalance));
}

#[test]
fn repeated_invocations_approach_balance() {
    let particles = slab_particles(&[100, 100, 300, 100]);
    let mut grid = DecompositionGrid::uniform([0.0; 3], [4.0, 1.0, 1.0], [4, 1, 1]).unwrap();
    let config = BalanceConfig::new(true, true, true, 1.02, 50).unwrap();
    let mut lb = attached_balancer(config);

    let report = lb.update(0, &particles, &mut grid).unwrap().unwrap();
    for w in report.history.windows(2) {
        assert!(w[1] <= w[0], "history increased: {:?}", report.history);
    }
    assert!(report.final_max_imbalance < 1.2, "final {}", report.final_max_imbalance);
}

#[test]
fn disabled_axis_keeps_boundaries_under_skew() {
    // Skew along y only; y disabled
    let mut particles = ParticleArrays::new();
    for i in 0..200 {
        let y = 0.1 + 0.3 * (i as f32 / 200.0);
        let x = (i % 2) as f32 + 0.5;
        particles.push_particle(x, y, 0.5, i as u64);
    }
    let mut grid = DecompositionGrid::uniform([0.0; 3], [2.0, 2.0, 1.0], [2, 2, 1]).unwrap();
    let before_y = grid.boundaries(Axis::Y).to_vec();

    let mut lb = attached_balancer(BalanceConfig::new(true, false, true, 1.02, 5).unwrap());
    lb.update(0, &particles, &mut grid).unwrap();

    assert_eq!(grid.boundaries(Axis::Y), before_y.as_slice());
    // x slabs are already even, so x stays put too
    assert_eq!(grid.boundaries(Axis::X), &[0.0, 1.0, 2.0]);
}
