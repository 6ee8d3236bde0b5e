//! CPU counting engine: conservation and agreement with per-particle lookup.

use balance_kernel::{BalancingEngine, CpuEngine, ParticleArrays, RankBounds};
use proptest::prelude::*;

/// Uniform boundaries over [0, len] with `n` slabs.
fn uniform_bounds(n: usize, len: f64) -> Vec<f64> {
    (0..=n).map(|i| len * i as f64 / n as f64).collect()
}

#[test]
fn every_particle_lands_on_exactly_one_rank() {
    let bx = uniform_bounds(3, 1.0);
    let by = uniform_bounds(2, 1.0);
    let bz = uniform_bounds(2, 1.0);
    let bounds = RankBounds::new(&bx, &by, &bz);

    let mut particles = ParticleArrays::new();
    let n = 10;
    for i in 0..n {
        for j in 0..n {
            for k in 0..n {
                let x = (i as f32 + 0.5) / n as f32;
                let y = (j as f32 + 0.5) / n as f32;
                let z = (k as f32 + 0.5) / n as f32;
                particles.push_particle(x, y, z, (i * n * n + j * n + k) as u64);
            }
        }
    }

    let counts = CpuEngine.count_by_rank(&particles, &bounds);
    assert_eq!(counts.len(), 12);
    assert_eq!(counts.iter().sum::<u64>(), 1000);
}

#[test]
fn empty_particle_set_counts_zero_everywhere() {
    let b = uniform_bounds(4, 2.0);
    let one = [0.0, 2.0];
    let bounds = RankBounds::new(&b, &one, &one);
    let counts = CpuEngine.count_by_rank(&ParticleArrays::new(), &bounds);
    assert_eq!(counts, vec![0; 4]);
}

proptest! {
    #[test]
    fn counts_match_rank_of_each_particle(
        shape in prop::collection::vec(1usize..5, 3),
        positions in prop::collection::vec(prop::collection::vec(0.0f32..1.0, 3), 0..200),
    ) {
        let bx = uniform_bounds(shape[0], 1.0);
        let by = uniform_bounds(shape[1], 1.0);
        let bz = uniform_bounds(shape[2], 1.0);
        let bounds = RankBounds::new(&bx, &by, &bz);

        let mut particles = ParticleArrays::new();
        for (t, p) in positions.iter().enumerate() {
            particles.push_particle(p[0], p[1], p[2], t as u64);
        }

        let counts = CpuEngine.count_by_rank(&particles, &bounds);
        let mut expected = vec![0u64; bounds.num_ranks()];
        for i in 0..particles.len() {
            expected[bounds.rank_of(particles.position(i))] += 1;
        }
        prop_assert_eq!(counts.iter().sum::<u64>(), particles.len() as u64);
        prop_assert_eq!(counts, expected);
    }
}
