//! The reference scenarios and their expected outcomes

use std::path::Path;

use balancer::Axis;

use crate::{BoundaryShiftCheck, ExpectedResult, ReferenceTest};

fn config_path(configs: &Path, file: &str) -> String {
    configs.join(file).to_string_lossy().to_string()
}

/// Planar density jump along x
///
/// 55% of the particles sit in the lowest quarter of a 4-rank line, so the
/// first rank starts at 2.2x the average. Balancing every step must bring
/// it close to even, pulling the first interior boundary down.
pub fn interface_slab_test(configs: &Path) -> ReferenceTest {
    ReferenceTest {
        name: "Interface Slab".to_string(),
        config_path: config_path(configs, "interface-slab.json"),
        steps: 60,
        expected: ExpectedResult {
            conservation: true,
            max_final_imbalance: Some(1.15),
            imbalance_reduction: Some(0.6),
            boundary_shift: Some(BoundaryShiftCheck {
                axis: Axis::X,
                index: 1,
                lower: true,
            }),
            serial_agreement: true,
            ..Default::default()
        },
    }
}

/// Off-centre cluster on a 2 x 2 x 2 grid
///
/// A rectilinear grid cannot isolate a cube fully, so only a substantial
/// reduction is expected, not tolerance.
pub fn cluster_test(configs: &Path) -> ReferenceTest {
    ReferenceTest {
        name: "Off-centre Cluster".to_string(),
        config_path: config_path(configs, "cluster.json"),
        steps: 40,
        expected: ExpectedResult {
            conservation: true,
            max_final_imbalance: Some(1.7),
            imbalance_reduction: Some(0.5),
            boundary_shift: Some(BoundaryShiftCheck {
                axis: Axis::X,
                index: 1,
                lower: true,
            }),
            serial_agreement: true,
            ..Default::default()
        },
    }
}

/// Evenly spread particles within tolerance: boundaries never move
pub fn uniform_test(configs: &Path) -> ReferenceTest {
    ReferenceTest {
        name: "Uniform No-op".to_string(),
        config_path: config_path(configs, "uniform.json"),
        steps: 10,
        expected: ExpectedResult {
            conservation: true,
            boundaries_unchanged: true,
            ..Default::default()
        },
    }
}

/// One rank owns the whole box: every invocation is a no-op
pub fn single_rank_test(configs: &Path) -> ReferenceTest {
    ReferenceTest {
        name: "Single Rank".to_string(),
        config_path: config_path(configs, "single-rank.json"),
        steps: 10,
        expected: ExpectedResult {
            conservation: true,
            boundaries_unchanged: true,
            max_final_imbalance: Some(1.0),
            ..Default::default()
        },
    }
}

/// Particles drift toward the floor of a 4-rank column
///
/// The balancer runs every 10 steps and cannot keep up with the drift, but
/// it must track it: the lowest z boundary falls and the final imbalance
/// stays well below the unbalanced value of 4.0.
pub fn sedimentation_test(configs: &Path) -> ReferenceTest {
    ReferenceTest {
        name: "Sedimentation".to_string(),
        config_path: config_path(configs, "sedimentation.json"),
        steps: 300,
        expected: ExpectedResult {
            conservation: true,
            max_final_imbalance: Some(3.6),
            boundary_shift: Some(BoundaryShiftCheck {
                axis: Axis::Z,
                index: 1,
                lower: true,
            }),
            serial_agreement: true,
            ..Default::default()
        },
    }
}

/// Get all reference tests
pub fn all_tests(configs: &Path) -> Vec<ReferenceTest> {
    vec![
        interface_slab_test(configs),
        cluster_test(configs),
        uniform_test(configs),
        single_rank_test(configs),
        sedimentation_test(configs),
    ]
}
