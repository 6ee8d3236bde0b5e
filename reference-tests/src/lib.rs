//! Reference test framework for load balancing validation
//!
//! Each reference test loads a scenario from `configs/`, runs it through the
//! thread-per-rank harness and checks the outcome against expected criteria:
//! particle conservation, the imbalance reached, whether boundaries moved,
//! and agreement with a single-process run.


pub mod scenario;
pub mod suite;

pub use scenario::{DomainBounds, Distribution, ScenarioConfig};

use balancer::{
    run_distributed, run_serial, Axis, Decomposition, DecompositionGrid, DistributedResult,
};
use std::path::Path;

/// Expected result criteria for a reference test
#[derive(Debug, Clone, Default)]
pub struct ExpectedResult {
    /// Particle count must be unchanged
    pub conservation: bool,
    /// Upper bound on the final max imbalance factor
    pub max_final_imbalance: Option<f64>,
    /// Final max imbalance must be at most this fraction of the initial one
    pub imbalance_reduction: Option<f64>,
    /// Boundaries must be exactly the initial uniform ones
    pub boundaries_unchanged: bool,
    /// A specific boundary must have moved in a given direction
    pub boundary_shift: Option<BoundaryShiftCheck>,
    /// A single process must reach bit-identical boundaries
    pub serial_agreement: bool,
}

/// Check that one interior boundary moved in a given direction
#[derive(Debug, Clone)]
pub struct BoundaryShiftCheck {
    /// Axis of the boundary
    pub axis: Axis,
    /// Index into the boundary sequence
    pub index: usize,
    /// True if the boundary must end below its initial position
    pub lower: bool,
}

/// Result of running a reference test
#[derive(Debug)]
pub struct TestResult {
    /// Test name
    pub name: String,
    /// Whether test passed
    pub passed: bool,
    /// Individual check results
    pub checks: Vec<CheckResult>,
    /// Max imbalance factor before the first step
    pub initial_max_imbalance: f64,
    /// Max imbalance factor after the last step
    pub final_max_imbalance: f64,
    /// Balancer invocations that fired
    pub invocations: u64,
    /// Number of steps executed
    pub steps: u64,
}

/// Result of an individual validation check
#[derive(Debug)]
pub struct CheckResult {
    /// Check name
    pub name: String,
    /// Whether check passed
    pub passed: bool,
    /// Detail message
    pub message: Option<String>,
}

/// A reference test case
pub struct ReferenceTest {
    /// Test name
    pub name: String,
    /// Path to scenario file
    pub config_path: String,
    /// Number of steps to run
    pub steps: u64,
    /// Expected results to validate
    pub expected: ExpectedResult,
}

impl ReferenceTest {
    /// Run the reference test and return results
    pub fn run(&self) -> Result<TestResult, String> {
        tracing::info!("Running reference test: {}", self.name);

        let scenario = ScenarioConfig::load(&self.config_path)?;
        let particles = scenario.generate_particles();
        let config = scenario.distributed_config(self.steps);

        let initial_grid = DecompositionGrid::uniform(scenario.domain.min, scenario.domain.max, scenario.ranks)
            .map_err(|e| e.to_string())?;
        let initial_counts = count_owned(&particles, &initial_grid);
        let initial_max_imbalance = max_imbalance(&initial_counts);

        tracing::info!(
            "Initialized '{}': {} particles on {:?} ranks, max imbalance {:.3}",
            scenario.name,
            particles.len(),
            scenario.ranks,
            initial_max_imbalance
        );

        let result = run_distributed(&config, &particles).map_err(|e| e.to_string())?;
        let final_max_imbalance = max_imbalance(&result.rank_counts);

        tracing::info!(
            "Run complete: {} steps, max imbalance {:.3} -> {:.3}",
            self.steps,
            initial_max_imbalance,
            final_max_imbalance
        );

        // Validate results
        let mut checks = Vec::new();

        if self.expected.conservation {
            checks.push(validate_conservation(particles.len(), &result));
        }

        if let Some(limit) = self.expected.max_final_imbalance {
            checks.push(validate_final_imbalance(final_max_imbalance, limit));
        }

        if let Some(fraction) = self.expected.imbalance_reduction {
            checks.push(validate_reduction(initial_max_imbalance, final_max_imbalance, fraction));
        }

        if self.expected.boundaries_unchanged {
            checks.push(validate_unchanged(&initial_grid, &result.grid));
        }

        if let Some(ref shift) = self.expected.boundary_shift {
            checks.push(validate_shift(&initial_grid, &result.grid, shift));
        }

        if self.expected.serial_agreement {
            let serial = run_serial(&config, &particles).map_err(|e| e.to_string())?;
            checks.push(validate_serial_agreement(&result, &serial));
        }

        let passed = checks.iter().all(|c| c.passed);

        Ok(TestResult {
            name: self.name.clone(),
            passed,
            checks,
            initial_max_imbalance,
            final_max_imbalance,
            invocations: result.stats.invocations,
            steps: self.steps,
        })
    }
}

fn count_owned(particles: &balance_kernel::ParticleArrays, grid: &DecompositionGrid) -> Vec<u64> {
    let mut counts = vec![0u64; grid.num_ranks()];
    for i in 0..particles.len() {
        counts[grid.rank_of(particles.position(i))] += 1;
    }
    counts
}

fn max_imbalance(counts: &[u64]) -> f64 {
    let total: u64 = counts.iter().sum();
    if total == 0 {
        return 1.0;
    }
    let average = total as f64 / counts.len() as f64;
    counts.iter().map(|&c| c as f64 / average).fold(0.0, f64::max)
}

fn check(name: &str, passed: bool, message: String) -> CheckResult {
    CheckResult {
        name: name.to_string(),
        passed,
        message: Some(message),
    }
}

/// Validate that no particle was lost or duplicated
fn validate_conservation(initial: usize, result: &DistributedResult) -> CheckResult {
    let total: u64 = result.rank_counts.iter().sum();
    let passed = result.particles.len() == initial && total == initial as u64;
    check(
        "Conservation",
        passed,
        format!("initial {}, final {}, sum of rank counts {}", initial, result.particles.len(), total),
    )
}

/// Validate the final imbalance against an absolute limit
fn validate_final_imbalance(value: f64, limit: f64) -> CheckResult {
    check(
        "Final Imbalance",
        value <= limit,
        format!("max imbalance {:.4} (limit: {:.4})", value, limit),
    )
}

/// Validate the final imbalance against the initial one
fn validate_reduction(initial: f64, value: f64, fraction: f64) -> CheckResult {
    let limit = initial * fraction;
    check(
        "Imbalance Reduction",
        value <= limit,
        format!(
            "{:.4} -> {:.4} (limit: {:.0}% of initial = {:.4})",
            initial,
            value,
            fraction * 100.0,
            limit
        ),
    )
}

/// Validate that boundaries never moved
fn validate_unchanged(initial: &DecompositionGrid, last: &DecompositionGrid) -> CheckResult {
    let moved: Vec<String> = Axis::ALL
        .iter()
        .filter(|&&axis| initial.boundaries(axis) != last.boundaries(axis))
        .map(|axis| axis.to_string())
        .collect();
    if moved.is_empty() {
        check("Boundaries Unchanged", true, "all axes at initial positions".to_string())
    } else {
        check("Boundaries Unchanged", false, format!("moved along {}", moved.join(", ")))
    }
}

/// Validate the direction one boundary moved in
fn validate_shift(
    initial: &DecompositionGrid,
    last: &DecompositionGrid,
    shift: &BoundaryShiftCheck,
) -> CheckResult {
    let name = "Boundary Shift";
    let (Some(&before), Some(&after)) = (
        initial.boundaries(shift.axis).get(shift.index),
        last.boundaries(shift.axis).get(shift.index),
    ) else {
        return check(name, false, format!("no boundary {} along {}", shift.index, shift.axis));
    };
    let passed = if shift.lower { after < before } else { after > before };
    check(
        name,
        passed,
        format!(
            "{}[{}]: {:.4} -> {:.4} (expected {})",
            shift.axis,
            shift.index,
            before,
            after,
            if shift.lower { "lower" } else { "higher" }
        ),
    )
}

/// Validate that threaded ranks and a single process agree exactly
fn validate_serial_agreement(threaded: &DistributedResult, serial: &DistributedResult) -> CheckResult {
    let same_grid = Axis::ALL.iter().all(|&axis| {
        let a = threaded.grid.boundaries(axis);
        let b = serial.grid.boundaries(axis);
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
    });
    let same_counts = threaded.rank_counts == serial.rank_counts;
    check(
        "Serial Agreement",
        same_grid && same_counts,
        format!("grid identical: {}, counts identical: {}", same_grid, same_counts),
    )
}

impl TestResult {
    /// Print a summary of the test result
    pub fn print_summary(&self) {
        println!("\n{}", "=".repeat(80));
        println!("Test: {}", self.name);
        println!("{}", "=".repeat(80));
        println!("Status: {}", if self.passed { "PASSED" } else { "FAILED" });
        println!("Steps: {}", self.steps);
        println!("Invocations: {}", self.invocations);
        println!(
            "Max imbalance: {:.4} -> {:.4}",
            self.initial_max_imbalance, self.final_max_imbalance
        );
        println!("\nValidation Checks:");
        for check in &self.checks {
            let status = if check.passed { "PASS" } else { "FAIL" };
            print!("  [{}] {}", status, check.name);
            if let Some(ref msg) = check.message {
                print!(" - {}", msg);
            }
            println!();
        }
        println!("{}", "=".repeat(80));
    }
}

/// Resolve the path of the project's `configs/` directory from a crate root.
pub fn configs_dir(manifest_dir: &str) -> std::path::PathBuf {
    Path::new(manifest_dir)
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join("configs")
}
