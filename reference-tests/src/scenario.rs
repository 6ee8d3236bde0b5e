//! Scenario configuration and deterministic particle generation
//!
//! Particle sets are built from an additive low-discrepancy sequence, so a
//! scenario file always produces the same positions on every machine
//! without pulling in a random number generator.

use balance_kernel::{BackendType, ParticleArrays};
use balancer::{BalanceConfig, DistributedConfig};
use serde::{Deserialize, Serialize};
use std::fs;

/// A reference scenario loaded from JSON
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    /// Human-readable scenario name
    pub name: String,
    /// Simulation box
    pub domain: DomainBounds,
    /// Ranks along each axis
    pub ranks: [usize; 3],
    /// Number of particles to generate
    pub particle_count: usize,
    /// How particles are laid out
    pub distribution: Distribution,
    /// Offset into the generating sequence
    #[serde(default)]
    pub seed: u64,
    /// Per-step displacement of every particle
    #[serde(default)]
    pub drift: [f32; 3],
    /// Balance every this many steps
    #[serde(default = "default_trigger_period")]
    pub trigger_period: u64,
    /// Counting backend
    #[serde(default)]
    pub backend: BackendType,
    /// Balancer options
    #[serde(default)]
    pub balance: BalanceConfig,
}

/// Simulation box corners
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainBounds {
    /// Minimum corner [x, y, z]
    pub min: [f64; 3],
    /// Maximum corner [x, y, z]
    pub max: [f64; 3],
}

/// Initial particle layout. Positions are given as fractions of the box.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Distribution {
    /// Evenly spread over the box
    Uniform,
    /// Planar density jump across `position` along `axis`
    Interface {
        /// 0 = x, 1 = y, 2 = z
        axis: usize,
        /// Interface location as a fraction of the box
        position: f64,
        /// Fraction of particles below the interface
        dense_fraction: f64,
    },
    /// A dense cube of particles on top of a uniform background
    Cluster {
        /// Cube centre as box fractions
        center: [f64; 3],
        /// Cube half-width as a box fraction
        half_width: f64,
        /// Fraction of particles inside the cube
        fraction: f64,
    },
}

fn default_trigger_period() -> u64 {
    1
}

/// Plastic-number based increments for a 3D additive recurrence.
const R3_ALPHA: [f64; 3] = [
    0.819_172_513_396_164_4,
    0.671_043_606_703_789_2,
    0.549_700_477_901_970_4,
];

/// Golden-ratio increment deciding which population a particle joins.
const SELECT_ALPHA: f64 = 0.618_033_988_749_894_9;

impl ScenarioConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &str) -> Result<Self, String> {
        let contents = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {}", path, e))?;
        let config: ScenarioConfig = serde_json::from_str(&contents)
            .map_err(|e| format!("Failed to parse config JSON: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        for axis in 0..3 {
            if self.domain.max[axis] <= self.domain.min[axis] {
                return Err(format!("Invalid domain: max[{axis}] must exceed min[{axis}]"));
            }
            if self.ranks[axis] == 0 {
                return Err(format!("ranks[{axis}] must be at least 1"));
            }
        }
        if self.trigger_period == 0 {
            return Err("trigger_period must be at least 1".to_string());
        }
        match &self.distribution {
            Distribution::Uniform => {}
            Distribution::Interface {
                axis,
                position,
                dense_fraction,
            } => {
                if *axis > 2 {
                    return Err(format!("Interface axis must be 0, 1 or 2, got {axis}"));
                }
                if !(0.0 < *position && *position < 1.0) {
                    return Err("Interface position must lie strictly inside (0, 1)".to_string());
                }
                if !(0.0..=1.0).contains(dense_fraction) {
                    return Err("dense_fraction must lie in [0, 1]".to_string());
                }
            }
            Distribution::Cluster {
                half_width,
                fraction,
                ..
            } => {
                if *half_width <= 0.0 {
                    return Err("Cluster half_width must be positive".to_string());
                }
                if !(0.0..=1.0).contains(fraction) {
                    return Err("Cluster fraction must lie in [0, 1]".to_string());
                }
            }
        }
        self.balance.validate().map_err(|e| e.to_string())
    }

    /// Generate the initial particle set
    pub fn generate_particles(&self) -> ParticleArrays {
        let mut particles = ParticleArrays::with_capacity(self.particle_count);
        let lo = self.domain.min;
        let hi = self.domain.max;

        for i in 0..self.particle_count {
            let n = (i as u64 + self.seed + 1) as f64;
            let u = R3_ALPHA.map(|a| (0.5 + a * n).fract());
            let select = (SELECT_ALPHA * n).fract();
            let f = place(&self.distribution, u, select);

            particles.push_particle(
                (lo[0] + f[0] * (hi[0] - lo[0])) as f32,
                (lo[1] + f[1] * (hi[1] - lo[1])) as f32,
                (lo[2] + f[2] * (hi[2] - lo[2])) as f32,
                i as u64,
            );
        }
        particles
    }

    /// Harness configuration for `steps` steps of this scenario
    pub fn distributed_config(&self, steps: u64) -> DistributedConfig {
        DistributedConfig {
            shape: self.ranks,
            domain_min: self.domain.min,
            domain_max: self.domain.max,
            balance: self.balance.clone(),
            trigger_period: self.trigger_period,
            drift: self.drift,
            steps,
            backend: self.backend,
        }
    }
}

/// Map a unit-cube sample to box fractions for `distribution`.
fn place(distribution: &Distribution, u: [f64; 3], select: f64) -> [f64; 3] {
    match distribution {
        Distribution::Uniform => u,
        Distribution::Interface {
            axis,
            position,
            dense_fraction,
        } => {
            let mut f = u;
            f[*axis] = if select < *dense_fraction {
                u[*axis] * position
            } else {
                position + u[*axis] * (1.0 - position)
            };
            f
        }
        Distribution::Cluster {
            center,
            half_width,
            fraction,
        } => {
            if select < *fraction {
                [0, 1, 2].map(|a| (center[a] + (2.0 * u[a] - 1.0) * half_width).clamp(0.0, 1.0))
            } else {
                u
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario(distribution: Distribution) -> ScenarioConfig {
        ScenarioConfig {
            name: "test".to_string(),
            domain: DomainBounds {
                min: [0.0; 3],
                max: [2.0, 1.0, 1.0],
            },
            ranks: [2, 1, 1],
            particle_count: 1000,
            distribution,
            seed: 0,
            drift: [0.0; 3],
            trigger_period: 1,
            backend: BackendType::Cpu,
            balance: BalanceConfig::default(),
        }
    }

    #[test]
    fn generated_particles_stay_in_box() {
        let s = scenario(Distribution::Cluster {
            center: [0.9, 0.5, 0.5],
            half_width: 0.3,
            fraction: 0.5,
        });
        let p = s.generate_particles();
        assert_eq!(p.len(), 1000);
        for i in 0..p.len() {
            let [x, y, z] = p.position(i);
            assert!((0.0..=2.0).contains(&x) && (0.0..=1.0).contains(&y) && (0.0..=1.0).contains(&z));
        }
    }

    #[test]
    fn interface_puts_dense_fraction_below() {
        let s = scenario(Distribution::Interface {
            axis: 0,
            position: 0.25,
            dense_fraction: 0.7,
        });
        let p = s.generate_particles();
        let below = p.x.iter().filter(|&&x| x < 0.5).count();
        assert!((650..=750).contains(&below), "below = {below}");
    }

    #[test]
    fn generation_is_deterministic() {
        let s = scenario(Distribution::Uniform);
        assert_eq!(s.generate_particles(), s.generate_particles());
    }

    #[test]
    fn invalid_interface_rejected() {
        let s = scenario(Distribution::Interface {
            axis: 3,
            position: 0.5,
            dense_fraction: 0.5,
        });
        assert!(s.validate().is_err());
    }
}
