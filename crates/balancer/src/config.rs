//! Balancer configuration parsing and validation

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::decomposition::Axis;
use crate::error::BalanceError;

/// Load balancing options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceConfig {
    /// Balance the x direction
    #[serde(default = "default_enabled")]
    pub x: bool,
    /// Balance the y direction
    #[serde(default = "default_enabled")]
    pub y: bool,
    /// Balance the z direction
    #[serde(default = "default_enabled")]
    pub z: bool,
    /// Load imbalance tolerance (>= 1.0)
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    /// Maximum number of adjustment passes per invocation (>= 1)
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

// Default values
fn default_enabled() -> bool {
    true
}

fn default_tolerance() -> f64 {
    1.02
}

fn default_max_iterations() -> u32 {
    1
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            x: default_enabled(),
            y: default_enabled(),
            z: default_enabled(),
            tolerance: default_tolerance(),
            max_iterations: default_max_iterations(),
        }
    }
}

impl BalanceConfig {
    /// Create a validated configuration.
    pub fn new(
        x: bool,
        y: bool,
        z: bool,
        tolerance: f64,
        max_iterations: u32,
    ) -> Result<Self, BalanceError> {
        let config = Self {
            x,
            y,
            z,
            tolerance,
            max_iterations,
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, BalanceError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| BalanceError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        let config: BalanceConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), BalanceError> {
        validate_tolerance(self.tolerance)?;
        validate_max_iterations(self.max_iterations)?;
        Ok(())
    }

    /// Whether balancing is enabled along `axis`.
    pub fn enabled(&self, axis: Axis) -> bool {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }

    /// Enable or disable balancing along `axis`.
    pub fn set_enabled(&mut self, axis: Axis, enabled: bool) {
        match axis {
            Axis::X => self.x = enabled,
            Axis::Y => self.y = enabled,
            Axis::Z => self.z = enabled,
        }
    }

    /// Largest acceptable |imbalance factor - 1|.
    pub fn allowed_deviation(&self) -> f64 {
        self.tolerance - 1.0
    }
}

pub(crate) fn validate_tolerance(tolerance: f64) -> Result<(), BalanceError> {
    if tolerance.is_nan() || tolerance < 1.0 || tolerance.is_infinite() {
        return Err(BalanceError::InvalidTolerance(tolerance));
    }
    Ok(())
}

pub(crate) fn validate_max_iterations(max_iterations: u32) -> Result<(), BalanceError> {
    if max_iterations < 1 {
        return Err(BalanceError::InvalidMaxIterations(max_iterations));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = BalanceConfig::default();
        assert!(config.x && config.y && config.z);
        assert!((config.tolerance - 1.02).abs() < 1e-12);
        assert_eq!(config.max_iterations, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn tolerance_below_one_rejected() {
        assert!(matches!(
            BalanceConfig::new(true, true, true, 0.99, 1),
            Err(BalanceError::InvalidTolerance(_))
        ));
        assert!(BalanceConfig::new(true, true, true, f64::NAN, 1).is_err());
        assert!(BalanceConfig::new(true, true, true, 1.0, 1).is_ok());
    }

    #[test]
    fn zero_iterations_rejected() {
        assert!(matches!(
            BalanceConfig::new(true, true, true, 1.1, 0),
            Err(BalanceError::InvalidMaxIterations(0))
        ));
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config: BalanceConfig = serde_json::from_str(r#"{"z": false, "max_iterations": 5}"#).unwrap();
        assert!(config.x);
        assert!(!config.z);
        assert_eq!(config.max_iterations, 5);
        assert!((config.tolerance - 1.02).abs() < 1e-12);
    }

    #[test]
    fn load_rejects_invalid_file_contents() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("balance_config_test_{}.json", std::process::id()));
        std::fs::write(&path, r#"{"tolerance": 0.5}"#).unwrap();
        let result = BalanceConfig::load(&path);
        std::fs::remove_file(&path).ok();
        assert!(matches!(result, Err(BalanceError::InvalidTolerance(_))));
    }

    #[test]
    fn shipped_default_config_loads() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../configs/balance-default.json");
        assert_eq!(BalanceConfig::load(path).unwrap(), BalanceConfig::default());
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let result = BalanceConfig::load("/nonexistent/balance.json");
        assert!(matches!(result, Err(BalanceError::ConfigIo { .. })));
    }

    #[test]
    fn axis_toggles() {
        let mut config = BalanceConfig::default();
        config.set_enabled(Axis::Y, false);
        assert!(!config.enabled(Axis::Y));
        assert!(config.enabled(Axis::X));
    }
}
