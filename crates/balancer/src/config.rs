//! Run configuration parsing and validation.

use serde::{Deserialize, Serialize};
use std::fs;

use crate::balance::BalancePolicy;
use crate::error::{BalanceError, Result};

/// Configuration for a decomposed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Human-readable run name.
    pub name: String,
    /// Hilbert curve order: the patch grid is `2^order` per side.
    pub grid_order: u32,
    /// Number of processes in the group.
    pub process_count: usize,
    /// Relative compute weight per process. Defaults to uniform.
    #[serde(default)]
    pub capabilities: Option<Vec<f64>>,
    /// Steps between rebalance attempts.
    #[serde(default = "default_rebalance_every")]
    pub rebalance_every: u64,
    /// Minimum max-to-average ratio improvement to accept a rebalance.
    #[serde(default = "default_improvement_threshold")]
    pub improvement_threshold: f64,
    /// Epsilon floor applied to cost samples of idle patches.
    #[serde(default = "default_cost_floor")]
    pub cost_floor: f64,
    /// Stop after this many timesteps.
    pub max_timesteps: Option<u64>,
}

fn default_rebalance_every() -> u64 {
    20
}

fn default_improvement_threshold() -> f64 {
    0.05
}

fn default_cost_floor() -> f64 {
    1e-9
}

impl RunConfig {
    /// Load configuration from a JSON file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| BalanceError::Config(format!("failed to read {path}: {e}")))?;
        let config: RunConfig = serde_json::from_str(&contents)
            .map_err(|e| BalanceError::Config(format!("failed to parse {path}: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.grid_order > patches::PatchGrid::MAX_ORDER {
            return Err(BalanceError::Config(format!(
                "grid_order must be at most {}",
                patches::PatchGrid::MAX_ORDER
            )));
        }
        if self.process_count == 0 {
            return Err(BalanceError::Config("process_count must be at least 1".into()));
        }
        if let Some(caps) = &self.capabilities {
            if caps.len() != self.process_count {
                return Err(BalanceError::Config(format!(
                    "capabilities has {} entries for {} processes",
                    caps.len(),
                    self.process_count
                )));
            }
            if caps.iter().any(|&c| !c.is_finite() || c <= 0.0) {
                return Err(BalanceError::Config(
                    "capability weights must be positive and finite".into(),
                ));
            }
        }
        if self.rebalance_every == 0 {
            return Err(BalanceError::Config("rebalance_every must be at least 1".into()));
        }
        if !self.improvement_threshold.is_finite() || self.improvement_threshold < 0.0 {
            return Err(BalanceError::Config(
                "improvement_threshold must be non-negative".into(),
            ));
        }
        if !self.cost_floor.is_finite() || self.cost_floor <= 0.0 {
            return Err(BalanceError::Config("cost_floor must be positive".into()));
        }
        if let Some(max_timesteps) = self.max_timesteps {
            if max_timesteps == 0 {
                return Err(BalanceError::Config("max_timesteps must be at least 1".into()));
            }
        }
        Ok(())
    }

    /// The capability vector, expanded to uniform weights when absent.
    pub fn capability_vector(&self) -> Vec<f64> {
        self.capabilities
            .clone()
            .unwrap_or_else(|| vec![1.0; self.process_count])
    }

    /// Balance policy derived from the thresholds in this config.
    pub fn policy(&self) -> BalancePolicy {
        BalancePolicy {
            cost_floor: self.cost_floor,
            improvement_threshold: self.improvement_threshold,
        }
    }
}
