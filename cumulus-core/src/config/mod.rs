//! Configuration for the planning core
//!
//! A structured configuration with defaults for every field, TOML loading,
//! `CUMULUS_*` environment overrides and validation.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::affinity::AffinityGroupType;
use crate::error::{CumulusError, CumulusResult};

pub mod defaults;
pub mod ledger;
pub mod planner;

pub use defaults::*;
pub use ledger::{LedgerBackend, LedgerConfig};
pub use planner::{AllocationAlgorithm, PlannerConfig};

/// Source of environment values, `std::env::var` outside of tests
pub(crate) type EnvLookup<'a> = dyn Fn(&str) -> Option<String> + 'a;

/// Which affinity processors run, in order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AffinityConfig {
    pub processors: Vec<AffinityGroupType>,
}

impl Default for AffinityConfig {
    fn default() -> Self {
        Self {
            processors: AffinityGroupType::ALL.to_vec(),
        }
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CumulusConfig {
    pub planner: PlannerConfig,
    pub ledger: LedgerConfig,
    pub affinity: AffinityConfig,
}

impl CumulusConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and validate a TOML configuration file
    pub fn from_file(path: &Path) -> CumulusResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by environment variables
    pub fn from_env() -> CumulusResult<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `CUMULUS_*` environment variables
    pub fn apply_env(&mut self) -> CumulusResult<()> {
        self.apply_env_from(&|key| std::env::var(key).ok())
    }

    pub(crate) fn apply_env_from(&mut self, env: &EnvLookup<'_>) -> CumulusResult<()> {
        self.planner.apply_env(env)?;
        self.ledger.apply_env(env)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> CumulusResult<()> {
        self.planner.validate()?;
        self.ledger.validate()?;

        let mut seen = Vec::with_capacity(self.affinity.processors.len());
        for group_type in &self.affinity.processors {
            if seen.contains(group_type) {
                return Err(CumulusError::configuration(
                    "affinity.processors",
                    format!("processor '{}' listed twice", group_type),
                ));
            }
            seen.push(*group_type);
        }

        Ok(())
    }
}

/// Builder for CumulusConfig
pub struct CumulusConfigBuilder {
    config: CumulusConfig,
}

impl CumulusConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: CumulusConfig::default(),
        }
    }

    pub fn allocation_algorithm(mut self, algorithm: AllocationAlgorithm) -> Self {
        self.config.planner.allocation_algorithm = algorithm;
        self
    }

    pub fn planners<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.planner.planners = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn dispersion_weight(mut self, weight: f64) -> Self {
        self.config.planner.dispersion_weight = weight;
        self
    }

    pub fn random_seed(mut self, seed: u64) -> Self {
        self.config.planner.random_seed = seed;
        self
    }

    pub fn planner(mut self, planner: PlannerConfig) -> Self {
        self.config.planner = planner;
        self
    }

    pub fn ledger(mut self, ledger: LedgerConfig) -> Self {
        self.config.ledger = ledger;
        self
    }

    pub fn affinity_processors(mut self, processors: Vec<AffinityGroupType>) -> Self {
        self.config.affinity.processors = processors;
        self
    }

    pub fn build(self) -> CumulusResult<CumulusConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for CumulusConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
