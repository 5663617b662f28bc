//! Planner configuration

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::defaults::*;
use super::EnvLookup;
use crate::capacity::ResourceType;
use crate::error::{CumulusError, CumulusResult};

/// Global allocation algorithm; decides which of the first-fit family is eligible
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationAlgorithm {
    #[default]
    FirstFit,
    Random,
    UserDispersing,
    UserConcentratedPod,
}

impl AllocationAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            AllocationAlgorithm::FirstFit => "first_fit",
            AllocationAlgorithm::Random => "random",
            AllocationAlgorithm::UserDispersing => "user_dispersing",
            AllocationAlgorithm::UserConcentratedPod => "user_concentrated_pod",
        }
    }
}

impl std::fmt::Display for AllocationAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AllocationAlgorithm {
    type Err = CumulusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "first_fit" | "firstfit" => Ok(AllocationAlgorithm::FirstFit),
            "random" => Ok(AllocationAlgorithm::Random),
            "user_dispersing" | "userdispersing" => Ok(AllocationAlgorithm::UserDispersing),
            "user_concentrated_pod" | "userconcentratedpod" => {
                Ok(AllocationAlgorithm::UserConcentratedPod)
            }
            other => Err(CumulusError::configuration(
                "planner.allocation_algorithm",
                format!("unknown allocation algorithm '{}'", other),
            )),
        }
    }
}

/// Planner selection and tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub allocation_algorithm: AllocationAlgorithm,

    /// Planner names in priority order
    pub planners: Vec<String>,

    /// Weight of the account's VM count against capacity when dispersing (0..=1)
    pub dispersion_weight: f64,

    /// Resource whose utilization ranks candidates by capacity
    pub capacity_ordering: ResourceType,

    /// Clusters whose allocated CPU fraction would exceed this are skipped
    pub cluster_cpu_disable_threshold: f64,

    pub cluster_memory_disable_threshold: f64,

    /// Seed of the random planner's shuffle
    pub random_seed: u64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            allocation_algorithm: AllocationAlgorithm::default(),
            planners: DEFAULT_PLANNERS.iter().map(|s| s.to_string()).collect(),
            dispersion_weight: DEFAULT_DISPERSION_WEIGHT,
            capacity_ordering: ResourceType::Cpu,
            cluster_cpu_disable_threshold: DEFAULT_CLUSTER_DISABLE_THRESHOLD,
            cluster_memory_disable_threshold: DEFAULT_CLUSTER_DISABLE_THRESHOLD,
            random_seed: DEFAULT_RANDOM_SEED,
        }
    }
}

impl PlannerConfig {
    pub(crate) fn apply_env(&mut self, env: &EnvLookup<'_>) -> CumulusResult<()> {
        if let Some(val) = env(ENV_ALLOCATION_ALGORITHM) {
            self.allocation_algorithm = val.parse()?;
        }

        if let Some(val) = env(ENV_PLANNERS) {
            self.planners = val
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(String::from)
                .collect();
        }

        if let Some(val) = env(ENV_DISPERSION_WEIGHT) {
            self.dispersion_weight = val.parse().map_err(|_| {
                CumulusError::configuration(
                    "planner.dispersion_weight",
                    format!("Invalid {}: '{}'", ENV_DISPERSION_WEIGHT, val),
                )
            })?;
        }

        if let Some(val) = env(ENV_RANDOM_SEED) {
            self.random_seed = val.parse().map_err(|_| {
                CumulusError::configuration(
                    "planner.random_seed",
                    format!("Invalid {}: '{}'", ENV_RANDOM_SEED, val),
                )
            })?;
        }

        Ok(())
    }

    /// Validate planner configuration
    pub fn validate(&self) -> CumulusResult<()> {
        if !(0.0..=1.0).contains(&self.dispersion_weight) {
            return Err(CumulusError::configuration(
                "planner.dispersion_weight",
                format!("must be within [0, 1], got {}", self.dispersion_weight),
            ));
        }

        for (name, threshold) in [
            ("planner.cluster_cpu_disable_threshold", self.cluster_cpu_disable_threshold),
            ("planner.cluster_memory_disable_threshold", self.cluster_memory_disable_threshold),
        ] {
            if !(threshold > 0.0 && threshold <= 1.0) {
                return Err(CumulusError::configuration(
                    name,
                    format!("must be within (0, 1], got {}", threshold),
                ));
            }
        }

        if self.planners.is_empty() {
            return Err(CumulusError::configuration(
                "planner.planners",
                "at least one planner must be configured",
            ));
        }

        Ok(())
    }
}
