//! Default configuration values for Cumulus
//!
//! This module centralizes all default values to make them easy to find and modify.

// Planner defaults
pub const DEFAULT_PLANNERS: &[&str] = &[
    "bare-metal",
    "user-dispersing",
    "user-concentrated-pod",
    "random",
    "first-fit",
];
pub const DEFAULT_DISPERSION_WEIGHT: f64 = 1.0;
pub const DEFAULT_RANDOM_SEED: u64 = 0x5eed;
/// 1.0 means a cluster is never skipped for being too full
pub const DEFAULT_CLUSTER_DISABLE_THRESHOLD: f64 = 1.0;

// Ledger defaults
pub const DEFAULT_DATA_DIR: &str = "./data";
pub const DEFAULT_CPU_OVERPROVISIONING_FACTOR: f64 = 1.0;
pub const DEFAULT_MEMORY_OVERPROVISIONING_FACTOR: f64 = 1.0;
pub const MAX_OVERPROVISIONING_FACTOR: f64 = 100.0;

// Affinity defaults
pub const DEFAULT_MAX_PER_SCOPE: u32 = 1;

// Environment variable names
pub const ENV_ALLOCATION_ALGORITHM: &str = "CUMULUS_ALLOCATION_ALGORITHM";
pub const ENV_PLANNERS: &str = "CUMULUS_PLANNERS";
pub const ENV_DISPERSION_WEIGHT: &str = "CUMULUS_DISPERSION_WEIGHT";
pub const ENV_RANDOM_SEED: &str = "CUMULUS_RANDOM_SEED";
pub const ENV_LEDGER_BACKEND: &str = "CUMULUS_LEDGER_BACKEND";
pub const ENV_DATA_DIR: &str = "CUMULUS_DATA_DIR";
