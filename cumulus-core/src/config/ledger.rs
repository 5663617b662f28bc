//! Capacity ledger configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::defaults::*;
use super::EnvLookup;
use crate::capacity::OverprovisioningFactors;
use crate::error::{CumulusError, CumulusResult};

/// Where capacity records are kept
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerBackend {
    /// Process-local, lost on exit
    #[default]
    Memory,
    /// redb database file under `data_dir`
    Redb,
}

impl std::str::FromStr for LedgerBackend {
    type Err = CumulusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(LedgerBackend::Memory),
            "redb" => Ok(LedgerBackend::Redb),
            other => Err(CumulusError::configuration(
                "ledger.backend",
                format!("unknown ledger backend '{}'", other),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub backend: LedgerBackend,

    /// Directory holding the ledger database (redb backend only)
    pub data_dir: PathBuf,

    /// Multiplier applied to a joining host's physical CPU
    pub cpu_overprovisioning_factor: f64,

    /// Multiplier applied to a joining host's physical memory
    pub memory_overprovisioning_factor: f64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            backend: LedgerBackend::default(),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            cpu_overprovisioning_factor: DEFAULT_CPU_OVERPROVISIONING_FACTOR,
            memory_overprovisioning_factor: DEFAULT_MEMORY_OVERPROVISIONING_FACTOR,
        }
    }
}

impl LedgerConfig {
    pub fn factors(&self) -> OverprovisioningFactors {
        OverprovisioningFactors {
            cpu: self.cpu_overprovisioning_factor,
            memory: self.memory_overprovisioning_factor,
        }
    }

    pub(crate) fn apply_env(&mut self, env: &EnvLookup<'_>) -> CumulusResult<()> {
        if let Some(val) = env(ENV_LEDGER_BACKEND) {
            self.backend = val.parse()?;
        }

        if let Some(dir) = env(ENV_DATA_DIR) {
            self.data_dir = PathBuf::from(dir);
        }

        Ok(())
    }

    /// Validate ledger configuration
    pub fn validate(&self) -> CumulusResult<()> {
        for (name, factor) in [
            ("ledger.cpu_overprovisioning_factor", self.cpu_overprovisioning_factor),
            ("ledger.memory_overprovisioning_factor", self.memory_overprovisioning_factor),
        ] {
            if !(factor > 0.0 && factor <= MAX_OVERPROVISIONING_FACTOR) {
                return Err(CumulusError::configuration(
                    name,
                    format!(
                        "must be within (0, {}], got {}",
                        MAX_OVERPROVISIONING_FACTOR, factor
                    ),
                ));
            }
        }

        if self.backend == LedgerBackend::Redb && self.data_dir.as_os_str().is_empty() {
            return Err(CumulusError::configuration(
                "ledger.data_dir",
                "data_dir cannot be empty for the redb backend",
            ));
        }

        Ok(())
    }
}
