//! Core error types for Cumulus

use thiserror::Error;

/// Error type for deployment planning and capacity bookkeeping
#[derive(Error, Debug)]
pub enum CumulusError {
    // Placement outcomes
    #[error("Insufficient capacity to deploy VM '{vm}' in zone {zone_id}: {message}")]
    InsufficientCapacity {
        vm: String,
        zone_id: u64,
        message: String,
    },

    #[error("Affinity conflict for VM '{vm}': {message}")]
    AffinityConflict { vm: String, message: String },

    #[error(
        "Bare-metal offering '{offering}' does not match host {host_id}: offering {expected}, host {actual}"
    )]
    BareMetalCapacityMismatch {
        offering: String,
        host_id: u64,
        expected: String,
        actual: String,
    },

    // Configuration
    #[error("Configuration error in {component}: {message}")]
    ConfigurationError { component: String, message: String },

    // Lookups
    #[error("Resource not found: {resource}")]
    NotFound { resource: String },

    // Storage & serialization
    #[error("Storage operation '{operation}' failed")]
    Storage {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Serialization operation '{operation}' failed")]
    Serialization {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

pub type CumulusResult<T> = std::result::Result<T, CumulusError>;
