//! Constructor methods for CumulusError

use super::types::CumulusError;

impl CumulusError {
    /// Create a configuration error with component and message
    ///
    /// # Examples
    /// ```rust
    /// use cumulus_core::error::CumulusError;
    ///
    /// let err = CumulusError::configuration("planner.dispersion_weight", "must be within [0, 1]");
    /// assert!(err.to_string().contains("dispersion_weight"));
    /// ```
    pub fn configuration(component: impl Into<String>, message: impl Into<String>) -> Self {
        CumulusError::ConfigurationError {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Create a Storage error with a boxed source
    pub fn storage<E: std::error::Error + Send + Sync + 'static>(
        operation: impl Into<String>,
        source: E,
    ) -> Self {
        CumulusError::Storage {
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    /// Create a Serialization error with a boxed source
    pub fn serialization<E: std::error::Error + Send + Sync + 'static>(
        operation: impl Into<String>,
        source: E,
    ) -> Self {
        CumulusError::Serialization {
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        CumulusError::NotFound {
            resource: resource.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        CumulusError::Internal {
            message: message.into(),
        }
    }

    pub fn affinity_conflict(vm: impl Into<String>, message: impl Into<String>) -> Self {
        CumulusError::AffinityConflict {
            vm: vm.into(),
            message: message.into(),
        }
    }

    /// Whether the error is caused by placement policy rather than by resources or infrastructure
    pub fn is_policy_error(&self) -> bool {
        matches!(
            self,
            CumulusError::AffinityConflict { .. } | CumulusError::BareMetalCapacityMismatch { .. }
        )
    }
}

impl From<bincode::Error> for CumulusError {
    fn from(err: bincode::Error) -> Self {
        CumulusError::serialization("bincode", err)
    }
}

impl From<serde_json::Error> for CumulusError {
    fn from(err: serde_json::Error) -> Self {
        CumulusError::serialization("json", err)
    }
}

impl From<toml::de::Error> for CumulusError {
    fn from(err: toml::de::Error) -> Self {
        CumulusError::serialization("toml decode", err)
    }
}
