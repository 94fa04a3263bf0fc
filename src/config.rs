//! Declarative policy configuration (feature `config`).
//!
//! ```json
//! {
//!   "default": { "window_size_secs": 60, "max_requests": 10 },
//!   "policies": {
//!     "ORDERS-PER-MINUTE": { "max_requests": 100 },
//!     "EXPORTS-PER-HOUR": { "window_size_secs": 3600, "max_requests": 5 }
//!   }
//! }
//! ```
//!
//! Omitted fields fall back to 60 seconds / 10 requests.

use crate::error::{ConfigError, PolicyError};
use crate::policy::{Policy, PolicyRegistry, DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW_SIZE_SECS};
use serde::Deserialize;
use std::collections::HashMap;

/// One policy as written in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicySpec {
    #[serde(default = "default_window_size_secs")]
    pub window_size_secs: u64,
    #[serde(default = "default_max_requests")]
    pub max_requests: u64,
}

fn default_window_size_secs() -> u64 {
    DEFAULT_WINDOW_SIZE_SECS
}

fn default_max_requests() -> u64 {
    DEFAULT_MAX_REQUESTS
}

impl Default for PolicySpec {
    fn default() -> Self {
        Self { window_size_secs: DEFAULT_WINDOW_SIZE_SECS, max_requests: DEFAULT_MAX_REQUESTS }
    }
}

impl TryFrom<PolicySpec> for Policy {
    type Error = PolicyError;

    fn try_from(spec: PolicySpec) -> Result<Self, Self::Error> {
        Policy::new(spec.window_size_secs, spec.max_requests)
    }
}

/// The full policy table as written in configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyConfig {
    #[serde(default)]
    pub default: PolicySpec,
    #[serde(default)]
    pub policies: HashMap<String, PolicySpec>,
}

impl PolicyConfig {
    /// Parse a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Validate every entry and build the policies.
    pub fn into_policies(self) -> Result<(Policy, HashMap<String, Policy>), ConfigError> {
        let default = Policy::try_from(self.default)
            .map_err(|source| ConfigError::Policy { id: "default".to_string(), source })?;
        let mut policies = HashMap::with_capacity(self.policies.len());
        for (id, spec) in self.policies {
            match Policy::try_from(spec) {
                Ok(policy) => {
                    policies.insert(id, policy);
                }
                Err(source) => return Err(ConfigError::Policy { id, source }),
            }
        }
        Ok((default, policies))
    }

    /// Validate and build a fresh registry.
    pub fn into_registry(self) -> Result<PolicyRegistry, ConfigError> {
        let (default, policies) = self.into_policies()?;
        let registry = PolicyRegistry::new(default);
        registry.replace_all(default, policies);
        Ok(registry)
    }

    /// Validate, then swap the whole table of an existing registry. Leaves `registry` untouched
    /// on error.
    pub fn apply_to(self, registry: &PolicyRegistry) -> Result<(), ConfigError> {
        let (default, policies) = self.into_policies()?;
        registry.replace_all(default, policies);
        Ok(())
    }
}
