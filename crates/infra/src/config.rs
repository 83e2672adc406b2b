//! Configuration loading and representation.

use serde::{Deserialize, Serialize};

/// Default prefix marking framework-private entity fields.
pub const DEFAULT_PRIVATE_PREFIX: &str = "_";

/// Environment variable overriding [`TrackingConfig::private_prefix`].
pub const PRIVATE_PREFIX_ENV: &str = "EVEREST_PRIVATE_PREFIX";

/// Unit-of-work tracking configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Fields whose names start with this prefix are excluded from
    /// fingerprints and clones.
    pub private_prefix: String,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            private_prefix: DEFAULT_PRIVATE_PREFIX.to_string(),
        }
    }
}

impl TrackingConfig {
    /// Load from the process environment, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through an arbitrary variable lookup (empty values are ignored).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        match lookup(PRIVATE_PREFIX_ENV) {
            Some(prefix) if !prefix.is_empty() => Self {
                private_prefix: prefix,
            },
            _ => Self::default(),
        }
    }
}
