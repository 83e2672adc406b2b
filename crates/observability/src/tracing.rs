//! Tracing/logging initialization.
//!
//! The library crates only emit `tracing` events; installing a subscriber is
//! left to whoever owns the process.

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Standard filter directive variable.
pub const FILTER_ENV: &str = "RUST_LOG";

/// Set to `0`/`false` for human-readable output instead of JSON lines.
pub const JSON_ENV: &str = "EVEREST_LOG_JSON";

const DEFAULT_FILTER: &str = "info";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// `EnvFilter` directives, e.g. `everest_infra=debug`.
    pub filter: String,
    pub json: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_string(),
            json: true,
        }
    }
}

impl ObservabilityConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source; unset or blank values keep
    /// the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(filter) = lookup(FILTER_ENV).filter(|v| !v.trim().is_empty()) {
            config.filter = filter;
        }
        if let Some(json) = lookup(JSON_ENV) {
            match json.trim().to_ascii_lowercase().as_str() {
                "0" | "false" | "no" | "off" => config.json = false,
                "1" | "true" | "yes" | "on" => config.json = true,
                _ => {}
            }
        }
        config
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_new(&self.filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    }
}

/// Initialize tracing/logging for the process.
///
/// Returns whether this call installed the global subscriber; later calls are
/// no-ops and return `false`.
pub fn init_with(config: &ObservabilityConfig) -> bool {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(config.env_filter())
        .with_target(false);

    let installed = if config.json {
        builder
            .json()
            .with_timer(tracing_subscriber::fmt::time::SystemTime)
            .try_init()
            .is_ok()
    } else {
        builder.try_init().is_ok()
    };
    if installed {
        ::tracing::debug!(filter = %config.filter, json = config.json, "logging initialized");
    }
    installed
}
