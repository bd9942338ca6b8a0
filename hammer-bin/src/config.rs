//! Configuration file loading: a top-level `adapter:` block plus the raw
//! `settings:` block needed to construct [`hammer_core::Settings`] without a
//! real FPGA bitstream to introspect. `SPEC_FULL.md` §5.3/§8.

use hammer_core::Settings;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

/// The `adapter:` block of the configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct AdapterConfig {
    /// TCP port the query server listens on.
    pub port: u16,
    /// Row/cell data pattern: `all_0`, `all_1`, or `striped`.
    pub row_pattern: String,
    /// Number of adjacent rows (each side) included in memset/memtest.
    pub row_check_distance: u32,
    /// DRAM bank all hammering actions target.
    pub bank: u32,
    /// Hammering order strategy: `sequential` or `interleaving`.
    pub hammering_mode: String,
}

/// The full configuration file: adapter behavior plus DRAM settings.
#[derive(Debug, Clone, Deserialize)]
pub struct HammerConfig {
    /// Adapter (server/executor) behavior.
    pub adapter: AdapterConfig,
    /// DRAM timing, geometry and memory-region settings.
    pub settings: Settings,
}

/// Configuration loading failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path that failed to read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The configuration file's contents did not parse as YAML matching
    /// [`HammerConfig`].
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        /// Path that failed to parse.
        path: String,
        /// Underlying parse error.
        #[source]
        source: serde_yaml::Error,
    },
}

/// Loads a [`HammerConfig`] from a YAML file.
pub fn load_config(path: &Path) -> Result<HammerConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|source| ConfigError::Io { path: path.display().to_string(), source })?;
    serde_yaml::from_str(&contents)
        .map_err(|source| ConfigError::Parse { path: path.display().to_string(), source })
}
