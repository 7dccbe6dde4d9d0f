//! Configuration for the Clevel hash index.
//!
//! Mirrors the teacher's plain-struct-plus-`Default`-plus-`load_config`
//! layout, scoped down to the knobs the Clevel engine actually needs.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::constants::{ASSOC, RESIZE_BULK};
use crate::types::error::ClevelError;

/// Top-level configuration for a [`crate::ClevelHash`] instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// log2 of the initial top level's bucket count. Initial capacity is
    /// `2^hash_power * ASSOC` slots.
    pub hash_power: u32,

    /// Bucket associativity. Fixed by the data model at 8; kept
    /// configurable only so it round-trips through serialized config files
    /// without silently being ignored.
    pub assoc: usize,

    /// Buckets migrated per resizer iteration.
    pub resize_bulk: usize,

    /// Size in bytes of each arena region.
    pub region_size: usize,

    /// Number of mutator threads the table should plan capacity for.
    pub thread_count: usize,

    /// Backing file for the memory-mapped arena. `None` uses an anonymous
    /// (non-persistent) mapping, suitable for tests.
    pub arena_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hash_power: 4,
            assoc: ASSOC,
            resize_bulk: RESIZE_BULK,
            region_size: 64 * 1024 * 1024,
            thread_count: num_cpus(),
            arena_path: None,
        }
    }
}

impl Config {
    /// Validate the configuration, matching the invariants the data model
    /// requires (`hash_power >= 1`, `assoc == ASSOC`, non-zero bulk size).
    pub fn validate(&self) -> Result<(), ClevelError> {
        if self.hash_power == 0 {
            return Err(ClevelError::InvalidConfig("hash_power must be >= 1".into()));
        }
        if self.assoc != ASSOC {
            return Err(ClevelError::InvalidConfig(format!(
                "assoc must be {ASSOC}, got {}",
                self.assoc
            )));
        }
        if self.resize_bulk == 0 {
            return Err(ClevelError::InvalidConfig("resize_bulk must be >= 1".into()));
        }
        if self.region_size == 0 {
            return Err(ClevelError::InvalidConfig("region_size must be >= 1".into()));
        }
        Ok(())
    }

    /// Initial top level capacity in buckets: `2^hash_power`.
    pub fn initial_capacity(&self) -> usize {
        1usize << self.hash_power
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Load configuration from a TOML file.
pub fn load_config(path: &str) -> Result<Config, ClevelError> {
    let config_str = std::fs::read_to_string(path)
        .map_err(|e| ClevelError::InvalidConfig(format!("reading {path}: {e}")))?;
    let config: Config = toml::from_str(&config_str)
        .map_err(|e| ClevelError::InvalidConfig(format!("parsing {path}: {e}")))?;
    config.validate()?;
    Ok(config)
}

/// Load configuration from a file, falling back to defaults on any error.
pub fn load_config_or_default(path: Option<&str>) -> Config {
    match path {
        Some(path) => match load_config(path) {
            Ok(config) => {
                crate::log_info!("loaded configuration from {}", path);
                config
            }
            Err(e) => {
                crate::log_warn!("failed to load config from {}: {}. using defaults", path, e);
                Config::default()
            }
        },
        None => {
            crate::log_info!("no config file specified, using defaults");
            Config::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn rejects_wrong_assoc() {
        let mut cfg = Config::default();
        cfg.assoc = 4;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn initial_capacity_doubles_hash_power() {
        let mut cfg = Config::default();
        cfg.hash_power = 4;
        assert_eq!(cfg.initial_capacity(), 16);
    }
}
