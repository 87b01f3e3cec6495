//! Runtime tunables loaded from an optional `evochora.toml`, falling back to
//! [`Config::default`] when absent — the same optional-manifest pattern mettatron's
//! `backend/modules/package.rs` uses for `metta.toml`.

use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub default_energy: i64,
    pub data_pointer_count: usize,
    pub call_stack_limit: usize,
    pub cost: CostConfig,
    pub conflict_resolution: ConflictResolutionPolicy,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CostConfig {
    pub write_value_factor: i64,
    pub ownership_surcharge: i64,
    pub failure_penalty: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictResolutionPolicy {
    /// The only policy spec.md §4.4 defines: the lowest organism id wins.
    LowestIdWins,
}

impl Default for ConflictResolutionPolicy {
    fn default() -> Self {
        Self::LowestIdWins
    }
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            write_value_factor: 1,
            ownership_surcharge: 5,
            failure_penalty: 2,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_energy: 1000,
            data_pointer_count: crate::organism::DEFAULT_DATA_POINTER_COUNT,
            call_stack_limit: 256,
            cost: CostConfig::default(),
            conflict_resolution: ConflictResolutionPolicy::default(),
        }
    }
}

/// Errors loading or parsing `evochora.toml`.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "failed to read config file: {}", e),
            Self::Parse(e) => write!(f, "failed to parse config file: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    /// Loads `path` if it exists; otherwise returns the default configuration,
    /// exactly as mettatron's package manifest loader treats a missing `metta.toml`.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&text).map_err(ConfigError::Parse)
    }

    pub fn cost_model(&self) -> crate::vm::CostModel {
        crate::vm::CostModel {
            write_value_factor: self.cost.write_value_factor,
            ownership_surcharge: self.cost.ownership_surcharge,
            failure_penalty: self.cost.failure_penalty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = Config::load_or_default(Path::new("/nonexistent/evochora.toml")).unwrap();
        assert_eq!(cfg.default_energy, 1000);
        assert_eq!(cfg.conflict_resolution, ConflictResolutionPolicy::LowestIdWins);
    }

    #[test]
    fn parses_a_partial_toml_document() {
        let parsed: Config = toml::from_str("default_energy = 500\n").unwrap();
        assert_eq!(parsed.default_energy, 500);
        assert_eq!(parsed.call_stack_limit, 256);
    }
}
