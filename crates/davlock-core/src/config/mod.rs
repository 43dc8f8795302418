//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::locking::types::MAX_LEASE_SECS;
use crate::token::{MAX_DATACENTER_ID, MAX_WORKER_ID};

/// Davlock configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub locks: LocksConfig,
    pub tokens: TokensConfig,
    pub server: ServerConfig,
}

/// Lease and housekeeping settings of the lock manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocksConfig {
    pub default_timeout_secs: u64,
    pub max_timeout_secs: u64,
    pub temporary_timeout_secs: u64,
    pub cleanup_threshold: u64,
    pub sweep_interval_secs: u64,
}

/// Identity of this process in the lock token space
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokensConfig {
    pub worker_id: i64,
    pub datacenter_id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Prefix stripped from request paths before they reach the lock manager
    pub context_path: String,
}

impl Default for LocksConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 3600,
            max_timeout_secs: 7 * 24 * 3600,
            temporary_timeout_secs: 10,
            cleanup_threshold: 100_000,
            sweep_interval_secs: 60,
        }
    }
}

const KEYS: [&str; 8] = [
    "locks.default_timeout_secs",
    "locks.max_timeout_secs",
    "locks.temporary_timeout_secs",
    "locks.cleanup_threshold",
    "locks.sweep_interval_secs",
    "tokens.worker_id",
    "tokens.datacenter_id",
    "server.context_path",
];

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("DAVLOCK_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("davlock")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save configuration to an explicit file, creating its directory
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        self.validate()?;

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        let locks = &self.locks;
        if locks.default_timeout_secs == 0 {
            return Err(anyhow!("locks.default_timeout_secs must be positive"));
        }
        if locks.max_timeout_secs < locks.default_timeout_secs {
            return Err(anyhow!(
                "locks.max_timeout_secs ({}) must be at least locks.default_timeout_secs ({})",
                locks.max_timeout_secs,
                locks.default_timeout_secs
            ));
        }
        if locks.max_timeout_secs > MAX_LEASE_SECS {
            return Err(anyhow!(
                "locks.max_timeout_secs must not exceed {} (100 years)",
                MAX_LEASE_SECS
            ));
        }
        if locks.temporary_timeout_secs == 0 {
            return Err(anyhow!("locks.temporary_timeout_secs must be positive"));
        }
        if locks.temporary_timeout_secs > MAX_LEASE_SECS {
            return Err(anyhow!(
                "locks.temporary_timeout_secs must not exceed {} (100 years)",
                MAX_LEASE_SECS
            ));
        }
        if locks.sweep_interval_secs == 0 {
            return Err(anyhow!("locks.sweep_interval_secs must be positive"));
        }
        if !(0..=MAX_WORKER_ID).contains(&self.tokens.worker_id) {
            return Err(anyhow!("tokens.worker_id must be between 0 and {}", MAX_WORKER_ID));
        }
        if !(0..=MAX_DATACENTER_ID).contains(&self.tokens.datacenter_id) {
            return Err(anyhow!(
                "tokens.datacenter_id must be between 0 and {}",
                MAX_DATACENTER_ID
            ));
        }
        let context = &self.server.context_path;
        if !context.is_empty() && (!context.starts_with('/') || context.ends_with('/')) {
            return Err(anyhow!(
                "server.context_path must start with '/' and not end with one: {}",
                context
            ));
        }
        Ok(())
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        match key {
            // Lock settings
            "locks.default_timeout_secs" => Ok(self.locks.default_timeout_secs.to_string()),
            "locks.max_timeout_secs" => Ok(self.locks.max_timeout_secs.to_string()),
            "locks.temporary_timeout_secs" => Ok(self.locks.temporary_timeout_secs.to_string()),
            "locks.cleanup_threshold" => Ok(self.locks.cleanup_threshold.to_string()),
            "locks.sweep_interval_secs" => Ok(self.locks.sweep_interval_secs.to_string()),

            // Token settings
            "tokens.worker_id" => Ok(self.tokens.worker_id.to_string()),
            "tokens.datacenter_id" => Ok(self.tokens.datacenter_id.to_string()),

            // Server settings
            "server.context_path" => Ok(self.server.context_path.clone()),

            _ => Err(anyhow!(
                "Unknown configuration key: {}. Use `davlock config list` to see available keys.",
                key
            )),
        }
    }

    /// Set a configuration value by key
    ///
    /// The updated configuration is validated as a whole; on error it is
    /// left unchanged.
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        let mut updated = self.clone();
        match key {
            "locks.default_timeout_secs" => {
                updated.locks.default_timeout_secs = parse_number(key, value)?;
            }
            "locks.max_timeout_secs" => {
                updated.locks.max_timeout_secs = parse_number(key, value)?;
            }
            "locks.temporary_timeout_secs" => {
                updated.locks.temporary_timeout_secs = parse_number(key, value)?;
            }
            "locks.cleanup_threshold" => {
                updated.locks.cleanup_threshold = parse_number(key, value)?;
            }
            "locks.sweep_interval_secs" => {
                updated.locks.sweep_interval_secs = parse_number(key, value)?;
            }
            "tokens.worker_id" => {
                updated.tokens.worker_id = parse_number(key, value)?;
            }
            "tokens.datacenter_id" => {
                updated.tokens.datacenter_id = parse_number(key, value)?;
            }
            "server.context_path" => {
                updated.server.context_path = value.trim().to_string();
            }
            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `davlock config list` to see available keys.",
                    key
                ));
            }
        }

        updated.validate()?;
        *self = updated;
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        KEYS.into_iter()
            .map(|key| {
                let value = self.get(key)?;
                Ok((key.to_string(), value))
            })
            .collect()
    }

    /// Reset configuration to defaults
    pub fn reset() -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> anyhow::Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| anyhow!("Invalid {} value: {}", key, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_default() {
        let config = Config::default();

        assert_eq!(config.locks.default_timeout_secs, 3600);
        assert_eq!(config.locks.max_timeout_secs, 604_800);
        assert_eq!(config.locks.temporary_timeout_secs, 10);
        assert_eq!(config.locks.cleanup_threshold, 100_000);
        assert_eq!(config.locks.sweep_interval_secs, 60);
        assert_eq!(config.tokens.worker_id, 0);
        assert!(config.server.context_path.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_get_and_set() {
        let mut config = Config::default();

        config.set("locks.cleanup_threshold", "500").unwrap();
        assert_eq!(config.get("locks.cleanup_threshold").unwrap(), "500");

        config.set("server.context_path", "/dav").unwrap();
        assert_eq!(config.get("server.context_path").unwrap(), "/dav");

        assert!(config.get("locks.unknown").is_err());
        assert!(config.set("locks.unknown", "1").is_err());
    }

    #[test]
    fn test_set_rejects_invalid_values() {
        let mut config = Config::default();

        assert!(config.set("locks.default_timeout_secs", "soon").is_err());
        assert!(config.set("tokens.worker_id", "32").is_err());
        assert!(config.set("tokens.datacenter_id", "-1").is_err());
        assert!(config.set("locks.max_timeout_secs", "10").is_err());
        assert!(config.set("server.context_path", "dav/").is_err());
        assert!(config.set("locks.temporary_timeout_secs", &u64::MAX.to_string()).is_err());

        // Failed updates leave the config untouched
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_validate_bounds_lease_length() {
        let mut config = Config::default();
        config.locks.default_timeout_secs = u64::MAX;
        config.locks.max_timeout_secs = u64::MAX;
        assert!(config.validate().is_err());

        config.locks.default_timeout_secs = MAX_LEASE_SECS;
        config.locks.max_timeout_secs = MAX_LEASE_SECS;
        assert!(config.validate().is_ok());

        let mut config = Config::default();
        assert!(config.set("locks.max_timeout_secs", "10000000000000000").is_err());
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_list_covers_every_key() {
        let config = Config::default();
        let entries = config.list().unwrap();

        assert_eq!(entries.len(), KEYS.len());
        assert!(entries.iter().any(|(key, value)| key == "locks.sweep_interval_secs" && value == "60"));
    }

    #[test]
    fn test_save_and_load_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.set("tokens.worker_id", "7").unwrap();
        config.save_to(&path).expect("Failed to save");

        let loaded = Config::load_from(&path).expect("Failed to load");
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let loaded = Config::load_from(&temp_dir.path().join("absent.toml")).unwrap();
        assert_eq!(loaded, Config::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "[locks]\ncleanup_threshold = 42\n").unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.locks.cleanup_threshold, 42);
        assert_eq!(loaded.locks.default_timeout_secs, 3600);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "[tokens]\nworker_id = 99\n").unwrap();

        assert!(Config::load_from(&path).is_err());
    }
}
