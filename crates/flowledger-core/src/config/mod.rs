//! Configuration management with file persistence

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::flow::IdSelector;
use crate::storage::{default_database_path, DatabaseConfig, DEFAULT_MAX_CONNECTIONS};

/// Environment variable overriding the config directory
pub const CONFIG_DIR_ENV: &str = "FLOWLEDGER_CONFIG_DIR";

/// Environment variable overriding the database path
pub const DATABASE_ENV: &str = "FLOWLEDGER_DB";

/// flowledger configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub reconciliation: ReconciliationSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    pub path: PathBuf,
    pub max_connections: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationSettings {
    /// Query producing the ids of applications that still exist
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_application_ids_query: Option<String>,
    /// User recorded on mutations when none is given
    pub default_user: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseSettings::default(),
            reconciliation: ReconciliationSettings::default(),
        }
    }
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

impl Default for ReconciliationSettings {
    fn default() -> Self {
        Self {
            active_application_ids_query: None,
            default_user: "flowledger".to_string(),
        }
    }
}

impl DatabaseSettings {
    /// Database path, with `FLOWLEDGER_DB` taking precedence over the file
    pub fn resolved_path(&self) -> PathBuf {
        env::var_os(DATABASE_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| self.path.clone())
    }

    /// Storage configuration for these settings
    pub fn database_config(&self) -> DatabaseConfig {
        DatabaseConfig::file(self.resolved_path()).max_connections(self.max_connections)
    }
}

impl ReconciliationSettings {
    /// Selector over the active application ids, built from the configured query
    pub fn active_application_selector(&self) -> crate::Result<IdSelector> {
        match &self.active_application_ids_query {
            Some(query) => Ok(IdSelector::sql(query.clone())),
            None => Err(crate::Error::ConfigError(
                "reconciliation.active_application_ids_query is not set".to_string(),
            )),
        }
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var(CONFIG_DIR_ENV) {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("flowledger")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or use defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from a specific file
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

    /// Save configuration to a specific file
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
        if self.database.max_connections == 0 {
            return Err(anyhow!("database.max_connections must be at least 1"));
        }
        if self.database.path.as_os_str().is_empty() {
            return Err(anyhow!("database.path must not be empty"));
        }
        if self.reconciliation.default_user.trim().is_empty() {
            return Err(anyhow!("reconciliation.default_user must not be empty"));
        }
        if let Some(query) = &self.reconciliation.active_application_ids_query {
            let head = query.trim_start().to_ascii_uppercase();
            if !(head.starts_with("SELECT") || head.starts_with("VALUES")) {
                return Err(anyhow!(
                    "reconciliation.active_application_ids_query must be a SELECT or VALUES query"
                ));
            }
        }
        Ok(())
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        match key {
            "database.path" => Ok(self.database.path.display().to_string()),
            "database.max_connections" => Ok(self.database.max_connections.to_string()),
            "reconciliation.active_application_ids_query" => Ok(self
                .reconciliation
                .active_application_ids_query
                .clone()
                .unwrap_or_else(|| "(not set)".to_string())),
            "reconciliation.default_user" => Ok(self.reconciliation.default_user.clone()),
            _ => Err(unknown_key(key)),
        }
    }

    /// Set a configuration value by key
    ///
    /// The result is validated; on failure the configuration is left unchanged.
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        let mut updated = self.clone();
        match key {
            "database.path" => {
                updated.database.path = PathBuf::from(value);
            }
            "database.max_connections" => {
                updated.database.max_connections = value
                    .parse()
                    .with_context(|| format!("Invalid max_connections value: {}", value))?;
            }
            "reconciliation.active_application_ids_query" => {
                let value = value.trim();
                updated.reconciliation.active_application_ids_query =
                    (!value.is_empty()).then(|| value.to_string());
            }
            "reconciliation.default_user" => {
                updated.reconciliation.default_user = value.to_string();
            }
            _ => return Err(unknown_key(key)),
        }
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        let keys = [
            "database.path",
            "database.max_connections",
            "reconciliation.active_application_ids_query",
            "reconciliation.default_user",
        ];

        keys.into_iter()
            .map(|key| Ok((key.to_string(), self.get(key)?)))
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

fn unknown_key(key: &str) -> anyhow::Error {
    anyhow!(
        "Unknown configuration key: {}. Use `flowledger config list` to see available keys.",
        key
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();

        assert_eq!(config.database.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert!(config.database.path.ends_with("flowledger.db"));
        assert!(config.reconciliation.active_application_ids_query.is_none());
        assert_eq!(config.reconciliation.default_user, "flowledger");
        config.validate().unwrap();
    }

    #[test]
    fn test_get_and_set() {
        let mut config = Config::default();

        config.set("database.max_connections", "8").unwrap();
        assert_eq!(config.get("database.max_connections").unwrap(), "8");

        config
            .set("reconciliation.active_application_ids_query", "SELECT id FROM application")
            .unwrap();
        assert_eq!(
            config.get("reconciliation.active_application_ids_query").unwrap(),
            "SELECT id FROM application"
        );

        config.set("reconciliation.active_application_ids_query", "").unwrap();
        assert!(config.reconciliation.active_application_ids_query.is_none());
    }

    #[test]
    fn test_set_rejects_invalid_values() {
        let mut config = Config::default();

        assert!(config.set("database.max_connections", "lots").is_err());
        assert!(config.set("database.max_connections", "0").is_err());
        assert!(config
            .set("reconciliation.active_application_ids_query", "DELETE FROM application")
            .is_err());
        assert!(config.set("reconciliation.default_user", "  ").is_err());
        assert!(config.set("no.such.key", "x").is_err());

        // Rejected values leave the config untouched
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_list_covers_every_key() {
        let config = Config::default();
        let keys: Vec<String> = config.list().unwrap().into_iter().map(|(k, _)| k).collect();

        assert_eq!(keys.len(), 4);
        for key in &keys {
            assert!(config.get(key).is_ok());
        }
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.set("database.path", "/var/lib/flows.db").unwrap();
        config.set("reconciliation.default_user", "ops").unwrap();
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = Config::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(loaded, Config::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[reconciliation]\ndefault_user = \"ops\"\n").unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.reconciliation.default_user, "ops");
        assert_eq!(loaded.database, DatabaseSettings::default());
    }

    #[test]
    fn test_active_application_selector() {
        let mut settings = ReconciliationSettings::default();
        let err = settings.active_application_selector().unwrap_err();
        assert_eq!(err.code(), "E600");

        settings.active_application_ids_query = Some("SELECT id FROM application".into());
        let selector = settings.active_application_selector().unwrap();
        assert_eq!(selector.fragments().len(), 1);
    }
}
