use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use datalib_storage::{HealthMonitor, HealthchecksClient};
use serde::{Deserialize, Serialize};
use tokio::fs;

pub const CONFIG_FILE_NAME: &str = ".datalib.yaml";
pub const DEFAULT_LOG_LEVEL: &str = "info";

pub const ENV_DATABASE_URL: &str = "DATALIB_DATABASE_URL";
pub const ENV_HEALTHCHECKS_API_KEY: &str = "DATALIB_HEALTHCHECKS_API_KEY";
pub const ENV_LOG_LEVEL: &str = "DATALIB_LOG_LEVEL";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthchecksConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

/// Contents of `~/.datalib.yaml`, read once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub healthchecks: HealthchecksConfig,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            healthchecks: HealthchecksConfig::default(),
            log_level: default_log_level(),
        }
    }
}

/// `.datalib.yaml` in the user's home directory.
pub fn default_path() -> Result<PathBuf> {
    let home = dirs::home_dir().context("cannot determine the home directory; pass --config")?;
    Ok(home.join(CONFIG_FILE_NAME))
}

impl AppConfig {
    pub fn from_yaml(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text).context("parsing config yaml")
    }

    /// Reads `path` (a missing file is an empty config) and applies the
    /// `DATALIB_*` environment overrides.
    pub async fn load(path: &Path) -> Result<Self> {
        let mut config = match fs::read_to_string(path).await {
            Ok(text) => Self::from_yaml(&text).with_context(|| format!("reading {}", path.display()))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(err) => return Err(err).with_context(|| format!("reading {}", path.display())),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(url) = lookup(ENV_DATABASE_URL) {
            self.database.url = url;
        }
        if let Some(key) = lookup(ENV_HEALTHCHECKS_API_KEY) {
            self.healthchecks.api_key = Some(key);
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.log_level = level;
        }
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        let text = serde_yaml::to_string(self).context("serializing config")?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        fs::write(path, text)
            .await
            .with_context(|| format!("writing {}", path.display()))
    }

    pub fn database_url(&self) -> Result<&str> {
        let url = self.database.url.trim();
        if url.is_empty() {
            bail!("no database url configured; run `datalib init` or set {ENV_DATABASE_URL}");
        }
        Ok(url)
    }

    /// The healthchecks.io client, when an api key is configured.
    pub fn monitor(&self) -> Result<Option<Arc<dyn HealthMonitor>>> {
        let Some(api_key) = self
            .healthchecks
            .api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
        else {
            return Ok(None);
        };
        let client = HealthchecksClient::new(api_key).context("building healthchecks client")?;
        Ok(Some(Arc::new(client)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_path_is_in_the_home_directory() {
        let Some(home) = dirs::home_dir() else { return };
        assert_eq!(default_path().unwrap(), home.join(".datalib.yaml"));
    }

    #[test]
    fn yaml_fills_missing_sections_with_defaults() {
        let config = AppConfig::from_yaml("database:\n  url: postgres://localhost/lib\n").unwrap();
        assert_eq!(config.database.url, "postgres://localhost/lib");
        assert_eq!(config.healthchecks.api_key, None);
        assert_eq!(config.log_level, "info");
        assert_eq!(AppConfig::from_yaml("").unwrap(), AppConfig::default());
        assert!(AppConfig::from_yaml("database: [").is_err());
    }

    #[test]
    fn environment_overrides_file_values() {
        let mut config = AppConfig::from_yaml("database:\n  url: postgres://file/lib\nlog_level: warn\n").unwrap();
        let env = HashMap::from([
            (ENV_DATABASE_URL, "postgres://env/lib"),
            (ENV_HEALTHCHECKS_API_KEY, "hc-key"),
            (ENV_LOG_LEVEL, " "),
        ]);
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.database_url().unwrap(), "postgres://env/lib");
        assert_eq!(config.healthchecks.api_key.as_deref(), Some("hc-key"));
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    fn blank_database_url_is_an_error() {
        assert!(AppConfig::default().database_url().is_err());
        assert!(AppConfig::default().monitor().unwrap().is_none());
    }

    #[tokio::test]
    async fn saved_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE_NAME);
        let config = AppConfig {
            database: DatabaseConfig {
                url: "postgres://u:p@localhost:5432/lib".into(),
            },
            ..AppConfig::default()
        };
        config.save(&path).await.unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(!text.contains("api_key"));
        assert_eq!(AppConfig::from_yaml(&text).unwrap(), config);
    }
}
