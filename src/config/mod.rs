//! Console configuration.
//!
//! Resolution order, later wins:
//! 1. Built-in defaults (`http://localhost:5000`, 20 rows per page, ...)
//! 2. `config.toml` in the platform config directory (or `--config <path>`)
//! 3. `ALUMNI_CONSOLE_*` environment variables

use anyhow::{Context, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::auth::RenewalPolicy;

/// Fallback API address when nothing else is configured.
pub const DEFAULT_API_URL: &str = "http://localhost:5000";

/// Rows requested per paginated GET.
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Summary endpoint read by the stats unit.
pub const DEFAULT_STATS_PATH: &str = "/api/admin/stats";

const ENV_API_URL: &str = "ALUMNI_CONSOLE_API_URL";
const ENV_PAGE_SIZE: &str = "ALUMNI_CONSOLE_PAGE_SIZE";
const ENV_DATA_DIR: &str = "ALUMNI_CONSOLE_DATA_DIR";

/// Top-level configuration for the console core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Base address of the platform API.
    pub api_url: String,
    /// Rows per page for collection fetches.
    pub page_size: u32,
    /// Per-request timeout for every HTTP call.
    pub request_timeout_secs: u64,
    /// How often the session checks its credential for upcoming expiry.
    pub renewal_check_interval_secs: u64,
    /// Remaining lifetime below which a silent renewal is attempted.
    pub renewal_threshold_secs: u64,
    /// Endpoint of the aggregate stats summary.
    pub stats_path: String,
    /// Where the credential database lives. Defaults to the platform data dir.
    pub data_dir: Option<PathBuf>,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            request_timeout_secs: 30,
            renewal_check_interval_secs: 120,
            renewal_threshold_secs: 300,
            stats_path: DEFAULT_STATS_PATH.to_string(),
            data_dir: None,
        }
    }
}

impl ConsoleConfig {
    /// Load from the default config file (if present) and the environment.
    pub fn load() -> Result<Self> {
        let mut config = match default_config_path() {
            Some(path) if path.exists() => Self::load_from(&path)?,
            _ => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from an explicit TOML file, then apply environment overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let mut config: Self = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply `ALUMNI_CONSOLE_*` overrides read through `lookup`.
    ///
    /// Empty values are ignored so an exported-but-blank variable falls back
    /// to the file or the default.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = non_empty(ENV_API_URL) {
            self.api_url = url.trim().to_string();
        }
        if let Some(raw) = non_empty(ENV_PAGE_SIZE) {
            match raw.trim().parse::<u32>() {
                Ok(size) if size > 0 => self.page_size = size,
                _ => tracing::warn!(value = %raw, "ignoring invalid {ENV_PAGE_SIZE}"),
            }
        }
        if let Some(dir) = non_empty(ENV_DATA_DIR) {
            self.data_dir = Some(PathBuf::from(dir.trim()));
        }
    }

    /// Directory holding the credential database.
    pub fn resolve_data_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        project_dirs()
            .map(|dirs| dirs.data_dir().to_path_buf())
            .context("could not determine a data directory; set ALUMNI_CONSOLE_DATA_DIR")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn renewal_policy(&self) -> RenewalPolicy {
        RenewalPolicy {
            check_interval: Duration::from_secs(self.renewal_check_interval_secs.max(1)),
            threshold: Duration::from_secs(self.renewal_threshold_secs),
        }
    }

    /// JSON schema of the config file, pretty-printed.
    pub fn schema_json() -> Result<String> {
        let schema = schemars::schema_for!(ConsoleConfig);
        serde_json::to_string_pretty(&schema).context("failed to serialize config schema")
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to serialize config")
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("org", "alumni", "alumni-console")
}

/// `config.toml` inside the platform config directory.
pub fn default_config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_platform_contract() {
        let config = ConsoleConfig::default();
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.page_size, 20);
        assert_eq!(config.renewal_policy().check_interval, Duration::from_secs(120));
        assert_eq!(config.renewal_policy().threshold, Duration::from_secs(300));
    }

    #[test]
    fn env_overrides_api_url_and_page_size() {
        let mut config = ConsoleConfig::default();
        config.apply_overrides(lookup(&[
            (ENV_API_URL, " https://api.example.org "),
            (ENV_PAGE_SIZE, "50"),
        ]));
        assert_eq!(config.api_url, "https://api.example.org");
        assert_eq!(config.page_size, 50);
    }

    #[test]
    fn blank_env_falls_back_to_default() {
        let mut config = ConsoleConfig::default();
        config.apply_overrides(lookup(&[(ENV_API_URL, "   "), (ENV_PAGE_SIZE, "zero")]));
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn partial_toml_keeps_remaining_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "api_url = \"https://staging.example.org\"\npage_size = 10\n").unwrap();

        let mut config: ConsoleConfig =
            toml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        config.apply_overrides(|_| None);

        assert_eq!(config.api_url, "https://staging.example.org");
        assert_eq!(config.page_size, 10);
        assert_eq!(config.stats_path, DEFAULT_STATS_PATH);
    }

    #[test]
    fn explicit_data_dir_wins() {
        let config = ConsoleConfig {
            data_dir: Some(PathBuf::from("/tmp/console")),
            ..ConsoleConfig::default()
        };
        assert_eq!(config.resolve_data_dir().unwrap(), PathBuf::from("/tmp/console"));
    }

    #[test]
    fn schema_lists_config_keys() {
        let schema = ConsoleConfig::schema_json().unwrap();
        assert!(schema.contains("api_url"));
        assert!(schema.contains("renewal_threshold_secs"));
    }
}
