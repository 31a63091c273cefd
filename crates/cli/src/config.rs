//! Configuration file for the CLI

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_SERVER: &str = "http://localhost:8080";
pub const DEFAULT_API_URL: &str = "http://localhost:9090";

/// Values used when neither a flag nor an environment variable is given
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Subscriber endpoint of the collector
    pub server: Option<String>,
    /// Health and metrics endpoint of the collector
    pub api_url: Option<String>,
    /// Hostname reported when subscribing
    pub hostname: Option<String>,
}

impl Config {
    /// Load `~/.config/mfctl/config.json`, or defaults when it is absent
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).context("Failed to read config file")?;
        serde_json::from_str(&content).context("Failed to parse config file")
    }

    fn config_path() -> Result<PathBuf> {
        let home = dirs_next::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".config").join("mfctl").join("config.json"))
    }

    pub fn server(&self, flag: Option<String>) -> String {
        flag.or_else(|| self.server.clone())
            .unwrap_or_else(|| DEFAULT_SERVER.to_string())
    }

    pub fn api_url(&self, flag: Option<String>) -> String {
        flag.or_else(|| self.api_url.clone())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
    }

    pub fn hostname(&self, flag: Option<String>) -> String {
        flag.or_else(|| self.hostname.clone())
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or_else(|| "mfctl".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("config.json")).unwrap();

        assert_eq!(config.server(None), DEFAULT_SERVER);
        assert_eq!(config.api_url(None), DEFAULT_API_URL);
    }

    #[test]
    fn test_flag_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"server": "http://collector:8080"}"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.server(None), "http://collector:8080");
        assert_eq!(
            config.server(Some("http://other:8080".into())),
            "http://other:8080"
        );
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "server = nope").unwrap();

        assert!(Config::load_from(&path).is_err());
    }
}
