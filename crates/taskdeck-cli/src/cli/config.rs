use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use taskdeck_core::config::CoreConfig;
use taskdeck_core::constants::DEFAULT_API_URL;

/// CLI configuration that can be loaded from a JSON file
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CliConfig {
    /// REST backend base URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// Session access token, sent as a bearer credential
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Per-request timeout in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl CliConfig {
    /// Load config from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: CliConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// `~/.config/taskdeck/config.json` (or the platform equivalent)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("taskdeck").join("config.json"))
    }

    /// An explicit path must exist; the default one is optional.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::load(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    /// Flags win over the file.
    pub fn with_overrides(mut self, api_url: Option<String>, token: Option<String>) -> Self {
        if api_url.is_some() {
            self.api_url = api_url;
        }
        if token.is_some() {
            self.token = token;
        }
        self
    }

    pub fn core_config(&self) -> CoreConfig {
        let api_url = self.api_url.as_deref().unwrap_or(DEFAULT_API_URL);
        let config = CoreConfig::new(api_url, self.token.clone());
        match self.timeout_secs {
            Some(secs) => config.with_request_timeout(Duration::from_secs(secs)),
            None => config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_config() {
        let json = r#"{
            "apiUrl": "https://tasks.example.com",
            "token": "eyJhbGciOi",
            "timeoutSecs": 10
        }"#;
        let config: CliConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.api_url.as_deref(), Some("https://tasks.example.com"));
        assert_eq!(config.token.as_deref(), Some("eyJhbGciOi"));
        assert_eq!(config.timeout_secs, Some(10));
    }

    #[test]
    fn test_parse_config_minimal() {
        let config: CliConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, CliConfig::default());

        let core = config.core_config();
        assert_eq!(core.api_url, DEFAULT_API_URL);
        assert!(core.token.is_none());
        assert!(core.request_timeout.is_none());
    }

    #[test]
    fn test_load_from_file_and_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"apiUrl": "http://file:3000", "token": "from-file"}}"#).unwrap();

        let config = CliConfig::load_or_default(Some(file.path()))
            .unwrap()
            .with_overrides(None, Some("from-flag".to_string()));
        assert_eq!(config.api_url.as_deref(), Some("http://file:3000"));
        assert_eq!(config.token.as_deref(), Some("from-flag"));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = CliConfig::load_or_default(Some(&dir.path().join("nope.json"))).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(CliConfig::load(file.path()).is_err());
    }
}
