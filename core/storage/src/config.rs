//! Client configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

use ossportable_common::{Error, Result};

/// Default address of the API server.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";

/// Settings for [`crate::HttpStorageClient`].
///
/// Stored as JSON. There is no request timeout: a stalled call stays
/// pending until the server answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Address the `/api/{provider}/...` paths are resolved against.
    #[serde(default = "default_base_url")]
    pub base_url: Url,
    /// User-Agent header sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_base_url() -> Url {
    Url::parse(DEFAULT_BASE_URL).expect("default base URL is valid")
}

fn default_user_agent() -> String {
    format!("ossportable/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
        }
    }
}

impl ClientConfig {
    /// Configuration pointing at `base_url` with default settings otherwise.
    ///
    /// # Errors
    /// - `base_url` is not an absolute URL
    pub fn with_base_url(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| Error::InvalidInput(format!("Invalid base URL '{}': {}", base_url, e)))?;
        Ok(Self {
            base_url,
            ..Self::default()
        })
    }

    /// Load configuration from a JSON file.
    ///
    /// # Errors
    /// - File cannot be read
    /// - File is not valid configuration JSON
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        serde_json::from_str(&raw).map_err(|e| {
            Error::Serialization(format!(
                "Invalid config {}: {}",
                path.as_ref().display(),
                e
            ))
        })
    }

    /// Write configuration as pretty JSON, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// `<config dir>/ossportable/config.json`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("ossportable").join("config.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.base_url.as_str(), "http://localhost:8080/");
        assert!(config.user_agent.starts_with("ossportable/"));
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"base_url": "https://portal.example.com/"}"#).unwrap();
        assert_eq!(config.base_url.host_str(), Some("portal.example.com"));
        assert_eq!(config.user_agent, ClientConfig::default().user_agent);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let config = ClientConfig::with_base_url("http://10.0.0.5:9000").unwrap();
        config.save(&path).unwrap();

        assert_eq!(ClientConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            ClientConfig::with_base_url("not a url"),
            Err(Error::InvalidInput(_))
        ));
    }
}
