//! CLI configuration file
//!
//! ```toml
//! token_url = "http://localhost:7071/api/token"
//! test_call_url = "http://localhost:7071/api/test-call"
//! log_level = "debug"
//! request_timeout_secs = 10
//!
//! [coordinator]
//! incoming_policy = "queue"
//! hang_up_policy = "optimistic"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use softphone_core::CoordinatorConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Endpoint issuing access tokens
    pub token_url: Option<String>,
    /// Endpoint that places a test call to this softphone
    pub test_call_url: Option<String>,
    pub log_level: String,
    pub request_timeout_secs: u64,
    pub coordinator: CoordinatorConfig,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            token_url: None,
            test_call_url: None,
            log_level: "info".to_string(),
            request_timeout_secs: 10,
            coordinator: CoordinatorConfig::default(),
        }
    }
}

impl CliConfig {
    /// `<config dir>/softphone/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("softphone").join("config.toml"))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents).context("Invalid configuration file")?;
        config
            .coordinator
            .validate()
            .context("Invalid [coordinator] settings")?;
        Ok(config)
    }

    /// Load from an explicit path, which must exist
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Failed to load config file {}", path.display()))
    }

    /// Load `path` if given, else the default file if present, else defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(default) if default.exists() => Self::load(&default),
            _ => Ok(Self::default()),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }
}
