//! Run settings and credentials.
//!
//! The command line selects what to evaluate; an optional YAML settings file
//! tunes how backends are reached. Every field has a default, so an empty
//! file is valid.

use crate::model::ComputeDevice;
use crate::runner::PromptTemplate;
use crate::surprisal::SurprisalUnit;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable consulted when no credential file exists
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";
/// Environment variable for the organization identifier
pub const ORG_ENV: &str = "OPENAI_ORGANIZATION";

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML configuration: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Invalid prompt template: {0}")]
    InvalidTemplate(String),
}

/// Settings file contents
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Settings {
    /// Remote completion backend settings
    pub remote: RemoteSettings,
    /// Local backend settings
    pub local: LocalSettings,
    /// Unit for every reported surprisal
    pub surprisal_unit: SurprisalUnit,
    /// Override for the judgment prompt; must contain one `[SENTENCE]`
    pub prompt_template: Option<String>,
}

/// Remote completion backend settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RemoteSettings {
    /// API base URL, without the `/completions` suffix
    pub base_url: String,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// Two-line credential file (API key, organization)
    pub credentials: PathBuf,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            timeout_secs: 60,
            credentials: PathBuf::from("openai_key.txt"),
        }
    }
}

impl RemoteSettings {
    /// Request timeout as a duration
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Local backend settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LocalSettings {
    /// Preferred compute device
    pub device: ComputeDevice,
    /// Hub revision to fetch
    pub revision: String,
    /// Hub cache directory (defaults to the hub's own)
    pub cache_dir: Option<PathBuf>,
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self {
            device: ComputeDevice::default(),
            revision: "main".to_string(),
            cache_dir: None,
        }
    }
}

impl Settings {
    /// Load settings from a YAML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Load settings from a YAML string
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML cannot be parsed.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let settings: Self = serde_yaml::from_str(yaml)?;
        Ok(settings)
    }

    /// Judgment prompt, validated
    ///
    /// # Errors
    ///
    /// Returns `InvalidTemplate` if an override lacks exactly one placeholder.
    pub fn prompt_template(&self) -> Result<PromptTemplate, ConfigError> {
        self.prompt_template
            .as_deref()
            .map_or_else(|| Ok(PromptTemplate::default()), PromptTemplate::new)
    }
}

/// API key and organization for the remote backend
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: String,
    pub organization: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("organization", &self.organization)
            .finish()
    }
}

impl Credentials {
    /// Parse a credential file: API key on the first line, organization on the second.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCredentials` if the key line is missing or empty.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut lines = content.lines().map(str::trim);
        let api_key = lines
            .next()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ConfigError::InvalidCredentials("missing API key line".to_string()))?
            .to_string();
        let organization = lines.next().filter(|o| !o.is_empty()).map(String::from);
        Ok(Self {
            api_key,
            organization,
        })
    }

    /// Read a credential file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is malformed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Read from the credential file, falling back to the environment when it is absent.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCredentials` when neither source provides a key.
    pub fn resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            return Self::load(path);
        }
        let api_key = std::env::var(API_KEY_ENV).map_err(|_| {
            ConfigError::InvalidCredentials(format!(
                "{} not found and {API_KEY_ENV} not set",
                path.display()
            ))
        })?;
        tracing::debug!(path = %path.display(), "Credential file absent, using environment");
        Ok(Self {
            api_key,
            organization: std::env::var(ORG_ENV).ok().filter(|o| !o.is_empty()),
        })
    }
}
