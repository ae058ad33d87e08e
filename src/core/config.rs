use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use url::Url;

use crate::core::endpoint::{self, LicenseIdentity};

pub const DATA_DIR_ENV: &str = "TRIGGER_UPDATER_DATA_DIR";
pub const PASSPHRASE_ENV: &str = "TRIGGER_UPDATER_PASSPHRASE";
pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub endpoint: EndpointConfig,

    #[serde(default)]
    pub license: LicenseConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub decrypt: DecryptConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,

    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LicenseConfig {
    #[serde(default)]
    pub number: Option<String>,

    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to an existing SQLite database file.
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,

    #[serde(default = "default_execute_timeout_secs")]
    pub execute_timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecryptConfig {
    #[serde(default)]
    pub passphrase: Option<String>,
}

fn default_probe_timeout_secs() -> u64 {
    10
}
fn default_fetch_timeout_secs() -> u64 {
    30
}
fn default_execute_timeout_secs() -> u64 {
    30
}
fn default_user_agent() -> String {
    endpoint::DEFAULT_USER_AGENT.to_string()
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: None,
            probe_timeout_secs: default_probe_timeout_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            probe_timeout_secs: default_probe_timeout_secs(),
            execute_timeout_secs: default_execute_timeout_secs(),
        }
    }
}

/// `$TRIGGER_UPDATER_DATA_DIR`, else `~/.trigger-updater`.
pub fn resolve_data_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV)
        && !dir.trim().is_empty()
    {
        return Ok(PathBuf::from(dir));
    }
    let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
    Ok(home.join(".trigger-updater"))
}

impl AppConfig {
    /// Load from `path`; a missing file yields the defaults. The passphrase
    /// environment variable overrides the file.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let config: AppConfig = toml::from_str(&content)
                .with_context(|| format!("invalid configuration in {}", path.display()))?;
            info!("Loaded configuration from {}", path.display());
            config
        } else {
            info!("No {} found, using defaults.", path.display());
            Self::default()
        };

        if let Ok(passphrase) = std::env::var(PASSPHRASE_ENV)
            && !passphrase.is_empty()
        {
            config.decrypt.passphrase = Some(passphrase);
        }
        Ok(config)
    }

    pub fn endpoint_url(&self) -> Result<Url> {
        let raw = self
            .endpoint
            .url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| anyhow!("endpoint.url is not configured"))?;
        let url = Url::parse(raw.trim()).with_context(|| format!("invalid endpoint.url '{}'", raw))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(anyhow!("endpoint.url must use http or https, got '{}'", url.scheme()));
        }
        Ok(url)
    }

    pub fn database_path(&self) -> Result<&Path> {
        self.database
            .path
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| anyhow!("database.path is not configured"))
    }

    pub fn license_identity(&self) -> LicenseIdentity {
        LicenseIdentity {
            number: self.license.number.clone(),
            email: self.license.email.clone(),
        }
    }

    pub fn passphrase(&self) -> Option<String> {
        self.decrypt.passphrase.clone().filter(|p| !p.is_empty())
    }

    pub fn endpoint_timeouts(&self) -> (Duration, Duration) {
        (
            Duration::from_secs(self.endpoint.probe_timeout_secs),
            Duration::from_secs(self.endpoint.fetch_timeout_secs),
        )
    }

    pub fn database_timeouts(&self) -> (Duration, Duration) {
        (
            Duration::from_secs(self.database.probe_timeout_secs),
            Duration::from_secs(self.database.execute_timeout_secs),
        )
    }

    /// Copy for display with secrets replaced.
    pub fn masked(&self) -> Self {
        let mut masked = self.clone();
        if masked.decrypt.passphrase.is_some() {
            masked.decrypt.passphrase = Some("********".to_string());
        }
        masked
    }
}
