//! Application configuration management.
//!
//! This module handles loading and saving the client configuration: the
//! Auth Service base URL, which credential store backs the session, the
//! last used username, and the session lifecycle tunables.
//!
//! Configuration is stored at `~/.config/recetario/config.json`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::api::client::{DEFAULT_API_BASE_URL, DEFAULT_REQUEST_TIMEOUT_SECS};
use crate::auth::credentials::{CredentialStore, FileStore, KeyringStore, MemoryStore};
use crate::auth::token::DEFAULT_NEAR_EXPIRY_SECS;

/// Application name used for config directory paths
pub const APP_NAME: &str = "recetario";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable overriding the configured base URL
pub const API_URL_ENV: &str = "RECETARIO_API_URL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Keyring,
    File,
    Memory,
}

/// Timing and limit knobs for the session lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Renew proactively when the token expires within this many seconds
    pub near_expiry_secs: i64,
    /// Upper bound on a single validate call during bootstrap
    pub validate_timeout_secs: u64,
    /// Deadline for the whole bootstrap sequence
    pub bootstrap_deadline_secs: u64,
    /// How long the logout guard stays armed after firing
    pub logout_reset_ms: u64,
    /// Refresh attempts allowed before the session is abandoned
    pub max_refresh_attempts: u32,
    pub request_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            near_expiry_secs: DEFAULT_NEAR_EXPIRY_SECS,
            validate_timeout_secs: 8,
            bootstrap_deadline_secs: 12,
            logout_reset_ms: 1000,
            max_refresh_attempts: 2,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl SessionConfig {
    pub fn near_expiry(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.near_expiry_secs)
    }

    pub fn validate_timeout(&self) -> Duration {
        Duration::from_secs(self.validate_timeout_secs)
    }

    pub fn bootstrap_deadline(&self) -> Duration {
        Duration::from_secs(self.bootstrap_deadline_secs)
    }

    pub fn logout_reset(&self) -> Duration {
        Duration::from_millis(self.logout_reset_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub api_base_url: Option<String>,
    #[serde(default)]
    pub store: StoreBackend,
    pub last_username: Option<String>,
    #[serde(default)]
    pub session: SessionConfig,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME))
    }

    fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join(CONFIG_FILE))
    }

    /// Resolved base URL: environment, then config file, then default.
    pub fn api_base_url(&self) -> String {
        std::env::var(API_URL_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| self.api_base_url.clone())
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string())
    }

    /// Instantiate the configured credential store.
    pub fn build_store(&self) -> Result<Arc<dyn CredentialStore>> {
        let store: Arc<dyn CredentialStore> = match self.store {
            StoreBackend::Keyring => Arc::new(KeyringStore::new()),
            StoreBackend::File => Arc::new(FileStore::new(Self::config_dir()?)),
            StoreBackend::Memory => Arc::new(MemoryStore::new()),
        };
        Ok(store)
    }
}
