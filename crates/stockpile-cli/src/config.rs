//! Configuration loading.
//!
//! Reads `config.toml` (every key optional), applies environment overrides,
//! and validates the result.  A missing file means "all defaults".

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use stockpile_adapters::{AccessPolicy, DEFAULT_PREFIX};
use stockpile_store::CheckpointPolicy;
use stockpile_web::WebConfig;
use tracing::info;

/// Top-level `config.toml` layout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub general: GeneralConfig,
    pub http: HttpConfig,
    pub storage: StorageConfig,
}

/// `[general]`: chat settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GeneralConfig {
    /// Chat command prefix.
    pub prefix: String,
    /// Discord bot token.  Empty disables the Discord gateway.
    pub token: Option<String>,
    /// Principals allowed to change the inventory from chat.  Empty means
    /// everyone.
    pub owner_ids: Vec<String>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_owned(),
            token: None,
            owner_ids: Vec::new(),
        }
    }
}

/// `[http]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
    pub secret_key: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_owned(),
            port: 8080,
            secret_key: None,
            request_timeout_secs: 10,
        }
    }
}

/// `[storage]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub snapshot_path: PathBuf,
    pub save_idle_secs: u64,
    pub checkpoint_interval_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            snapshot_path: PathBuf::from("data/inventory.json"),
            save_idle_secs: 5,
            checkpoint_interval_secs: 120,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Load `path`, apply process environment overrides and validate.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = match std::fs::read_to_string(path) {
            Ok(text) => Self::from_toml_str(&text)
                .with_context(|| format!("invalid configuration file {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no configuration file, using defaults");
                Self::default()
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to read configuration file {}", path.display()));
            }
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(text)?;
        config.general.token = non_empty(config.general.token.take());
        config.http.secret_key = non_empty(config.http.secret_key.take());
        Ok(config)
    }

    /// Apply `DISCORD_BOT_TOKEN`, `STOCKPILE_PORT` and `STOCKPILE_SECRET_KEY`
    /// overrides, looked up through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(token) = non_empty(lookup("DISCORD_BOT_TOKEN")) {
            self.general.token = Some(token);
        }
        if let Some(port) = non_empty(lookup("STOCKPILE_PORT")) {
            self.http.port = port
                .trim()
                .parse()
                .with_context(|| format!("STOCKPILE_PORT `{port}` is not a valid port"))?;
        }
        if let Some(secret) = non_empty(lookup("STOCKPILE_SECRET_KEY")) {
            self.http.secret_key = Some(secret);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.general.prefix.trim().is_empty() {
            bail!("general.prefix must not be empty");
        }
        if self.general.prefix.chars().any(char::is_whitespace) {
            bail!("general.prefix must not contain whitespace");
        }
        if self.http.port == 0 {
            bail!("http.port must not be 0");
        }
        if self.http.request_timeout_secs == 0 {
            bail!("http.request_timeout_secs must be greater than 0");
        }
        if self.storage.save_idle_secs == 0 {
            bail!("storage.save_idle_secs must be greater than 0");
        }
        if self.storage.checkpoint_interval_secs == 0 {
            bail!("storage.checkpoint_interval_secs must be greater than 0");
        }
        if self.storage.snapshot_path.as_os_str().is_empty() {
            bail!("storage.snapshot_path must not be empty");
        }
        Ok(())
    }

    pub fn discord_token(&self) -> Option<&str> {
        self.general.token.as_deref()
    }

    pub fn access_policy(&self) -> AccessPolicy {
        AccessPolicy::restricted(self.general.owner_ids.iter().cloned())
    }

    pub fn web_config(&self) -> WebConfig {
        WebConfig {
            bind_addr: self.http.bind.clone(),
            port: self.http.port,
            secret_key: self.http.secret_key.clone(),
            request_timeout: Duration::from_secs(self.http.request_timeout_secs),
        }
    }

    pub fn checkpoint_policy(&self) -> CheckpointPolicy {
        CheckpointPolicy {
            idle: Duration::from_secs(self.storage.save_idle_secs),
            interval: Duration::from_secs(self.storage.checkpoint_interval_secs),
        }
    }
}
