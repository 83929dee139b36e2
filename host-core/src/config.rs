//! Host configuration with file-backed storage
//!
//! Handles:
//! - The persisted `HostConfig` record (identity, endpoint, models, pricing)
//! - The pid/start-time pair that marks a managed process
//! - Installation paths (config, PID record, logs, node binary)
//! - Gateway token storage in the OS keyring

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keyring::Entry;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::probe::ProbeSettings;

pub const ENV_HOME: &str = "LLM_HOST_HOME";
pub const ENV_RPC_URL: &str = "LLM_HOST_RPC_URL";
pub const ENV_NETWORK: &str = "LLM_HOST_NETWORK";
pub const ENV_WALLET: &str = "LLM_HOST_WALLET";
pub const ENV_NODE_BIN: &str = "LLM_HOST_NODE_BIN";
pub const ENV_GATEWAY_TOKEN: &str = "LLM_HOST_GATEWAY_TOKEN";

pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8545";
pub const DEFAULT_NETWORK: &str = "base-sepolia";

const KEYRING_SERVICE: &str = "llm-host";
const KEYRING_TOKEN_USER: &str = "gateway-token";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not find config directory")]
    NoConfigDir,
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Invalid JSON record: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Keyring error: {0}")]
    Keyring(#[from] keyring::Error),
}

impl ConfigError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        ConfigError::Io { path: path.to_path_buf(), source }
    }
}

/// Persisted host record, one per installation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostConfig {
    pub wallet_address: String,
    pub network: String,
    pub rpc_url: String,
    pub inference_port: u16,
    /// Source of truth for the advertised endpoint; `inference_port` follows it
    pub public_url: String,
    pub models: Vec<String>,
    pub price_per_token: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_start_time: Option<DateTime<Utc>>,
}

impl HostConfig {
    /// Record a managed process; pid and start time always move together
    pub fn mark_running(&mut self, pid: u32, started_at: DateTime<Utc>) {
        self.process_pid = Some(pid);
        self.node_start_time = Some(started_at);
    }

    pub fn clear_process(&mut self) {
        self.process_pid = None;
        self.node_start_time = None;
    }

    pub fn has_process(&self) -> bool {
        self.process_pid.is_some() && self.node_start_time.is_some()
    }

    /// Drop a half-written pid/start-time pair. Returns true if anything changed.
    pub fn normalize_process_fields(&mut self) -> bool {
        if self.process_pid.is_some() != self.node_start_time.is_some() {
            self.clear_process();
            true
        } else {
            false
        }
    }
}

/// Installation layout
#[derive(Debug, Clone)]
pub struct HostPaths {
    pub home: PathBuf,
}

impl HostPaths {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    /// `$LLM_HOST_HOME` if set, otherwise the OS config directory
    pub fn resolve(home_override: Option<PathBuf>) -> Result<Self, ConfigError> {
        if let Some(home) = home_override {
            return Ok(Self::new(home));
        }
        let mut path = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        path.push("llm-host");
        Ok(Self::new(path))
    }

    pub fn config_file(&self) -> PathBuf {
        self.home.join("config.toml")
    }

    pub fn pid_file(&self) -> PathBuf {
        self.home.join("host.pid.json")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.home.join("logs")
    }

    pub fn node_log_file(&self) -> PathBuf {
        self.log_dir().join("node.log")
    }
}

/// Per-invocation runtime settings, filled from flags and environment
#[derive(Debug, Clone)]
pub struct Settings {
    pub paths: HostPaths,
    pub rpc_url: String,
    pub network: String,
    pub wallet_address: Option<String>,
    pub node_binary: Option<PathBuf>,
    pub gateway_token: Option<String>,
    pub probe: ProbeSettings,
}

impl Settings {
    pub fn new(paths: HostPaths) -> Self {
        Self {
            paths,
            rpc_url: DEFAULT_RPC_URL.to_string(),
            network: DEFAULT_NETWORK.to_string(),
            wallet_address: None,
            node_binary: None,
            gateway_token: None,
            probe: ProbeSettings::default(),
        }
    }

    /// Explicit token first, then the OS keyring
    pub fn resolve_gateway_token(&self) -> Option<String> {
        self.gateway_token.clone().or_else(|| load_gateway_token().ok())
    }
}

/// Storage seam for `HostConfig`
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn load(&self) -> Result<Option<HostConfig>, ConfigError>;
    async fn save(&self, config: &HostConfig) -> Result<(), ConfigError>;
}

/// TOML file store
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ConfigStore for FileConfigStore {
    async fn load(&self) -> Result<Option<HostConfig>, ConfigError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ConfigError::io(&self.path, e)),
        };

        if content.trim().is_empty() {
            return Ok(None);
        }

        let mut config: HostConfig = toml::from_str(&content)?;
        if config.normalize_process_fields() {
            warn!(path = %self.path.display(), "Config held a partial pid/start-time pair, clearing both");
        }
        Ok(Some(config))
    }

    async fn save(&self, config: &HostConfig) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(config)?;
        write_atomic(&self.path, content.as_bytes()).await?;
        debug!(path = %self.path.display(), "Config saved");
        Ok(())
    }
}

/// Write through a uniquely named sibling temp file and rename over the target
///
/// The temp file is removed if anything fails before the rename.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ConfigError> {
    let parent = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    tokio::fs::create_dir_all(parent)
        .await
        .map_err(|e| ConfigError::io(parent, e))?;

    let temp_file = NamedTempFile::new_in(parent).map_err(|e| ConfigError::io(parent, e))?;
    tokio::fs::write(temp_file.path(), bytes)
        .await
        .map_err(|e| ConfigError::io(temp_file.path(), e))?;

    let temp_path = temp_file.into_temp_path();
    temp_path.persist(path).map_err(|e| ConfigError::io(path, e.error))
}

/// Load the gateway token from the OS keyring
pub fn load_gateway_token() -> Result<String, ConfigError> {
    let entry = Entry::new(KEYRING_SERVICE, KEYRING_TOKEN_USER)?;
    entry.get_password().map_err(Into::into)
}

/// Save the gateway token to the OS keyring
pub fn save_gateway_token(token: &str) -> Result<(), ConfigError> {
    let entry = Entry::new(KEYRING_SERVICE, KEYRING_TOKEN_USER)?;
    entry.set_password(token).map_err(Into::into)
}

/// Delete the gateway token from the keyring
pub fn delete_gateway_token() -> Result<(), ConfigError> {
    let entry = Entry::new(KEYRING_SERVICE, KEYRING_TOKEN_USER)?;
    entry.delete_credential().map_err(Into::into)
}
