//! Server configuration management.
//!
//! Configuration is stored as TOML:
//! - `$CHUNKYARD_CONFIG` if set
//! - Linux: `~/.config/chunkyard/server.toml`
//! - Windows: `%APPDATA%/chunkyard/server.toml`

use std::path::{Path, PathBuf};
use std::time::Duration;

use chunkyard_assembly::{DigestAlgorithm, EngineConfig};
use chunkyard_upload_server::{DEFAULT_ALLOWED_EXTENSIONS, DEFAULT_MAX_CHUNK_BYTES, ServerConfig};
use serde::{Deserialize, Serialize};

/// Environment variable that overrides the config file location.
pub const CONFIG_ENV: &str = "CHUNKYARD_CONFIG";

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address the HTTP server binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Directory for staged chunks. Keep it on the same filesystem as
    /// `upload_dir`: artifacts are published by hard link or rename.
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,

    /// Directory holding assembled files only.
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,

    /// Seconds an untouched staged chunk is kept before it is reaped.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    /// Seconds between background reaper passes.
    #[serde(default = "default_reap_interval_secs")]
    pub reap_interval_secs: u64,

    /// Digest returned by the hash endpoint.
    #[serde(default)]
    pub digest: DigestAlgorithm,

    /// File extensions accepted for upload.
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,

    /// Maximum size of one upload request in bytes.
    #[serde(default = "default_max_chunk_bytes")]
    pub max_chunk_bytes: usize,
}

fn default_bind_addr() -> String {
    "0.0.0.0:5000".into()
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("data").join("staging")
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("data").join("uploads")
}

fn default_retention_secs() -> u64 {
    600
}

fn default_reap_interval_secs() -> u64 {
    60
}

fn default_allowed_extensions() -> Vec<String> {
    DEFAULT_ALLOWED_EXTENSIONS
        .iter()
        .map(|e| e.to_string())
        .collect()
}

fn default_max_chunk_bytes() -> usize {
    DEFAULT_MAX_CHUNK_BYTES
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            staging_dir: default_staging_dir(),
            upload_dir: default_upload_dir(),
            retention_secs: default_retention_secs(),
            reap_interval_secs: default_reap_interval_secs(),
            digest: DigestAlgorithm::default(),
            allowed_extensions: default_allowed_extensions(),
            max_chunk_bytes: default_max_chunk_bytes(),
        }
    }
}

impl Config {
    /// Loads configuration from disk, or creates a default if not found.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&config_path()?)
    }

    /// Loads configuration from `path`, writing defaults there if missing.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            tracing::debug!(path = %path.display(), "configuration loaded");
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Saves the configuration to `path`.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Engine settings derived from this configuration.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            staging_dir: self.staging_dir.clone(),
            upload_dir: self.upload_dir.clone(),
            retention: Duration::from_secs(self.retention_secs),
            digest: self.digest,
        }
    }

    /// HTTP server settings derived from this configuration.
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            allowed_extensions: self.allowed_extensions.clone(),
            max_chunk_bytes: self.max_chunk_bytes,
        }
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs.max(1))
    }
}

/// Returns the configuration file path.
fn config_path() -> anyhow::Result<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        if !path.is_empty() {
            return Ok(PathBuf::from(path));
        }
    }

    #[cfg(target_os = "linux")]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home)
            .join(".config")
            .join("chunkyard")
            .join("server.toml"))
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata).join("chunkyard").join("server.toml"))
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        Ok(PathBuf::from("/tmp/chunkyard/server.toml"))
    }
}
