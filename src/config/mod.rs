//! Configuration file and storage layout

pub mod schema;

pub use schema::Config;

use crate::error::{SwsError, SwsResult};
use crate::fsutil::write_atomic;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Environment variable pointing at the toolchain checkout
pub const TOOLCHAIN_DIR_ENV: &str = "SWS_TOOLCHAIN_DIR";

/// Locates, reads and writes the config file, and derives storage paths
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// `$XDG_CONFIG_HOME/sws/config.toml` or the platform equivalent
    pub fn new() -> Self {
        Self::with_path(
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("sws")
                .join("config.toml"),
        )
    }

    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Storage root used when `storage.root` is unset
    pub fn state_dir() -> PathBuf {
        dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sws")
    }

    pub fn jobs_dir(config: &Config) -> PathBuf {
        config.storage.jobs_dir_or(Self::state_dir())
    }

    pub fn cache_dir(config: &Config) -> PathBuf {
        config.storage.cache_dir_or(Self::state_dir())
    }

    pub fn audit_log_path(config: &Config) -> PathBuf {
        config.storage.audit_log_or(Self::state_dir())
    }

    /// Read the config file, or defaults when there is none, then apply
    /// environment overrides.
    pub async fn load(&self) -> SwsResult<Config> {
        let mut config = match fs::read_to_string(&self.config_path).await {
            Ok(content) => toml::from_str(&content).map_err(|e| SwsError::ConfigInvalid {
                path: self.config_path.clone(),
                reason: e.to_string(),
            })?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No config at {}, using defaults", self.config_path.display());
                Config::default()
            }
            Err(e) => {
                return Err(SwsError::io(
                    format!("reading config from {}", self.config_path.display()),
                    e,
                ))
            }
        };

        if let Some(dir) = std::env::var_os(TOOLCHAIN_DIR_ENV).filter(|v| !v.is_empty()) {
            debug!("Toolchain dir from {}", TOOLCHAIN_DIR_ENV);
            config.build.toolchain_dir = Some(PathBuf::from(dir));
        }
        Ok(config)
    }

    pub async fn save(&self, config: &Config) -> SwsResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| SwsError::ConfigDirCreate {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }

        let content = toml::to_string_pretty(config)?;
        write_atomic(&self.config_path, content.as_bytes()).await?;
        info!("Configuration saved to {}", self.config_path.display());
        Ok(())
    }

    /// Create the jobs and cache directories under the storage root
    pub async fn ensure_storage_dirs(config: &Config) -> SwsResult<()> {
        for dir in [Self::jobs_dir(config), Self::cache_dir(config)] {
            fs::create_dir_all(&dir)
                .await
                .map_err(|e| SwsError::io(format!("creating directory {}", dir.display()), e))?;
        }
        Ok(())
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}
