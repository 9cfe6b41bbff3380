//! Configuration schema for sws
//!
//! Configuration is stored at `~/.config/sws/config.toml`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default ceiling for an uploaded source (10 MiB)
pub const DEFAULT_MAX_SOURCE_BYTES: usize = 10 * 1024 * 1024;

/// Default build lease timeout (5 minutes)
pub const DEFAULT_LEASE_TIMEOUT_SECS: u64 = 5 * 60;

/// Default toolchain invocation, run from the toolchain directory
pub const DEFAULT_BUILD_SCRIPT: &str =
    "emmake make {model_dir}/main.js -j2 && emstrip {model_dir}/main.wasm";

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Where jobs and cache entries live
    pub storage: StorageConfig,

    /// Toolchain invocation
    pub build: BuildConfig,

    /// Cache lease settings
    pub cache: CacheConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,

    /// Enable audit logging
    pub audit_log: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
            audit_log: true,
        }
    }
}

/// Storage locations. Unset paths resolve under `root`, which itself
/// defaults to the user state directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Base directory for everything sws persists
    pub root: Option<PathBuf>,

    /// One directory per job
    pub jobs_dir: Option<PathBuf>,

    /// One directory per source hash
    pub cache_dir: Option<PathBuf>,
}

impl StorageConfig {
    fn root_or(&self, fallback: PathBuf) -> PathBuf {
        self.root.clone().unwrap_or(fallback)
    }

    /// Resolved jobs directory
    pub fn jobs_dir_or(&self, state_dir: PathBuf) -> PathBuf {
        self.jobs_dir
            .clone()
            .unwrap_or_else(|| self.root_or(state_dir).join("jobs"))
    }

    /// Resolved cache directory
    pub fn cache_dir_or(&self, state_dir: PathBuf) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| self.root_or(state_dir).join("cache"))
    }

    /// Resolved audit log path
    pub fn audit_log_or(&self, state_dir: PathBuf) -> PathBuf {
        self.root_or(state_dir).join("audit.log")
    }
}

/// Toolchain settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Directory the build script runs from (the tinystan checkout)
    pub toolchain_dir: Option<PathBuf>,

    /// Shell used to run the build script
    pub shell: String,

    /// Script template; `{model_dir}` and `{toolchain_dir}` are substituted
    pub script: String,

    /// Kill the toolchain and everything it spawned after this many seconds
    /// (0 = no limit)
    pub timeout_secs: u64,

    /// Largest accepted source upload in bytes
    pub max_source_bytes: usize,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            toolchain_dir: None,
            shell: "bash".to_string(),
            script: DEFAULT_BUILD_SCRIPT.to_string(),
            timeout_secs: 0,
            max_source_bytes: DEFAULT_MAX_SOURCE_BYTES,
        }
    }
}

impl BuildConfig {
    /// Toolchain timeout, if any
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// A build lease older than this is treated as abandoned.
    ///
    /// This approximates builder liveness from wall-clock age; it is not a
    /// heartbeat. Set it comfortably above the slowest expected compile.
    pub lease_timeout_secs: u64,

    /// How often a waiting caller re-checks an entry built by another process
    pub wait_poll_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            lease_timeout_secs: DEFAULT_LEASE_TIMEOUT_SECS,
            wait_poll_ms: 500,
        }
    }
}

impl CacheConfig {
    pub fn lease_timeout(&self) -> Duration {
        Duration::from_secs(self.lease_timeout_secs)
    }

    pub fn wait_poll(&self) -> Duration {
        Duration::from_millis(self.wait_poll_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("[general]"));
        assert!(toml.contains("[build]"));
        assert!(toml.contains("[cache]"));
    }

    #[test]
    fn config_deserializes_empty() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.cache.lease_timeout_secs, 300);
        assert_eq!(config.build.max_source_bytes, 10 * 1024 * 1024);
        assert!(config.build.toolchain_dir.is_none());
    }

    #[test]
    fn config_deserializes_partial() {
        let toml = r#"
            [build]
            toolchain_dir = "/opt/tinystan"
            timeout_secs = 900
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(
            config.build.toolchain_dir,
            Some(PathBuf::from("/opt/tinystan"))
        );
        assert_eq!(config.build.timeout(), Some(Duration::from_secs(900)));
        assert_eq!(config.build.shell, "bash"); // default preserved
    }

    #[test]
    fn storage_paths_resolve_under_root() {
        let storage = StorageConfig {
            root: Some(PathBuf::from("/srv/sws")),
            jobs_dir: None,
            cache_dir: Some(PathBuf::from("/fast/cache")),
        };
        let state = PathBuf::from("/home/u/.local/state/sws");

        assert_eq!(storage.jobs_dir_or(state.clone()), PathBuf::from("/srv/sws/jobs"));
        assert_eq!(storage.cache_dir_or(state.clone()), PathBuf::from("/fast/cache"));
        assert_eq!(storage.audit_log_or(state), PathBuf::from("/srv/sws/audit.log"));
    }

    #[test]
    fn zero_timeout_means_unbounded() {
        assert!(BuildConfig::default().timeout().is_none());
    }
}
