//! Error types for sws
//!
//! All modules use `SwsResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for sws operations
pub type SwsResult<T> = Result<T, SwsError>;

/// All errors that can occur in sws
#[derive(Error, Debug)]
pub enum SwsError {
    // Job errors
    #[error("Invalid job ID: {0}")]
    InvalidJobId(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Invalid state for job {job_id}: {reason}")]
    InvalidState { job_id: String, reason: String },

    #[error("Source too large: {size} bytes (limit {limit} bytes)")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("Could not allocate a unique job ID after {attempts} attempts")]
    IdCollision { attempts: u32 },

    // Artifact errors
    #[error("Unknown artifact: {0}")]
    UnknownArtifact(String),

    #[error("Artifact not found for job {job_id}: {name}")]
    ArtifactNotFound { job_id: String, name: String },

    // Build errors
    #[error("Compilation failed: {0}")]
    CompilationFailed(String),

    #[error("Stale build lease for {0}")]
    StaleLease(String),

    #[error("Cache entry not found: {0}")]
    CacheEntryNotFound(String),

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Toolchain directory not configured")]
    ToolchainNotConfigured,

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    User(String),
}

impl SwsError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(job_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidState {
            job_id: job_id.into(),
            reason: reason.into(),
        }
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::InvalidJobId(_) => Some("Job IDs are 12-40 characters of a-z and 0-9"),
            Self::ToolchainNotConfigured => {
                Some("Set build.toolchain_dir in the config or export SWS_TOOLCHAIN_DIR")
            }
            Self::ArtifactNotFound { .. } => Some("Run the job until it reports completed"),
            Self::UnknownArtifact(_) => Some("Artifacts are main.js and main.wasm"),
            Self::CacheEntryNotFound(_) => Some("Run `sws cache list` to see valid keys"),
            Self::PayloadTooLarge { .. } => Some("Raise build.max_source_bytes in the config"),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = SwsError::JobNotFound("abc123abc123".to_string());
        assert!(err.to_string().contains("Job not found"));

        let err = SwsError::PayloadTooLarge { size: 11, limit: 10 };
        assert_eq!(err.to_string(), "Source too large: 11 bytes (limit 10 bytes)");
    }

    #[test]
    fn error_hint() {
        let err = SwsError::UnknownArtifact("main.o".to_string());
        assert_eq!(err.hint(), Some("Artifacts are main.js and main.wasm"));
        assert!(SwsError::Internal("x".to_string()).hint().is_none());
    }
}
