//! Toolchain abstraction
//!
//! A [`BuildExecutor`] turns one source file into the `main.js` + `main.wasm`
//! pair. The cache and orchestrator never look inside the toolchain; they
//! only see an artifact pair or a diagnostic.

pub mod shell;

pub use shell::ShellToolchain;

use crate::error::{SwsError, SwsResult};
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::fs;

/// Name of the uploaded source inside a job or build directory
pub const SOURCE_FILE_NAME: &str = "main.stan";

/// One of the two files a successful build produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Artifact {
    /// Emscripten JS loader
    Js,
    /// Compiled WebAssembly module
    Wasm,
}

impl Artifact {
    pub const ALL: [Artifact; 2] = [Artifact::Js, Artifact::Wasm];

    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Js => "main.js",
            Self::Wasm => "main.wasm",
        }
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

impl FromStr for Artifact {
    type Err = SwsError;

    fn from_str(s: &str) -> SwsResult<Self> {
        match s {
            "main.js" | "js" => Ok(Self::Js),
            "main.wasm" | "wasm" => Ok(Self::Wasm),
            other => Err(SwsError::UnknownArtifact(other.to_string())),
        }
    }
}

/// Paths to a complete artifact pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPair {
    pub js: PathBuf,
    pub wasm: PathBuf,
}

impl ArtifactPair {
    /// The pair as it is laid out in `dir`
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            js: dir.join(Artifact::Js.file_name()),
            wasm: dir.join(Artifact::Wasm.file_name()),
        }
    }

    pub fn path(&self, artifact: Artifact) -> &Path {
        match artifact {
            Artifact::Js => &self.js,
            Artifact::Wasm => &self.wasm,
        }
    }

    /// Both files exist as regular files
    pub async fn both_present(&self) -> bool {
        is_file(&self.js).await && is_file(&self.wasm).await
    }
}

async fn is_file(path: &Path) -> bool {
    fs::metadata(path).await.map(|m| m.is_file()).unwrap_or(false)
}

/// Toolchain output explaining why a build failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic(pub String);

impl Diagnostic {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Diagnostic> for SwsError {
    fn from(d: Diagnostic) -> Self {
        SwsError::CompilationFailed(d.0)
    }
}

/// One invocation of the external compiler
#[async_trait]
pub trait BuildExecutor: Send + Sync {
    /// Build `source` inside `target_dir`.
    ///
    /// On success both artifacts exist in `target_dir`. On failure no
    /// artifact file is left behind in `target_dir`.
    async fn execute(&self, source: &[u8], target_dir: &Path) -> Result<ArtifactPair, Diagnostic>;

    /// Human-readable executor name for logs
    fn executor_name(&self) -> &'static str;
}

/// Confirm both outputs exist in `target_dir`.
///
/// A zero exit status is not enough on its own; a toolchain that exits
/// cleanly without writing one of the files still failed.
pub async fn verify_outputs(target_dir: &Path) -> Result<ArtifactPair, Diagnostic> {
    let pair = ArtifactPair::in_dir(target_dir);
    let mut missing = Vec::new();
    for artifact in Artifact::ALL {
        if !is_file(pair.path(artifact)).await {
            missing.push(artifact.file_name());
        }
    }

    if missing.is_empty() {
        Ok(pair)
    } else {
        Err(Diagnostic::new(format!(
            "toolchain finished without producing {}",
            missing.join(" and ")
        )))
    }
}

/// Delete whatever artifact files a failed build left in `target_dir`
pub async fn discard_outputs(target_dir: &Path) {
    for artifact in Artifact::ALL {
        let _ = fs::remove_file(target_dir.join(artifact.file_name())).await;
    }
}
