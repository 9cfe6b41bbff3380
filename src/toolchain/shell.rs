//! Shell-script toolchain
//!
//! Renders the configured script template into `run.sh` inside the build
//! directory and runs it from the toolchain checkout, the way the tinystan
//! makefile expects (`emmake make <model_dir>/main.js`).

use crate::config::schema::BuildConfig;
use crate::error::{SwsError, SwsResult};
use crate::toolchain::{
    discard_outputs, verify_outputs, ArtifactPair, BuildExecutor, Diagnostic, SOURCE_FILE_NAME,
};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Name of the rendered script inside the build directory
const SCRIPT_FILE_NAME: &str = "run.sh";

/// Keep at most this much toolchain output in a diagnostic
const MAX_DIAGNOSTIC_BYTES: usize = 64 * 1024;

/// Build executor that shells out to the compiler toolchain
#[derive(Debug, Clone)]
pub struct ShellToolchain {
    toolchain_dir: PathBuf,
    shell: String,
    script: String,
    timeout: Option<Duration>,
}

impl ShellToolchain {
    pub fn new(
        toolchain_dir: PathBuf,
        shell: impl Into<String>,
        script: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            toolchain_dir,
            shell: shell.into(),
            script: script.into(),
            timeout,
        }
    }

    /// Build from the `[build]` config section
    pub fn from_config(config: &BuildConfig) -> SwsResult<Self> {
        let toolchain_dir = config
            .toolchain_dir
            .clone()
            .ok_or(SwsError::ToolchainNotConfigured)?;

        Ok(Self::new(
            toolchain_dir,
            config.shell.clone(),
            config.script.clone(),
            config.timeout(),
        ))
    }

    /// Substitute directory placeholders into the script template
    fn render_script(&self, model_dir: &Path) -> String {
        let body = self
            .script
            .replace("{model_dir}", &shell_quote(model_dir))
            .replace("{toolchain_dir}", &shell_quote(&self.toolchain_dir));
        format!("#!/usr/bin/env {}\nset -e\n\n{}\n", self.shell, body)
    }

    async fn prepare(&self, source: &[u8], target_dir: &Path) -> Result<PathBuf, Diagnostic> {
        fs::create_dir_all(target_dir)
            .await
            .map_err(|e| Diagnostic::new(format!("creating build directory: {e}")))?;

        // The script runs from the toolchain directory, so paths must be absolute
        let model_dir = fs::canonicalize(target_dir)
            .await
            .map_err(|e| Diagnostic::new(format!("resolving build directory: {e}")))?;

        fs::write(model_dir.join(SOURCE_FILE_NAME), source)
            .await
            .map_err(|e| Diagnostic::new(format!("writing {SOURCE_FILE_NAME}: {e}")))?;

        let script_path = model_dir.join(SCRIPT_FILE_NAME);
        fs::write(&script_path, self.render_script(&model_dir))
            .await
            .map_err(|e| Diagnostic::new(format!("writing {SCRIPT_FILE_NAME}: {e}")))?;

        Ok(script_path)
    }

    async fn invoke(&self, script_path: &Path) -> Result<(), Diagnostic> {
        debug!(
            "Executing: {} {} (in {})",
            self.shell,
            script_path.display(),
            self.toolchain_dir.display()
        );

        let mut command = Command::new(&self.shell);
        command
            .arg(script_path)
            .current_dir(&self.toolchain_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group so a timeout can take make and its children too
        #[cfg(unix)]
        command.process_group(0);

        let child = command
            .spawn()
            .map_err(|e| Diagnostic::new(format!("failed to start {}: {e}", self.shell)))?;
        let pid = child.id();

        let output = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(output) => output,
                Err(_) => {
                    if let Some(pid) = pid {
                        kill_process_group(pid);
                    }
                    return Err(Diagnostic::new(format!(
                        "toolchain timed out after {}s",
                        limit.as_secs()
                    )));
                }
            },
            None => child.wait_with_output().await,
        }
        .map_err(|e| Diagnostic::new(format!("waiting for toolchain: {e}")))?;

        if output.status.success() {
            return Ok(());
        }

        let code = output
            .status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        let mut message = format!("toolchain exited with status {code}");
        for stream in [&output.stderr, &output.stdout] {
            let text = String::from_utf8_lossy(stream);
            let text = text.trim();
            if !text.is_empty() {
                message.push('\n');
                message.push_str(tail(text, MAX_DIAGNOSTIC_BYTES));
            }
        }
        Err(Diagnostic::new(message))
    }

    async fn build(&self, source: &[u8], target_dir: &Path) -> Result<ArtifactPair, Diagnostic> {
        let script_path = self.prepare(source, target_dir).await?;
        self.invoke(&script_path).await?;
        verify_outputs(target_dir).await
    }
}

#[async_trait]
impl BuildExecutor for ShellToolchain {
    async fn execute(&self, source: &[u8], target_dir: &Path) -> Result<ArtifactPair, Diagnostic> {
        match self.build(source, target_dir).await {
            Ok(pair) => {
                info!("Toolchain produced artifacts in {}", target_dir.display());
                Ok(pair)
            }
            Err(diagnostic) => {
                warn!("Toolchain failed in {}", target_dir.display());
                discard_outputs(target_dir).await;
                Err(diagnostic)
            }
        }
    }

    fn executor_name(&self) -> &'static str {
        "shell"
    }
}

#[cfg(unix)]
fn kill_process_group(pgid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pgid) else {
        return;
    };
    // SAFETY: killpg only sends a signal and touches no memory
    if unsafe { libc::killpg(pgid, libc::SIGKILL) } != 0 {
        debug!(
            "Process group {} already gone: {}",
            pgid,
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: u32) {}

/// Single-quote a path for POSIX shells
fn shell_quote(path: &Path) -> String {
    format!("'{}'", path.to_string_lossy().replace('\'', r"'\''"))
}

/// Last `max` bytes of `s`, cut on a char boundary
fn tail(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}
