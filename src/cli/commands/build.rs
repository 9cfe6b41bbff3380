//! Build command - compile one model file end to end

use crate::cli::args::BuildArgs;
use crate::cli::commands::job::read_source;
use crate::config::Config;
use crate::error::{SwsError, SwsResult};
use crate::fsutil::write_atomic;
use crate::job::{JobId, JobStatus};
use crate::orchestrator::Orchestrator;
use crate::toolchain::Artifact;
use crate::ui::{self, TaskSpinner, UiContext, WaitProgress};
use std::time::Duration;
use tokio::fs;
use tokio::time::Instant;

/// Execute the build command
pub async fn execute(args: BuildArgs, config: &Config) -> SwsResult<()> {
    let ctx = UiContext::detect();
    let orch = Orchestrator::from_config(config);
    let name = args
        .file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| args.file.display().to_string());

    ui::intro(&ctx, &format!("sws build {}", name));

    let source = read_source(&args.file, config.build.max_source_bytes).await?;
    let report = orch.create_job().await?;
    let id: JobId = report.job_id.parse()?;
    orch.upload(&id, &source).await?;
    ui::step_ok_detail(&ctx, "Created job", id.as_str());

    let started = Instant::now();
    let max_wait = Duration::from_secs(args.timeout);

    // A cache miss compiles inside this call
    let mut spinner = TaskSpinner::new(&ctx);
    spinner.start(&format!("Compiling {}...", name));
    let mut status = orch.run(&id).await?;

    if status == JobStatus::Running {
        spinner.stop("Another job is compiling the same source");
        let waiting = WaitProgress::new(&ctx, &format!("job {}", id));
        let remaining = max_wait.saturating_sub(started.elapsed());
        let waited = orch.run_until_terminal(&id, remaining).await;
        waiting.finish();
        status = waited?;
        spinner = TaskSpinner::new(&ctx);
    }

    match status {
        JobStatus::Completed => {
            spinner.stop(&format!(
                "Compiled {} in {:.1}s",
                name,
                started.elapsed().as_secs_f64()
            ));
            write_outputs(&orch, &id, &args.output).await?;
            ui::step_ok_detail(&ctx, "Wrote artifacts", &args.output.display().to_string());
            ui::outro_success(&ctx, "Build complete");
            Ok(())
        }
        JobStatus::Failed => {
            spinner.stop_error(&format!("Failed to compile {}", name));
            let job = orch.status(&id).await?;
            let diagnostic = job.diagnostic.unwrap_or_default();
            ui::diagnostic(&ctx, "Toolchain output", &diagnostic);
            ui::outro_error(&ctx, "Build failed");
            Err(SwsError::CompilationFailed(name))
        }
        JobStatus::Running | JobStatus::Initiated => {
            spinner.stop_warn(&format!("Still building after {}s", args.timeout));
            Err(SwsError::User(format!(
                "job {} did not finish within {}s; check it later with `sws job status {}`",
                id, args.timeout, id
            )))
        }
    }
}

async fn write_outputs(orch: &Orchestrator, id: &JobId, dir: &std::path::Path) -> SwsResult<()> {
    fs::create_dir_all(dir)
        .await
        .map_err(|e| SwsError::io(format!("creating {}", dir.display()), e))?;

    for artifact in Artifact::ALL {
        let bytes = orch.fetch(id, artifact).await?;
        write_atomic(&dir.join(artifact.file_name()), &bytes).await?;
    }
    Ok(())
}
