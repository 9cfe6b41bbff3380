//! Job command - drive one job through its lifecycle
//!
//! Every subcommand that returns a job prints the same JSON body
//! (`job_id`, `status`, and `diagnostic` once a build failed); upload
//! prints `{"success":true}`.

use crate::cli::args::{JobAction, JobArgs, OutputFormat};
use crate::config::Config;
use crate::error::{SwsError, SwsResult};
use crate::fsutil::write_atomic;
use crate::job::{Job, JobId, JobStatus};
use crate::orchestrator::{JobReport, Orchestrator};
use crate::toolchain::Artifact;
use crate::ui::{self, UiContext};
use console::style;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Execute the job command
pub async fn execute(args: JobArgs, config: &Config) -> SwsResult<()> {
    let orch = Orchestrator::from_config(config);

    match args.action {
        JobAction::Create => print_report(&orch.create_job().await?),
        JobAction::Status { job_id } => print_report(&orch.status(&job_id.parse()?).await?),
        JobAction::Upload { job_id, file } => {
            let source = read_source(&file, config.build.max_source_bytes).await?;
            orch.upload(&job_id.parse()?, &source).await?;
            println!("{}", serde_json::json!({ "success": true }));
            Ok(())
        }
        JobAction::Run {
            job_id,
            wait,
            timeout,
        } => run_job(&orch, &job_id.parse()?, wait, timeout).await,
        JobAction::Fetch {
            job_id,
            artifact,
            output,
        } => fetch_artifact(&orch, &job_id.parse()?, &artifact, output).await,
        JobAction::List { format } => list_jobs(&orch, format).await,
        JobAction::Prune { days, yes } => prune_jobs(&orch, days, yes).await,
    }
}

fn print_report(report: &JobReport) -> SwsResult<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}

/// Read a source file, or stdin for "-", refusing anything over `limit`.
pub(crate) async fn read_source(file: &Path, limit: usize) -> SwsResult<Vec<u8>> {
    let mut source = Vec::new();
    // One byte past the limit is enough to know it is too large
    let cap = limit as u64 + 1;

    if file == Path::new("-") {
        tokio::io::stdin()
            .take(cap)
            .read_to_end(&mut source)
            .await
            .map_err(|e| SwsError::io("reading source from stdin", e))?;
    } else {
        let handle = tokio::fs::File::open(file)
            .await
            .map_err(|e| SwsError::io(format!("opening {}", file.display()), e))?;
        handle
            .take(cap)
            .read_to_end(&mut source)
            .await
            .map_err(|e| SwsError::io(format!("reading {}", file.display()), e))?;
    }

    if source.len() > limit {
        return Err(SwsError::PayloadTooLarge {
            size: source.len(),
            limit,
        });
    }
    Ok(source)
}

async fn run_job(orch: &Orchestrator, id: &JobId, wait: bool, timeout: u64) -> SwsResult<()> {
    if wait {
        orch.run_until_terminal(id, Duration::from_secs(timeout))
            .await?;
    } else {
        orch.run(id).await?;
    }
    print_report(&orch.status(id).await?)
}

async fn fetch_artifact(
    orch: &Orchestrator,
    id: &JobId,
    name: &str,
    output: Option<PathBuf>,
) -> SwsResult<()> {
    let artifact: Artifact = name.parse()?;
    let bytes = orch.fetch(id, artifact).await?;

    match output {
        Some(path) => {
            write_atomic(&path, &bytes).await?;
            let ctx = UiContext::detect();
            ui::step_ok_detail(
                &ctx,
                &format!("Saved {}", artifact),
                &path.display().to_string(),
            );
        }
        None => {
            let mut stdout = tokio::io::stdout();
            stdout
                .write_all(&bytes)
                .await
                .map_err(|e| SwsError::io("writing artifact to stdout", e))?;
            stdout
                .flush()
                .await
                .map_err(|e| SwsError::io("flushing stdout", e))?;
        }
    }
    Ok(())
}

async fn list_jobs(orch: &Orchestrator, format: OutputFormat) -> SwsResult<()> {
    let jobs = orch.jobs().list().await?;

    match format {
        OutputFormat::Table => print_job_table(&jobs),
        OutputFormat::Json => {
            let reports: Vec<JobReport> = jobs.iter().map(JobReport::from).collect();
            println!("{}", serde_json::to_string_pretty(&reports)?);
        }
        OutputFormat::Plain => {
            for job in &jobs {
                println!("{}", job.id);
            }
        }
    }
    Ok(())
}

fn print_job_table(jobs: &[Job]) {
    if jobs.is_empty() {
        println!("No jobs found.");
        return;
    }

    println!(
        "{:<34} {:<10} {:<14} {:<20}",
        "JOB", "STATUS", "SOURCE", "CREATED"
    );
    println!("{}", "-".repeat(80));

    for job in jobs {
        let status = match job.status {
            JobStatus::Completed => style("completed").green().to_string(),
            JobStatus::Failed => style("failed").red().to_string(),
            JobStatus::Running => style("running").yellow().to_string(),
            JobStatus::Initiated => style("initiated").dim().to_string(),
        };
        let source = job
            .source_hash
            .as_deref()
            .map(|h| h.chars().take(12).collect::<String>())
            .unwrap_or_else(|| "-".to_string());

        println!(
            "{:<34} {:<10} {:<14} {:<20}",
            job.id.as_str(),
            status,
            source,
            job.created_at.format("%Y-%m-%d %H:%M")
        );
    }

    println!();
    println!("Total: {} job(s)", jobs.len());
}

async fn prune_jobs(orch: &Orchestrator, days: u32, yes: bool) -> SwsResult<()> {
    let ctx = UiContext::detect().with_auto_yes(yes);
    let max_age = chrono::Duration::days(i64::from(days));
    let cutoff = chrono::Utc::now() - max_age;

    let candidates = orch
        .jobs()
        .list()
        .await?
        .into_iter()
        .filter(|j| j.status.is_terminal() && j.updated_at < cutoff)
        .count();

    if candidates == 0 {
        ui::step_info(&ctx, &format!("No finished jobs older than {} days", days));
        return Ok(());
    }

    let message = format!("Delete {} finished job(s)?", candidates);
    if !ui::confirm(&ctx, &message, false).await? {
        ui::step_warn_hint(&ctx, "Nothing deleted", "Pass --yes to skip this prompt");
        return Ok(());
    }

    let pruned = orch.jobs().prune(max_age).await?;
    ui::step_ok(&ctx, &format!("Deleted {} job(s)", pruned));
    Ok(())
}
