//! Job command handlers
//!
//! Handles all job-related CLI commands: submitting a repository, viewing a
//! job's status, following it to completion, and cancelling it.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;
use gitcast_client::{ClientError, OrchestratorClient};
use gitcast_core::domain::job::JobStatus;
use gitcast_core::domain::options::JobOptions;
use gitcast_core::dto::job::{JobSnapshot, SubmitJob};
use serde_json::{Map, Value as JsonValue};
use std::time::Duration;
use uuid::Uuid;

use crate::config::Config;

/// Job subcommands
#[derive(Subcommand)]
pub enum JobCommands {
    /// Submit a repository for processing
    Submit {
        /// Repository URL or owner/repo shorthand
        repository: String,

        /// Depth of the code analysis
        #[arg(long, value_parser = ["overview", "standard", "deep"])]
        detail_level: Option<String>,

        /// Length of the generated video
        #[arg(long, value_parser = ["short", "medium", "long"])]
        length: Option<String>,

        /// Narration voice
        #[arg(long)]
        voice: Option<String>,

        /// Output resolution
        #[arg(long, value_parser = ["720p", "1080p"])]
        resolution: Option<String>,

        /// Cancel the job if it has not finished after this many seconds
        #[arg(long)]
        deadline: Option<u64>,

        /// Follow the job until it finishes
        #[arg(short, long)]
        wait: bool,
    },
    /// Get job status
    Status {
        /// Job ID
        id: Uuid,
    },
    /// Follow a job until it finishes
    Watch {
        /// Job ID
        id: Uuid,

        /// Seconds between polls
        #[arg(long, default_value = "2")]
        interval: u64,
    },
    /// Cancel a job
    Cancel {
        /// Job ID
        id: Uuid,
    },
}

/// Handle job commands
///
/// Routes job subcommands to their respective handlers.
pub async fn handle_job_command(command: JobCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        JobCommands::Submit {
            repository,
            detail_level,
            length,
            voice,
            resolution,
            deadline,
            wait,
        } => {
            let options = build_options(detail_level, length, voice, resolution)?;
            let req = SubmitJob {
                input_identity: repository,
                options,
                deadline_seconds: deadline,
            };
            submit_job(&client, req, wait).await
        }
        JobCommands::Status { id } => get_job(&client, id).await,
        JobCommands::Watch { id, interval } => {
            watch_job(&client, id, Duration::from_secs(interval.max(1))).await
        }
        JobCommands::Cancel { id } => cancel_job(&client, id).await,
    }
}

/// Builds options from the flags that were given; the rest keep their defaults
fn build_options(
    detail_level: Option<String>,
    length: Option<String>,
    voice: Option<String>,
    resolution: Option<String>,
) -> Result<JobOptions> {
    let mut fields = Map::new();
    let flags = [
        ("detail_level", detail_level),
        ("target_length", length),
        ("voice", voice),
        ("resolution", resolution),
    ];
    for (name, value) in flags {
        if let Some(value) = value {
            fields.insert(name.to_string(), JsonValue::String(value));
        }
    }

    let options: JobOptions =
        serde_json::from_value(JsonValue::Object(fields)).context("Invalid job options")?;
    options
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid job options: {}", e))?;
    Ok(options)
}

/// Submit a job and optionally follow it
async fn submit_job(client: &OrchestratorClient, req: SubmitJob, wait: bool) -> Result<()> {
    let accepted = match client.submit_job(&req).await {
        Ok(accepted) => accepted,
        Err(ClientError::RateLimited { retry_after, .. }) => {
            let hint = retry_after
                .map(|s| format!(" Try again in {}s.", s))
                .unwrap_or_default();
            anyhow::bail!("Too many submissions.{}", hint);
        }
        Err(e) => return Err(e).context("Failed to submit job"),
    };

    println!("{}", "✓ Job submitted".green().bold());
    println!("  ID:        {}", accepted.job_id.to_string().cyan());
    println!("  Status:    {}", colorize_status(&accepted.status));
    println!(
        "  Estimated: {}",
        format_duration(accepted.estimated_time_seconds).dimmed()
    );

    if wait {
        println!();
        watch_job(client, accepted.job_id, Duration::from_secs(2)).await?;
    }

    Ok(())
}

/// Get and display a single job
async fn get_job(client: &OrchestratorClient, id: Uuid) -> Result<()> {
    let job = client.get_job(id).await.map_err(|e| not_found(e, id))?;

    print_job_details(&job);

    Ok(())
}

/// Follow a job, printing each change, until it finishes
async fn watch_job(client: &OrchestratorClient, id: Uuid, interval: Duration) -> Result<()> {
    let job = client
        .wait_for_completion(id, interval, None, print_progress)
        .await
        .map_err(|e| not_found(e, id))?;

    println!();
    print_job_details(&job);

    if job.status != JobStatus::Succeeded {
        anyhow::bail!("Job {} finished as {}", id, job.status);
    }
    Ok(())
}

/// Request cancellation of a job
async fn cancel_job(client: &OrchestratorClient, id: Uuid) -> Result<()> {
    let response = client.cancel_job(id).await.map_err(|e| not_found(e, id))?;

    if response.cancel_requested {
        println!(
            "{} Cancellation requested for job {}",
            "✓".green(),
            id.to_string().cyan()
        );
    } else {
        println!(
            "{} Job {} already finished as {}",
            "⚠".yellow(),
            id.to_string().cyan(),
            colorize_status(&response.status)
        );
    }

    Ok(())
}

fn not_found(err: ClientError, id: Uuid) -> anyhow::Error {
    if err.is_not_found() {
        anyhow::anyhow!("Job {} not found", id)
    } else {
        anyhow::Error::new(err)
    }
}

/// Print one progress line
fn print_progress(job: &JobSnapshot) {
    let stage = job
        .current_stage
        .map(|s| s.to_string())
        .unwrap_or_else(|| "-".to_string());
    println!(
        "  {} {:>3}% {:<8} {}",
        "▸".cyan(),
        job.progress,
        stage,
        job.progress_message.as_deref().unwrap_or("").dimmed()
    );
}

/// Print detailed job information
fn print_job_details(job: &JobSnapshot) {
    println!("{}", "Job Details:".bold());
    println!("  ID:          {}", job.job_id.to_string().cyan());
    println!("  Repository:  {}", job.input_identity);
    println!("  Status:      {}", colorize_status(&job.status));
    println!("  Progress:    {}%", job.progress);
    if let Some(stage) = job.current_stage {
        println!("  Stage:       {}", stage);
    }
    if let Some(message) = &job.progress_message {
        println!("  Message:     {}", message.dimmed());
    }
    println!(
        "  Created:     {}",
        job.created_at.format("%Y-%m-%d %H:%M:%S")
    );

    if let Some(started) = job.started_at {
        println!("  Started:     {}", started.format("%Y-%m-%d %H:%M:%S"));
    }

    if let Some(completed) = job.completed_at {
        println!("  Completed:   {}", completed.format("%Y-%m-%d %H:%M:%S"));

        // Calculate duration
        if let Some(started) = job.started_at {
            let duration = completed.signed_duration_since(started);
            println!("  Duration:    {}s", duration.num_seconds());
        }
    }

    if let Some(result) = &job.result {
        println!("\n{}", "Result:".bold());
        println!("  Video:      {}", result.artifact_url.green());
        if !result.cached_stages.is_empty() {
            let cached: Vec<String> = result.cached_stages.iter().map(|s| s.to_string()).collect();
            println!("  From cache: {}", cached.join(", ").dimmed());
        }
        if !result.metadata.is_null() {
            if let Ok(pretty) = serde_json::to_string_pretty(&result.metadata) {
                println!("\n{}", "Metadata:".bold());
                println!("{}", pretty);
            }
        }
    }

    if let Some(error) = &job.error {
        println!("\n{}", "Error:".bold());
        println!("  Stage:      {}", error.stage);
        println!("  Category:   {}", error.category);
        println!("  {}", error.message.red());
    }
}

/// Colorize job status for display
fn colorize_status(status: &JobStatus) -> colored::ColoredString {
    let status_str = status.to_string();
    match status {
        JobStatus::Queued => status_str.yellow(),
        JobStatus::Running => status_str.cyan(),
        JobStatus::Succeeded => status_str.green(),
        JobStatus::Failed => status_str.red(),
        JobStatus::Cancelled => status_str.dimmed(),
    }
}

fn format_duration(seconds: u64) -> String {
    match seconds {
        s if s < 60 => format!("{}s", s),
        s if s < 3600 => format!("{}m {}s", s / 60, s % 60),
        s => format!("{}h {}m", s / 3600, (s % 3600) / 60),
    }
}
