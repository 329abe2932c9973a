//! Job command handlers
//!
//! Submitting, listing, inspecting and cancelling jobs.

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use tessera_client::TesseraClient;
use tessera_core::domain::job::{Job, JobKind, JobStatus};
use tessera_core::dto::job::{ListJobs, SubmitJob};

use crate::config::Config;
use crate::id_resolver::resolve_job_id;
use crate::types::{IdOrPrefix, KindArg, StatusArg, read_json_arg};

/// Job subcommands
#[derive(Subcommand)]
pub enum JobCommands {
    /// Submit one prediction job
    Submit {
        /// Job input as inline JSON or @file.json
        input: String,
    },
    /// List your jobs, newest first
    List {
        #[arg(long, value_enum)]
        status: Option<StatusArg>,

        /// Include batch children by asking for them explicitly
        #[arg(long, value_enum)]
        kind: Option<KindArg>,

        #[arg(long)]
        limit: Option<u32>,

        /// Token printed at the end of the previous page
        #[arg(long)]
        page_token: Option<String>,
    },
    /// Get job details
    Get {
        /// Job ID or unambiguous prefix
        id: String,
    },
    /// Cancel a job, or a whole batch when given a batch id
    Cancel {
        /// Job ID or unambiguous prefix
        id: String,
    },
}

/// Routes job subcommands to their respective handlers
pub async fn handle_job_command(command: JobCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        JobCommands::Submit { input } => submit_job(&client, &input).await,
        JobCommands::List {
            status,
            kind,
            limit,
            page_token,
        } => {
            let query = ListJobs {
                status: status.map(Into::into),
                kind: kind.map(Into::into),
                page_token,
                limit,
            };
            list_jobs(&client, &query).await
        }
        JobCommands::Get { id } => get_job(&client, &id).await,
        JobCommands::Cancel { id } => cancel_job(&client, &id).await,
    }
}

async fn submit_job(client: &TesseraClient, input: &str) -> Result<()> {
    let input = read_json_arg(input)?;
    let receipt = client.submit_job(SubmitJob { input }).await?;

    println!("{}", "✓ Job submitted".green());
    println!("  ID: {}", receipt.job_id.to_string().cyan());

    Ok(())
}

async fn list_jobs(client: &TesseraClient, query: &ListJobs) -> Result<()> {
    let page = client.list_jobs(query).await?;

    if page.items.is_empty() {
        println!("{}", "No jobs found.".yellow());
    } else {
        println!("{}", format!("Found {} job(s):", page.items.len()).bold());
        println!();
        for job in &page.items {
            print_job_summary(job);
        }
    }

    if let Some(token) = page.next_page_token {
        println!("{} --page-token {}", "More results:".dimmed(), token);
    }

    Ok(())
}

async fn get_job(client: &TesseraClient, id: &str) -> Result<()> {
    let uuid = resolve_job_id(client, &IdOrPrefix::parse(id)).await?;
    let job = client.get_job(uuid).await?;

    print_job_details(&job);

    Ok(())
}

async fn cancel_job(client: &TesseraClient, id: &str) -> Result<()> {
    let uuid = resolve_job_id(client, &IdOrPrefix::parse(id)).await?;
    let job = client.cancel_job(uuid).await?;

    println!("{}", format!("✓ {} cancelled", kind_label(job.kind)).green());
    print_job_details(&job);

    Ok(())
}

/// Print a job summary line block
pub(crate) fn print_job_summary(job: &Job) {
    println!("  {} {} {}", "▸".cyan(), kind_label(job.kind), job.id.to_string().dimmed());
    println!("    Status:   {}", colorize_status(job.status));
    if let Some(progress) = &job.progress {
        println!(
            "    Progress: {}/{} done, {} failed",
            progress.completed + progress.failed,
            progress.total,
            progress.failed
        );
    }
    println!(
        "    Created:  {}",
        job.created_at
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    println!();
}

/// Print detailed job information
pub(crate) fn print_job_details(job: &Job) {
    println!("{}", "Job Details:".bold());
    println!("  ID:        {}", job.id.to_string().cyan());
    println!("  Kind:      {}", kind_label(job.kind));
    println!("  Status:    {}", colorize_status(job.status));
    println!("  Attempts:  {}", job.attempt_count);
    println!("  Created:   {}", job.created_at.format("%Y-%m-%d %H:%M:%S"));

    if let Some(parent_id) = job.parent_id {
        println!("  Batch:     {}", parent_id.to_string().dimmed());
    }

    if let Some(started) = job.started_at {
        println!("  Started:   {}", started.format("%Y-%m-%d %H:%M:%S"));
    }

    if let Some(completed) = job.completed_at {
        println!("  Finished:  {}", completed.format("%Y-%m-%d %H:%M:%S"));

        if let Some(started) = job.started_at {
            let duration = completed.signed_duration_since(started);
            println!("  Duration:  {}s", duration.num_seconds());
        }
    }

    if let Some(progress) = &job.progress {
        println!("\n{}", "Progress:".bold());
        println!("  Total:     {}", progress.total);
        println!("  Pending:   {}", progress.pending);
        println!("  Running:   {}", progress.running.to_string().cyan());
        println!("  Completed: {}", progress.completed.to_string().green());
        println!("  Failed:    {}", progress.failed.to_string().red());
    }

    if let Some(output) = &job.output {
        if let Some(result) = &output.result {
            println!("\n{}", "Result:".bold());
            match serde_json::to_string_pretty(result) {
                Ok(pretty) => println!("{}", pretty),
                Err(_) => println!("{:?}", result),
            }
        }
        if let Some(object) = &output.result_ref {
            println!("\n{} {} ({} bytes)", "Result object:".bold(), object.key, object.size);
        }
        if !output.artifacts.is_empty() {
            println!("\n{}", "Artifacts:".bold());
            for artifact in &output.artifacts {
                println!("  {} -> {}", artifact.path.cyan(), artifact.object.key.dimmed());
            }
        }
    }

    if let Some(error) = &job.error {
        println!("\n{}", "Error:".bold());
        println!("  {:?} / {}: {}", error.class, error.code, error.message.red());
    }
}

fn kind_label(kind: JobKind) -> &'static str {
    match kind {
        JobKind::Individual => "Job",
        JobKind::BatchParent => "Batch",
        JobKind::BatchChild => "Batch item",
    }
}

/// Colorize job status for display
pub(crate) fn colorize_status(status: JobStatus) -> ColoredString {
    let status_str = status.to_string();
    match status {
        JobStatus::Pending => status_str.dimmed(),
        JobStatus::Queued => status_str.yellow(),
        JobStatus::Running => status_str.cyan(),
        JobStatus::Completed => status_str.green(),
        JobStatus::PartiallyCompleted => status_str.yellow(),
        JobStatus::Failed => status_str.red(),
        JobStatus::Cancelled => status_str.dimmed(),
    }
}
