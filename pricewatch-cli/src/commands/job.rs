//! Job command handlers
//!
//! Submits crawl jobs to the server and inspects their progress,
//! statistics and logs.

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use pricewatch_core::domain::job::{Job, JobStatus};
use pricewatch_core::domain::log::{LogEntry, LogLevel};
use pricewatch_core::dto::job::{JobStats, JobStatusView, SubmitJob};
use pricewatch_engine::source::{JsonFileSource, WorkItemSource};
use std::path::PathBuf;

use crate::api::ApiClient;
use crate::config::Config;
use crate::id_resolver::resolve_job_id;

/// Job subcommands
#[derive(Subcommand)]
pub enum JobCommands {
    /// Submit a crawl job
    Submit {
        /// Site whose adapter crawls the items
        #[arg(short, long)]
        site: String,

        /// JSON file holding the work items
        #[arg(short, long)]
        items: PathBuf,

        /// Submitting user
        #[arg(short, long, env = "PRICEWATCH_USER", default_value = "cli")]
        user: String,
    },
    /// List jobs
    List {
        /// Only jobs of this user
        #[arg(short, long)]
        user: Option<String>,

        /// Only jobs in this status (e.g. Running, Failed)
        #[arg(short, long)]
        status: Option<String>,
    },
    /// Get job details
    Get {
        /// Job ID or unambiguous prefix
        id: String,
    },
    /// Show job progress
    Status {
        /// Job ID or unambiguous prefix
        id: String,
    },
    /// Show job throughput statistics
    Stats {
        /// Job ID or unambiguous prefix
        id: String,
    },
    /// Get job logs
    Logs {
        /// Job ID or unambiguous prefix
        id: String,
    },
    /// Cancel a running job
    Cancel {
        /// Job ID or unambiguous prefix
        id: String,
    },
    /// Pause a running job before its next batch
    Pause {
        /// Job ID or unambiguous prefix
        id: String,
    },
    /// Resume a paused job
    Resume {
        /// Job ID or unambiguous prefix
        id: String,
    },
}

/// Handle job commands
///
/// Routes job subcommands to their respective handlers.
///
/// # Arguments
/// * `command` - The job command to execute
/// * `config` - The CLI configuration
pub async fn handle_job_command(command: JobCommands, config: &Config) -> Result<()> {
    let client = ApiClient::new(&config.server_url);

    match command {
        JobCommands::Submit { site, items, user } => {
            submit_job(&client, &user, &site, items).await
        }
        JobCommands::List { user, status } => {
            list_jobs(&client, user.as_deref(), status.as_deref()).await
        }
        JobCommands::Get { id } => get_job(&client, &id).await,
        JobCommands::Status { id } => get_job_status(&client, &id).await,
        JobCommands::Stats { id } => get_job_stats(&client, &id).await,
        JobCommands::Logs { id } => get_job_logs(&client, &id).await,
        JobCommands::Cancel { id } => cancel_job(&client, &id).await,
        JobCommands::Pause { id } => pause_job(&client, &id).await,
        JobCommands::Resume { id } => resume_job(&client, &id).await,
    }
}

async fn submit_job(client: &ApiClient, user: &str, site: &str, items: PathBuf) -> Result<()> {
    let items = JsonFileSource::new(items).load().await?;
    let count = items.len();

    let request = SubmitJob {
        user_id: user.to_string(),
        site_name: site.to_string(),
        items,
    };
    let job = client.submit_job(&request).await?;

    println!("{}", "✓ Job submitted".green().bold());
    println!("  ID:    {}", job.id.to_string().cyan());
    println!("  Site:  {}", job.site_name);
    println!("  Items: {}", count);

    Ok(())
}

async fn list_jobs(client: &ApiClient, user: Option<&str>, status: Option<&str>) -> Result<()> {
    let status = match status {
        Some(s) => match JobStatus::parse(s) {
            Some(status) => Some(status),
            None => anyhow::bail!("Unknown job status: {}", s),
        },
        None => None,
    };

    let jobs = client.list_jobs(user, status).await?;

    if jobs.is_empty() {
        println!("{}", "No jobs found.".yellow());
    } else {
        println!("{}", format!("Found {} job(s):", jobs.len()).bold());
        println!();
        for job in jobs {
            print_job_summary(&job);
        }
    }

    Ok(())
}

async fn get_job(client: &ApiClient, id: &str) -> Result<()> {
    let uuid = resolve_job_id(client, id).await?;
    let job = client.get_job(uuid).await?;

    print_job_details(&job);

    Ok(())
}

async fn get_job_status(client: &ApiClient, id: &str) -> Result<()> {
    let uuid = resolve_job_id(client, id).await?;
    let view = client.get_job_status(uuid).await?;

    print_status_view(&view);

    Ok(())
}

async fn get_job_stats(client: &ApiClient, id: &str) -> Result<()> {
    let uuid = resolve_job_id(client, id).await?;
    let stats = client.get_job_stats(uuid).await?;

    println!("{}", format!("Statistics for job {}:", uuid).bold());
    print_job_stats(&stats);

    Ok(())
}

/// Get and display job logs
async fn get_job_logs(client: &ApiClient, id: &str) -> Result<()> {
    let uuid = resolve_job_id(client, id).await?;
    let logs = client.get_job_logs(uuid).await?;

    if logs.is_empty() {
        println!("{}", "No logs found for this job.".yellow());
    } else {
        println!("{}", format!("Logs for job {}:", uuid).bold());
        print_logs(&logs);
    }

    Ok(())
}

async fn cancel_job(client: &ApiClient, id: &str) -> Result<()> {
    let uuid = resolve_job_id(client, id).await?;
    let view = client.cancel_job(uuid).await?;

    println!(
        "{}",
        "✓ Cancellation requested, the job stops after its current batch".green()
    );
    print_status_view(&view);

    Ok(())
}

async fn pause_job(client: &ApiClient, id: &str) -> Result<()> {
    let uuid = resolve_job_id(client, id).await?;
    let view = client.pause_job(uuid).await?;

    println!("{}", "✓ Pause requested, the job holds after its current batch".green());
    print_status_view(&view);

    Ok(())
}

async fn resume_job(client: &ApiClient, id: &str) -> Result<()> {
    let uuid = resolve_job_id(client, id).await?;
    let view = client.resume_job(uuid).await?;

    println!("{}", "✓ Job resumed".green());
    print_status_view(&view);

    Ok(())
}

/// Print a job summary from a full Job object
fn print_job_summary(job: &Job) {
    let status_colored = colorize_status(&job.status);

    println!("  {} Job {}", "▸".cyan(), job.id.to_string().dimmed());
    println!("    Site:     {}", job.site_name);
    println!("    User:     {}", job.user_id.dimmed());
    println!(
        "    Status:   {} ({}/{} items)",
        status_colored, job.processed_items, job.total_items
    );
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
    let status_colored = colorize_status(&job.status);

    println!("{}", "Job Details:".bold());
    println!("  ID:          {}", job.id.to_string().cyan());
    println!("  Site:        {}", job.site_name);
    println!("  User:        {}", job.user_id);
    println!("  Status:      {}", status_colored);
    println!(
        "  Progress:    {}% ({}/{} items)",
        job.progress, job.processed_items, job.total_items
    );
    println!("  Created:     {}", job.created_at.format("%Y-%m-%d %H:%M:%S"));

    if let Some(started) = job.started_at {
        println!("  Started:     {}", started.format("%Y-%m-%d %H:%M:%S"));
    }

    if let Some(completed) = job.completed_at {
        println!("  Completed:   {}", completed.format("%Y-%m-%d %H:%M:%S"));

        if let Some(started) = job.started_at {
            let duration = completed.signed_duration_since(started);
            println!("  Duration:    {}s", duration.num_seconds());
        }
    }

    if let Some(location) = &job.result_location {
        println!("  Results:     {}", location.cyan());
    }

    if let Some(error) = &job.error_message {
        println!("\n{}", "Error:".bold());
        println!("{}", error.red());
    }
}

fn print_status_view(view: &JobStatusView) {
    println!("  Job:      {}", view.job_id.to_string().cyan());
    println!("  Status:   {}", colorize_status(&view.status));
    println!(
        "  Progress: {}% ({}/{} items)",
        view.progress, view.processed_items, view.total_items
    );
    if let Some(error) = &view.error_message {
        println!("  Error:    {}", error.red());
    }
}

pub(crate) fn print_job_stats(stats: &JobStats) {
    println!(
        "  Processed:   {}/{}",
        stats.processed_items, stats.total_items
    );
    println!("  Succeeded:   {}", stats.success_count.to_string().green());
    println!("  Failed:      {}", stats.error_count.to_string().red());
    println!("  Elapsed:     {:.1}s", stats.elapsed_seconds);
    println!("  Throughput:  {:.2} items/s", stats.items_per_second);
    println!("  Memory peak: {:.1} MB", stats.memory_peak_mb);
}

pub(crate) fn print_logs(logs: &[LogEntry]) {
    println!("{}", "─".repeat(80).dimmed());
    for log in logs {
        print_log_entry(log);
    }
    println!("{}", "─".repeat(80).dimmed());
}

/// Print a log entry
fn print_log_entry(log: &LogEntry) {
    let level_str = log.level.as_str().to_uppercase();
    let level_colored = match log.level {
        LogLevel::Debug => level_str.dimmed(),
        LogLevel::Info => level_str.cyan(),
        LogLevel::Warning => level_str.yellow(),
        LogLevel::Error => level_str.red(),
    };

    println!(
        "{} [{}] {}",
        log.timestamp.format("%H:%M:%S").to_string().dimmed(),
        level_colored,
        log.message
    );
}

/// Colorize job status for display
pub(crate) fn colorize_status(status: &JobStatus) -> colored::ColoredString {
    let status_str = status.as_str().to_string();
    match status {
        JobStatus::Pending => status_str.yellow(),
        JobStatus::Running => status_str.cyan(),
        JobStatus::Paused => status_str.yellow(),
        JobStatus::Completed => status_str.green(),
        JobStatus::Failed => status_str.red(),
        JobStatus::Cancelled => status_str.dimmed(),
    }
}
