//! System command handlers
//!
//! Memory, session pool and circuit breaker state of a running server.

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use pricewatch_core::dto::system::MemoryStatus;

use crate::api::ApiClient;
use crate::config::Config;

/// System subcommands
#[derive(Subcommand)]
pub enum SystemCommands {
    /// Show memory, pool and active job overview
    Status,
    /// Show recent memory samples
    Memory {
        /// How many minutes back to show
        #[arg(short, long, default_value = "10")]
        minutes: u64,
    },
    /// Show circuit breaker state per site
    Breakers,
}

/// Handle system commands
///
/// # Arguments
/// * `command` - The system command to execute
/// * `config` - The CLI configuration
pub async fn handle_system_command(command: SystemCommands, config: &Config) -> Result<()> {
    let client = ApiClient::new(&config.server_url);

    match command {
        SystemCommands::Status => show_status(&client).await,
        SystemCommands::Memory { minutes } => show_memory(&client, minutes).await,
        SystemCommands::Breakers => show_breakers(&client).await,
    }
}

async fn show_status(client: &ApiClient) -> Result<()> {
    let status = client.system_status().await?;
    let memory = &status.memory;
    let pool = &status.pool;

    println!("{}", "System Status:".bold());
    println!("  Active jobs: {}", status.active_jobs);
    for id in &status.job_ids {
        println!("    {} {}", "▸".cyan(), id.to_string().dimmed());
    }

    println!("\n{}", "Memory:".bold());
    println!("  Status:    {}", colorize_memory(memory.status));
    println!(
        "  RSS:       {:.1} MB (peak {:.1} MB)",
        memory.current_rss_mb, memory.peak_rss_mb
    );
    println!(
        "  Limits:    warning {:.0} MB, critical {:.0} MB",
        memory.warning_threshold_mb, memory.critical_threshold_mb
    );
    println!(
        "  Events:    {} warning, {} critical, {} reclaim",
        memory.warning_count, memory.critical_count, memory.reclaim_count
    );

    println!("\n{}", "Session Pool:".bold());
    println!(
        "  Sessions:  {} in use, {} idle, max {}",
        pool.current_active, pool.pool_size, pool.max_sessions
    );
    println!(
        "  Totals:    {} created, {} recycled, {} requests",
        pool.total_created, pool.recycled_count, pool.total_requests
    );
    if let Some(cleanup) = pool.last_cleanup {
        println!(
            "  Last sweep: {}",
            cleanup.format("%Y-%m-%d %H:%M:%S").to_string().dimmed()
        );
    }

    Ok(())
}

async fn show_memory(client: &ApiClient, minutes: u64) -> Result<()> {
    let history = client.memory_history(minutes).await?;

    if history.is_empty() {
        println!("{}", "No memory samples recorded yet.".yellow());
        return Ok(());
    }

    println!(
        "{}",
        format!("{} sample(s) over the last {} minute(s):", history.len(), minutes).bold()
    );
    println!("{}", "─".repeat(80).dimmed());
    for sample in history {
        println!(
            "{} rss {:>8.1} MB  vms {:>8.1} MB  system {:>5.1}%  available {:>8.1} MB",
            sample.timestamp.format("%H:%M:%S").to_string().dimmed(),
            sample.rss_mb,
            sample.vms_mb,
            sample.system_percent,
            sample.available_mb
        );
    }
    println!("{}", "─".repeat(80).dimmed());

    Ok(())
}

async fn show_breakers(client: &ApiClient) -> Result<()> {
    let breakers = client.breakers().await?;

    if breakers.is_empty() {
        println!("{}", "No site adapters registered.".yellow());
        return Ok(());
    }

    println!("{}", "Circuit Breakers:".bold());
    for breaker in breakers {
        let state = match breaker.state.as_str() {
            "closed" => breaker.state.green(),
            "half_open" => breaker.state.yellow(),
            _ => breaker.state.red(),
        };
        println!("  {:<12} {}", breaker.site.cyan(), state);
    }

    Ok(())
}

fn colorize_memory(status: MemoryStatus) -> colored::ColoredString {
    let label = format!("{:?}", status).to_lowercase();
    match status {
        MemoryStatus::Normal => label.green(),
        MemoryStatus::Warning => label.yellow(),
        MemoryStatus::Critical => label.red(),
    }
}
