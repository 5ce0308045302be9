//! Local run command
//!
//! Crawls a work item file in-process, without a server. Results are
//! written as a JSON report and the job log is printed at the end.

use anyhow::{Context, Result};
use clap::Args;
use colored::*;
use pricewatch_engine::Engine;
use pricewatch_engine::config::EngineConfig;
use pricewatch_engine::sink::JsonReportSink;
use pricewatch_engine::source::JsonFileSource;
use pricewatch_engine::store::{InMemoryJobStore, JobStore};
use std::path::PathBuf;
use std::sync::Arc;

use crate::commands::job::{print_job_details, print_job_stats, print_logs};

/// Arguments of `pricewatch run`
#[derive(Args)]
pub struct RunArgs {
    /// Site whose adapter crawls the items
    #[arg(short, long)]
    pub site: String,

    /// JSON file holding the work items
    #[arg(short, long)]
    pub items: PathBuf,

    /// User recorded on the job
    #[arg(short, long, env = "PRICEWATCH_USER", default_value = "cli")]
    pub user: String,

    /// Directory receiving the report
    #[arg(long, env = "PRICEWATCH_RESULTS_DIR", default_value = "results")]
    pub results_dir: PathBuf,
}

/// Run a crawl job to completion on a local engine
///
/// Ctrl-C requests cancellation; the job then stops after its current batch
/// and the partial results are still written.
pub async fn handle_run_command(args: RunArgs) -> Result<()> {
    let config = EngineConfig::from_env().context("Invalid engine configuration")?;
    let store = Arc::new(InMemoryJobStore::new());
    let sink = Arc::new(JsonReportSink::new(args.results_dir));

    let engine = Engine::new(config, store.clone(), sink)?;
    engine.start();

    let orchestrator = engine.orchestrator().clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling after the current batch");
            orchestrator.cancel_all();
        }
    });

    let source = Arc::new(JsonFileSource::new(args.items));
    let result = engine
        .orchestrator()
        .run(&args.user, &args.site, source)
        .await;

    interrupt.abort();

    let job = match result {
        Ok(job) => job,
        Err(e) => {
            engine.shutdown().await;
            return Err(e.into());
        }
    };
    let stats = engine.orchestrator().get_stats(job.id).await;
    engine.shutdown().await;

    println!();
    print_job_details(&job);

    if let Ok(stats) = stats {
        println!("\n{}", "Statistics:".bold());
        print_job_stats(&stats);
    }

    let logs = store.get_logs(job.id).await?;
    if !logs.is_empty() {
        println!("\n{}", "Log:".bold());
        print_logs(&logs);
    }

    Ok(())
}
