//! Repository Module
//!
//! Data access layer for the server. Each repository handles database
//! operations for one entity; [`PgJobStore`] exposes them to the engine.

pub mod job;
pub mod log;

use async_trait::async_trait;
use pricewatch_core::domain::job::{Job, JobStatus};
use pricewatch_core::domain::log::LogEntry;
use pricewatch_engine::store::JobStore;
use sqlx::PgPool;
use uuid::Uuid;

// Re-export for convenience
pub use job as job_repository;
pub use log as log_repository;

/// Postgres-backed [`JobStore`]
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn save_job(&self, job: &Job) -> anyhow::Result<()> {
        job_repository::upsert(&self.pool, job).await?;
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> anyhow::Result<Option<Job>> {
        Ok(job_repository::find_by_id(&self.pool, id).await?)
    }

    async fn list_jobs(
        &self,
        user_id: Option<&str>,
        status: Option<JobStatus>,
    ) -> anyhow::Result<Vec<Job>> {
        Ok(job_repository::list(&self.pool, user_id, status).await?)
    }

    async fn append_log(&self, entry: LogEntry) -> anyhow::Result<()> {
        log_repository::add_entry(&self.pool, &entry).await?;
        Ok(())
    }

    async fn get_logs(&self, job_id: Uuid) -> anyhow::Result<Vec<LogEntry>> {
        Ok(log_repository::find_by_job(&self.pool, job_id).await?)
    }
}
