//! Job and job log persistence
//!
//! The orchestrator is the single writer of job records and pushes every
//! state change and log line through a [`JobStore`]. The server backs it
//! with Postgres; the CLI and tests use [`InMemoryJobStore`].

use async_trait::async_trait;
use pricewatch_core::domain::job::{Job, JobStatus};
use pricewatch_core::domain::log::LogEntry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

/// Storage of job records and their log lines
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Inserts or replaces a job record
    async fn save_job(&self, job: &Job) -> anyhow::Result<()>;

    async fn get_job(&self, id: Uuid) -> anyhow::Result<Option<Job>>;

    /// Jobs matching the optional filters, newest first
    async fn list_jobs(
        &self,
        user_id: Option<&str>,
        status: Option<JobStatus>,
    ) -> anyhow::Result<Vec<Job>>;

    async fn append_log(&self, entry: LogEntry) -> anyhow::Result<()>;

    /// Log lines of a job in the order they were written
    async fn get_logs(&self, job_id: Uuid) -> anyhow::Result<Vec<LogEntry>>;
}

/// In-memory implementation of [`JobStore`]
#[derive(Clone, Default)]
pub struct InMemoryJobStore {
    jobs: Arc<Mutex<HashMap<Uuid, Job>>>,
    logs: Arc<Mutex<Vec<LogEntry>>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn save_job(&self, job: &Job) -> anyhow::Result<()> {
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> anyhow::Result<Option<Job>> {
        let jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(jobs.get(&id).cloned())
    }

    async fn list_jobs(
        &self,
        user_id: Option<&str>,
        status: Option<JobStatus>,
    ) -> anyhow::Result<Vec<Job>> {
        let jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        let mut matching: Vec<Job> = jobs
            .values()
            .filter(|j| user_id.is_none_or(|u| j.user_id == u))
            .filter(|j| status.is_none_or(|s| j.status == s))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching)
    }

    async fn append_log(&self, entry: LogEntry) -> anyhow::Result<()> {
        let mut logs = self.logs.lock().unwrap_or_else(PoisonError::into_inner);
        logs.push(entry);
        Ok(())
    }

    async fn get_logs(&self, job_id: Uuid) -> anyhow::Result<Vec<LogEntry>> {
        let logs = self.logs.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(logs.iter().filter(|e| e.job_id == job_id).cloned().collect())
    }
}
