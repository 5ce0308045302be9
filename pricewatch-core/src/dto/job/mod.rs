//! Job DTOs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::item::WorkItem;
use crate::domain::job::{Job, JobStatus};

/// Request to submit a new crawl job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitJob {
    pub user_id: String,
    pub site_name: String,
    pub items: Vec<WorkItem>,
}

/// Status snapshot of a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusView {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub progress: u8,
    pub processed_items: u32,
    pub total_items: u32,
    pub error_message: Option<String>,
}

impl From<&Job> for JobStatusView {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            progress: job.progress,
            processed_items: job.processed_items,
            total_items: job.total_items,
            error_message: job.error_message.clone(),
        }
    }
}

/// Runtime statistics of a job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobStats {
    pub total_items: u32,
    pub processed_items: u32,
    pub success_count: u32,
    pub error_count: u32,
    pub elapsed_seconds: f64,
    pub items_per_second: f64,
    pub memory_peak_mb: f64,
}
