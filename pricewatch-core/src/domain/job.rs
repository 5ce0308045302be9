//! Job domain types
//!
//! A [`Job`] is one crawl request: a site, an owner and a list of work items
//! resolved when the job runs. Status changes go through the transition
//! methods below so that timestamps and progress stay consistent.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Crawl job record
///
/// Structure shared between the engine (mutates) and the server (persists).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub user_id: String,
    pub site_name: String,
    pub status: JobStatus,
    pub total_items: u32,
    pub processed_items: u32,
    /// Percentage in 0..=100, derived from processed/total
    pub progress: u8,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub error_message: Option<String>,
    pub result_location: Option<String>,
}

/// Job execution status
///
/// A running job may be held in `Paused` between batches and resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "Pending",
            JobStatus::Running => "Running",
            JobStatus::Paused => "Paused",
            JobStatus::Completed => "Completed",
            JobStatus::Failed => "Failed",
            JobStatus::Cancelled => "Cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Pending" => Some(JobStatus::Pending),
            "Running" => Some(JobStatus::Running),
            "Paused" => Some(JobStatus::Paused),
            "Completed" => Some(JobStatus::Completed),
            "Failed" => Some(JobStatus::Failed),
            "Cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }
}

/// Rejected status change
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot {action} job in state {from:?}")]
pub struct TransitionError {
    pub from: JobStatus,
    pub action: &'static str,
}

impl Job {
    /// Creates a new pending job
    pub fn new(user_id: impl Into<String>, site_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            site_name: site_name.into(),
            status: JobStatus::Pending,
            total_items: 0,
            processed_items: 0,
            progress: 0,
            created_at: chrono::Utc::now(),
            started_at: None,
            completed_at: None,
            error_message: None,
            result_location: None,
        }
    }

    pub fn start(&mut self) -> Result<(), TransitionError> {
        self.expect_status(&[JobStatus::Pending], "start")?;
        self.status = JobStatus::Running;
        self.started_at = Some(chrono::Utc::now());
        Ok(())
    }

    pub fn complete(&mut self) -> Result<(), TransitionError> {
        self.expect_status(&[JobStatus::Running], "complete")?;
        self.status = JobStatus::Completed;
        self.progress = 100;
        self.completed_at = Some(chrono::Utc::now());
        Ok(())
    }

    /// Holds a running job; only taken between batches
    pub fn pause(&mut self) -> Result<(), TransitionError> {
        self.expect_status(&[JobStatus::Running], "pause")?;
        self.status = JobStatus::Paused;
        Ok(())
    }

    pub fn resume(&mut self) -> Result<(), TransitionError> {
        self.expect_status(&[JobStatus::Paused], "resume")?;
        self.status = JobStatus::Running;
        Ok(())
    }

    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), TransitionError> {
        self.expect_status(&[JobStatus::Pending, JobStatus::Running, JobStatus::Paused], "fail")?;
        self.status = JobStatus::Failed;
        self.error_message = Some(message.into());
        self.completed_at = Some(chrono::Utc::now());
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), TransitionError> {
        self.expect_status(&[JobStatus::Pending, JobStatus::Running, JobStatus::Paused], "cancel")?;
        self.status = JobStatus::Cancelled;
        self.completed_at = Some(chrono::Utc::now());
        Ok(())
    }

    /// Records how many items have been processed and recomputes `progress`
    pub fn update_progress(&mut self, processed: u32) {
        self.processed_items = processed.min(self.total_items);
        self.progress = if self.total_items == 0 {
            0
        } else {
            (u64::from(self.processed_items) * 100 / u64::from(self.total_items)) as u8
        };
    }

    fn expect_status(
        &self,
        allowed: &[JobStatus],
        action: &'static str,
    ) -> Result<(), TransitionError> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(TransitionError {
                from: self.status,
                action,
            })
        }
    }
}
