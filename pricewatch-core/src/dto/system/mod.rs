//! System status DTOs
//!
//! Memory samples, pool counters and the combined system status report.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Memory pressure level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryStatus {
    Normal,
    Warning,
    Critical,
}

/// One memory sample of the current process and host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub rss_mb: f64,
    pub vms_mb: f64,
    pub system_percent: f64,
    pub available_mb: f64,
}

/// Fresh sample with its classification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryUsage {
    #[serde(flatten)]
    pub snapshot: MemorySnapshot,
    pub status: MemoryStatus,
}

/// Aggregated memory monitor counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryStats {
    pub current_rss_mb: f64,
    pub peak_rss_mb: f64,
    pub peak_time: Option<chrono::DateTime<chrono::Utc>>,
    pub warning_count: u64,
    pub critical_count: u64,
    /// Number of reclamation passes requested so far
    pub reclaim_count: u64,
    pub status: MemoryStatus,
    pub warning_threshold_mb: f64,
    pub critical_threshold_mb: f64,
}

/// Session pool counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolStats {
    pub total_created: u64,
    pub total_requests: u64,
    pub current_active: usize,
    pub pool_size: usize,
    pub recycled_count: u64,
    pub max_sessions: usize,
    /// Highest number of simultaneously live sessions observed
    pub peak_live: usize,
    pub last_cleanup: Option<chrono::DateTime<chrono::Utc>>,
}

/// Combined engine status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatus {
    pub active_jobs: usize,
    pub job_ids: Vec<Uuid>,
    pub memory: MemoryStats,
    pub pool: PoolStats,
}
