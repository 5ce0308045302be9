//! Log domain types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A log entry produced while a crawl job runs
///
/// Entries are append-only and kept in insertion order per job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub job_id: Uuid,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    pub fn new(job_id: Uuid, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            job_id,
            timestamp: chrono::Utc::now(),
            level,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "Debug",
            LogLevel::Info => "Info",
            LogLevel::Warning => "Warning",
            LogLevel::Error => "Error",
        }
    }

    /// Parses a stored level name, falling back to `Info` for unknown values
    pub fn parse(s: &str) -> Self {
        match s {
            "Debug" => LogLevel::Debug,
            "Warning" => LogLevel::Warning,
            "Error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}
