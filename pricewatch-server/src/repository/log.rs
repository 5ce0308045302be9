//! Log Repository
//!
//! Handles all database operations related to job logs.

use pricewatch_core::domain::log::{LogEntry, LogLevel};
use sqlx::PgPool;
use uuid::Uuid;

/// Append one log entry
pub async fn add_entry(pool: &PgPool, entry: &LogEntry) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO job_logs (job_id, timestamp, level, message)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(entry.job_id)
    .bind(entry.timestamp)
    .bind(entry.level.as_str())
    .bind(&entry.message)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get all log entries for a job in insertion order
pub async fn find_by_job(pool: &PgPool, job_id: Uuid) -> Result<Vec<LogEntry>, sqlx::Error> {
    let rows = sqlx::query_as::<_, LogRow>(
        r#"
        SELECT job_id, timestamp, level, message
        FROM job_logs
        WHERE job_id = $1
        ORDER BY id ASC
        "#,
    )
    .bind(job_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct LogRow {
    job_id: Uuid,
    timestamp: chrono::DateTime<chrono::Utc>,
    level: String,
    message: String,
}

impl From<LogRow> for LogEntry {
    fn from(row: LogRow) -> Self {
        LogEntry {
            job_id: row.job_id,
            timestamp: row.timestamp,
            level: LogLevel::parse(&row.level),
            message: row.message,
        }
    }
}
