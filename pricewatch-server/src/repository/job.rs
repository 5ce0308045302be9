//! Job Repository
//!
//! Handles all database operations related to jobs.

use pricewatch_core::domain::job::{Job, JobStatus};
use sqlx::PgPool;
use uuid::Uuid;

/// Insert a job or overwrite every mutable column of an existing one
pub async fn upsert(pool: &PgPool, job: &Job) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO jobs (id, user_id, site_name, status, total_items, processed_items,
                          progress, created_at, started_at, completed_at, error_message,
                          result_location)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        ON CONFLICT (id) DO UPDATE
        SET status = EXCLUDED.status,
            total_items = EXCLUDED.total_items,
            processed_items = EXCLUDED.processed_items,
            progress = EXCLUDED.progress,
            started_at = EXCLUDED.started_at,
            completed_at = EXCLUDED.completed_at,
            error_message = EXCLUDED.error_message,
            result_location = EXCLUDED.result_location
        "#,
    )
    .bind(job.id)
    .bind(&job.user_id)
    .bind(&job.site_name)
    .bind(job.status.as_str())
    .bind(job.total_items as i32)
    .bind(job.processed_items as i32)
    .bind(i16::from(job.progress))
    .bind(job.created_at)
    .bind(job.started_at)
    .bind(job.completed_at)
    .bind(&job.error_message)
    .bind(&job.result_location)
    .execute(pool)
    .await?;

    Ok(())
}

/// Find a job by ID
pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Job>, sqlx::Error> {
    let row = sqlx::query_as::<_, JobRow>(
        r#"
        SELECT id, user_id, site_name, status, total_items, processed_items, progress,
               created_at, started_at, completed_at, error_message, result_location
        FROM jobs
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// List jobs, newest first, optionally filtered by owner and status
pub async fn list(
    pool: &PgPool,
    user_id: Option<&str>,
    status: Option<JobStatus>,
) -> Result<Vec<Job>, sqlx::Error> {
    let rows = sqlx::query_as::<_, JobRow>(
        r#"
        SELECT id, user_id, site_name, status, total_items, processed_items, progress,
               created_at, started_at, completed_at, error_message, result_location
        FROM jobs
        WHERE ($1::TEXT IS NULL OR user_id = $1)
          AND ($2::TEXT IS NULL OR status = $2)
        ORDER BY created_at DESC
        "#,
    )
    .bind(user_id)
    .bind(status.map(|s| s.as_str()))
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    user_id: String,
    site_name: String,
    status: String,
    total_items: i32,
    processed_items: i32,
    progress: i16,
    created_at: chrono::DateTime<chrono::Utc>,
    started_at: Option<chrono::DateTime<chrono::Utc>>,
    completed_at: Option<chrono::DateTime<chrono::Utc>>,
    error_message: Option<String>,
    result_location: Option<String>,
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        let status = JobStatus::parse(&row.status).unwrap_or_else(|| {
            tracing::warn!("Unknown job status '{}' for job {}", row.status, row.id);
            JobStatus::Failed
        });

        Job {
            id: row.id,
            user_id: row.user_id,
            site_name: row.site_name,
            status,
            total_items: row.total_items.max(0) as u32,
            processed_items: row.processed_items.max(0) as u32,
            progress: row.progress.clamp(0, 100) as u8,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            error_message: row.error_message,
            result_location: row.result_location,
        }
    }
}
