//! User-visible job log
//!
//! Every line goes to the [`JobStore`] and is mirrored to `tracing` with the
//! job id attached. A store failure is reported but never stops the job.

use pricewatch_core::domain::log::{LogEntry, LogLevel};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::store::JobStore;

#[derive(Clone)]
pub struct JobLogger {
    job_id: Uuid,
    store: Arc<dyn JobStore>,
}

impl JobLogger {
    pub fn new(job_id: Uuid, store: Arc<dyn JobStore>) -> Self {
        Self { job_id, store }
    }

    /// Appends one log line
    ///
    /// # Arguments
    /// * `level` - Severity shown to the job's owner
    /// * `message` - The log text
    pub async fn log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        let job_id = self.job_id;
        match level {
            LogLevel::Debug => debug!(%job_id, "{}", message),
            LogLevel::Info => info!(%job_id, "{}", message),
            LogLevel::Warning => warn!(%job_id, "{}", message),
            LogLevel::Error => error!(%job_id, "{}", message),
        }

        if let Err(e) = self.store.append_log(LogEntry::new(job_id, level, message)).await {
            warn!(%job_id, "Failed to store job log: {:#}", e);
        }
    }

    pub async fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message).await;
    }

    pub async fn warning(&self, message: impl Into<String>) {
        self.log(LogLevel::Warning, message).await;
    }

    pub async fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryJobStore;

    #[tokio::test]
    async fn test_lines_reach_store_in_order() {
        let store = Arc::new(InMemoryJobStore::new());
        let job_id = Uuid::new_v4();
        let logger = JobLogger::new(job_id, store.clone());

        logger.info("started").await;
        logger.warning("slow site").await;
        logger.error("failed").await;

        let logs = store.get_logs(job_id).await.unwrap();
        let levels: Vec<_> = logs.iter().map(|e| e.level).collect();
        assert_eq!(levels, vec![LogLevel::Info, LogLevel::Warning, LogLevel::Error]);
        assert_eq!(logs[1].message, "slow site");
    }
}
