//! API client module
//!
//! HTTP client for the pricewatch server API.

use anyhow::{Context, Result};
use pricewatch_core::domain::job::{Job, JobStatus};
use pricewatch_core::domain::log::LogEntry;
use pricewatch_core::dto::job::{JobStats, JobStatusView, SubmitJob};
use pricewatch_core::dto::system::{MemorySnapshot, SystemStatus};
use reqwest::Client;
use serde::Deserialize;
use uuid::Uuid;

/// Circuit state of one site as reported by the server
#[derive(Debug, Deserialize)]
pub struct BreakerView {
    pub site: String,
    pub state: String,
}

/// HTTP client for the pricewatch server API
pub struct ApiClient {
    base_url: String,
    client: Client,
}

impl ApiClient {
    /// Create a new API client
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the server
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    /// Submit a crawl job
    ///
    /// # Returns
    /// The created job, still pending
    pub async fn submit_job(&self, req: &SubmitJob) -> Result<Job> {
        let url = format!("{}/job/submit", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(req)
            .send()
            .await
            .context("Failed to send submit job request")?;

        self.handle_response(response).await
    }

    /// Request cancellation of a running job
    pub async fn cancel_job(&self, id: Uuid) -> Result<JobStatusView> {
        let url = format!("{}/job/{}/cancel", self.base_url, id);
        let response = self
            .client
            .post(&url)
            .send()
            .await
            .context("Failed to send cancel job request")?;

        self.handle_response(response).await
    }

    /// Hold a running job before its next batch
    pub async fn pause_job(&self, id: Uuid) -> Result<JobStatusView> {
        self.post(&format!("/job/{}/pause", id), "pause job").await
    }

    pub async fn resume_job(&self, id: Uuid) -> Result<JobStatusView> {
        self.post(&format!("/job/{}/resume", id), "resume job").await
    }

    pub async fn get_job(&self, id: Uuid) -> Result<Job> {
        self.get(&format!("/job/{}", id), "get job").await
    }

    pub async fn get_job_status(&self, id: Uuid) -> Result<JobStatusView> {
        self.get(&format!("/job/{}/status", id), "get job status")
            .await
    }

    pub async fn get_job_stats(&self, id: Uuid) -> Result<JobStats> {
        self.get(&format!("/job/{}/stats", id), "get job stats").await
    }

    pub async fn get_job_logs(&self, id: Uuid) -> Result<Vec<LogEntry>> {
        self.get(&format!("/job/{}/logs", id), "get job logs").await
    }

    /// List jobs, newest first
    ///
    /// # Arguments
    /// * `user_id` - Only jobs of this user
    /// * `status` - Only jobs in this status
    pub async fn list_jobs(
        &self,
        user_id: Option<&str>,
        status: Option<JobStatus>,
    ) -> Result<Vec<Job>> {
        let url = format!("{}/job/list", self.base_url);
        let mut query: Vec<(&str, &str)> = Vec::new();
        if let Some(user_id) = user_id {
            query.push(("user_id", user_id));
        }
        if let Some(status) = status {
            query.push(("status", status.as_str()));
        }

        let response = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await
            .context("Failed to send list jobs request")?;

        self.handle_response(response).await
    }

    pub async fn system_status(&self) -> Result<SystemStatus> {
        self.get("/system/status", "system status").await
    }

    pub async fn memory_history(&self, minutes: u64) -> Result<Vec<MemorySnapshot>> {
        self.get(
            &format!("/system/memory/history?minutes={}", minutes),
            "memory history",
        )
        .await
    }

    pub async fn breakers(&self) -> Result<Vec<BreakerView>> {
        self.get("/system/breakers", "breakers").await
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str, what: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to send {} request", what))?;

        self.handle_response(response).await
    }

    async fn post<T: serde::de::DeserializeOwned>(&self, path: &str, what: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .send()
            .await
            .with_context(|| format!("Failed to send {} request", what))?;

        self.handle_response(response).await
    }

    /// Handle API response and deserialize JSON
    ///
    /// # Arguments
    /// * `response` - The HTTP response
    ///
    /// # Returns
    /// The deserialized response body
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T> {
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<serde_json::Value>(&error_text)
                .ok()
                .and_then(|v| v["error"].as_str().map(str::to_string))
                .unwrap_or(error_text);
            anyhow::bail!("Request failed with status {}: {}", status, message);
        }

        response
            .json()
            .await
            .context("Failed to parse response JSON")
    }
}
