//! Request and response bodies for the HTTP surface.

use pagecast_common::queue::{Job, JobConfig};
use pagecast_common::render::RenderMode;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub url: String,
    pub render_mode: Option<RenderMode>,
    pub navigation_timeout_seconds: Option<i32>,
    pub job_timeout_seconds: Option<i32>,
    pub max_domain_wait_seconds: Option<i32>,
    pub max_retries: Option<i32>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("navigation_timeout_seconds must be between 5 and 300")]
    NavigationTimeout,
    #[error("job_timeout_seconds must be between 10 and 600")]
    JobTimeout,
    #[error("max_domain_wait_seconds must be between 10 and 3600")]
    MaxDomainWait,
    #[error("max_retries must be between 0 and 5")]
    MaxRetries,
}

impl SubmitJobRequest {
    /// Merge caller overrides onto service defaults, range-validating
    /// every numeric field.
    pub fn resolve(&self, defaults: &JobConfig) -> Result<JobConfig, ValidationError> {
        let navigation_timeout_s = self
            .navigation_timeout_seconds
            .unwrap_or(defaults.navigation_timeout_s);
        if !(5..=300).contains(&navigation_timeout_s) {
            return Err(ValidationError::NavigationTimeout);
        }

        let job_timeout_s = self.job_timeout_seconds.unwrap_or(defaults.job_timeout_s);
        if !(10..=600).contains(&job_timeout_s) {
            return Err(ValidationError::JobTimeout);
        }

        let max_domain_wait_s = self
            .max_domain_wait_seconds
            .unwrap_or(defaults.max_domain_wait_s);
        if !(10..=3600).contains(&max_domain_wait_s) {
            return Err(ValidationError::MaxDomainWait);
        }

        let max_retries = self.max_retries.unwrap_or(defaults.max_retries);
        if !(0..=5).contains(&max_retries) {
            return Err(ValidationError::MaxRetries);
        }

        Ok(JobConfig {
            render_mode: self.render_mode.unwrap_or(defaults.render_mode),
            navigation_timeout_s,
            job_timeout_s,
            max_domain_wait_s,
            max_retries,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct SubmitJobResponse {
    pub job_id: String,
    pub status: String,
    pub deduplicated: bool,
}

#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_id: String,
    pub url: String,
    pub status: String,
    pub attempts: i32,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

impl From<Job> for JobStatusResponse {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.job_id,
            url: job.normalized_url,
            status: job.status.to_string(),
            attempts: job.attempts,
            created_at: job.created_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
            error_code: job.error_code,
            error_message: job.error_message,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub detail: String,
}

#[derive(Debug, Serialize)]
pub struct WorkerHealth {
    pub status: &'static str,
    pub last_heartbeat: Option<chrono::DateTime<chrono::Utc>>,
    pub age_seconds: Option<i64>,
    pub state: Option<String>,
    pub current_job: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
    pub worker: WorkerHealth,
}
