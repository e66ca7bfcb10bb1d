//! Talking to the Afanasy render-farm server.
pub mod client;
pub mod model;

pub use client::AfanasyClient;
pub use model::{Block, BlockStats, Job, JobStats};

use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AfanasyError {
    #[error("Unable to connect to Afanasy at {address}: {source}")]
    Connection {
        address: String,
        source: std::io::Error,
    },
    #[error("Afanasy did not answer within {0:?}")]
    Timeout(Duration),
    #[error("Unexpected reply from Afanasy: {0}")]
    Protocol(String),
    #[error("Afanasy rejected the request: {0}")]
    Rejected(String),
    #[error("Job {0} not found")]
    JobNotFound(i64),
}

/// Anything a job can be sent to. [AfanasyClient] is the real server.
#[async_trait::async_trait]
pub trait Farm: Send + Sync {
    /// Returns the id assigned to the new job.
    async fn submit(&self, job: &Job) -> Result<i64, AfanasyError>;

    /// Full job description as the server reports it.
    async fn job_info(&self, id: i64) -> Result<Value, AfanasyError>;

    async fn task_output(&self, id: i64, block: i64, task: i64) -> Result<String, AfanasyError>;

    async fn job_stats(&self, id: i64) -> Result<JobStats, AfanasyError> {
        let info = self.job_info(id).await?;
        Ok(JobStats::from_job(&info))
    }
}
