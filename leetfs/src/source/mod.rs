//! Remote data source: where submissions come from.
//!
//! The cache only talks to [`SubmissionSource`]; the HTTP client in
//! [`leetcode`] is one implementation and tests plug in in-memory fakes.

pub mod leetcode;

use async_trait::async_trait;
use thiserror::Error;

use crate::index::Submission;

pub use leetcode::{LeetCodeClient, RetryPolicy};

#[derive(Debug, Error)]
pub enum FetchError {
    /// Network, server side or payload problem; worth retrying later.
    #[error("transient fetch failure: {0}")]
    Transient(String),
    /// The configured identity was rejected.
    #[error("authentication failed: {0}")]
    Auth(String),
    /// The server refused the request for a reason retrying will not fix.
    #[error("request rejected with status {0}")]
    Status(u16),
    #[error("invalid client configuration: {0}")]
    Config(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, FetchError::Auth(_))
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        FetchError::Transient(e.to_string())
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(e: serde_json::Error) -> Self {
        FetchError::Transient(format!("malformed payload: {e}"))
    }
}

#[async_trait]
pub trait SubmissionSource: Send + Sync {
    /// Slugs of the problems the account has solved.
    async fn fetch_problem_slugs(&self) -> Result<Vec<String>, FetchError>;

    /// Every submission of one problem, any verdict.
    async fn fetch_submissions(&self, slug: &str) -> Result<Vec<Submission>, FetchError>;

    /// Submissions with an id strictly greater than `since_id`, any verdict,
    /// any problem. `0` means everything.
    async fn fetch_all_submissions(&self, since_id: u64) -> Result<Vec<Submission>, FetchError>;
}
