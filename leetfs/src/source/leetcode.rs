//! HTTP client for the LeetCode REST API.

use async_trait::async_trait;
use reqwest::header::{COOKIE, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{FetchError, SubmissionSource};
use crate::index::Submission;

pub const DEFAULT_BASE_URL: &str = "https://leetcode.com/api/";
const CLIENT_NAME: &str = "LeetFS";
const PAGE_SIZE: usize = 20;
const MIN_REQUEST_INTERVAL: Duration = Duration::from_secs(1);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Exponential backoff applied to transient failures.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_tries: u32,
    pub initial_delay: Duration,
    pub backoff: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_tries: 10,
            initial_delay: Duration::from_secs(1),
            backoff: 2,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = self.backoff.saturating_pow(attempt);
        self.initial_delay.saturating_mul(factor)
    }

    /// Runs `op` until it succeeds, fails with a non-transient error, or the
    /// tries run out. The last error is returned in the latter case.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt + 1 < self.max_tries => {
                    let delay = self.delay(attempt);
                    warn!("attempt {} failed: {e}; retrying in {delay:?}", attempt + 1);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[derive(Deserialize)]
struct ProblemList {
    #[serde(default)]
    user_name: Option<String>,
    #[serde(default)]
    stat_status_pairs: Vec<StatStatusPair>,
}

#[derive(Deserialize)]
struct StatStatusPair {
    stat: Stat,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Deserialize)]
struct Stat {
    #[serde(rename = "question__title_slug")]
    title_slug: String,
}

#[derive(Deserialize)]
struct SubmissionsDump {
    submissions_dump: Vec<Submission>,
}

impl ProblemList {
    fn solved_slugs(self) -> Result<Vec<String>, FetchError> {
        match self.user_name.as_deref() {
            Some(name) if !name.is_empty() => debug!("logged in as {name}"),
            _ => return Err(FetchError::Auth("not logged in".to_string())),
        }
        Ok(self
            .stat_status_pairs
            .into_iter()
            .filter(|pair| pair.status.as_deref() == Some("ac"))
            .map(|pair| pair.stat.title_slug)
            .collect())
    }
}

fn check_status(status: StatusCode) -> Result<(), FetchError> {
    if status.is_success() {
        Ok(())
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        Err(FetchError::Auth(format!("server answered {status}")))
    } else if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        Err(FetchError::Transient(format!("server answered {status}")))
    } else {
        Err(FetchError::Status(status.as_u16()))
    }
}

/// Walks the newest-first submission listing page by page, stopping at a
/// short page or at the first page that reaches `since_id`.
async fn collect_pages<F, Fut>(since_id: u64, mut fetch_page: F) -> Result<Vec<Submission>, FetchError>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<Vec<Submission>, FetchError>>,
{
    let mut collected = Vec::new();
    let mut offset = 0;
    loop {
        let page = fetch_page(offset).await?;
        let full = page.len() >= PAGE_SIZE;
        let reached = page.iter().any(|s| s.id <= since_id);
        collected.extend(page.into_iter().filter(|s| s.id > since_id));
        if !full || reached {
            break;
        }
        offset += PAGE_SIZE;
    }
    Ok(collected)
}

pub struct LeetCodeClient {
    http: reqwest::Client,
    base_url: Url,
    retry: RetryPolicy,
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl LeetCodeClient {
    /// Builds a client sending `cookie` verbatim with every request.
    pub fn new(base_url: &str, cookie: &str) -> Result<Self, FetchError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| FetchError::Config(format!("base url {base_url}: {e}")))?;

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_NAME));
        let cookie = HeaderValue::from_str(cookie.trim())
            .map_err(|e| FetchError::Config(format!("cookie: {e}")))?;
        headers.insert(COOKIE, cookie);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| FetchError::Config(e.to_string()))?;

        Ok(Self {
            http,
            base_url,
            retry: RetryPolicy::default(),
            min_interval: MIN_REQUEST_INTERVAL,
            last_request: Mutex::new(None),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    /// Code of one submission, or `None` if the problem has no such id.
    pub async fn fetch_code(&self, slug: &str, id: u64) -> Result<Option<String>, FetchError> {
        let submissions = self.fetch_submissions(slug).await?;
        Ok(submissions.into_iter().find(|s| s.id == id).map(|s| s.code))
    }

    fn url(&self, path: &str) -> Result<Url, FetchError> {
        self.base_url
            .join(path)
            .map_err(|e| FetchError::Config(format!("{path}: {e}")))
    }

    /// Sleeps until at least `min_interval` has passed since the previous
    /// request. Concurrent callers queue on the lock.
    async fn pace(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, FetchError> {
        let url = &self.url(path)?;
        self.retry
            .run(move || async move {
                self.pace().await;
                info!("fetching {url}");
                let response = self.http.get(url.clone()).send().await?;
                check_status(response.status())?;
                let body = response.bytes().await?;
                Ok(serde_json::from_slice(&body)?)
            })
            .await
    }
}

#[async_trait]
impl SubmissionSource for LeetCodeClient {
    async fn fetch_problem_slugs(&self) -> Result<Vec<String>, FetchError> {
        let list: ProblemList = self.get_json("problems/all/").await?;
        list.solved_slugs()
    }

    async fn fetch_submissions(&self, slug: &str) -> Result<Vec<Submission>, FetchError> {
        let dump: SubmissionsDump = self.get_json(&format!("submissions/{slug}")).await?;
        Ok(dump.submissions_dump)
    }

    async fn fetch_all_submissions(&self, since_id: u64) -> Result<Vec<Submission>, FetchError> {
        let submissions = collect_pages(since_id, move |offset| async move {
            debug!("fetched {offset} submissions so far");
            let path = format!("submissions/?offset={offset}&limit={PAGE_SIZE}");
            let dump: SubmissionsDump = self.get_json(&path).await?;
            Ok(dump.submissions_dump)
        })
        .await?;
        info!("{} submissions newer than {since_id}", submissions.len());
        Ok(submissions)
    }
}
