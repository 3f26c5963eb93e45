
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::Config;

/// One crawled page: its URL and the markdown the crawl service extracted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawledPage {
    pub url: String,
    pub markdown: String,
}

/// Lifecycle of a submitted crawl job.
///
/// The deadline is computed once at submission; polling never extends it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlJobState {
    Submitted,
    Polling,
    Completed,
    Failed,
    TimedOut,
}

/// Client for a hosted crawl API (submit a job, poll until done).
///
/// The service crawls every reachable page under the starting URL's host and
/// returns markdown per page; there is no page-count cap.
#[derive(Debug, Clone)]
pub struct CrawlClient {
    client: reqwest::Client,
    base_url: Url,
    api_key: String,
    poll_interval: Duration,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    url: &'a str,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default)]
    data: Vec<PageData>,
}

#[derive(Debug, Deserialize)]
struct PageData {
    #[serde(default)]
    markdown: String,
    #[serde(default)]
    metadata: PageMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct PageMetadata {
    #[serde(rename = "sourceURL", default)]
    source_url: String,
}

impl CrawlClient {
    #[inline]
    pub fn new(config: &Config) -> Result<Self> {
        let base_url = config
            .crawl_base_url()
            .context("Failed to build crawl base URL from config")?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url,
            api_key: config.crawl_api_key.clone(),
            poll_interval: Duration::from_secs(config.crawl.poll_interval_secs),
            timeout: Duration::from_secs(config.crawl.timeout_secs),
        })
    }

    /// Crawl the full reachable site under `start_url`.
    ///
    /// Submits a job, then polls on a fixed interval until the job reports
    /// completed or failed, or until the wall-clock deadline passes. Job
    /// failure and timeout both fail the whole operation.
    #[inline]
    pub async fn crawl_site(&self, start_url: &str) -> Result<Vec<CrawledPage>> {
        let job_id = self.submit(start_url).await?;
        let deadline = Instant::now() + self.timeout;
        let mut state = CrawlJobState::Submitted;

        info!(
            "Crawl job {} submitted for {} (state {:?})",
            job_id, start_url, state
        );

        loop {
            if Instant::now() >= deadline {
                state = CrawlJobState::TimedOut;
                warn!(
                    "Crawl job {} reached {:?} after {:?}",
                    job_id, state, self.timeout
                );
                anyhow::bail!(
                    "Crawl of {start_url} timed out after {} seconds",
                    self.timeout.as_secs()
                );
            }

            let status = self.fetch_status(&job_id).await?;

            match status.status.as_str() {
                "completed" => {
                    state = CrawlJobState::Completed;
                    let pages: Vec<CrawledPage> = status
                        .data
                        .into_iter()
                        .filter(|p| !p.markdown.trim().is_empty() || !p.metadata.source_url.is_empty())
                        .map(|p| CrawledPage {
                            url: p.metadata.source_url,
                            markdown: p.markdown,
                        })
                        .collect();
                    info!(
                        "Crawl job {} completed with {} pages (state {:?})",
                        job_id,
                        pages.len(),
                        state
                    );
                    return Ok(pages);
                }
                "failed" | "cancelled" => {
                    state = CrawlJobState::Failed;
                    warn!("Crawl job {} reported {:?}", job_id, state);
                    anyhow::bail!("Crawl of {start_url} failed (job {job_id})");
                }
                _ => {
                    state = CrawlJobState::Polling;
                    debug!(
                        "Crawl job {} is {:?} (service status '{}')",
                        job_id, state, status.status
                    );
                }
            }

            sleep(self.poll_interval).await;
        }
    }

    async fn submit(&self, start_url: &str) -> Result<String> {
        let url = self
            .base_url
            .join("/v1/crawl")
            .context("Failed to build crawl submit URL")?;

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&SubmitRequest { url: start_url })
            .send()
            .await
            .context("Failed to submit crawl job")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Crawl submission failed: HTTP {status}: {body}");
        }

        let parsed: SubmitResponse = response
            .json()
            .await
            .context("Failed to parse crawl submission response")?;

        Ok(parsed.id)
    }

    async fn fetch_status(&self, job_id: &str) -> Result<StatusResponse> {
        let url = self
            .base_url
            .join(&format!("/v1/crawl/{job_id}"))
            .context("Failed to build crawl status URL")?;

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .context("Failed to poll crawl status")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Crawl status poll failed: HTTP {status}: {body}");
        }

        response
            .json()
            .await
            .context("Failed to parse crawl status response")
    }
}
