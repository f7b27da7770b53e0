//! Status-page feed source.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use pulse_types::{Incident, IncidentFeedDocument};
use thiserror::Error;

use crate::http_helpers::truncate_for_error;

/// Errors raised while fetching the incident feed. Any of them aborts the
/// current poll cycle only.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("incident feed request failed: {0}")]
    Network(#[source] reqwest::Error),
    #[error("incident feed returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("incident feed payload is malformed: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Source of incident snapshots, newest incident first.
#[async_trait]
pub trait IncidentFeed: Send + Sync {
    async fn fetch_incidents(&self) -> Result<Vec<Incident>, FeedError>;
}

/// Reads `<api_base>/incidents.json` from a Statuspage v2 API.
#[derive(Clone)]
pub struct StatuspageFeedClient {
    http: reqwest::Client,
    api_base: String,
}

impl StatuspageFeedClient {
    pub fn new(api_base: impl Into<String>, request_timeout_ms: u64) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("pulse-incident-relay"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(request_timeout_ms.max(1)))
            .build()
            .context("failed to create incident feed client")?;
        Ok(Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn incidents_url(&self) -> String {
        format!("{}/incidents.json", self.api_base)
    }
}

#[async_trait]
impl IncidentFeed for StatuspageFeedClient {
    async fn fetch_incidents(&self) -> Result<Vec<Incident>, FeedError> {
        let response = self
            .http
            .get(self.incidents_url())
            .send()
            .await
            .map_err(FeedError::Network)?;
        let status = response.status();
        let body = response.text().await.map_err(FeedError::Network)?;
        if !status.is_success() {
            return Err(FeedError::Status {
                status: status.as_u16(),
                body: truncate_for_error(&body, 800),
            });
        }
        let document = serde_json::from_str::<IncidentFeedDocument>(&body)?;
        tracing::debug!(
            incidents = document.incidents.len(),
            page = document.page.as_ref().map(|page| page.name.as_str()).unwrap_or("unknown"),
            "fetched incident feed"
        );
        Ok(document.incidents)
    }
}
