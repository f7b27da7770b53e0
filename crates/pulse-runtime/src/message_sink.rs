//! Chat webhook dispatch.
//!
//! Each create or edit is attempted once; a failed delivery is retried by the
//! next poll cycle because the reconciler leaves the stored record untouched.

use std::fmt;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use pulse_types::{DisplayDocument, DisplayEntry};
use reqwest::Url;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::http_helpers::{truncate_for_error, truncate_to_limit};

const EMBED_TITLE_MAX_CHARS: usize = 256;
const EMBED_DESCRIPTION_MAX_CHARS: usize = 4_096;
const EMBED_FOOTER_MAX_CHARS: usize = 2_048;
const EMBED_FIELD_NAME_MAX_CHARS: usize = 256;
const EMBED_FIELD_VALUE_MAX_CHARS: usize = 1_024;
const EMBED_MAX_FIELDS: usize = 25;
const EMBED_TOTAL_MAX_CHARS: usize = 6_000;
const EMPTY_FIELD_VALUE: &str = "\u{200b}";

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("webhook {operation} request failed: {source}")]
    Transport {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("webhook rejected {operation} with status {status}: {body}")]
    Rejected {
        operation: &'static str,
        status: u16,
        body: String,
    },
    #[error("webhook message '{message_id}' does not exist")]
    UnknownMessage { message_id: String },
    #[error("webhook returned an invalid {operation} response: {reason}")]
    InvalidResponse {
        operation: &'static str,
        reason: String,
    },
}

/// Destination for rendered incident messages.
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Posts a new message and returns its identifier.
    async fn create_message(&self, document: &DisplayDocument) -> Result<String, DeliveryError>;
    async fn edit_message(
        &self,
        message_id: &str,
        document: &DisplayDocument,
    ) -> Result<(), DeliveryError>;
}

/// Parsed `/webhooks/<id>/<token>` URL. The token never appears in `Debug`.
#[derive(Clone)]
pub struct WebhookTarget {
    url: Url,
    id: String,
}

impl WebhookTarget {
    pub fn parse(raw: &str) -> Result<Self> {
        let mut url = Url::parse(raw.trim()).context("invalid webhook url")?;
        if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
            bail!("webhook url must be an http(s) url");
        }
        let segments = url
            .path_segments()
            .map(|segments| {
                segments
                    .filter(|segment| !segment.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        let position = segments
            .iter()
            .position(|segment| segment == "webhooks")
            .ok_or_else(|| anyhow!("webhook url must end with /webhooks/<id>/<token>"))?;
        if segments.len() != position + 3 {
            bail!("webhook url must end with /webhooks/<id>/<token>");
        }
        let id = segments[position + 1].clone();
        url.set_path(&format!("/{}", segments.join("/")));
        url.set_fragment(None);
        Ok(Self { url, id })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn create_url(&self) -> Url {
        let mut url = self.url.clone();
        url.query_pairs_mut().append_pair("wait", "true");
        url
    }

    fn message_url(&self, message_id: &str) -> Url {
        let mut url = self.url.clone();
        let path = format!("{}/messages/{}", self.url.path(), message_id);
        url.set_path(&path);
        url
    }
}

impl fmt::Debug for WebhookTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookTarget")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct WebhookMessageResponse {
    id: String,
}

/// Posts incident embeds through a Discord-compatible execute-webhook endpoint.
#[derive(Clone)]
pub struct DiscordWebhookSink {
    http: reqwest::Client,
    target: WebhookTarget,
}

impl DiscordWebhookSink {
    pub fn new(target: WebhookTarget, request_timeout_ms: u64) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("pulse-incident-relay"),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(request_timeout_ms.max(1)))
            .build()
            .context("failed to create webhook client")?;
        Ok(Self { http, target })
    }

    pub fn target(&self) -> &WebhookTarget {
        &self.target
    }

    async fn send(
        &self,
        operation: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, DeliveryError> {
        let response = request
            .send()
            .await
            .map_err(|source| DeliveryError::Transport { operation, source })?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(DeliveryError::Rejected {
            operation,
            status: status.as_u16(),
            body: truncate_for_error(&body, 800),
        })
    }
}

#[async_trait]
impl MessageSink for DiscordWebhookSink {
    async fn create_message(&self, document: &DisplayDocument) -> Result<String, DeliveryError> {
        let operation = "create message";
        let response = self
            .send(
                operation,
                self.http
                    .post(self.target.create_url())
                    .json(&webhook_message_payload(document)),
            )
            .await?;
        let message = response
            .json::<WebhookMessageResponse>()
            .await
            .map_err(|error| DeliveryError::InvalidResponse {
                operation,
                reason: error.to_string(),
            })?;
        if message.id.trim().is_empty() {
            return Err(DeliveryError::InvalidResponse {
                operation,
                reason: "message id is empty".to_string(),
            });
        }
        Ok(message.id)
    }

    async fn edit_message(
        &self,
        message_id: &str,
        document: &DisplayDocument,
    ) -> Result<(), DeliveryError> {
        let result = self
            .send(
                "edit message",
                self.http
                    .patch(self.target.message_url(message_id))
                    .json(&webhook_message_payload(document)),
            )
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(DeliveryError::Rejected { status: 404, .. }) => Err(DeliveryError::UnknownMessage {
                message_id: message_id.to_string(),
            }),
            Err(error) => Err(error),
        }
    }
}

/// Builds the execute-webhook body, clamping the embed to platform limits.
pub(crate) fn webhook_message_payload(document: &DisplayDocument) -> Value {
    let title = truncate_to_limit(&document.title, EMBED_TITLE_MAX_CHARS);
    let description = truncate_to_limit(&document.description, EMBED_DESCRIPTION_MAX_CHARS);
    let footer = truncate_to_limit(&document.footer, EMBED_FOOTER_MAX_CHARS);
    let fixed_chars = title.chars().count() + description.chars().count() + footer.chars().count();
    let fields = clamp_embed_fields(
        &document.entries,
        EMBED_TOTAL_MAX_CHARS.saturating_sub(fixed_chars),
    );

    let mut embed = json!({
        "title": title,
        "color": document.tone.rgb(),
        "footer": { "text": footer },
        "description": description,
        "fields": fields
            .iter()
            .map(|(name, value)| json!({ "name": name, "value": value, "inline": false }))
            .collect::<Vec<_>>(),
    });
    if let Some(url) = document.url.as_deref().filter(|url| !url.trim().is_empty()) {
        embed["url"] = json!(url);
    }
    if let Some(timestamp) = document.timestamp {
        embed["timestamp"] = json!(timestamp.to_rfc3339());
    }

    json!({
        "embeds": [embed],
        "allowed_mentions": { "parse": [] },
    })
}

/// Keeps the newest entries that fit; the oldest are dropped first.
fn clamp_embed_fields(entries: &[DisplayEntry], budget_chars: usize) -> Vec<(String, String)> {
    let mut fields = entries
        .iter()
        .map(|entry| {
            let value = if entry.content.trim().is_empty() {
                EMPTY_FIELD_VALUE.to_string()
            } else {
                truncate_to_limit(&entry.content, EMBED_FIELD_VALUE_MAX_CHARS)
            };
            (
                truncate_to_limit(&entry.label, EMBED_FIELD_NAME_MAX_CHARS),
                value,
            )
        })
        .collect::<Vec<_>>();
    if fields.len() > EMBED_MAX_FIELDS {
        let excess = fields.len() - EMBED_MAX_FIELDS;
        fields.drain(..excess);
    }
    let field_chars = |fields: &[(String, String)]| {
        fields
            .iter()
            .map(|(name, value)| name.chars().count() + value.chars().count())
            .sum::<usize>()
    };
    while !fields.is_empty() && field_chars(&fields) > budget_chars {
        fields.remove(0);
    }
    fields
}
