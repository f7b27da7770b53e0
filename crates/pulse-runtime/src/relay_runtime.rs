use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use pulse_store::SqliteIncidentStore;
use tokio::sync::watch;

use crate::clock::SystemClock;
use crate::incident_feed::StatuspageFeedClient;
use crate::message_sink::{DiscordWebhookSink, WebhookTarget};
use crate::poller::{IncidentPoller, PollerConfig, RetentionPolicy};

pub const DEFAULT_FEED_API_BASE: &str = "https://discordstatus.com/api/v2";

#[derive(Debug, Clone)]
pub struct RelayRuntimeConfig {
    pub feed_api_base: String,
    pub webhook_url: String,
    pub state_db_path: PathBuf,
    pub request_timeout_ms: u64,
    pub poll_interval: Duration,
    pub poll_once: bool,
    pub max_concurrent_reconciles: usize,
    pub retention: RetentionPolicy,
}

/// Builds the production feed, sink and store and runs the poll loop until
/// ctrl-c, or for a single cycle when `poll_once` is set.
pub async fn run_incident_relay(config: RelayRuntimeConfig) -> Result<()> {
    let runtime = IncidentRelayRuntime::new(config)?;
    runtime.run().await
}

struct IncidentRelayRuntime {
    poller: IncidentPoller,
}

impl IncidentRelayRuntime {
    fn new(config: RelayRuntimeConfig) -> Result<Self> {
        let target = WebhookTarget::parse(&config.webhook_url)?;
        let webhook_id = target.id().to_string();
        let sink = DiscordWebhookSink::new(target, config.request_timeout_ms)?;
        let feed = StatuspageFeedClient::new(config.feed_api_base.clone(), config.request_timeout_ms)?;
        let store = SqliteIncidentStore::new(&config.state_db_path).with_context(|| {
            format!(
                "failed to open incident store {}",
                config.state_db_path.display()
            )
        })?;

        tracing::info!(
            %webhook_id,
            feed = %feed.incidents_url(),
            state_db = %store.path().display(),
            poll_interval_secs = config.poll_interval.as_secs(),
            poll_once = config.poll_once,
            "incident relay configured"
        );

        let poller = IncidentPoller::new(
            PollerConfig {
                poll_interval: config.poll_interval,
                max_concurrent_reconciles: config.max_concurrent_reconciles,
                retention: config.retention,
                poll_once: config.poll_once,
            },
            Arc::new(feed),
            Arc::new(store),
            Arc::new(sink),
            Arc::new(SystemClock),
        );
        Ok(Self { poller })
    }

    async fn run(&self) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let signal_task = tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    let _ = shutdown_tx.send(true);
                }
                Err(error) => {
                    tracing::warn!(%error, "failed to listen for ctrl-c");
                    // Dropping the sender would read as a shutdown request.
                    std::future::pending::<()>().await;
                }
            }
        });

        let result = self.poller.run(shutdown_rx).await;
        signal_task.abort();
        result.context("incident relay stopped on feed failure")
    }
}
