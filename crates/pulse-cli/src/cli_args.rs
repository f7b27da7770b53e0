use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser};
use pulse_runtime::{
    RelayRuntimeConfig, RetentionPolicy, DEFAULT_FEED_API_BASE, DEFAULT_MAX_CONCURRENT_RECONCILES,
};

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "pulse",
    about = "Relays status-page incidents into a chat channel through a webhook",
    version
)]
pub(crate) struct Cli {
    #[arg(
        long = "webhook-url",
        env = "DISCORD_WEBHOOK_URL",
        hide_env_values = true,
        help = "Execute-webhook URL ending in /webhooks/<id>/<token>"
    )]
    pub(crate) webhook_url: String,

    #[arg(
        long = "feed-api-base",
        env = "PULSE_FEED_API_BASE",
        default_value = DEFAULT_FEED_API_BASE,
        help = "Statuspage v2 API base; incidents are read from <base>/incidents.json"
    )]
    pub(crate) feed_api_base: String,

    #[arg(
        long = "state-db",
        env = "PULSE_STATE_DB",
        default_value = "./data/data.sqlite",
        help = "SQLite database holding one record per relayed incident"
    )]
    pub(crate) state_db: PathBuf,

    #[arg(
        long = "poll-interval-seconds",
        env = "PULSE_POLL_INTERVAL_SECONDS",
        default_value_t = 300,
        value_parser = parse_positive_u64,
        help = "Seconds between poll cycle starts"
    )]
    pub(crate) poll_interval_seconds: u64,

    #[arg(
        long = "request-timeout-ms",
        env = "PULSE_REQUEST_TIMEOUT_MS",
        default_value_t = 10_000,
        value_parser = parse_positive_u64,
        help = "Timeout for feed and webhook HTTP requests"
    )]
    pub(crate) request_timeout_ms: u64,

    #[arg(
        long = "max-concurrent-reconciles",
        env = "PULSE_MAX_CONCURRENT_RECONCILES",
        default_value_t = DEFAULT_MAX_CONCURRENT_RECONCILES,
        value_parser = parse_positive_usize,
        help = "Upper bound on incidents reconciled at the same time within a cycle"
    )]
    pub(crate) max_concurrent_reconciles: usize,

    #[arg(
        long = "resolved-retention-days",
        env = "PULSE_RESOLVED_RETENTION_DAYS",
        value_parser = parse_positive_u64,
        help = "Prune resolved incident records older than this many days (kept forever when unset)"
    )]
    pub(crate) resolved_retention_days: Option<u64>,

    #[arg(
        long = "poll-once",
        env = "PULSE_POLL_ONCE",
        default_value_t = false,
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        help = "Run one poll cycle and exit; a feed failure becomes a non-zero exit"
    )]
    pub(crate) poll_once: bool,
}

impl Cli {
    pub(crate) fn into_runtime_config(self) -> RelayRuntimeConfig {
        let retention = match self.resolved_retention_days {
            Some(days) => RetentionPolicy::PruneResolvedAfter(Duration::from_secs(
                days.saturating_mul(SECONDS_PER_DAY),
            )),
            None => RetentionPolicy::Unbounded,
        };
        RelayRuntimeConfig {
            feed_api_base: self.feed_api_base,
            webhook_url: self.webhook_url,
            state_db_path: self.state_db,
            request_timeout_ms: self.request_timeout_ms,
            poll_interval: Duration::from_secs(self.poll_interval_seconds),
            poll_once: self.poll_once,
            max_concurrent_reconciles: self.max_concurrent_reconciles,
            retention,
        }
    }
}
