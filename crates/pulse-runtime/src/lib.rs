//! Incident relay runtime.
//!
//! Polls a status-page incident feed, decides per incident whether a chat
//! message must be created, edited or left alone, dispatches through a
//! webhook sink and persists the per-incident record.

pub mod clock;
mod http_helpers;
pub mod incident_feed;
pub mod message_sink;
pub mod poller;
pub mod reconciler;
mod relay_runtime;
#[cfg(test)]
mod test_support;

pub use clock::{Clock, FixedClock, SystemClock};
pub use incident_feed::{FeedError, IncidentFeed, StatuspageFeedClient};
pub use message_sink::{DeliveryError, DiscordWebhookSink, MessageSink, WebhookTarget};
pub use poller::{
    CycleFailure, IncidentPoller, PollCycleReport, PollerConfig, RetentionPolicy,
    DEFAULT_MAX_CONCURRENT_RECONCILES, DEFAULT_POLL_INTERVAL,
};
pub use reconciler::{
    decide_action, IncidentReconciler, ReconcileAction, ReconcileError, ReconcileOutcome,
    SkipReason,
};
pub use relay_runtime::{run_incident_relay, RelayRuntimeConfig, DEFAULT_FEED_API_BASE};
