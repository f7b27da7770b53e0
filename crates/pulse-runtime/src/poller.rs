//! Periodic fetch-and-reconcile cycle.

use std::sync::Arc;
use std::time::Duration;

use pulse_store::IncidentStore;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use crate::clock::Clock;
use crate::incident_feed::{FeedError, IncidentFeed};
use crate::message_sink::MessageSink;
use crate::reconciler::{IncidentReconciler, ReconcileError, ReconcileOutcome};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_MAX_CONCURRENT_RECONCILES: usize = 8;

/// How long stored records are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetentionPolicy {
    #[default]
    Unbounded,
    /// Drop resolved records whose last update is older than the given age.
    PruneResolvedAfter(Duration),
}

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub poll_interval: Duration,
    pub max_concurrent_reconciles: usize,
    pub retention: RetentionPolicy,
    pub poll_once: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_concurrent_reconciles: DEFAULT_MAX_CONCURRENT_RECONCILES,
            retention: RetentionPolicy::Unbounded,
            poll_once: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleFailure {
    /// `None` when the reconcile task itself panicked.
    pub incident_id: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollCycleReport {
    pub discovered: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub pruned: usize,
    pub failures: Vec<CycleFailure>,
}

pub struct IncidentPoller {
    config: PollerConfig,
    feed: Arc<dyn IncidentFeed>,
    store: Arc<dyn IncidentStore>,
    reconciler: Arc<IncidentReconciler>,
    clock: Arc<dyn Clock>,
}

impl IncidentPoller {
    pub fn new(
        config: PollerConfig,
        feed: Arc<dyn IncidentFeed>,
        store: Arc<dyn IncidentStore>,
        sink: Arc<dyn MessageSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let reconciler = Arc::new(IncidentReconciler::new(
            Arc::clone(&store),
            sink,
            Arc::clone(&clock),
        ));
        Self {
            config,
            feed,
            store,
            reconciler,
            clock,
        }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Runs one cycle. Only a feed failure is returned as an error; per-incident
    /// failures are collected into the report.
    pub async fn poll_once(&self) -> Result<PollCycleReport, FeedError> {
        tracing::info!("heartbeat");
        let mut incidents = self.feed.fetch_incidents().await?;
        // Feed is newest first; older incidents are started first.
        incidents.reverse();

        let mut report = PollCycleReport {
            discovered: incidents.len(),
            ..PollCycleReport::default()
        };
        let permits = Arc::new(Semaphore::new(self.config.max_concurrent_reconciles.max(1)));
        let mut tasks = JoinSet::new();
        for incident in incidents {
            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                break;
            };
            let reconciler = Arc::clone(&self.reconciler);
            tasks.spawn(async move {
                let _permit = permit;
                let result = reconciler.reconcile(&incident).await;
                (incident.id, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(outcome))) => match outcome {
                    ReconcileOutcome::Created { .. } => report.created += 1,
                    ReconcileOutcome::Updated { .. } => report.updated += 1,
                    ReconcileOutcome::Skipped(_) => report.skipped += 1,
                },
                Ok((incident_id, Err(error))) => {
                    log_reconcile_error(&error);
                    report.failed += 1;
                    report.failures.push(CycleFailure {
                        incident_id: Some(incident_id),
                        reason: error.to_string(),
                    });
                }
                Err(error) => {
                    tracing::error!(%error, "reconcile task did not complete");
                    report.failed += 1;
                    report.failures.push(CycleFailure {
                        incident_id: None,
                        reason: error.to_string(),
                    });
                }
            }
        }

        report.pruned = self.apply_retention().await;
        Ok(report)
    }

    async fn apply_retention(&self) -> usize {
        let RetentionPolicy::PruneResolvedAfter(max_age) = self.config.retention else {
            return 0;
        };
        let Ok(max_age) = chrono::Duration::from_std(max_age) else {
            tracing::warn!(?max_age, "retention age out of range; skipping prune");
            return 0;
        };
        let Some(cutoff) = self.clock.now().checked_sub_signed(max_age) else {
            return 0;
        };
        match self.store.prune_resolved(cutoff).await {
            Ok(pruned) => {
                if pruned > 0 {
                    tracing::info!(pruned, %cutoff, "pruned resolved incident records");
                }
                pruned
            }
            Err(error) => {
                tracing::error!(%error, "failed to prune resolved incident records");
                0
            }
        }
    }

    /// Polls on a fixed period until `shutdown` flips to true. The first cycle
    /// runs immediately; cycles never overlap and an overrun skips missed ticks.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), FeedError> {
        let mut ticker = tokio::time::interval(self.config.poll_interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            if *shutdown.borrow() {
                tracing::info!("incident relay shutdown requested");
                return Ok(());
            }
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("incident relay shutdown requested");
                        return Ok(());
                    }
                    continue;
                }
            }

            match self.poll_once().await {
                Ok(report) => {
                    tracing::info!(
                        discovered = report.discovered,
                        created = report.created,
                        updated = report.updated,
                        skipped = report.skipped,
                        failed = report.failed,
                        pruned = report.pruned,
                        "poll cycle complete"
                    );
                    if self.config.poll_once {
                        return Ok(());
                    }
                }
                Err(error) => {
                    tracing::warn!(%error, "error during fetch and update routine");
                    if self.config.poll_once {
                        return Err(error);
                    }
                }
            }
        }
    }
}

fn log_reconcile_error(error: &ReconcileError) {
    match error {
        ReconcileError::Delivery { incident_id, .. } => {
            tracing::warn!(%incident_id, %error, "incident dispatch failed; will retry next cycle");
        }
        ReconcileError::StoreRead { incident_id, .. } => {
            tracing::error!(%incident_id, %error, "incident skipped: stored record unreadable");
        }
        ReconcileError::StoreWrite {
            incident_id,
            message_id,
            ..
        } => {
            tracing::error!(
                %incident_id,
                %message_id,
                %error,
                "incident dispatched but not recorded"
            );
        }
    }
}
