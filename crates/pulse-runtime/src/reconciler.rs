//! Per-incident reconciliation: decide, render, dispatch, record.

use std::sync::Arc;

use pulse_render::render_incident;
use pulse_store::{IncidentStore, StoreError};
use pulse_types::{Incident, StoredRecord};
use thiserror::Error;

use crate::clock::Clock;
use crate::message_sink::{DeliveryError, MessageSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// First sighting of an incident that is already terminal.
    ResolvedBeforeSeen,
    /// The stored record is terminal and locked.
    AlreadyResolved,
    NoNewUpdates,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ResolvedBeforeSeen => "resolved_before_seen",
            Self::AlreadyResolved => "already_resolved",
            Self::NoNewUpdates => "no_new_updates",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileAction {
    Skip(SkipReason),
    Create,
    Update { message_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Skipped(SkipReason),
    Created { message_id: String },
    Updated { message_id: String },
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("failed to read stored record for incident '{incident_id}': {source}")]
    StoreRead {
        incident_id: String,
        #[source]
        source: StoreError,
    },
    #[error("failed to {operation} for incident '{incident_id}': {source}")]
    Delivery {
        incident_id: String,
        operation: &'static str,
        #[source]
        source: DeliveryError,
    },
    /// Message was sent or edited but its record was not saved.
    #[error(
        "message '{message_id}' for incident '{incident_id}' was dispatched but not recorded: {source}"
    )]
    StoreWrite {
        incident_id: String,
        message_id: String,
        #[source]
        source: StoreError,
    },
}

impl ReconcileError {
    pub fn incident_id(&self) -> &str {
        match self {
            Self::StoreRead { incident_id, .. }
            | Self::Delivery { incident_id, .. }
            | Self::StoreWrite { incident_id, .. } => incident_id,
        }
    }
}

/// Decides what to do with one incident snapshot given its stored record.
pub fn decide_action(incident: &Incident, stored: Option<&StoredRecord>) -> ReconcileAction {
    let Some(stored) = stored else {
        if incident.is_terminal() {
            return ReconcileAction::Skip(SkipReason::ResolvedBeforeSeen);
        }
        return ReconcileAction::Create;
    };

    if stored.resolved {
        return ReconcileAction::Skip(SkipReason::AlreadyResolved);
    }
    match incident.incoming_timestamp() {
        Some(incoming) if incoming > stored.last_update => ReconcileAction::Update {
            message_id: stored.message_id.clone(),
        },
        _ => ReconcileAction::Skip(SkipReason::NoNewUpdates),
    }
}

/// Applies [`decide_action`] with side effects against the sink and store.
pub struct IncidentReconciler {
    store: Arc<dyn IncidentStore>,
    sink: Arc<dyn MessageSink>,
    clock: Arc<dyn Clock>,
}

impl IncidentReconciler {
    pub fn new(
        store: Arc<dyn IncidentStore>,
        sink: Arc<dyn MessageSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { store, sink, clock }
    }

    pub async fn reconcile(&self, incident: &Incident) -> Result<ReconcileOutcome, ReconcileError> {
        let stored =
            self.store
                .get(&incident.id)
                .await
                .map_err(|source| ReconcileError::StoreRead {
                    incident_id: incident.id.clone(),
                    source,
                })?;

        let (message_id, created) = match decide_action(incident, stored.as_ref()) {
            ReconcileAction::Skip(reason) => {
                tracing::debug!(
                    incident_id = %incident.id,
                    reason = reason.as_str(),
                    "skipping incident"
                );
                return Ok(ReconcileOutcome::Skipped(reason));
            }
            ReconcileAction::Create => {
                tracing::info!(incident_id = %incident.id, "new incident");
                let document = render_incident(incident);
                let message_id = self.sink.create_message(&document).await.map_err(|source| {
                    ReconcileError::Delivery {
                        incident_id: incident.id.clone(),
                        operation: "create message",
                        source,
                    }
                })?;
                (message_id, true)
            }
            ReconcileAction::Update { message_id } => {
                tracing::info!(incident_id = %incident.id, %message_id, "update incident");
                let document = render_incident(incident);
                self.sink
                    .edit_message(&message_id, &document)
                    .await
                    .map_err(|source| ReconcileError::Delivery {
                        incident_id: incident.id.clone(),
                        operation: "edit message",
                        source,
                    })?;
                (message_id, false)
            }
        };

        let record = StoredRecord::new(
            message_id.clone(),
            incident
                .incoming_timestamp()
                .unwrap_or_else(|| self.clock.now()),
            incident.is_terminal(),
        );
        tracing::debug!(
            incident_id = %incident.id,
            %message_id,
            last_update = %record.last_update,
            resolved = record.resolved,
            "recording incident message"
        );
        if let Err(source) = self.store.set(&incident.id, record).await {
            return Err(ReconcileError::StoreWrite {
                incident_id: incident.id.clone(),
                message_id,
                source,
            });
        }

        Ok(if created {
            ReconcileOutcome::Created { message_id }
        } else {
            ReconcileOutcome::Updated { message_id }
        })
    }
}
