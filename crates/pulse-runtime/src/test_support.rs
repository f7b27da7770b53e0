//! Shared fakes for runtime unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use pulse_store::{IncidentStore, StoreError, StoreResult};
use pulse_types::{
    DisplayDocument, Incident, IncidentComponent, IncidentImpact, IncidentStatus, IncidentUpdate,
    StoredRecord,
};

use crate::incident_feed::{FeedError, IncidentFeed};
use crate::message_sink::{DeliveryError, MessageSink};

pub(crate) fn at(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap() + chrono::Duration::minutes(minutes)
}

pub(crate) fn update(status: IncidentStatus, body: &str, minutes: i64) -> IncidentUpdate {
    IncidentUpdate {
        status,
        body: body.to_string(),
        created_at: at(minutes),
    }
}

/// `updates` are `(minutes, status)` pairs, newest first like the feed.
pub(crate) fn incident(id: &str, status: IncidentStatus, updates: &[(i64, &str)]) -> Incident {
    Incident {
        id: id.to_string(),
        name: format!("Incident {id}"),
        shortlink: Some(format!("https://stspg.io/{id}")),
        status,
        impact: IncidentImpact::Major,
        created_at: Some(at(0)),
        updated_at: None,
        started_at: None,
        incident_updates: updates
            .iter()
            .map(|(minutes, status)| {
                update(
                    IncidentStatus::parse(status),
                    &format!("{status} update"),
                    *minutes,
                )
            })
            .collect(),
        components: vec![IncidentComponent {
            name: "API".to_string(),
        }],
    }
}

#[derive(Debug, Clone)]
pub(crate) enum SinkCall {
    Create(DisplayDocument),
    Edit(String, DisplayDocument),
}

impl SinkCall {
    pub(crate) fn footer(&self) -> &str {
        match self {
            Self::Create(document) | Self::Edit(_, document) => &document.footer,
        }
    }
}

/// Records every dispatch attempt; created messages are numbered `M1`, `M2`, ...
#[derive(Debug, Default)]
pub(crate) struct RecordingSink {
    calls: Mutex<Vec<SinkCall>>,
    created: AtomicUsize,
    failing: AtomicBool,
    delays: HashMap<String, Duration>,
}

impl RecordingSink {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn failing() -> Self {
        let sink = Self::default();
        sink.failing.store(true, Ordering::SeqCst);
        sink
    }

    /// Delays dispatch for the incident with `incident_id` before recording it.
    pub(crate) fn with_delay(mut self, incident_id: &str, delay: Duration) -> Self {
        self.delays.insert(incident_id.to_string(), delay);
        self
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    async fn dispatch(&self, call: SinkCall) -> Result<(), DeliveryError> {
        if let Some(delay) = self.delays.get(call.footer()) {
            tokio::time::sleep(*delay).await;
        }
        self.calls.lock().expect("calls lock").push(call);
        if self.failing.load(Ordering::SeqCst) {
            return Err(DeliveryError::Rejected {
                operation: "test dispatch",
                status: 500,
                body: "scripted failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl MessageSink for RecordingSink {
    async fn create_message(&self, document: &DisplayDocument) -> Result<String, DeliveryError> {
        self.dispatch(SinkCall::Create(document.clone())).await?;
        let index = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("M{index}"))
    }

    async fn edit_message(
        &self,
        message_id: &str,
        document: &DisplayDocument,
    ) -> Result<(), DeliveryError> {
        self.dispatch(SinkCall::Edit(message_id.to_string(), document.clone()))
            .await
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum StoreFailure {
    Read,
    Write,
}

pub(crate) struct FailingStore {
    failure: StoreFailure,
}

impl FailingStore {
    pub(crate) fn new(failure: StoreFailure) -> Self {
        Self { failure }
    }
}

#[async_trait]
impl IncidentStore for FailingStore {
    async fn get(&self, _incident_id: &str) -> StoreResult<Option<StoredRecord>> {
        match self.failure {
            StoreFailure::Read => Err(StoreError::Io(std::io::Error::other("disk unavailable"))),
            StoreFailure::Write => Ok(None),
        }
    }

    async fn set(&self, _incident_id: &str, _record: StoredRecord) -> StoreResult<()> {
        Err(StoreError::Io(std::io::Error::other("disk full")))
    }

    async fn prune_resolved(&self, _older_than: DateTime<Utc>) -> StoreResult<usize> {
        Err(StoreError::Io(std::io::Error::other("disk unavailable")))
    }

    async fn len(&self) -> StoreResult<usize> {
        Ok(0)
    }
}

/// Serves one scripted response per fetch; `None` yields a 503 feed error.
pub(crate) struct ScriptedFeed {
    responses: Mutex<VecDeque<Option<Vec<Incident>>>>,
    fetches: AtomicUsize,
}

impl ScriptedFeed {
    pub(crate) fn new(responses: Vec<Option<Vec<Incident>>>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::from(responses)),
            fetches: AtomicUsize::new(0),
        }
    }

    pub(crate) fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IncidentFeed for ScriptedFeed {
    async fn fetch_incidents(&self) -> Result<Vec<Incident>, FeedError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let next = self.responses.lock().expect("responses lock").pop_front();
        match next {
            Some(Some(incidents)) => Ok(incidents),
            Some(None) | None => Err(FeedError::Status {
                status: 503,
                body: "scripted outage".to_string(),
            }),
        }
    }
}
