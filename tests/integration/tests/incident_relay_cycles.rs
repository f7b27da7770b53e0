use std::sync::Arc;

use chrono::{TimeZone, Utc};
use httpmock::prelude::*;
use httpmock::Mock;
use pulse_runtime::{
    run_incident_relay, DiscordWebhookSink, FixedClock, IncidentPoller, PollerConfig,
    RelayRuntimeConfig, RetentionPolicy, StatuspageFeedClient, WebhookTarget,
};
use pulse_store::{IncidentStore, SqliteIncidentStore, StoredRecord};
use serde_json::{json, Value};
use tempfile::tempdir;

const WEBHOOK_PATH: &str = "/api/webhooks/42/relay-token";
const MESSAGE_ID: &str = "1300000000000000042";

fn update(id: &str, status: &str, body: &str, created_at: &str) -> Value {
    json!({
        "id": id,
        "status": status,
        "body": body,
        "created_at": created_at,
    })
}

fn incident(id: &str, status: &str, updates: Vec<Value>) -> Value {
    json!({
        "id": id,
        "name": format!("Incident {id}"),
        "shortlink": format!("https://stspg.io/{id}"),
        "status": status,
        "impact": "major",
        "created_at": "2024-03-01T10:00:00.000Z",
        "updated_at": "2024-03-01T10:30:00.000Z",
        "started_at": "2024-03-01T09:55:00.000Z",
        "incident_updates": updates,
        "components": [{ "name": "API" }, { "name": "Voice" }],
    })
}

fn feed_body(incidents: Vec<Value>) -> Value {
    json!({
        "page": { "id": "page-1", "name": "Example", "url": "https://status.example.com" },
        "incidents": incidents,
    })
}

fn serve_feed<'a>(server: &'a MockServer, incidents: Vec<Value>) -> Mock<'a> {
    let body = feed_body(incidents);
    server.mock(|when, then| {
        when.method(GET).path("/api/v2/incidents.json");
        then.status(200).json_body(body);
    })
}

fn poller_for(server: &MockServer, store: Arc<SqliteIncidentStore>) -> IncidentPoller {
    let feed = StatuspageFeedClient::new(server.url("/api/v2"), 3_000).expect("feed client");
    let target = WebhookTarget::parse(&server.url(WEBHOOK_PATH)).expect("webhook target");
    let sink = DiscordWebhookSink::new(target, 3_000).expect("sink");
    let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap());
    IncidentPoller::new(
        PollerConfig {
            max_concurrent_reconciles: 2,
            ..PollerConfig::default()
        },
        Arc::new(feed),
        store,
        Arc::new(sink),
        Arc::new(clock),
    )
}

#[tokio::test]
async fn integration_incident_lifecycle_creates_edits_and_locks_message() {
    let server = MockServer::start();
    let temp = tempdir().expect("tempdir");
    let store = Arc::new(SqliteIncidentStore::new(temp.path().join("data.sqlite")).expect("store"));
    let poller = poller_for(&server, Arc::clone(&store));

    let create = server.mock(|when, then| {
        when.method(POST)
            .path(WEBHOOK_PATH)
            .query_param("wait", "true")
            .body_includes("\"title\":\"Incident INC-1\"")
            .body_includes("Affected Components: API, Voice");
        then.status(200).json_body(json!({ "id": MESSAGE_ID }));
    });
    let edit_path = format!("{WEBHOOK_PATH}/messages/{MESSAGE_ID}");
    let edit = server.mock(|when, then| {
        when.method(PATCH).path(edit_path.as_str());
        then.status(200).json_body(json!({ "id": MESSAGE_ID }));
    });

    // A resolved incident never seen before is ignored.
    let mut feed = serve_feed(
        &server,
        vec![
            incident(
                "INC-0",
                "resolved",
                vec![update("u0", "resolved", "Fixed.", "2024-03-01T09:00:00.000Z")],
            ),
            incident(
                "INC-1",
                "investigating",
                vec![update("u1", "investigating", "Looking.", "2024-03-01T10:05:00.000Z")],
            ),
        ],
    );
    let first = poller.poll_once().await.expect("first cycle");
    assert_eq!((first.created, first.skipped), (1, 1));
    create.assert_hits(1);
    assert!(store.get("INC-0").await.expect("get").is_none());
    assert_eq!(
        store.get("INC-1").await.expect("get"),
        Some(StoredRecord::new(
            MESSAGE_ID,
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 5, 0).unwrap(),
            false
        ))
    );

    // Same snapshot again: nothing is sent.
    let repeat = poller.poll_once().await.expect("repeat cycle");
    assert_eq!(repeat.skipped, 2);
    create.assert_hits(1);
    edit.assert_hits(0);
    feed.delete();

    feed = serve_feed(
        &server,
        vec![incident(
            "INC-1",
            "resolved",
            vec![
                update("u2", "resolved", "All clear.", "2024-03-01T11:00:00.000Z"),
                update("u1", "investigating", "Looking.", "2024-03-01T10:05:00.000Z"),
            ],
        )],
    );
    let resolved = poller.poll_once().await.expect("resolve cycle");
    assert_eq!(resolved.updated, 1);
    edit.assert_hits(1);
    let record = store.get("INC-1").await.expect("get").expect("record");
    assert!(record.resolved);
    assert_eq!(record.message_id, MESSAGE_ID);
    feed.delete();

    // Later postmortem updates do not reopen a resolved message.
    serve_feed(
        &server,
        vec![incident(
            "INC-1",
            "postmortem",
            vec![update("u3", "postmortem", "Writeup.", "2024-03-01T15:00:00.000Z")],
        )],
    );
    let locked = poller.poll_once().await.expect("locked cycle");
    assert_eq!(locked.skipped, 1);
    edit.assert_hits(1);
    create.assert_hits(1);
}

#[tokio::test]
async fn integration_rejected_delivery_is_retried_next_cycle() {
    let server = MockServer::start();
    let temp = tempdir().expect("tempdir");
    let store = Arc::new(SqliteIncidentStore::new(temp.path().join("data.sqlite")).expect("store"));
    let poller = poller_for(&server, Arc::clone(&store));
    serve_feed(
        &server,
        vec![incident(
            "INC-7",
            "identified",
            vec![update("u1", "identified", "Found it.", "2024-03-01T10:05:00.000Z")],
        )],
    );

    let mut outage = server.mock(|when, then| {
        when.method(POST).path(WEBHOOK_PATH);
        then.status(500).body("upstream broke");
    });
    let failed = poller.poll_once().await.expect("cycle");
    assert_eq!(failed.failed, 1);
    assert_eq!(failed.failures[0].incident_id.as_deref(), Some("INC-7"));
    assert_eq!(store.len().await.expect("len"), 0);
    outage.delete();

    let create = server.mock(|when, then| {
        when.method(POST).path(WEBHOOK_PATH);
        then.status(200).json_body(json!({ "id": MESSAGE_ID }));
    });
    let retried = poller.poll_once().await.expect("cycle");
    assert_eq!(retried.created, 1);
    create.assert_hits(1);
    assert_eq!(store.len().await.expect("len"), 1);
}

#[tokio::test]
async fn integration_run_incident_relay_poll_once_persists_state() {
    let server = MockServer::start();
    let temp = tempdir().expect("tempdir");
    let db_path = temp.path().join("state").join("data.sqlite");
    serve_feed(
        &server,
        vec![incident(
            "INC-9",
            "monitoring",
            vec![update("u1", "monitoring", "Watching.", "2024-03-01T10:05:00.000Z")],
        )],
    );
    let create = server.mock(|when, then| {
        when.method(POST).path(WEBHOOK_PATH).query_param("wait", "true");
        then.status(200).json_body(json!({ "id": MESSAGE_ID }));
    });

    run_incident_relay(RelayRuntimeConfig {
        feed_api_base: server.url("/api/v2"),
        webhook_url: server.url(WEBHOOK_PATH),
        state_db_path: db_path.clone(),
        request_timeout_ms: 3_000,
        poll_interval: std::time::Duration::from_secs(60),
        poll_once: true,
        max_concurrent_reconciles: 4,
        retention: RetentionPolicy::Unbounded,
    })
    .await
    .expect("relay run");

    create.assert_hits(1);
    let reopened = SqliteIncidentStore::new(&db_path).expect("reopen");
    let record = reopened.get("INC-9").await.expect("get").expect("record");
    assert_eq!(record.message_id, MESSAGE_ID);
    assert!(!record.resolved);
}
