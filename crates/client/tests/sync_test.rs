mod common;

use serde_json::json;
use wiremock::matchers::{method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

use chrono::{Duration, Utc};

use common::*;
use tasksync_core::{
    Error, MutationQueue, PendingMutation, RecordRow, RecordStore, SyncStateStore,
};

fn change_row(id: &str, updated_at: &str, title: &str) -> serde_json::Value {
    json!({
        "id": id,
        "updatedAt": updated_at,
        "version": "1",
        "deleted": false,
        "data": { "id": id, "title": title },
    })
}

#[tokio::test]
async fn push_is_fifo_and_collects_failures() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/tables/todo"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "a1",
            "updatedAt": "2026-08-05T10:00:00Z",
            "version": "1",
            "title": "one",
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/api/v1/tables/todo/b1"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "id": "b1",
            "updatedAt": "2026-08-05T10:00:00Z",
            "version": "v2",
            "title": "remote edit",
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/tables/notes"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "n1",
            "updatedAt": "2026-08-05T10:00:00Z",
            "version": "1",
            "body": "hello",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (service, store, _) = test_service(&server).await;
    store
        .enqueue(PendingMutation::create("todo", json!({ "title": "one" })))
        .await
        .unwrap();
    store
        .enqueue(PendingMutation::update(
            "todo",
            "b1",
            Some("v1".to_string()),
            json!({ "title": "local edit" }),
        ))
        .await
        .unwrap();
    // Queued behind the conflicting update; must be skipped, not attempted.
    store
        .enqueue(PendingMutation::delete("todo", "b1", Some("v1".to_string())))
        .await
        .unwrap();
    store
        .enqueue(PendingMutation::create("notes", json!({ "body": "hello" })))
        .await
        .unwrap();

    let report = service.coordinator().push().await.unwrap();
    assert_eq!(report.pushed, 2);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.failed.len(), 1);
    assert!(!report.is_clean());

    let failure = &report.failed[0];
    assert_eq!(failure.table, "todo");
    assert_eq!(failure.record_id.as_deref(), Some("b1"));
    match &failure.error {
        Error::Conflict { local, remote } => {
            assert_eq!(local.as_deref(), Some("v1"));
            assert_eq!(remote.as_deref(), Some("v2"));
        }
        other => panic!("expected Conflict, got {other:?}"),
    }

    // The failed update and the skipped delete stay queued.
    let remaining = store.pending().await.unwrap();
    assert_eq!(remaining.len(), 2);
    assert!(remaining.iter().all(|m| m.record_id.as_deref() == Some("b1")));

    // Server-assigned rows landed in the local cache.
    let created = RecordStore::get(store.as_ref(), "todo", "a1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(created.version.as_deref(), Some("1"));
    assert!(RecordStore::get(store.as_ref(), "notes", "n1")
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn push_delete_drops_local_copy() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/v1/tables/todo/a1"))
        .and(query_param("version", "v1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let (service, store, _) = test_service(&server).await;
    store
        .apply(
            "todo",
            &[RecordRow {
                id: "a1".to_string(),
                updated_at: Utc::now() - Duration::hours(1),
                version: Some("v1".to_string()),
                deleted: false,
                data: json!({ "id": "a1", "title": "buy milk" }),
            }],
        )
        .await
        .unwrap();
    store
        .enqueue(PendingMutation::delete("todo", "a1", Some("v1".to_string())))
        .await
        .unwrap();

    let report = service.coordinator().push().await.unwrap();
    assert_eq!(report.pushed, 1);
    assert!(RecordStore::get(store.as_ref(), "todo", "a1")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn pull_pages_and_advances_cursor() {
    let server = MockServer::start().await;
    let changes = "/api/v1/tables/todo/changes";
    Mock::given(method("GET"))
        .and(path(changes))
        .and(query_param_is_missing("cursor"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "rows": [change_row("r1", "2026-08-05T10:00:00Z", "one")],
            "cursor": "c1",
            "done": false,
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(changes))
        .and(query_param("cursor", "c1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "rows": [change_row("r2", "2026-08-05T10:01:00Z", "two")],
            "cursor": "c2",
            "done": false,
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(changes))
        .and(query_param("cursor", "c2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "rows": [],
            "cursor": "c2",
            "done": true,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (service, store, _) = test_service(&server).await;
    let applied = service.coordinator().pull("todo").await.unwrap();
    assert_eq!(applied, 2);

    let state = SyncStateStore::get(store.as_ref(), "todo")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.cursor.as_deref(), Some("c2"));
    assert_eq!(state.error_count, 0);
    assert!(state.last_synced_at.is_some());

    assert!(RecordStore::get(store.as_ref(), "todo", "r1")
        .await
        .unwrap()
        .is_some());
    assert!(RecordStore::get(store.as_ref(), "todo", "r2")
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn pull_failure_mid_cycle_leaves_cursor_unchanged() {
    let server = MockServer::start().await;
    let changes = "/api/v1/tables/todo/changes";
    Mock::given(method("GET"))
        .and(path(changes))
        .and(query_param_is_missing("cursor"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "rows": [change_row("r1", "2026-08-05T10:00:00Z", "one")],
            "cursor": "c1",
            "done": false,
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(changes))
        .and(query_param("cursor", "c1"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "code": "INTERNAL",
            "message": "backend unavailable",
        })))
        .mount(&server)
        .await;

    let (service, store, _) = test_service(&server).await;
    let err = service.coordinator().pull("todo").await.unwrap_err();
    assert!(matches!(err, Error::Api { status: 500, .. }));

    // The bookmark did not move, so the next cycle restarts from the top.
    let state = SyncStateStore::get(store.as_ref(), "todo")
        .await
        .unwrap()
        .unwrap();
    assert!(state.cursor.is_none());
    assert_eq!(state.error_count, 1);
    assert!(state.last_error.is_some());

    // Rows already applied stay applied; only the cursor is held back.
    assert!(RecordStore::get(store.as_ref(), "todo", "r1")
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn pull_applies_last_write_wins() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/tables/todo/changes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "rows": [change_row("x", "2026-08-05T11:00:00Z", "remote")],
            "cursor": "c1",
            "done": true,
        })))
        .mount(&server)
        .await;

    let (service, store, _) = test_service(&server).await;
    // Local copy is newer than the incoming change.
    store
        .apply(
            "todo",
            &[RecordRow {
                id: "x".to_string(),
                updated_at: ts("2026-08-05T12:00:00Z"),
                version: Some("9".to_string()),
                deleted: false,
                data: json!({ "id": "x", "title": "local" }),
            }],
        )
        .await
        .unwrap();

    let applied = service.coordinator().pull("todo").await.unwrap();
    assert_eq!(applied, 0);

    let row = RecordStore::get(store.as_ref(), "todo", "x")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.data["title"], "local");
}

#[tokio::test]
async fn pull_propagates_tombstones() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/tables/todo/changes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "rows": [{
                "id": "x",
                "updatedAt": "2026-08-05T12:00:00Z",
                "version": null,
                "deleted": true,
                "data": null,
            }],
            "cursor": "c1",
            "done": true,
        })))
        .mount(&server)
        .await;

    let (service, store, _) = test_service(&server).await;
    store
        .apply(
            "todo",
            &[RecordRow {
                id: "x".to_string(),
                updated_at: ts("2026-08-05T11:00:00Z"),
                version: Some("1".to_string()),
                deleted: false,
                data: json!({ "id": "x", "title": "doomed" }),
            }],
        )
        .await
        .unwrap();

    let applied = service.coordinator().pull("todo").await.unwrap();
    assert_eq!(applied, 1);
    assert!(RecordStore::get(store.as_ref(), "todo", "x")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn sync_pushes_then_pulls_registered_tables() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/tables/todo"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "a1",
            "updatedAt": "2026-08-05T10:00:00Z",
            "version": "1",
            "title": "one",
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/tables/todo/changes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "rows": [change_row("r1", "2026-08-05T10:05:00Z", "pulled")],
            "cursor": "c1",
            "done": true,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (service, store, _) = test_service(&server).await;
    let _todos = service.table::<TaskItem>("todo").await;
    store
        .enqueue(PendingMutation::create("todo", json!({ "title": "one" })))
        .await
        .unwrap();

    let report = service.sync().await.unwrap();
    assert_eq!(report.push.pushed, 1);
    assert!(report.push.is_clean());
    assert_eq!(report.pulled.get("todo"), Some(&1));
    assert!(report.pull_failures.is_empty());
}

#[tokio::test]
async fn logout_clears_token_and_sync_state() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/tables/todo/changes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "rows": [],
            "cursor": "c1",
            "done": true,
        })))
        .mount(&server)
        .await;

    let (service, store, credentials) = test_service(&server).await;
    service.coordinator().pull("todo").await.unwrap();
    assert!(SyncStateStore::get(store.as_ref(), "todo")
        .await
        .unwrap()
        .is_some());

    service.logout().await.unwrap();
    assert!(!credentials.has_token());
    assert!(SyncStateStore::get(store.as_ref(), "todo")
        .await
        .unwrap()
        .is_none());
}
