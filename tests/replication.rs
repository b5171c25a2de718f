//! End-to-end replication against an in-process Sync Gateway stand-in.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Map, Value};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::Notify;

use todos::config::{ReplicatorType, SyncConfig};
use todos::db::{open_store, TodoRepository};
use todos::models::Todo;
use todos::sync::{start_replication, sync_once, ActivityLevel, ReplicationError};

/// base64("user:pass")
const VALID_AUTH: &str = "Basic dXNlcjpwYXNz";

#[derive(Debug, Clone)]
struct RemoteDoc {
    rev: String,
    generation: u32,
    body: Map<String, Value>,
    deleted: bool,
    seq: u64,
}

#[derive(Debug, Default)]
struct GatewayState {
    docs: BTreeMap<String, RemoteDoc>,
    seq: u64,
    bulk_requests: usize,
}

impl GatewayState {
    fn write(
        &mut self,
        id: &str,
        base_rev: Option<&str>,
        body: Map<String, Value>,
        deleted: bool,
    ) -> Result<String, String> {
        let generation = match (self.docs.get(id), base_rev) {
            (None, None) => 1,
            (Some(doc), Some(rev)) if doc.rev == rev => doc.generation + 1,
            (Some(doc), None) if doc.deleted => doc.generation + 1,
            _ => return Err("Document update conflict".to_string()),
        };

        self.seq += 1;
        let rev = format!("{}-{:04x}", generation, self.seq);
        self.docs.insert(
            id.to_string(),
            RemoteDoc {
                rev: rev.clone(),
                generation,
                body,
                deleted,
                seq: self.seq,
            },
        );
        Ok(rev)
    }

    fn field(&self, id: &str, field: &str) -> Option<Value> {
        self.docs
            .get(id)
            .filter(|doc| !doc.deleted)
            .and_then(|doc| doc.body.get(field).cloned())
    }
}

#[derive(Clone, Default)]
struct Gateway {
    state: Arc<Mutex<GatewayState>>,
    notify: Arc<Notify>,
}

impl Gateway {
    async fn serve(&self) -> SocketAddr {
        let app = Router::new()
            .route("/{db}/", get(database))
            .route("/{db}/_changes", get(changes))
            .route("/{db}/_bulk_docs", post(bulk_docs))
            .with_state(self.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    /// Simulates another client writing a document.
    fn put(&self, id: &str, body: Value) {
        {
            let mut state = self.state.lock().unwrap();
            let base_rev = state
                .docs
                .get(id)
                .filter(|doc| !doc.deleted)
                .map(|doc| doc.rev.clone());
            let body = body.as_object().unwrap().clone();
            state.write(id, base_rev.as_deref(), body, false).unwrap();
        }
        self.notify.notify_waiters();
    }

    fn delete(&self, id: &str) {
        {
            let mut state = self.state.lock().unwrap();
            let rev = state.docs.get(id).map(|doc| doc.rev.clone());
            state.write(id, rev.as_deref(), Map::new(), true).unwrap();
        }
        self.notify.notify_waiters();
    }

    fn changes_since(&self, since: u64) -> Value {
        let state = self.state.lock().unwrap();
        let mut docs: Vec<(&String, &RemoteDoc)> =
            state.docs.iter().filter(|(_, doc)| doc.seq > since).collect();
        docs.sort_by_key(|(_, doc)| doc.seq);

        let results: Vec<Value> = docs
            .into_iter()
            .map(|(id, doc)| {
                let mut body = Map::new();
                body.insert("_id".to_string(), json!(id));
                body.insert("_rev".to_string(), json!(doc.rev));
                if doc.deleted {
                    body.insert("_deleted".to_string(), json!(true));
                } else {
                    body.extend(doc.body.clone());
                }
                json!({
                    "seq": doc.seq,
                    "id": id,
                    "changes": [{ "rev": doc.rev }],
                    "deleted": doc.deleted,
                    "doc": body,
                })
            })
            .collect();

        json!({ "results": results, "last_seq": state.seq })
    }
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        == Some(VALID_AUTH)
}

async fn database(Path(db): Path<String>, headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(json!({ "db_name": db, "state": "Online" })).into_response()
}

async fn changes(
    State(gateway): State<Gateway>,
    Path(_db): Path<String>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let since = params
        .get("since")
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    let longpoll = params.get("feed").map(String::as_str) == Some("longpoll");
    let timeout = params
        .get("timeout")
        .and_then(|t| t.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(1))
        .min(Duration::from_secs(2));

    let notified = gateway.notify.notified();
    let mut body = gateway.changes_since(since);
    let empty = body["results"].as_array().map_or(true, |r| r.is_empty());
    if longpoll && empty {
        let _ = tokio::time::timeout(timeout, notified).await;
        body = gateway.changes_since(since);
    }
    Json(body).into_response()
}

async fn bulk_docs(
    State(gateway): State<Gateway>,
    Path(_db): Path<String>,
    headers: HeaderMap,
    Json(request): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let docs = request["docs"].as_array().cloned().unwrap_or_default();
    let mut results = Vec::with_capacity(docs.len());
    {
        let mut state = gateway.state.lock().unwrap();
        state.bulk_requests += 1;
        for doc in docs {
            let mut doc = doc.as_object().cloned().unwrap_or_default();
            let id = doc
                .remove("_id")
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            let rev = doc
                .remove("_rev")
                .and_then(|v| v.as_str().map(str::to_string));
            let deleted = doc
                .remove("_deleted")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);

            match state.write(&id, rev.as_deref(), doc, deleted) {
                Ok(rev) => results.push(json!({ "id": id, "rev": rev })),
                Err(reason) => {
                    results.push(json!({ "id": id, "error": "conflict", "reason": reason }))
                }
            }
        }
    }
    gateway.notify.notify_waiters();

    (StatusCode::CREATED, Json(Value::Array(results))).into_response()
}

async fn setup() -> (TodoRepository, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let store = open_store(temp_dir.path()).await.unwrap();
    (TodoRepository::new(store), temp_dir)
}

fn sync_config(addr: SocketAddr, password: &str) -> SyncConfig {
    SyncConfig {
        url: Some(format!("http://{}/todos", addr)),
        username: Some("user".to_string()),
        password: Some(password.to_string()),
        heartbeat_secs: 1,
        ..SyncConfig::default()
    }
}

const WAIT_LIMIT: Duration = Duration::from_secs(10);

async fn wait_for_gateway(gateway: &Gateway, done: impl Fn(&GatewayState) -> bool) {
    let deadline = Instant::now() + WAIT_LIMIT;
    loop {
        if done(&gateway.state.lock().unwrap()) {
            return;
        }
        assert!(Instant::now() < deadline, "gateway never reached the expected state");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

async fn wait_for_local(repo: &TodoRepository, done: impl Fn(&[Todo], &[Todo]) -> bool) {
    let deadline = Instant::now() + WAIT_LIMIT;
    loop {
        let active = repo.get_active().await.unwrap();
        let completed = repo.get_completed().await.unwrap();
        if done(&active, &completed) {
            return;
        }
        assert!(Instant::now() < deadline, "local store never reached the expected state");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn test_continuous_push_and_pull() {
    let gateway = Gateway::default();
    let addr = gateway.serve().await;
    let (repo, _temp_dir) = setup().await;

    let todo = repo.add_todo("Buy milk").await.unwrap();
    let session = start_replication(repo.store().clone(), &sync_config(addr, "pass")).unwrap();

    wait_for_gateway(&gateway, |state| {
        state.field(&todo.id, "text") == Some(json!("Buy milk"))
    })
    .await;

    gateway.put(
        "from-phone",
        json!({ "text": "Call mom", "completed": false, "type": "todo" }),
    );
    wait_for_local(&repo, |active, _| active.iter().any(|t| t.text == "Call mom")).await;

    repo.complete_todo(&todo.id).await.unwrap();
    wait_for_gateway(&gateway, |state| {
        state.field(&todo.id, "completed") == Some(json!(true))
    })
    .await;

    let status = session.status();
    assert!(status.error.is_none());
    assert!(status.progress.completed > 0);

    session.stop().await;
}

#[tokio::test]
async fn test_one_shot_pulls_updates_and_deletions() {
    let gateway = Gateway::default();
    let addr = gateway.serve().await;
    let (repo, _temp_dir) = setup().await;
    let config = sync_config(addr, "pass");

    gateway.put(
        "remote-1",
        json!({ "text": "Water plants", "completed": true, "type": "todo" }),
    );
    let status = sync_once(repo.store(), &config, false).await.unwrap();
    assert_eq!(status.activity, ActivityLevel::Stopped);
    assert!(status.error.is_none());

    let completed = repo.get_completed().await.unwrap();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].text, "Water plants");

    gateway.delete("remote-1");
    sync_once(repo.store(), &config, false).await.unwrap();
    assert!(repo.get_todo("remote-1").await.unwrap().is_none());
    assert!(repo.get_completed().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_local_delete_is_pushed() {
    let gateway = Gateway::default();
    let addr = gateway.serve().await;
    let (repo, _temp_dir) = setup().await;
    let config = sync_config(addr, "pass");

    let todo = repo.add_todo("Temporary").await.unwrap();
    sync_once(repo.store(), &config, false).await.unwrap();
    assert_eq!(
        gateway.state.lock().unwrap().field(&todo.id, "text"),
        Some(json!("Temporary"))
    );

    repo.delete_todo(&todo.id).await.unwrap();
    sync_once(repo.store(), &config, false).await.unwrap();

    let state = gateway.state.lock().unwrap();
    assert!(state.docs[&todo.id].deleted);
}

#[tokio::test]
async fn test_delete_on_both_sides_settles() {
    let gateway = Gateway::default();
    let addr = gateway.serve().await;
    let (repo, _temp_dir) = setup().await;
    let config = sync_config(addr, "pass");

    let todo = repo.add_todo("Shared").await.unwrap();
    sync_once(repo.store(), &config, false).await.unwrap();

    gateway.delete(&todo.id);
    repo.delete_todo(&todo.id).await.unwrap();

    let status = sync_once(repo.store(), &config, false).await.unwrap();
    assert!(status.error.is_none());
    assert_eq!(repo.store().pending_count().await.unwrap(), 0);
    let requests = gateway.state.lock().unwrap().bulk_requests;

    // Nothing left to push on later rounds
    sync_once(repo.store(), &config, false).await.unwrap();
    sync_once(repo.store(), &config, false).await.unwrap();
    assert_eq!(repo.store().pending_count().await.unwrap(), 0);
    assert_eq!(gateway.state.lock().unwrap().bulk_requests, requests);
    assert!(gateway.state.lock().unwrap().docs[&todo.id].deleted);
}

#[tokio::test]
async fn test_never_pushed_delete_stays_local() {
    let gateway = Gateway::default();
    let addr = gateway.serve().await;
    let (repo, _temp_dir) = setup().await;

    let todo = repo.add_todo("Oops").await.unwrap();
    repo.delete_todo(&todo.id).await.unwrap();

    sync_once(repo.store(), &sync_config(addr, "pass"), false)
        .await
        .unwrap();

    let state = gateway.state.lock().unwrap();
    assert!(state.docs.is_empty());
    assert_eq!(state.bulk_requests, 0);
    drop(state);
    assert_eq!(repo.store().pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_own_pushes_are_not_applied_again() {
    let gateway = Gateway::default();
    let addr = gateway.serve().await;
    let (repo, _temp_dir) = setup().await;
    let config = sync_config(addr, "pass");

    let todo = repo.add_todo("Once").await.unwrap();
    sync_once(repo.store(), &config, false).await.unwrap();
    let revision = repo.store().get(&todo.id).await.unwrap().unwrap().revision;

    sync_once(repo.store(), &config, false).await.unwrap();

    let after = repo.store().get(&todo.id).await.unwrap().unwrap();
    assert_eq!(after.revision, revision);
    assert_eq!(gateway.state.lock().unwrap().bulk_requests, 1);
}

#[tokio::test]
async fn test_remote_revision_wins_conflict() {
    let gateway = Gateway::default();
    let addr = gateway.serve().await;
    let (repo, _temp_dir) = setup().await;
    let config = sync_config(addr, "pass");

    let todo = repo.add_todo("Original").await.unwrap();
    sync_once(repo.store(), &config, false).await.unwrap();

    gateway.put(
        &todo.id,
        json!({ "text": "Edited remotely", "completed": false, "type": "todo" }),
    );
    repo.update_todo(&todo.id, todos::models::TodoUpdate::text("Edited locally"))
        .await
        .unwrap();

    let status = sync_once(repo.store(), &config, false).await.unwrap();
    assert!(status.error.is_none());

    let local = repo.get_todo(&todo.id).await.unwrap().unwrap();
    assert_eq!(local.text, "Edited remotely");
    assert_eq!(repo.store().pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_pull_only_does_not_push() {
    let gateway = Gateway::default();
    let addr = gateway.serve().await;
    let (repo, _temp_dir) = setup().await;

    let mut config = sync_config(addr, "pass");
    config.replicator_type = ReplicatorType::Pull;

    repo.add_todo("Stays here").await.unwrap();
    sync_once(repo.store(), &config, false).await.unwrap();

    assert!(gateway.state.lock().unwrap().docs.is_empty());
    assert_eq!(repo.store().pending_count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_bad_credentials_stop_with_unauthorized() {
    let gateway = Gateway::default();
    let addr = gateway.serve().await;
    let (repo, _temp_dir) = setup().await;

    let session = start_replication(repo.store().clone(), &sync_config(addr, "wrong")).unwrap();
    let status = tokio::time::timeout(WAIT_LIMIT, session.wait_until_stopped())
        .await
        .unwrap();

    assert_eq!(status.activity, ActivityLevel::Stopped);
    assert!(matches!(
        status.error.as_deref(),
        Some(ReplicationError::Unauthorized { status: 401, .. })
    ));

    session.stop().await;
}

#[tokio::test]
async fn test_unreachable_endpoint_goes_offline() {
    // Grab a free port, then close it again
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (repo, _temp_dir) = setup().await;
    let session = start_replication(repo.store().clone(), &sync_config(addr, "pass")).unwrap();

    let mut status = session.replicator().subscribe_status();
    let offline = tokio::time::timeout(
        WAIT_LIMIT,
        status.wait_for(|s| s.activity == ActivityLevel::Offline),
    )
    .await
    .unwrap()
    .unwrap()
    .clone();
    assert!(matches!(
        offline.error.as_deref(),
        Some(ReplicationError::Connection(_))
    ));

    session.stop().await;
    assert_eq!(status.borrow().activity, ActivityLevel::Stopped);
}
