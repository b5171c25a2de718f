//! Replication engine.
//!
//! Runs on its own tokio task. Each round checks the database is reachable,
//! pushes pending local changes through `_bulk_docs` and catches up on the
//! remote `_changes` feed. In continuous mode the engine then idles on a
//! long-poll of the feed and on the store's local-change notifications,
//! whichever fires first.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::endpoint::ReplicatorConfig;
use super::error::ReplicationError;
use super::protocol::{
    outgoing_doc, seq_to_string, BulkDocsRequest, BulkDocsResult, ChangeEntry, ChangesResponse,
};
use super::status::{
    lock, ActivityLevel, DocumentReplication, ListenerToken, Listeners, ReplicatedDocument,
    ReplicatorChange, ReplicatorStatus,
};
use crate::db::DocumentStore;

/// Timeout for establishing a TCP/TLS connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Timeout for a single non-streaming request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// First wait after a transient failure; doubles per consecutive failure.
const RETRY_BASE_WAIT: Duration = Duration::from_secs(2);
const PUSH_BATCH_SIZE: usize = 100;
const PULL_BATCH_SIZE: usize = 200;

struct Shared {
    status: watch::Sender<ReplicatorStatus>,
    change_listeners: Listeners<ReplicatorChange>,
    document_listeners: Listeners<DocumentReplication>,
}

impl Shared {
    fn update(&self, modify: impl FnOnce(&mut ReplicatorStatus)) {
        self.status.send_modify(modify);
        let status = self.status.borrow().clone();
        self.change_listeners.notify(&ReplicatorChange { status });
    }
}

struct Running {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Replicates the local store with one remote database.
pub struct Replicator {
    store: DocumentStore,
    config: ReplicatorConfig,
    client: reqwest::Client,
    shared: Arc<Shared>,
    next_token: AtomicU64,
    running: Mutex<Option<Running>>,
}

impl Replicator {
    /// Builds a stopped replicator. Does not touch the network.
    pub fn new(store: DocumentStore, config: ReplicatorConfig) -> Result<Self, ReplicationError> {
        if config.heartbeat.is_zero() {
            return Err(ReplicationError::Configuration(
                "heartbeat must be greater than zero".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .danger_accept_invalid_certs(config.accept_only_self_signed_certs)
            .build()
            .map_err(|e| {
                ReplicationError::Configuration(format!("failed to build HTTP client: {}", e))
            })?;

        let (status, _) = watch::channel(ReplicatorStatus::stopped());

        Ok(Self {
            store,
            config,
            client,
            shared: Arc::new(Shared {
                status,
                change_listeners: Listeners::new(),
                document_listeners: Listeners::new(),
            }),
            next_token: AtomicU64::new(1),
            running: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &ReplicatorConfig {
        &self.config
    }

    pub fn status(&self) -> ReplicatorStatus {
        self.shared.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ReplicatorStatus> {
        self.shared.status.subscribe()
    }

    /// Registers a listener called on every status change.
    pub fn add_change_listener<F>(&self, listener: F) -> ListenerToken
    where
        F: Fn(&ReplicatorChange) + Send + Sync + 'static,
    {
        let token = self.next_token();
        self.shared.change_listeners.insert(token, Arc::new(listener));
        token
    }

    /// Registers a listener called with every batch of pushed or pulled documents.
    pub fn add_document_listener<F>(&self, listener: F) -> ListenerToken
    where
        F: Fn(&DocumentReplication) + Send + Sync + 'static,
    {
        let token = self.next_token();
        self.shared.document_listeners.insert(token, Arc::new(listener));
        token
    }

    /// Removes a change or document listener. Unknown tokens are ignored.
    pub fn remove_change_listener(&self, token: ListenerToken) {
        if !self.shared.change_listeners.remove(token)
            && !self.shared.document_listeners.remove(token)
        {
            tracing::debug!(?token, "listener was not registered");
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.running)
            .as_ref()
            .map(|running| !running.handle.is_finished())
            .unwrap_or(false)
    }

    /// Spawns the engine on the current tokio runtime.
    ///
    /// With `reset_checkpoint` the pull starts over from the beginning of
    /// the remote feed. Starting a running replicator does nothing.
    pub fn start(&self, reset_checkpoint: bool) -> Result<(), ReplicationError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ReplicationError::Start(e.to_string()))?;

        let mut running = lock(&self.running);
        if let Some(current) = running.as_ref() {
            if !current.handle.is_finished() {
                tracing::debug!("replicator already running");
                return Ok(());
            }
        }

        self.shared.update(|status| {
            *status = ReplicatorStatus::stopped();
            status.activity = ActivityLevel::Connecting;
        });

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = runtime.spawn(self.engine().run(shutdown_rx, reset_checkpoint));
        *running = Some(Running { shutdown, handle });

        tracing::info!(
            endpoint = %self.config.endpoint,
            replicator_type = %self.config.replicator_type,
            continuous = self.config.continuous,
            "replicator started"
        );
        Ok(())
    }

    /// Resolves once the engine reports `Stopped`, returning that final status.
    pub async fn wait_until_stopped(&self) -> ReplicatorStatus {
        let mut status = self.subscribe_status();
        let stopped = status
            .wait_for(|s| s.activity == ActivityLevel::Stopped)
            .await
            .map(|s| s.clone());
        match stopped {
            Ok(s) => s,
            Err(_) => self.status(),
        }
    }

    /// Stops the engine and waits for its task to end. No-op if never started.
    pub async fn stop(&self) {
        let running = lock(&self.running).take();
        let running = match running {
            Some(running) => running,
            None => {
                tracing::debug!("replicator not running, nothing to stop");
                return;
            }
        };

        let _ = running.shutdown.send(true);
        if let Err(e) = running.handle.await {
            tracing::error!("replicator task failed: {}", e);
            self.shared.update(|status| status.activity = ActivityLevel::Stopped);
        }
        tracing::info!(endpoint = %self.config.endpoint, "replicator stopped");
    }

    /// Asks the engine to stop without waiting for it.
    pub(crate) fn signal_stop(&self) {
        if let Some(running) = lock(&self.running).take() {
            let _ = running.shutdown.send(true);
        }
    }

    /// Checks that the database is reachable and accepts the credentials.
    pub async fn check_endpoint(&self) -> Result<(), ReplicationError> {
        self.engine().check_database().await
    }

    /// Registered (change, document) listener counts.
    #[cfg(test)]
    pub(crate) fn listener_counts(&self) -> (usize, usize) {
        (
            self.shared.change_listeners.len(),
            self.shared.document_listeners.len(),
        )
    }

    fn engine(&self) -> Engine {
        Engine {
            store: self.store.clone(),
            config: self.config.clone(),
            client: self.client.clone(),
            shared: Arc::clone(&self.shared),
        }
    }

    fn next_token(&self) -> ListenerToken {
        ListenerToken::new(self.next_token.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Debug for Replicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Replicator")
            .field("endpoint", &self.config.endpoint)
            .field("activity", &self.shared.status.borrow().activity)
            .finish()
    }
}

struct Engine {
    store: DocumentStore,
    config: ReplicatorConfig,
    client: reqwest::Client,
    shared: Arc<Shared>,
}

impl Engine {
    async fn run(self, mut shutdown: watch::Receiver<bool>, reset_checkpoint: bool) {
        let error = match self.replicate(&mut shutdown, reset_checkpoint).await {
            Ok(()) => None,
            Err(e) => {
                tracing::error!(endpoint = %self.config.endpoint, "replication stopped: {}", e);
                Some(Arc::new(e))
            }
        };
        self.shared.update(|status| {
            status.activity = ActivityLevel::Stopped;
            status.error = error;
        });
    }

    async fn replicate(
        &self,
        shutdown: &mut watch::Receiver<bool>,
        reset_checkpoint: bool,
    ) -> Result<(), ReplicationError> {
        let checkpoint_key = self.config.endpoint.checkpoint_key();
        if reset_checkpoint {
            self.store.reset_checkpoint(&checkpoint_key).await?;
            tracing::info!(endpoint = %self.config.endpoint, "pull checkpoint reset");
        }

        let mut since = self.store.checkpoint(&checkpoint_key).await?;
        let mut local_changes = self.store.subscribe_local_changes();
        let pushes = self.config.replicator_type.pushes();
        let pulls = self.config.replicator_type.pulls();
        let mut connected = false;
        let mut failures = 0u32;

        loop {
            if *shutdown.borrow() {
                return Ok(());
            }
            // Anything written before this round is picked up by the push below
            local_changes.borrow_and_update();

            let round = tokio::select! {
                _ = shutdown.changed() => return Ok(()),
                result = self.round(&mut since, &mut connected) => result,
            };
            if let Err(error) = round {
                connected = false;
                if self.back_off(error, &mut failures, shutdown).await? {
                    continue;
                }
                return Ok(());
            }
            failures = 0;

            if !self.config.continuous {
                return Ok(());
            }

            self.shared.update(|status| {
                status.activity = ActivityLevel::Idle;
                status.error = None;
            });

            let waited = tokio::select! {
                _ = shutdown.changed() => return Ok(()),
                Ok(()) = local_changes.changed(), if pushes => Ok(()),
                result = self.pull(&mut since, true), if pulls => result,
            };
            if let Err(error) = waited {
                connected = false;
                if !self.back_off(error, &mut failures, shutdown).await? {
                    return Ok(());
                }
            }
        }
    }

    async fn round(
        &self,
        since: &mut Option<String>,
        connected: &mut bool,
    ) -> Result<(), ReplicationError> {
        if !*connected {
            self.shared
                .update(|status| status.activity = ActivityLevel::Connecting);
            self.check_database().await?;
            *connected = true;
            tracing::info!(endpoint = %self.config.endpoint, "connected");
        }

        if self.config.replicator_type.pushes() {
            self.push().await?;
        }
        if self.config.replicator_type.pulls() {
            self.pull(since, false).await?;
        }
        Ok(())
    }

    /// Handles a failed attempt. Returns `Ok(true)` to try again, `Ok(false)`
    /// if shut down while waiting, or the error once the engine gives up.
    async fn back_off(
        &self,
        error: ReplicationError,
        failures: &mut u32,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<bool, ReplicationError> {
        if !self.config.continuous || !error.is_transient() {
            return Err(error);
        }

        *failures += 1;
        if self.config.max_attempts != 0 && *failures >= self.config.max_attempts {
            return Err(error);
        }

        let wait = retry_wait(*failures, self.config.max_attempt_wait_time);
        tracing::warn!(
            endpoint = %self.config.endpoint,
            attempt = *failures,
            wait_secs = wait.as_secs(),
            "replication offline: {}",
            error
        );
        let error = Arc::new(error);
        self.shared.update(|status| {
            status.activity = ActivityLevel::Offline;
            status.error = Some(error);
        });

        tokio::select! {
            _ = shutdown.changed() => Ok(false),
            _ = tokio::time::sleep(wait) => Ok(true),
        }
    }

    async fn check_database(&self) -> Result<(), ReplicationError> {
        let url = self.config.endpoint.url_for("");
        let request = self.authorized(self.client.get(&url)).timeout(REQUEST_TIMEOUT);
        self.send(request, &url).await?;
        Ok(())
    }

    async fn push(&self) -> Result<(), ReplicationError> {
        let url = self.config.endpoint.url_for("_bulk_docs");

        loop {
            let batch = self.store.pending_changes(PUSH_BATCH_SIZE).await?;
            if batch.is_empty() {
                return Ok(());
            }
            let total = batch.len();
            self.begin_work(total);

            let mut outgoing = Vec::with_capacity(total);
            for change in batch {
                if change.deleted && change.remote_rev.is_none() {
                    // Never reached the remote, so there is nothing to delete there
                    self.store
                        .mark_pushed(&change.id, change.sequence, None)
                        .await?;
                    continue;
                }
                outgoing.push(change);
            }

            let mut documents = Vec::with_capacity(outgoing.len());
            if !outgoing.is_empty() {
                let body = BulkDocsRequest {
                    docs: outgoing.iter().map(outgoing_doc).collect(),
                };
                let request = self
                    .authorized(self.client.post(&url))
                    .json(&body)
                    .timeout(REQUEST_TIMEOUT);
                let results: Vec<BulkDocsResult> = self.send(request, &url).await?.json().await?;
                let mut results: HashMap<String, BulkDocsResult> = results
                    .into_iter()
                    .map(|result| (result.id.clone(), result))
                    .collect();

                for change in outgoing {
                    let error = match results.remove(&change.id) {
                        Some(result) => match result.error_message() {
                            Some(message) => Some(message),
                            None => {
                                self.store
                                    .mark_pushed(&change.id, change.sequence, result.rev.as_deref())
                                    .await?;
                                None
                            }
                        },
                        None => Some("missing from server response".to_string()),
                    };
                    documents.push(ReplicatedDocument {
                        id: change.id,
                        deleted: change.deleted,
                        error,
                    });
                }
            }

            self.end_work(total);
            let failed = documents.iter().any(|doc| doc.error.is_some());
            if !documents.is_empty() {
                tracing::debug!(count = documents.len(), failed, "pushed documents");
                self.shared.document_listeners.notify(&DocumentReplication {
                    is_push: true,
                    documents,
                });
            }
            // Rejected documents stay pending until the next round
            if failed {
                return Ok(());
            }
        }
    }

    /// Reads the remote changes feed from `since`, applying every revision.
    ///
    /// The normal feed is paged until exhausted; a long-poll returns after the
    /// first batch or when the heartbeat elapses.
    async fn pull(
        &self,
        since: &mut Option<String>,
        longpoll: bool,
    ) -> Result<(), ReplicationError> {
        let url = self.config.endpoint.url_for("_changes");

        loop {
            let mut query: Vec<(&str, String)> = vec![("include_docs", "true".to_string())];
            if let Some(since) = since.as_deref() {
                query.push(("since", since.to_string()));
            }
            let timeout = if longpoll {
                query.push(("feed", "longpoll".to_string()));
                query.push(("timeout", self.config.heartbeat.as_millis().to_string()));
                self.config.heartbeat + REQUEST_TIMEOUT
            } else {
                query.push(("feed", "normal".to_string()));
                query.push(("limit", PULL_BATCH_SIZE.to_string()));
                REQUEST_TIMEOUT
            };

            let request = self
                .authorized(self.client.get(&url))
                .query(&query)
                .timeout(timeout);
            let changes: ChangesResponse = self.send(request, &url).await?.json().await?;

            let count = changes.results.len();
            self.apply_changes(changes.results).await?;

            let last_seq = seq_to_string(&changes.last_seq);
            if since.as_deref() != Some(last_seq.as_str()) {
                self.store
                    .set_checkpoint(&self.config.endpoint.checkpoint_key(), &last_seq)
                    .await?;
                *since = Some(last_seq);
            }

            if longpoll || count < PULL_BATCH_SIZE {
                return Ok(());
            }
        }
    }

    async fn apply_changes(&self, entries: Vec<ChangeEntry>) -> Result<(), ReplicationError> {
        if entries.is_empty() {
            return Ok(());
        }
        let total = entries.len();
        self.begin_work(total);

        let mut documents = Vec::new();
        for entry in entries {
            let revision = match entry.into_revision() {
                Some(revision) => revision,
                None => continue,
            };
            let applied = self
                .store
                .apply_remote(&revision.id, revision.body.as_ref(), &revision.rev)
                .await?;
            if applied {
                documents.push(ReplicatedDocument {
                    id: revision.id,
                    deleted: revision.body.is_none(),
                    error: None,
                });
            }
        }

        self.end_work(total);
        if !documents.is_empty() {
            tracing::debug!(count = documents.len(), "pulled documents");
            self.shared.document_listeners.notify(&DocumentReplication {
                is_push: false,
                documents,
            });
        }
        Ok(())
    }

    fn begin_work(&self, count: usize) {
        self.shared.update(|status| {
            status.activity = ActivityLevel::Busy;
            status.progress.total += count as u64;
        });
    }

    fn end_work(&self, count: usize) {
        self.shared
            .update(|status| status.progress.completed += count as u64);
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        let credentials = &self.config.credentials;
        request.basic_auth(credentials.username(), Some(credentials.password()))
    }

    async fn send(&self, request: RequestBuilder, url: &str) -> Result<Response, ReplicationError> {
        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ReplicationError::Unauthorized {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(ReplicationError::Http {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }
}

/// Exponential wait for the given number of consecutive failures, capped.
fn retry_wait(failures: u32, cap: Duration) -> Duration {
    let factor = 1u32
        .checked_shl(failures.saturating_sub(1))
        .unwrap_or(u32::MAX);
    RETRY_BASE_WAIT.saturating_mul(factor).min(cap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_store;
    use crate::sync::endpoint::{Credentials, Endpoint};
    use tempfile::TempDir;

    fn config() -> ReplicatorConfig {
        ReplicatorConfig::new(
            Endpoint::parse("http://127.0.0.1:9/todos").unwrap(),
            Credentials::new("user", "pass").unwrap(),
        )
    }

    #[tokio::test]
    async fn test_new_replicator_is_stopped() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(temp_dir.path()).await.unwrap();

        let replicator = Replicator::new(store, config()).unwrap();
        assert_eq!(replicator.status().activity, ActivityLevel::Stopped);
        assert!(!replicator.is_running());
    }

    #[tokio::test]
    async fn test_zero_heartbeat_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(temp_dir.path()).await.unwrap();

        let mut config = config();
        config.heartbeat = Duration::ZERO;
        assert!(matches!(
            Replicator::new(store, config),
            Err(ReplicationError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(temp_dir.path()).await.unwrap();

        let replicator = Replicator::new(store, config()).unwrap();
        replicator.stop().await;
        replicator.stop().await;
        assert_eq!(replicator.status().activity, ActivityLevel::Stopped);
    }

    #[tokio::test]
    async fn test_listener_tokens() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(temp_dir.path()).await.unwrap();
        let replicator = Replicator::new(store, config()).unwrap();

        let status_token = replicator.add_change_listener(|_| {});
        let document_token = replicator.add_document_listener(|_| {});
        assert_ne!(status_token, document_token);

        replicator.remove_change_listener(document_token);
        replicator.remove_change_listener(status_token);
        assert_eq!(replicator.shared.change_listeners.len(), 0);
        assert_eq!(replicator.shared.document_listeners.len(), 0);

        // Removing again is harmless
        replicator.remove_change_listener(status_token);
    }

    #[test]
    fn test_start_outside_runtime_fails() {
        let temp_dir = TempDir::new().unwrap();
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let store = runtime.block_on(open_store(temp_dir.path())).unwrap();

        let replicator = Replicator::new(store, config()).unwrap();
        let err = replicator.start(false).unwrap_err();
        assert!(matches!(err, ReplicationError::Start(_)));
        assert_eq!(replicator.status().activity, ActivityLevel::Stopped);
    }

    #[test]
    fn test_retry_wait_doubles_and_caps() {
        let cap = Duration::from_secs(600);
        assert_eq!(retry_wait(1, cap), Duration::from_secs(2));
        assert_eq!(retry_wait(2, cap), Duration::from_secs(4));
        assert_eq!(retry_wait(5, cap), Duration::from_secs(32));
        assert_eq!(retry_wait(40, cap), cap);
        assert_eq!(retry_wait(3, Duration::from_secs(5)), Duration::from_secs(5));
    }
}
