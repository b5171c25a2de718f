//! Replication session: one started replicator plus its logging listeners.

use std::fmt;

use super::endpoint::ReplicatorConfig;
use super::error::ReplicationError;
use super::replicator::Replicator;
use super::status::{DocumentReplication, ListenerToken, ReplicatorChange, ReplicatorStatus};
use crate::config::SyncConfig;
use crate::db::DocumentStore;

/// Lifecycle of a session: `Stopped -> Starting -> Running -> Stopping -> Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Stopped => write!(f, "stopped"),
            SessionState::Starting => write!(f, "starting"),
            SessionState::Running => write!(f, "running"),
            SessionState::Stopping => write!(f, "stopping"),
        }
    }
}

/// Starts continuous push-and-pull replication as described by `sync`.
///
/// Missing or malformed endpoint and credentials fail with
/// [`ReplicationError::Configuration`] before any network activity.
pub fn start_replication(
    store: DocumentStore,
    sync: &SyncConfig,
) -> Result<ReplicationSession, ReplicationError> {
    let config = ReplicatorConfig::from_sync_config(sync)?;
    ReplicationSession::start(store, config, false)
}

/// A running replication. Call [`ReplicationSession::stop`] to end it.
///
/// Dropping a session without stopping it still unregisters its listeners
/// and tells the engine to stop, but does not wait for it.
pub struct ReplicationSession {
    replicator: Replicator,
    status_token: Option<ListenerToken>,
    document_token: Option<ListenerToken>,
    state: SessionState,
}

impl ReplicationSession {
    pub fn start(
        store: DocumentStore,
        config: ReplicatorConfig,
        reset_checkpoint: bool,
    ) -> Result<Self, ReplicationError> {
        tracing::info!(endpoint = %config.endpoint, state = %SessionState::Starting, "starting replication");

        let replicator = Replicator::new(store, config)?;
        let status_token = replicator.add_change_listener(log_status);
        let document_token = replicator.add_document_listener(log_documents);

        let mut session = Self {
            replicator,
            status_token: Some(status_token),
            document_token: Some(document_token),
            state: SessionState::Starting,
        };

        if let Err(e) = session.replicator.start(reset_checkpoint) {
            session.remove_listeners();
            session.state = SessionState::Stopped;
            return Err(e);
        }

        session.state = SessionState::Running;
        Ok(session)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn replicator(&self) -> &Replicator {
        &self.replicator
    }

    pub fn status(&self) -> ReplicatorStatus {
        self.replicator.status()
    }

    /// Waits until the engine stops on its own (one-shot run or fatal error).
    pub async fn wait_until_stopped(&self) -> ReplicatorStatus {
        self.replicator.wait_until_stopped().await
    }

    /// Removes the status listener, then the document listener, then stops
    /// the replicator. Problems along the way are logged.
    pub async fn stop(mut self) {
        self.close().await;
    }

    async fn close(&mut self) {
        if self.state != SessionState::Running {
            return;
        }
        self.state = SessionState::Stopping;
        tracing::info!(state = %self.state, "stopping replication");

        self.remove_listeners();
        self.replicator.stop().await;

        self.state = SessionState::Stopped;
        tracing::info!(state = %self.state, "replication session closed");
    }

    fn remove_listeners(&mut self) {
        if let Some(token) = self.status_token.take() {
            self.replicator.remove_change_listener(token);
        }
        if let Some(token) = self.document_token.take() {
            self.replicator.remove_change_listener(token);
        }
    }
}

impl Drop for ReplicationSession {
    fn drop(&mut self) {
        if self.state == SessionState::Stopped {
            return;
        }
        tracing::warn!("replication session dropped without stop");
        self.remove_listeners();
        self.replicator.signal_stop();
        self.state = SessionState::Stopped;
    }
}

impl fmt::Debug for ReplicationSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicationSession")
            .field("state", &self.state)
            .field("replicator", &self.replicator)
            .finish()
    }
}

fn log_status(change: &ReplicatorChange) {
    let status = &change.status;
    match &status.error {
        Some(error) => tracing::error!(activity = %status.activity, "replication error: {}", error),
        None => tracing::info!(
            activity = %status.activity,
            completed = status.progress.completed,
            total = status.progress.total,
            "replication status"
        ),
    }
}

fn log_documents(replication: &DocumentReplication) {
    let direction = if replication.is_push { "push" } else { "pull" };
    for doc in &replication.documents {
        match &doc.error {
            Some(error) => tracing::warn!(
                direction,
                id = %doc.id,
                deleted = doc.deleted,
                "document replication failed: {}",
                error
            ),
            None => tracing::info!(direction, id = %doc.id, deleted = doc.deleted, "document replicated"),
        }
    }
}
