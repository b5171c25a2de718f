//! Replicator status and listener registration.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::error::ReplicationError;

/// What the replicator is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityLevel {
    Stopped,
    /// Server unreachable, waiting before the next attempt
    Offline,
    Connecting,
    /// Caught up, waiting for changes
    Idle,
    /// Transferring documents
    Busy,
}

impl fmt::Display for ActivityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivityLevel::Stopped => write!(f, "stopped"),
            ActivityLevel::Offline => write!(f, "offline"),
            ActivityLevel::Connecting => write!(f, "connecting"),
            ActivityLevel::Idle => write!(f, "idle"),
            ActivityLevel::Busy => write!(f, "busy"),
        }
    }
}

/// Documents processed versus documents seen since the replicator started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub completed: u64,
    pub total: u64,
}

#[derive(Debug, Clone)]
pub struct ReplicatorStatus {
    pub activity: ActivityLevel,
    pub progress: Progress,
    /// Most recent error; cleared once the replicator is idle again.
    pub error: Option<Arc<ReplicationError>>,
}

impl ReplicatorStatus {
    pub fn stopped() -> Self {
        Self {
            activity: ActivityLevel::Stopped,
            progress: Progress::default(),
            error: None,
        }
    }
}

/// Delivered to change listeners on every status update.
#[derive(Debug, Clone)]
pub struct ReplicatorChange {
    pub status: ReplicatorStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicatedDocument {
    pub id: String,
    pub deleted: bool,
    pub error: Option<String>,
}

/// A batch of documents that was pushed or pulled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentReplication {
    pub is_push: bool,
    pub documents: Vec<ReplicatedDocument>,
}

/// Handle returned when registering a listener; used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerToken(u64);

impl ListenerToken {
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }
}

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

pub(crate) struct Listeners<T> {
    entries: Mutex<Vec<(ListenerToken, Callback<T>)>>,
}

impl<T> Listeners<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn insert(&self, token: ListenerToken, callback: Callback<T>) {
        lock(&self.entries).push((token, callback));
    }

    /// Returns false if the token is not registered here.
    pub(crate) fn remove(&self, token: ListenerToken) -> bool {
        let mut entries = lock(&self.entries);
        let before = entries.len();
        entries.retain(|(t, _)| *t != token);
        entries.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    /// Calls every listener outside the lock, so a listener may unregister itself.
    pub(crate) fn notify(&self, event: &T) {
        let callbacks: Vec<Callback<T>> = lock(&self.entries)
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in callbacks {
            callback(event);
        }
    }
}

impl<T> fmt::Debug for Listeners<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners").field("len", &self.len()).finish()
    }
}

/// A panicking listener must not take the replicator down with it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
