//! Replication of the local store with a Sync Gateway (CouchDB-compatible)
//! database.
//!
//! A [`ReplicationSession`] owns a started [`Replicator`] together with the
//! listeners that log its progress. The replicator pushes local writes
//! through `_bulk_docs` and pulls the remote `_changes` feed; remote
//! revisions replace local state when they arrive.
//!
//! # Usage
//!
//! ```no_run
//! # async fn example(store: todos::db::DocumentStore, config: todos::config::Config) {
//! let session = todos::sync::start_replication(store, &config.sync).unwrap();
//! // ... later
//! session.stop().await;
//! # }
//! ```

mod auto_sync;
mod endpoint;
mod error;
mod protocol;
mod replicator;
mod session;
mod status;

pub use auto_sync::{sync_once, try_auto_sync};
pub use endpoint::{Credentials, Endpoint, ReplicatorConfig};
pub use error::ReplicationError;
pub use replicator::Replicator;
pub use session::{start_replication, ReplicationSession, SessionState};
pub use status::{
    ActivityLevel, DocumentReplication, ListenerToken, Progress, ReplicatedDocument,
    ReplicatorChange, ReplicatorStatus,
};
