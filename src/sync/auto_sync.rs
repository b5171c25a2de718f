//! One-shot replication for CLI commands.

use super::endpoint::ReplicatorConfig;
use super::error::ReplicationError;
use super::session::ReplicationSession;
use super::status::ReplicatorStatus;
use crate::config::{Config, SyncConfig};
use crate::db::DocumentStore;

/// Runs a single push and pull and waits for it to finish.
///
/// The returned status carries the error, if any, that stopped the run.
pub async fn sync_once(
    store: &DocumentStore,
    sync: &SyncConfig,
    reset_checkpoint: bool,
) -> Result<ReplicatorStatus, ReplicationError> {
    let config = ReplicatorConfig::from_sync_config(sync)?.one_shot();
    let session = ReplicationSession::start(store.clone(), config, reset_checkpoint)?;
    let status = session.wait_until_stopped().await;
    session.stop().await;
    Ok(status)
}

/// Performs a one-shot sync after a write command if `auto_sync` is enabled.
///
/// Failures are reported and otherwise ignored so the CLI keeps working
/// offline.
pub async fn try_auto_sync(store: &DocumentStore, config: &Config) {
    if !config.sync.auto_sync || !config.sync.is_configured() {
        return;
    }

    match sync_once(store, &config.sync, false).await {
        Ok(status) => {
            if let Some(error) = status.error {
                eprintln!("Auto-sync: {}", error);
            }
        }
        Err(e) => eprintln!("Auto-sync: {}", e),
    }
}
