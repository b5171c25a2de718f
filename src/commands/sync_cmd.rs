//! Sync CLI commands for replicating with a Sync Gateway database.

use std::future::Future;
use std::sync::Arc;

use clap::{Args, Subcommand};
use tokio::sync::watch;

use crate::config::Config;
use crate::db::{is_user_logged_in, DocumentStore};
use crate::sync::{
    sync_once, ActivityLevel, DocumentReplication, ReplicationError, ReplicationSession,
    Replicator, ReplicatorConfig, ReplicatorStatus,
};

/// Replicate with the configured Sync Gateway
#[derive(Debug, Args)]
pub struct SyncCommand {
    #[command(subcommand)]
    command: Option<SyncSubcommand>,

    /// Run a single push and pull, then exit
    #[arg(long)]
    once: bool,

    /// Pull the remote changes feed from the beginning
    #[arg(long)]
    reset_checkpoint: bool,
}

#[derive(Debug, Subcommand)]
enum SyncSubcommand {
    /// Show sync configuration and server status
    Status,
}

impl SyncCommand {
    pub async fn run(
        &self,
        store: &DocumentStore,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            None if self.once => self.sync_once(store, config).await,
            None => self.replicate(store, config).await,
            Some(SyncSubcommand::Status) => self.status(store, config).await,
        }
    }

    async fn sync_once(
        &self,
        store: &DocumentStore,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        println!("Syncing with server...");

        let status = sync_once(store, &config.sync, self.reset_checkpoint).await?;
        if let Some(error) = status.error {
            return Err(error.to_string().into());
        }

        println!(
            "Sync complete ({} document{} processed).",
            status.progress.completed,
            if status.progress.completed == 1 { "" } else { "s" }
        );
        Ok(())
    }

    /// Replicates continuously until Ctrl-C or a fatal error.
    async fn replicate(
        &self,
        store: &DocumentStore,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let replicator_config = ReplicatorConfig::from_sync_config(&config.sync)?;
        let endpoint = replicator_config.endpoint.clone();
        let session =
            ReplicationSession::start(store.clone(), replicator_config, self.reset_checkpoint)?;
        let printer = session.replicator().add_document_listener(print_documents);

        println!("Replicating with {}. Press Ctrl-C to stop.", endpoint);

        let mut status = session.replicator().subscribe_status();
        let outcome = follow_status(&mut status, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;

        println!("Stopping...");
        session.replicator().remove_change_listener(printer);
        session.stop().await;

        match outcome {
            Some(error) => Err(error.to_string().into()),
            None => Ok(()),
        }
    }

    async fn status(
        &self,
        store: &DocumentStore,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        println!("Sync Configuration");
        println!("==================");
        println!();

        let logged_in = is_user_logged_in(store).await;
        let pending = store.pending_count().await?;

        if !config.sync.is_configured() {
            println!("Status: Not configured");
            println!();
            println!("To enable sync, add to your config file:");
            println!();
            println!("  sync:");
            println!("    url: \"wss://gateway.example.com:4984/todos\"");
            println!("    username: \"your-username\"");
            println!("    password: \"your-password\"");
            println!("    auto_sync: false");
            println!();
            println!("Or set environment variables:");
            println!("  TODOS_SYNC_URL");
            println!("  TODOS_SYNC_USERNAME");
            println!("  TODOS_SYNC_PASSWORD");
            println!();
            println!("Pending local changes: {}", pending);
            return Ok(());
        }

        let replicator_config = ReplicatorConfig::from_sync_config(&config.sync)?;

        println!("Endpoint:   {}", replicator_config.endpoint);
        println!("Username:   {}", replicator_config.credentials.username());
        println!("Direction:  {}", replicator_config.replicator_type);
        println!(
            "Mode:       {}",
            if replicator_config.continuous {
                "continuous"
            } else {
                "one-shot"
            }
        );
        println!(
            "Auto-sync:  {}",
            if config.sync.auto_sync {
                "enabled"
            } else {
                "disabled"
            }
        );
        println!("Signed in:  {}", if logged_in { "yes" } else { "no" });
        println!("Pending local changes: {}", pending);
        match store
            .checkpoint(&replicator_config.endpoint.checkpoint_key())
            .await?
        {
            Some(seq) => println!("Last pulled sequence:  {}", seq),
            None => println!("Last pulled sequence:  (never pulled)"),
        }
        println!();

        print!("Server status: ");
        let replicator = Replicator::new(store.clone(), replicator_config)?;
        match replicator.check_endpoint().await {
            Ok(()) => println!("✓ connected"),
            Err(e) if e.is_transient() => println!("✗ unreachable ({})", e),
            Err(e) => println!("✗ error: {}", e),
        }

        Ok(())
    }
}

/// Prints activity changes until the replicator stops or `interrupt` resolves.
///
/// Returns the error the replicator stopped with, if any. The current status
/// is checked first, so an engine that stopped before we subscribed is seen.
async fn follow_status(
    status: &mut watch::Receiver<ReplicatorStatus>,
    interrupt: impl Future<Output = ()>,
) -> Option<Arc<ReplicationError>> {
    tokio::pin!(interrupt);
    let mut last_activity = None;

    loop {
        let current = status.borrow_and_update().clone();
        if last_activity != Some(current.activity) {
            match &current.error {
                Some(error) => println!("  {} ({})", current.activity, error),
                None => println!("  {}", current.activity),
            }
            last_activity = Some(current.activity);
        }
        if current.activity == ActivityLevel::Stopped {
            return current.error;
        }

        tokio::select! {
            _ = &mut interrupt => return None,
            changed = status.changed() => {
                if changed.is_err() {
                    return None;
                }
            }
        }
    }
}

fn print_documents(replication: &DocumentReplication) {
    let arrow = if replication.is_push { "↑" } else { "↓" };
    for doc in &replication.documents {
        let short_id = doc.id.get(..8).unwrap_or(&doc.id);
        match (&doc.error, doc.deleted) {
            (Some(error), _) => println!("  {} {} failed: {}", arrow, short_id, error),
            (None, true) => println!("  {} {} deleted", arrow, short_id),
            (None, false) => println!("  {} {}", arrow, short_id),
        }
    }
}
