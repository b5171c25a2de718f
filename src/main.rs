use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use todos::commands::{CompletedCommand, ConfigCommand, SyncCommand, TodoCommand};
use todos::config::Config;
use todos::db::{StoreProvider, TodoRepository};
use todos::sync::try_auto_sync;

#[derive(Parser)]
#[command(name = "todos")]
#[command(version)]
#[command(about = "A local-first todo list with Sync Gateway replication", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Log replication and storage activity to stderr
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage active todos
    Todo(TodoCommand),

    /// Manage completed todos
    Completed(CompletedCommand),

    /// Replicate with the configured Sync Gateway
    Sync(SyncCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "todos=info" } else { "todos=warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load(cli.config)?;
    let provider = StoreProvider::new(config.database_dir.value.clone());

    let result = execute_command(&cli.command, &provider, &config).await;

    // Auto-sync AFTER write commands (only if command succeeded)
    if result.is_ok() && is_write_command(&cli.command) {
        let store = provider.get_or_open().await?;
        try_auto_sync(&store, &config).await;
    }

    provider.close().await;
    result
}

async fn execute_command(
    command: &Option<Commands>,
    provider: &StoreProvider,
    config: &Config,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Some(Commands::Todo(cmd)) => {
            let store = provider.get_or_open().await?;
            if !cmd.is_write() {
                try_auto_sync(&store, config).await;
            }
            let repo = TodoRepository::new(store);
            cmd.run(&repo).await?;
        }
        Some(Commands::Completed(cmd)) => {
            let store = provider.get_or_open().await?;
            if !cmd.is_write() {
                try_auto_sync(&store, config).await;
            }
            let repo = TodoRepository::new(store);
            cmd.run(&repo).await?;
        }
        Some(Commands::Sync(cmd)) => {
            let store = provider.get_or_open().await?;
            cmd.run(&store, config).await?;
        }
        Some(Commands::Config(cmd)) => {
            cmd.run(config)?;
        }
        None => {
            println!("Use --help to see available commands");
        }
    }

    Ok(())
}

/// Returns true if the command changes todos and should sync afterwards.
fn is_write_command(cmd: &Option<Commands>) -> bool {
    match cmd {
        Some(Commands::Todo(cmd)) => cmd.is_write(),
        Some(Commands::Completed(cmd)) => cmd.is_write(),
        _ => false,
    }
}
