mod error;
mod store;
mod todo_repo;

pub use error::StoreError;
pub use store::{Document, DocumentStore, Filter, PendingChange, DEFAULT_COLLECTION};
pub use todo_repo::TodoRepository;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::OnceCell;

/// Name of the database opened inside the storage directory.
pub const DATABASE_NAME: &str = "todos";

/// Opens (creating if needed) the `todos` database in `directory` and runs migrations.
pub async fn open_store(directory: &Path) -> Result<DocumentStore, StoreError> {
    tokio::fs::create_dir_all(directory)
        .await
        .map_err(|e| StoreError::init(directory, e))?;

    let path = directory.join(format!("{}.db", DATABASE_NAME));

    let options = SqliteConnectOptions::new()
        .filename(&path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .map_err(|e| StoreError::init(&path, e))?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| StoreError::init(&path, e))?;

    tracing::info!(path = %path.display(), "opened document store");
    Ok(DocumentStore::new(pool, path))
}

/// Owns the process's single store handle.
///
/// Constructed once and passed to whoever needs the store. The first
/// `get_or_open` performs the open; concurrent callers wait for that same
/// open instead of starting their own.
#[derive(Debug)]
pub struct StoreProvider {
    directory: PathBuf,
    store: OnceCell<DocumentStore>,
}

impl StoreProvider {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            store: OnceCell::new(),
        }
    }

    /// Platform data directory:
    /// - Linux: ~/.local/share/todos/
    /// - macOS: ~/Library/Application Support/todos/
    /// - Windows: %APPDATA%/todos/
    pub fn default_directory() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("todos")
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn is_open(&self) -> bool {
        self.store.initialized()
    }

    pub async fn get_or_open(&self) -> Result<DocumentStore, StoreError> {
        self.store
            .get_or_try_init(|| open_store(&self.directory))
            .await
            .cloned()
    }

    /// Releases the connection pool if the store was opened.
    pub async fn close(&self) {
        if let Some(store) = self.store.get() {
            store.close().await;
            tracing::debug!("closed document store");
        }
    }
}

/// True when a signed-in user document exists in the store.
///
/// Store failures read as "not signed in".
pub async fn is_user_logged_in(store: &DocumentStore) -> bool {
    match store.has_document_of_type("user").await {
        Ok(found) => found,
        Err(e) => {
            tracing::error!("user lookup failed: {}", e);
            false
        }
    }
}
