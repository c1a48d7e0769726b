//! Database connection and operations

pub mod archived_files;
pub mod archived_items;

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use tracing::info;

pub use archived_files::{ArchivedFileRecord, ArchivedFileRepository, CreateArchivedFile};
pub use archived_items::{ArchivedItemRecord, ArchivedItemRepository};

/// Statements that create the ledger tables. Safe to run on every start.
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS archived_items (
        id TEXT PRIMARY KEY NOT NULL,
        title TEXT,
        view_count INTEGER,
        added_at INTEGER,
        originally_available_at TEXT,
        last_viewed_at INTEGER,
        thumb TEXT,
        archived_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS archived_files (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        item_id TEXT NOT NULL REFERENCES archived_items(id) ON DELETE CASCADE,
        original_path TEXT NOT NULL,
        backup_path TEXT NOT NULL,
        archived_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_archived_files_item_id ON archived_files(item_id)",
];

/// Database wrapper providing connection pool access
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database wrapper from an existing pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the ledger at `url`, a path or `sqlite:` URL
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let url = if url.starts_with("sqlite:") {
            url.to_string()
        } else {
            format!("sqlite:{}", url)
        };

        let options = SqliteConnectOptions::from_str(&url)
            .with_context(|| format!("Invalid database URL '{}'", url))?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(10));

        if let Some(parent) = options.get_filename().parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .context("Failed to open ledger database")?;

        info!(url = %url, "Database connected");
        Ok(Self { pool })
    }

    /// Private in-memory ledger, used by tests.
    ///
    /// A single connection that never expires, otherwise each new connection
    /// would see its own empty database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.init_schema().await?;
        Ok(db)
    }

    /// Create ledger tables that do not exist yet
    pub async fn init_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("Failed to create ledger schema")?;
        }
        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Get an archived items repository
    pub fn archived_items(&self) -> ArchivedItemRepository {
        ArchivedItemRepository::new(self.pool.clone())
    }

    /// Get an archived files repository
    pub fn archived_files(&self) -> ArchivedFileRepository {
        ArchivedFileRepository::new(self.pool.clone())
    }

    /// Insert an item and its files in one transaction.
    ///
    /// Either the item and every file row are committed, or nothing is.
    pub async fn record_archive(
        &self,
        item: &ArchivedItemRecord,
        files: &[CreateArchivedFile],
    ) -> Result<Vec<ArchivedFileRecord>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        archived_items::insert(&mut tx, item).await?;
        let mut records = Vec::with_capacity(files.len());
        for file in files {
            records.push(archived_files::insert(&mut tx, &item.id, file).await?);
        }

        tx.commit().await?;
        Ok(records)
    }
}
