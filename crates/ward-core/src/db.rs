//! Local database management
//!
//! One libSQL file holds both the document cache and the outbox. The handle
//! is shared behind a mutex by the Local Store and the Outbox; statement
//! execution is serialized, drains are additionally serialized per
//! collection by the sync engine.

use std::path::Path;

use libsql::{Builder, Connection, Database as LibSqlDatabase};

use crate::error::Result;

/// Current schema version
const CURRENT_VERSION: i32 = 1;

/// Database wrapper for libSQL connections
pub struct Database {
    _db: LibSqlDatabase,
    conn: Connection,
}

impl Database {
    /// Open a local database at the given path, creating it if it doesn't
    /// exist. Runs migrations automatically.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let db = Builder::new_local(&path_str).build().await?;
        let conn = db.connect()?;

        let database = Self { _db: db, conn };
        database.configure().await?;
        database.migrate().await?;
        Ok(database)
    }

    /// Open an in-memory database (useful for testing)
    pub async fn open_in_memory() -> Result<Self> {
        let db = Builder::new_local(":memory:").build().await?;
        let conn = db.connect()?;

        let database = Self { _db: db, conn };
        database.configure().await?;
        database.migrate().await?;
        Ok(database)
    }

    /// Configure `SQLite` for the interleaved-writer access pattern
    async fn configure(&self) -> Result<()> {
        self.conn
            .execute("PRAGMA journal_mode = WAL;", ())
            .await
            .ok();
        self.conn
            .execute("PRAGMA synchronous = NORMAL;", ())
            .await
            .ok();
        self.conn.execute("PRAGMA foreign_keys = ON;", ()).await?;
        Ok(())
    }

    /// Run database migrations
    async fn migrate(&self) -> Result<()> {
        let version = self.schema_version().await?;
        if version < CURRENT_VERSION {
            self.migrate_v1().await?;
        }
        Ok(())
    }

    async fn schema_version(&self) -> Result<i32> {
        let mut rows = self
            .conn
            .query(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
                (),
            )
            .await?;

        let exists: bool = if let Some(row) = rows.next().await? {
            row.get::<i32>(0)? != 0
        } else {
            false
        };

        if !exists {
            return Ok(0);
        }

        let mut rows = self
            .conn
            .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
            .await?;

        let version: i32 = if let Some(row) = rows.next().await? {
            row.get(0)?
        } else {
            0
        };

        Ok(version)
    }

    /// Migration to version 1: document cache + outbox
    async fn migrate_v1(&self) -> Result<()> {
        // libsql doesn't have execute_batch, so we run each statement
        // separately inside a transaction
        self.conn.execute("BEGIN TRANSACTION", ()).await?;

        let statements = [
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            )",
            // Cached entity documents, one row per (collection, id).
            // `revision` is the optimistic-concurrency token: every put
            // bumps it, a put against a stale revision is rejected.
            "CREATE TABLE IF NOT EXISTS documents (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                revision INTEGER NOT NULL DEFAULT 1,
                body TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (collection, id)
            )",
            "CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection)",
            // Pending write operations not yet confirmed by the server
            "CREATE TABLE IF NOT EXISTS outbox (
                op_id TEXT PRIMARY KEY,
                collection TEXT NOT NULL,
                method TEXT NOT NULL,
                target_id TEXT NOT NULL,
                payload TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at INTEGER NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_outbox_collection ON outbox(collection, created_at)",
            "INSERT INTO schema_version (version) VALUES (1)",
        ];

        for statement in statements {
            if let Err(error) = self.conn.execute(statement, ()).await {
                self.conn.execute("ROLLBACK", ()).await.ok();
                return Err(error.into());
            }
        }

        self.conn.execute("COMMIT", ()).await?;
        Ok(())
    }

    /// Get a reference to the underlying connection
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }
}
