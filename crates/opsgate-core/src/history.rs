//! Append-only shared command history.
//!
//! Record ids are RFC 3339 UTC timestamps at nanosecond precision, made
//! strictly monotonic per process, so lexicographic id order equals append
//! order for every reader: the store's `ORDER BY id` is the insertion
//! order every session observes.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// One issued command. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRecord {
    /// Commit timestamp; unique and strictly increasing per process.
    pub id: String,
    /// Raw command text as submitted.
    pub text: String,
    /// Submission timestamp.
    pub issued_at: DateTime<Utc>,
}

/// The history log interface. Implementations must present records in
/// append order to every reader, even under concurrent appends.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append a command, returning the committed record.
    async fn append(&self, text: &str) -> Result<CommandRecord>;

    /// All records, oldest first.
    async fn list_all(&self) -> Result<Vec<CommandRecord>>;

    /// Connectivity probe for health reporting.
    async fn ping(&self) -> Result<()>;
}

/// Issues strictly increasing commit timestamps. The mutex is the single
/// serialization point for id generation.
#[derive(Debug)]
struct IdClock {
    last: Mutex<DateTime<Utc>>,
}

impl IdClock {
    fn new() -> Self {
        Self {
            last: Mutex::new(DateTime::<Utc>::MIN_UTC),
        }
    }

    async fn next(&self) -> DateTime<Utc> {
        let mut last = self.last.lock().await;
        let mut now = Utc::now();
        if now <= *last {
            now = *last + TimeDelta::nanoseconds(1);
        }
        *last = now;
        now
    }
}

/// SQLite-backed history store.
pub struct SqliteHistoryStore {
    pool: SqlitePool,
    clock: IdClock,
}

impl SqliteHistoryStore {
    /// Open (or create) the history database at the given path.
    pub async fn from_path(db_path: &std::path::Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::Internal(format!("mkdir: {e}")))?;
        }
        let url = format!("sqlite:{}?mode=rwc", db_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        // Enable WAL for read/write concurrency
        sqlx::query("PRAGMA journal_mode=WAL").execute(&pool).await?;

        let store = Self {
            pool,
            clock: IdClock::new(),
        };
        store.run_migrations().await?;
        info!("history store initialized at {}", db_path.display());
        Ok(store)
    }

    /// In-memory store (for tests).
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self {
            pool,
            clock: IdClock::new(),
        };
        store.run_migrations().await?;
        debug!("in-memory history store initialized");
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS command_history (
                id        TEXT PRIMARY KEY,
                command   TEXT NOT NULL,
                issued_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    async fn append(&self, text: &str) -> Result<CommandRecord> {
        let issued_at = self.clock.next().await;
        let record = CommandRecord {
            id: issued_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
            text: text.to_string(),
            issued_at,
        };
        sqlx::query("INSERT INTO command_history (id, command, issued_at) VALUES (?, ?, ?)")
            .bind(&record.id)
            .bind(&record.text)
            .bind(record.issued_at.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(record)
    }

    async fn list_all(&self) -> Result<Vec<CommandRecord>> {
        let rows = sqlx::query("SELECT id, command, issued_at FROM command_history ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                let issued_at: String = row.try_get("issued_at")?;
                let issued_at = issued_at
                    .parse::<DateTime<Utc>>()
                    .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
                Ok(CommandRecord {
                    id: row.try_get("id")?,
                    text: row.try_get("command")?,
                    issued_at,
                })
            })
            .collect::<std::result::Result<Vec<_>, sqlx::Error>>()
            .map_err(Error::from)
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
