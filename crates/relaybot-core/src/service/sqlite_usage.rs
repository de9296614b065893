//! SQLite-backed usage counter.
//!
//! Uses a split pool in WAL mode: a multi-connection reader pool for stats
//! and lookups, and a single-connection writer pool so increments are
//! serialized.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::error::StoreError;
use crate::util::timestamp;

use super::usage::{UsageCounter, UsageStats, UserRecord};

/// Split read/write pool for SQLite with WAL mode.
#[derive(Clone)]
pub struct DatabasePool {
    pub reader: SqlitePool,
    pub writer: SqlitePool,
}

impl DatabasePool {
    /// Open (creating if missing) the database and run migrations on the writer.
    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        let base_opts = SqliteConnectOptions::from_str(database_url)?
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        let read_opts = base_opts.clone().read_only(true);
        let write_opts = base_opts;

        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(write_opts)
            .await?;

        // Schema must exist before the read-only pool connects
        sqlx::migrate!("./migrations").run(&writer).await?;

        let reader = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(read_opts)
            .await?;

        Ok(Self { reader, writer })
    }
}

/// `UsageCounter` persisted in the `users` table.
pub struct SqliteUsageCounter {
    pool: DatabasePool,
}

impl SqliteUsageCounter {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("invalid created_at {s:?}: {e}")))
}

fn to_count(value: i64, column: &str) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::Corrupt(format!("negative {column}: {value}")))
}

#[async_trait]
impl UsageCounter for SqliteUsageCounter {
    async fn increment(&self, user_id: &str) -> Result<u64, StoreError> {
        let row = sqlx::query(
            "INSERT INTO users (id, created_at, messages) VALUES (?, ?, 1) \
             ON CONFLICT(id) DO UPDATE SET messages = messages + 1 \
             RETURNING messages",
        )
        .bind(user_id)
        .bind(timestamp())
        .fetch_one(&self.pool.writer)
        .await?;

        to_count(row.try_get("messages")?, "messages")
    }

    async fn get(&self, user_id: &str) -> Result<Option<UserRecord>, StoreError> {
        let row = sqlx::query("SELECT id, created_at, messages FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool.reader)
            .await?;

        match row {
            Some(row) => {
                let created_at: String = row.try_get("created_at")?;
                Ok(Some(UserRecord {
                    id: row.try_get("id")?,
                    created_at: parse_datetime(&created_at)?,
                    messages: to_count(row.try_get("messages")?, "messages")?,
                }))
            }
            None => Ok(None),
        }
    }

    async fn stats(&self) -> Result<UsageStats, StoreError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS users, COALESCE(SUM(messages), 0) AS messages FROM users",
        )
        .fetch_one(&self.pool.reader)
        .await?;

        Ok(UsageStats {
            users: to_count(row.try_get("users")?, "users")?,
            messages: to_count(row.try_get("messages")?, "messages")?,
        })
    }
}
