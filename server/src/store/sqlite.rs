use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use tracing::info;

use super::{
    ChannelRecord, ChatStore, LeaveChannelResult, MessageRecord, StoreError, UserId, UserRecord,
};

/// Default number of messages returned by a history query.
const DEFAULT_HISTORY_LIMIT: u32 = 50;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE COLLATE NOCASE
);
CREATE TABLE IF NOT EXISTS channels (
    name TEXT PRIMARY KEY COLLATE NOCASE,
    owner_id INTEGER REFERENCES users(id)
);
CREATE TABLE IF NOT EXISTS channel_users (
    channel_name TEXT NOT NULL COLLATE NOCASE REFERENCES channels(name),
    user_id INTEGER NOT NULL REFERENCES users(id),
    join_date TEXT NOT NULL,
    PRIMARY KEY (channel_name, user_id)
);
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    channel_name TEXT NOT NULL COLLATE NOCASE,
    user_id INTEGER NOT NULL REFERENCES users(id),
    sent TEXT NOT NULL,
    data TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_channel_sent ON messages (channel_name, sent);
";

/// Create and initialize a SQLite connection pool with WAL mode.
pub async fn create_pool(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .create_if_missing(true)
        .busy_timeout(std::time::Duration::from_secs(5));

    // An in-memory database is per-connection; keep the pool at one so every
    // query sees the same database.
    let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    info!("database connected: {}", database_url);
    Ok(pool)
}

/// Apply the schema. Statements are idempotent, so this is safe on every
/// startup.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA.split(';') {
        let statement = statement.trim();
        if statement.is_empty() {
            continue;
        }
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

/// Production persistence gateway backed by SQLite.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChatStore for SqliteStore {
    async fn add_user_to_channel(
        &self,
        user_id: UserId,
        channel_name: &str,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        // Implicit creation: a channel comes into existence with the casing
        // of its first join, and the first joiner owns it.
        let existing: Option<String> =
            sqlx::query_scalar("SELECT name FROM channels WHERE name = ?")
                .bind(channel_name)
                .fetch_optional(&mut *tx)
                .await?;
        let canonical = match existing {
            Some(name) => name,
            None => {
                sqlx::query("INSERT INTO channels (name, owner_id) VALUES (?, ?)")
                    .bind(channel_name)
                    .bind(user_id)
                    .execute(&mut *tx)
                    .await?;
                channel_name.to_string()
            }
        };

        sqlx::query(
            "INSERT INTO channel_users (channel_name, user_id, join_date) VALUES (?, ?, ?) \
             ON CONFLICT (channel_name, user_id) DO NOTHING",
        )
        .bind(&canonical)
        .bind(user_id)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn leave_channel(
        &self,
        user_id: UserId,
        channel_name: &str,
    ) -> Result<LeaveChannelResult, StoreError> {
        let mut tx = self.pool.begin().await?;

        let owner_id: Option<Option<i64>> =
            sqlx::query_scalar("SELECT owner_id FROM channels WHERE name = ?")
                .bind(channel_name)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(owner_id) = owner_id else {
            return Err(StoreError::ChannelNotFound(channel_name.to_string()));
        };

        sqlx::query("DELETE FROM channel_users WHERE channel_name = ? AND user_id = ?")
            .bind(channel_name)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        // Ownership passes to the longest-standing remaining member.
        let mut new_owner = None;
        if owner_id == Some(user_id) {
            let successor: Option<(i64, String)> = sqlx::query_as(
                "SELECT u.id, u.name FROM channel_users cu \
                 JOIN users u ON u.id = cu.user_id \
                 WHERE cu.channel_name = ? \
                 ORDER BY cu.join_date ASC, u.id ASC LIMIT 1",
            )
            .bind(channel_name)
            .fetch_optional(&mut *tx)
            .await?;

            sqlx::query("UPDATE channels SET owner_id = ? WHERE name = ?")
                .bind(successor.as_ref().map(|(id, _)| *id))
                .bind(channel_name)
                .execute(&mut *tx)
                .await?;
            new_owner = successor.map(|(_, name)| name);
        }

        tx.commit().await?;
        Ok(LeaveChannelResult { new_owner })
    }

    async fn add_message_to_channel(
        &self,
        user_id: UserId,
        channel_name: &str,
        text: &str,
    ) -> Result<MessageRecord, StoreError> {
        let user_name: Option<String> = sqlx::query_scalar("SELECT name FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(user_name) = user_name else {
            return Err(StoreError::UserNotFound(user_id));
        };

        let sent = Utc::now();
        let msg_id: i64 = sqlx::query_scalar(
            "INSERT INTO messages (channel_name, user_id, sent, data) VALUES (?, ?, ?, ?) \
             RETURNING id",
        )
        .bind(channel_name)
        .bind(user_id)
        .bind(sent)
        .bind(text)
        .fetch_one(&self.pool)
        .await?;

        Ok(MessageRecord {
            msg_id,
            user_name,
            sent,
            data: text.to_string(),
        })
    }

    async fn get_messages_for_channel(
        &self,
        channel_name: &str,
        _user_id: UserId,
        limit: Option<u32>,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
        let rows: Vec<(i64, String, DateTime<Utc>, String)> = match before {
            Some(before) => {
                sqlx::query_as(
                    "SELECT m.id, u.name, m.sent, m.data FROM messages m \
                     JOIN users u ON u.id = m.user_id \
                     WHERE m.channel_name = ? AND m.sent < ? \
                     ORDER BY m.sent DESC, m.id DESC LIMIT ?",
                )
                .bind(channel_name)
                .bind(before)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(
                    "SELECT m.id, u.name, m.sent, m.data FROM messages m \
                     JOIN users u ON u.id = m.user_id \
                     WHERE m.channel_name = ? \
                     ORDER BY m.sent DESC, m.id DESC LIMIT ?",
                )
                .bind(channel_name)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows
            .into_iter()
            .map(|(msg_id, user_name, sent, data)| MessageRecord {
                msg_id,
                user_name,
                sent,
                data,
            })
            .collect())
    }

    async fn get_users_for_channel(&self, channel_name: &str) -> Result<Vec<String>, StoreError> {
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT u.name FROM channel_users cu \
             JOIN users u ON u.id = cu.user_id \
             WHERE cu.channel_name = ? ORDER BY cu.join_date ASC, cu.rowid ASC",
        )
        .bind(channel_name)
        .fetch_all(&self.pool)
        .await?;
        Ok(names)
    }

    async fn find_channel(&self, channel_name: &str) -> Result<Option<ChannelRecord>, StoreError> {
        let row: Option<(String, Option<String>)> = sqlx::query_as(
            "SELECT c.name, u.name FROM channels c \
             LEFT JOIN users u ON u.id = c.owner_id \
             WHERE c.name = ?",
        )
        .bind(channel_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(name, owner)| ChannelRecord { name, owner }))
    }

    async fn get_channels_for_user(&self, user_id: UserId) -> Result<Vec<String>, StoreError> {
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT channel_name FROM channel_users WHERE user_id = ? \
             ORDER BY join_date ASC, rowid ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(names)
    }

    async fn find_user(&self, user_id: UserId) -> Result<Option<UserRecord>, StoreError> {
        let row: Option<(i64, String)> = sqlx::query_as("SELECT id, name FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(id, name)| UserRecord { id, name }))
    }

    async fn upsert_user(&self, name: &str) -> Result<UserRecord, StoreError> {
        let row: (i64, String) = sqlx::query_as(
            "INSERT INTO users (name) VALUES (?) \
             ON CONFLICT (name) DO UPDATE SET name = excluded.name \
             RETURNING id, name",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(UserRecord {
            id: row.0,
            name: row.1,
        })
    }
}
