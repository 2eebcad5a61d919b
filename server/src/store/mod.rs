pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use sqlite::SqliteStore;

/// Database user ID.
pub type UserId = i64;

/// A channel as recorded by the store. `name` carries the canonical casing
/// (the casing recorded at creation time).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRecord {
    pub name: String,
    pub owner: Option<String>,
}

/// A user as recorded by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: UserId,
    pub name: String,
}

/// A persisted channel message. `msg_id` and `sent` are assigned by the
/// store and are the authoritative values for broadcasting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub msg_id: i64,
    pub user_name: String,
    pub sent: DateTime<Utc>,
    pub data: String,
}

/// Result of a durable channel leave. If the leaver owned the channel and
/// members remain, ownership is transferred and the new owner reported.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeaveChannelResult {
    pub new_owner: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("user {0} not found")]
    UserNotFound(UserId),
    #[error("channel {0} not found")]
    ChannelNotFound(String),
}

/// Durable channel/membership/message operations. The chat service never
/// persists its own index; everything durable goes through this boundary.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Record a user's membership in a channel, creating the channel record
    /// with the supplied casing if it does not exist yet.
    async fn add_user_to_channel(&self, user_id: UserId, channel_name: &str)
    -> Result<(), StoreError>;

    /// Remove a user's membership, transferring ownership if needed.
    async fn leave_channel(
        &self,
        user_id: UserId,
        channel_name: &str,
    ) -> Result<LeaveChannelResult, StoreError>;

    /// Persist a message. The returned record carries the durable id and
    /// timestamp.
    async fn add_message_to_channel(
        &self,
        user_id: UserId,
        channel_name: &str,
        text: &str,
    ) -> Result<MessageRecord, StoreError>;

    /// Message history, newest first, optionally bounded to `sent < before`.
    async fn get_messages_for_channel(
        &self,
        channel_name: &str,
        user_id: UserId,
        limit: Option<u32>,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<MessageRecord>, StoreError>;

    /// Names of the persisted members of a channel.
    async fn get_users_for_channel(&self, channel_name: &str) -> Result<Vec<String>, StoreError>;

    /// Look up a channel by name, case-insensitively.
    async fn find_channel(&self, channel_name: &str) -> Result<Option<ChannelRecord>, StoreError>;

    /// Names of all channels a user is a persisted member of.
    async fn get_channels_for_user(&self, user_id: UserId) -> Result<Vec<String>, StoreError>;

    /// Look up a user by ID.
    async fn find_user(&self, user_id: UserId) -> Result<Option<UserRecord>, StoreError>;

    /// Find or create a user by name. Used when a connection attaches;
    /// authentication itself happens upstream.
    async fn upsert_user(&self, name: &str) -> Result<UserRecord, StoreError>;
}
