use serde::{Deserialize, Serialize};

use crate::store::UserId;

/// Event that flows to chat subscribers. Serialized with an `action` tag so
/// clients can dispatch without inspecting the payload shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ChatEvent {
    /// Sent to a subscriber when their subscription to a channel is
    /// established, carrying the members active at that moment.
    #[serde(rename_all = "camelCase")]
    Init { active_users: Vec<String> },

    /// A user joined the channel.
    Join { user: String },

    /// A user left the channel. If the channel had an owner and the owner
    /// left, carries who ownership was transferred to.
    #[serde(rename_all = "camelCase")]
    Leave {
        user: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        new_owner: Option<String>,
    },

    /// A message was sent to the channel. All fields are the durable values
    /// the store returned, never client-local ones.
    Message {
        id: i64,
        user: String,
        /// Epoch milliseconds.
        sent: i64,
        data: String,
    },

    /// A member came online (first live connection appeared).
    UserActive { user: String },

    /// A member went offline (last live connection dropped).
    UserOffline { user: String },

    /// One-shot signal on the user's own path once initial presence
    /// synchronization has completed.
    ChatReady,
}

/// The pub/sub path events for a channel are published on.
pub fn channel_path(channel_name: &str) -> String {
    format!("/chat/{}", urlencoding::encode(channel_name))
}

/// The pub/sub path one-shot chat signals for a user are published on.
pub fn user_chat_path(user_id: UserId) -> String {
    format!("/users/{user_id}/chat")
}
