use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use super::events::{ChatEvent, channel_path, user_chat_path};
use super::filter::MessageFilter;
use super::state::ChatState;
use crate::presence::{PresenceListener, PresenceRegistry, UserSession};
use crate::publisher::EventPublisher;
use crate::store::{ChatStore, StoreError, UserId};

#[derive(Debug, thiserror::Error)]
pub enum ChatServiceError {
    #[error("user is offline")]
    UserOffline,
    #[error("already in this channel")]
    InvalidJoinAction,
    #[error("can't leave the home channel")]
    LeaveHomeChannel,
    #[error("must be in a channel to leave it")]
    InvalidLeaveAction,
    #[error("must be in a channel to send a message to it")]
    InvalidSendAction,
    #[error("must be in a channel to retrieve message history")]
    InvalidGetHistoryAction,
    #[error("must be in a channel to retrieve the user list")]
    InvalidGetUsersAction,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ChatServiceError {
    /// Stable code for clients; the display message may change, this must
    /// not.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UserOffline => "userOffline",
            Self::InvalidJoinAction => "invalidJoinAction",
            Self::LeaveHomeChannel => "leaveHomeChannel",
            Self::InvalidLeaveAction => "invalidLeaveAction",
            Self::InvalidSendAction => "invalidSendAction",
            Self::InvalidGetHistoryAction => "invalidGetHistoryAction",
            Self::InvalidGetUsersAction => "invalidGetUsersAction",
            Self::Store(_) => "storeError",
        }
    }
}

/// A channel message as returned to callers: the durable store values
/// reshaped for the wire, `sent` in epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub id: i64,
    pub user: String,
    pub sent: i64,
    pub data: String,
}

/// The chat service: validates requests against the in-memory membership
/// index, persists through the store, swaps in a new index snapshot, and
/// publishes events — in that order, so subscribers never observe an event
/// for state that did not make it to storage.
pub struct ChatService {
    state: RwLock<ChatState>,
    store: Arc<dyn ChatStore>,
    publisher: Arc<EventPublisher>,
    presence: Arc<PresenceRegistry>,
    filter: MessageFilter,
    home_channel: String,
    /// Per-(user, case-folded channel) locks serializing validate -> persist
    /// -> commit for the mutating operations, closing the window where two
    /// in-flight requests for the same pair both pass validation.
    op_locks: DashMap<(UserId, String), Arc<AsyncMutex<()>>>,
}

impl ChatService {
    pub fn new(
        store: Arc<dyn ChatStore>,
        publisher: Arc<EventPublisher>,
        presence: Arc<PresenceRegistry>,
        filter: MessageFilter,
        home_channel: impl Into<String>,
    ) -> Self {
        Self {
            state: RwLock::new(ChatState::new()),
            store,
            publisher,
            presence,
            filter,
            home_channel: home_channel.into(),
            op_locks: DashMap::new(),
        }
    }

    pub async fn join_channel(
        &self,
        channel_name: &str,
        user_id: UserId,
    ) -> Result<(), ChatServiceError> {
        let session = self.session(user_id)?;

        let key = (user_id, channel_name.to_lowercase());
        let lock = self.pair_lock(&key);
        let result = {
            let _guard = lock.lock().await;
            self.join_channel_locked(channel_name, &session).await
        };
        self.drop_pair_lock(&key, lock);
        result
    }

    async fn join_channel_locked(
        &self,
        channel_name: &str,
        session: &Arc<UserSession>,
    ) -> Result<(), ChatServiceError> {
        let channel = self.canonical_channel_name(channel_name).await?;
        if self.state.read().is_member(&session.name, &channel) {
            return Err(ChatServiceError::InvalidJoinAction);
        }

        self.store.add_user_to_channel(session.user_id, &channel).await?;

        {
            let mut state = self.state.write();
            let next = state.with_member(&channel, &session.name);
            *state = next;
        }

        info!(user = %session.name, %channel, "joined channel");
        self.publisher.publish(
            &channel_path(&channel),
            ChatEvent::Join {
                user: session.name.clone(),
            },
        );
        self.subscribe_to_channel(session, &channel);
        Ok(())
    }

    pub async fn leave_channel(
        &self,
        channel_name: &str,
        user_id: UserId,
    ) -> Result<(), ChatServiceError> {
        let session = self.session(user_id)?;

        let key = (user_id, channel_name.to_lowercase());
        let lock = self.pair_lock(&key);
        let result = {
            let _guard = lock.lock().await;
            self.leave_channel_locked(channel_name, &session).await
        };
        self.drop_pair_lock(&key, lock);
        result
    }

    async fn leave_channel_locked(
        &self,
        channel_name: &str,
        session: &Arc<UserSession>,
    ) -> Result<(), ChatServiceError> {
        let channel = self.canonical_channel_name(channel_name).await?;
        if channel.to_lowercase() == self.home_channel.to_lowercase() {
            return Err(ChatServiceError::LeaveHomeChannel);
        }
        if !self.state.read().is_member(&session.name, &channel) {
            return Err(ChatServiceError::InvalidLeaveAction);
        }

        let result = self.store.leave_channel(session.user_id, &channel).await?;

        {
            let mut state = self.state.write();
            let next = state.without_member(&channel, &session.name);
            *state = next;
        }

        info!(user = %session.name, %channel, "left channel");
        self.publisher.publish(
            &channel_path(&channel),
            ChatEvent::Leave {
                user: session.name.clone(),
                new_owner: result.new_owner,
            },
        );
        self.publisher
            .unsubscribe(&channel_path(&channel), session.user_id);
        Ok(())
    }

    pub async fn send_chat_message(
        &self,
        channel_name: &str,
        user_id: UserId,
        message: &str,
    ) -> Result<(), ChatServiceError> {
        let session = self.session(user_id)?;
        let channel = self.canonical_channel_name(channel_name).await?;
        if !self.state.read().is_member(&session.name, &channel) {
            return Err(ChatServiceError::InvalidSendAction);
        }

        let text = (self.filter)(message);
        let record = self
            .store
            .add_message_to_channel(user_id, &channel, &text)
            .await?;

        // Broadcast only the durable values, never the client-local ones.
        self.publisher.publish(
            &channel_path(&channel),
            ChatEvent::Message {
                id: record.msg_id,
                user: record.user_name,
                sent: record.sent.timestamp_millis(),
                data: record.data,
            },
        );
        Ok(())
    }

    pub async fn get_channel_history(
        &self,
        channel_name: &str,
        user_id: UserId,
        limit: Option<u32>,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<ChatMessage>, ChatServiceError> {
        let session = self.session(user_id)?;
        let channel = self.canonical_channel_name(channel_name).await?;
        if !self.state.read().is_member(&session.name, &channel) {
            return Err(ChatServiceError::InvalidGetHistoryAction);
        }

        let messages = self
            .store
            .get_messages_for_channel(&channel, user_id, limit, before)
            .await?;
        Ok(messages
            .into_iter()
            .map(|m| ChatMessage {
                id: m.msg_id,
                user: m.user_name,
                sent: m.sent.timestamp_millis(),
                data: m.data,
            })
            .collect())
    }

    /// The persisted member list of a channel. This is a point-in-time store
    /// query: it can transiently diverge from the in-memory index (a user
    /// who just lost their last connection still appears until the
    /// disconnect handler has run).
    pub async fn get_channel_users(
        &self,
        channel_name: &str,
        user_id: UserId,
    ) -> Result<Vec<String>, ChatServiceError> {
        let session = self.session(user_id)?;
        let channel = self.canonical_channel_name(channel_name).await?;
        if !self.state.read().is_member(&session.name, &channel) {
            return Err(ChatServiceError::InvalidGetUsersAction);
        }

        Ok(self.store.get_users_for_channel(&channel).await?)
    }

    /// Resolve a user-supplied channel name to the casing recorded at
    /// creation time, or return it unchanged if no record exists (implicit
    /// creation happens in the store on first join).
    pub async fn canonical_channel_name(
        &self,
        channel_name: &str,
    ) -> Result<String, ChatServiceError> {
        let found = self.store.find_channel(channel_name).await?;
        Ok(found
            .map(|c| c.name)
            .unwrap_or_else(|| channel_name.to_string()))
    }

    /// A user came online: merge their persisted channel list into the
    /// index, announce them, and wire their connections up to each channel
    /// path. Best-effort — failures are logged, never surfaced.
    pub async fn handle_user_connect(&self, session: Arc<UserSession>) {
        let channels = match self.store.get_channels_for_user(session.user_id).await {
            Ok(channels) => channels,
            Err(error) => {
                warn!(user = %session.name, %error, "failed to load channel list on connect");
                return;
            }
        };
        if session.connection_count() == 0 {
            // The user disconnected while we were waiting for their channel
            // list; the quit handler has nothing to undo.
            return;
        }

        {
            let mut state = self.state.write();
            let next = state.with_user_channels_merged(&session.name, &channels);
            *state = next;
        }

        for channel in &channels {
            self.publisher.publish(
                &channel_path(channel),
                ChatEvent::UserActive {
                    user: session.name.clone(),
                },
            );
            self.subscribe_to_channel(&session, channel);
        }
        self.publisher.subscribe(
            &user_chat_path(session.user_id),
            &session,
            Some(ChatEvent::ChatReady),
        );
        info!(user = %session.name, channels = channels.len(), "presence synchronized");
    }

    /// A user went offline: drop them from every channel the index tracks
    /// them in and announce it. Best-effort, like the connect handler.
    pub async fn handle_user_quit(&self, user_id: UserId) {
        let user = match self.store.find_user(user_id).await {
            Ok(Some(user)) => user,
            // Already deleted; their memberships went with them.
            Ok(None) => return,
            Err(error) => {
                warn!(%user_id, %error, "failed to look up quitting user");
                return;
            }
        };

        let channels = {
            let mut state = self.state.write();
            if !state.has_user(&user.name) {
                // Quit raced ahead of the connect handler's store
                // round-trip; there is nothing tracked to remove.
                return;
            }
            let (next, channels) = state.without_user(&user.name);
            *state = next;
            channels
        };

        for channel in &channels {
            let path = channel_path(channel);
            self.publisher.publish(
                &path,
                ChatEvent::UserOffline {
                    user: user.name.clone(),
                },
            );
            self.publisher.unsubscribe(&path, user_id);
        }
        self.publisher
            .unsubscribe(&user_chat_path(user_id), user_id);
        info!(user = %user.name, channels = channels.len(), "presence cleared");
    }

    fn session(&self, user_id: UserId) -> Result<Arc<UserSession>, ChatServiceError> {
        self.presence
            .session(user_id)
            .ok_or(ChatServiceError::UserOffline)
    }

    fn subscribe_to_channel(&self, session: &Arc<UserSession>, channel: &str) {
        let active_users = self.state.read().members_of(channel);
        self.publisher.subscribe(
            &channel_path(channel),
            session,
            Some(ChatEvent::Init { active_users }),
        );
    }

    fn pair_lock(&self, key: &(UserId, String)) -> Arc<AsyncMutex<()>> {
        self.op_locks.entry(key.clone()).or_default().clone()
    }

    /// Drop the lock table entry once no other task holds a clone. The
    /// check runs under the shard lock, so a new clone cannot slip in
    /// between the count and the removal.
    fn drop_pair_lock(&self, key: &(UserId, String), lock: Arc<AsyncMutex<()>>) {
        drop(lock);
        self.op_locks
            .remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
    }

    #[cfg(test)]
    pub(crate) fn state_snapshot(&self) -> ChatState {
        self.state.read().clone()
    }
}

#[async_trait::async_trait]
impl PresenceListener for ChatService {
    async fn user_connected(&self, session: Arc<UserSession>) {
        self.handle_user_connect(session).await;
    }

    async fn user_quit(&self, user_id: UserId) {
        self.handle_user_quit(user_id).await;
    }
}
