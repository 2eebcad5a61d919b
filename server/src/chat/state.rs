use std::collections::{HashMap, HashSet};

/// In-memory membership index: which users are in which channels, in both
/// directions. This is a volatile cache over the store, rebuilt per user as
/// their connections come and go — it is never written back to the store.
///
/// Value semantics: every mutation produces a new snapshot and the service
/// swaps its held value, so a reader at any instant sees a self-consistent
/// index. Invariant: `u` is in `channels[c]` iff `c` is in `users[u]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatState {
    /// Canonical channel name -> names of users in that channel.
    channels: HashMap<String, HashSet<String>>,
    /// User name -> canonical names of channels they are in.
    users: HashMap<String, HashSet<String>>,
}

impl ChatState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_member(&self, user_name: &str, channel_name: &str) -> bool {
        self.users
            .get(user_name)
            .is_some_and(|channels| channels.contains(channel_name))
    }

    /// Members of a channel, or empty if the channel is not tracked.
    pub fn members_of(&self, channel_name: &str) -> Vec<String> {
        self.channels
            .get(channel_name)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn channels_of(&self, user_name: &str) -> Vec<String> {
        self.users
            .get(user_name)
            .map(|channels| channels.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn has_channel(&self, channel_name: &str) -> bool {
        self.channels.contains_key(channel_name)
    }

    pub fn has_user(&self, user_name: &str) -> bool {
        self.users.contains_key(user_name)
    }

    /// New snapshot with one (user, channel) pair added.
    pub fn with_member(&self, channel_name: &str, user_name: &str) -> Self {
        let mut next = self.clone();
        next.channels
            .entry(channel_name.to_string())
            .or_default()
            .insert(user_name.to_string());
        next.users
            .entry(user_name.to_string())
            .or_default()
            .insert(channel_name.to_string());
        next
    }

    /// New snapshot with one (user, channel) pair removed. A channel left
    /// with no members is dropped entirely, never kept empty.
    pub fn without_member(&self, channel_name: &str, user_name: &str) -> Self {
        let mut next = self.clone();
        if let Some(members) = next.channels.get_mut(channel_name) {
            members.remove(user_name);
            if members.is_empty() {
                next.channels.remove(channel_name);
            }
        }
        if let Some(channels) = next.users.get_mut(user_name) {
            channels.remove(channel_name);
        }
        next
    }

    /// New snapshot with the user merge-added into every listed channel.
    /// Existing memberships are never replaced — a concurrent join may have
    /// already added channels this list does not know about.
    pub fn with_user_channels_merged(&self, user_name: &str, channel_names: &[String]) -> Self {
        let mut next = self.clone();
        for channel in channel_names {
            next.channels
                .entry(channel.clone())
                .or_default()
                .insert(user_name.to_string());
        }
        next.users
            .entry(user_name.to_string())
            .or_default()
            .extend(channel_names.iter().cloned());
        next
    }

    /// New snapshot with the user removed from every channel they are in,
    /// plus the list of channels they were removed from. Channels emptied by
    /// the removal are dropped.
    pub fn without_user(&self, user_name: &str) -> (Self, Vec<String>) {
        let mut next = self.clone();
        let Some(channels) = next.users.remove(user_name) else {
            return (next, Vec::new());
        };
        for channel in &channels {
            if let Some(members) = next.channels.get_mut(channel) {
                members.remove(user_name);
                if members.is_empty() {
                    next.channels.remove(channel);
                }
            }
        }
        (next, channels.into_iter().collect())
    }

    /// Check the bidirectional invariant. Only meant for assertions in tests.
    #[cfg(test)]
    pub fn is_consistent(&self) -> bool {
        let forward = self.channels.iter().all(|(channel, members)| {
            members
                .iter()
                .all(|user| self.users.get(user).is_some_and(|c| c.contains(channel)))
        });
        let backward = self.users.iter().all(|(user, channels)| {
            channels.iter().all(|channel| {
                self.channels
                    .get(channel)
                    .is_some_and(|m| m.contains(user))
            })
        });
        forward && backward
    }
}
