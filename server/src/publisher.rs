use std::collections::HashMap;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use serde::Serialize;

use crate::chat::events::ChatEvent;
use crate::presence::UserSession;
use crate::store::UserId;

/// What subscribers receive: the path an event was published on plus the
/// event itself.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishedFrame {
    pub path: String,
    #[serde(flatten)]
    pub event: ChatEvent,
}

/// Path-addressed pub/sub fan-out. Topics hold weak session references so a
/// session that went away without unsubscribing is pruned on the next
/// publish rather than kept alive.
#[derive(Default)]
pub struct EventPublisher {
    topics: DashMap<String, HashMap<UserId, Weak<UserSession>>>,
}

impl EventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a session to a path. The optional init payload is delivered
    /// to the subscribing session immediately, before anything published
    /// later on the path.
    pub fn subscribe(&self, path: &str, session: &Arc<UserSession>, init: Option<ChatEvent>) {
        self.topics
            .entry(path.to_string())
            .or_default()
            .insert(session.user_id, Arc::downgrade(session));
        if let Some(event) = init {
            session.send(&PublishedFrame {
                path: path.to_string(),
                event,
            });
        }
    }

    pub fn unsubscribe(&self, path: &str, user_id: UserId) {
        if let Some(mut subscribers) = self.topics.get_mut(path) {
            subscribers.remove(&user_id);
        }
        self.topics.remove_if(path, |_, subs| subs.is_empty());
    }

    /// Publish an event to every live subscriber of a path.
    pub fn publish(&self, path: &str, event: ChatEvent) {
        let Some(mut subscribers) = self.topics.get_mut(path) else {
            return;
        };
        let frame = PublishedFrame {
            path: path.to_string(),
            event,
        };
        subscribers.retain(|_, weak| match weak.upgrade() {
            Some(session) => {
                session.send(&frame);
                true
            }
            None => false,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::PresenceRegistry;

    fn join_event(user: &str) -> ChatEvent {
        ChatEvent::Join { user: user.into() }
    }

    #[tokio::test]
    async fn test_publish_reaches_subscribers_only() {
        let registry = PresenceRegistry::new();
        let publisher = EventPublisher::new();
        let (_c1, mut alice_rx) = registry.connect(1, "alice");
        let (_c2, mut bob_rx) = registry.connect(2, "bob");

        publisher.subscribe("/chat/Test", &registry.session(1).unwrap(), None);
        publisher.publish("/chat/Test", join_event("alice"));

        let frame = alice_rx.try_recv().unwrap();
        assert_eq!(frame.path, "/chat/Test");
        assert_eq!(frame.event, join_event("alice"));
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_init_payload_delivered_on_subscribe() {
        let registry = PresenceRegistry::new();
        let publisher = EventPublisher::new();
        let (_c, mut rx) = registry.connect(1, "alice");

        publisher.subscribe(
            "/chat/Test",
            &registry.session(1).unwrap(),
            Some(ChatEvent::Init {
                active_users: vec!["alice".into()],
            }),
        );

        let frame = rx.try_recv().unwrap();
        assert_eq!(
            frame.event,
            ChatEvent::Init {
                active_users: vec!["alice".into()]
            }
        );
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let registry = PresenceRegistry::new();
        let publisher = EventPublisher::new();
        let (_c, mut rx) = registry.connect(1, "alice");

        publisher.subscribe("/chat/Test", &registry.session(1).unwrap(), None);
        publisher.unsubscribe("/chat/Test", 1);
        publisher.publish("/chat/Test", join_event("bob"));

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dead_sessions_are_pruned() {
        let registry = PresenceRegistry::new();
        let publisher = EventPublisher::new();
        let (conn, _rx) = registry.connect(1, "alice");

        publisher.subscribe("/chat/Test", &registry.session(1).unwrap(), None);
        registry.disconnect(1, conn);

        // The registry dropped its Arc; publish upgrades fail and prune.
        publisher.publish("/chat/Test", join_event("bob"));
        let subscribers = publisher.topics.get("/chat/Test").unwrap();
        assert!(subscribers.is_empty());
    }

    #[test]
    fn test_frame_serialization_is_flat() {
        let frame = PublishedFrame {
            path: "/chat/Test".into(),
            event: join_event("alice"),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["path"], "/chat/Test");
        assert_eq!(json["action"], "join");
        assert_eq!(json["user"], "alice");
    }
}
