use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::publisher::PublishedFrame;
use crate::store::UserId;

/// Identifier for a single live connection within a session.
pub type ConnId = Uuid;

/// Cap on frames queued per connection. Prevents memory exhaustion from
/// slow clients.
pub const MAX_OUTBOUND_QUEUE: usize = 1024;

/// One logical presence unit per user, aggregating all of their
/// simultaneously live connections. Referenced, not owned, by the chat
/// service.
#[derive(Debug)]
pub struct UserSession {
    pub user_id: UserId,
    pub name: String,
    connections: Mutex<HashMap<ConnId, mpsc::Sender<PublishedFrame>>>,
}

impl UserSession {
    fn new(user_id: UserId, name: String) -> Self {
        Self {
            user_id,
            name,
            connections: Mutex::new(HashMap::new()),
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    /// Deliver a frame to every live connection. A connection whose queue
    /// is full has stalled; its frames are dropped rather than buffered
    /// without bound. Closed-channel failures mean the connection's receive
    /// loop is gone; the disconnect path cleans it up.
    pub fn send(&self, frame: &PublishedFrame) {
        for tx in self.connections.lock().values() {
            if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(frame.clone()) {
                debug!(user = %self.name, "outbound queue saturated, dropping frame");
            }
        }
    }

    fn add_connection(&self, conn_id: ConnId, tx: mpsc::Sender<PublishedFrame>) {
        self.connections.lock().insert(conn_id, tx);
    }

    /// Removes a connection, reporting whether any remain.
    fn remove_connection(&self, conn_id: ConnId) -> bool {
        let mut connections = self.connections.lock();
        connections.remove(&conn_id);
        !connections.is_empty()
    }
}

/// Observer for user presence transitions (live-connection count crossing
/// zero in either direction). Handlers are best-effort: failures are the
/// listener's to log, never the registry's to propagate.
#[async_trait]
pub trait PresenceListener: Send + Sync {
    async fn user_connected(&self, session: Arc<UserSession>);
    async fn user_quit(&self, user_id: UserId);
}

/// Tracks which users have at least one live connection and groups their
/// connections into one session each.
#[derive(Default)]
pub struct PresenceRegistry {
    sessions: DashMap<UserId, Arc<UserSession>>,
    listeners: RwLock<Vec<Arc<dyn PresenceListener>>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Arc<dyn PresenceListener>) {
        self.listeners.write().push(listener);
    }

    /// Register a live connection for a user. Returns the connection ID and
    /// the receiver its outbound frames arrive on. The first connection for
    /// a user notifies listeners of the user coming online.
    pub fn connect(
        &self,
        user_id: UserId,
        name: &str,
    ) -> (ConnId, mpsc::Receiver<PublishedFrame>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(MAX_OUTBOUND_QUEUE);

        let mut is_first = false;
        let session = self
            .sessions
            .entry(user_id)
            .or_insert_with(|| {
                is_first = true;
                Arc::new(UserSession::new(user_id, name.to_string()))
            })
            .clone();
        session.add_connection(conn_id, tx);

        info!(user = %session.name, %conn_id, "connection attached");

        if is_first {
            for listener in self.listeners.read().iter() {
                let listener = listener.clone();
                let session = session.clone();
                tokio::spawn(async move { listener.user_connected(session).await });
            }
        }

        (conn_id, rx)
    }

    /// Drop a live connection. When the user's last connection goes, the
    /// session is removed and listeners are notified of the user quitting.
    pub fn disconnect(&self, user_id: UserId, conn_id: ConnId) {
        let Some(session) = self.sessions.get(&user_id).map(|s| s.clone()) else {
            return;
        };

        if session.remove_connection(conn_id) {
            return;
        }
        self.sessions
            .remove_if(&user_id, |_, s| s.connection_count() == 0);

        info!(user = %session.name, "user went offline");

        for listener in self.listeners.read().iter() {
            let listener = listener.clone();
            tokio::spawn(async move { listener.user_quit(user_id).await });
        }
    }

    /// The session for a user, if they have at least one live connection.
    pub fn session(&self, user_id: UserId) -> Option<Arc<UserSession>> {
        self.sessions.get(&user_id).map(|s| s.clone())
    }
}
