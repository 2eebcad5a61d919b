pub mod router;
pub mod ws;

use std::sync::Arc;

use crate::chat::service::ChatService;
use crate::presence::PresenceRegistry;
use crate::store::ChatStore;

/// Shared state for the web layer.
pub struct AppState {
    pub chat: Arc<ChatService>,
    pub presence: Arc<PresenceRegistry>,
    pub store: Arc<dyn ChatStore>,
}
