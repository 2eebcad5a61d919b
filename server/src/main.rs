use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use garrison_server::chat::filter::default_filter;
use garrison_server::chat::service::ChatService;
use garrison_server::config::ServerConfig;
use garrison_server::presence::PresenceRegistry;
use garrison_server::publisher::EventPublisher;
use garrison_server::store::SqliteStore;
use garrison_server::store::sqlite::{create_pool, run_migrations};
use garrison_server::web::{AppState, router::build_router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::load("garrison.toml")?;

    let pool = create_pool(&config.database.url).await?;
    run_migrations(&pool).await?;

    let store: Arc<dyn garrison_server::store::ChatStore> = Arc::new(SqliteStore::new(pool));
    let publisher = Arc::new(EventPublisher::new());
    let presence = Arc::new(PresenceRegistry::new());
    let chat = Arc::new(ChatService::new(
        store.clone(),
        publisher.clone(),
        presence.clone(),
        default_filter(),
        config.chat.home_channel.clone(),
    ));
    presence.add_listener(chat.clone());

    let app = build_router(Arc::new(AppState {
        chat,
        presence,
        store,
    }));

    info!("Garrison chat service starting on {}", config.server.listen_address);

    let listener = tokio::net::TcpListener::bind(&config.server.listen_address).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
