use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use beacon::analytics::{AnswerService, GeoResolver, HttpAssistant};
use beacon::api::{create_api_router, AppState};
use beacon::auth::AuthService;
use beacon::config::Config;
use beacon::storage::{SqliteStorage, Storage};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("beacon=info")),
        )
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!("Loaded configuration");

    info!("Using SQLite storage: {}", config.database.url);
    let storage: Arc<dyn Storage> = Arc::new(
        SqliteStorage::new(&config.database.url, config.database.max_connections).await?,
    );

    info!("Initializing database...");
    storage.init().await?;
    info!("Database initialized successfully");

    let geo = GeoResolver::from_config(&config.analytics);

    let assistant: Option<Arc<dyn AnswerService>> = match config.assistant.as_ref() {
        Some(assistant_config) => match HttpAssistant::from_config(assistant_config) {
            Ok(assistant) => {
                info!(
                    "Answer service enabled (model: {}, endpoint: {})",
                    assistant_config.model, assistant_config.api_url
                );
                Some(Arc::new(assistant))
            }
            Err(e) => {
                warn!("Answer service disabled, using rule-based answers: {e:#}");
                None
            }
        },
        None => {
            info!("No answer service configured, using rule-based answers");
            None
        }
    };

    let state = Arc::new(AppState::new(
        Arc::clone(&storage),
        geo,
        config.analytics.clone(),
        assistant,
    ));
    let auth_service = Arc::new(AuthService::new(&config.auth));
    let router = create_api_router(state, auth_service, &config.api_server.cors_origins);

    let addr = format!("{}:{}", config.api_server.host, config.api_server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("API server listening on http://{}", addr);
    info!(
        "Client addresses resolved with trusted proxy mode {:?}",
        config.analytics.trusted_proxy_mode
    );

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
