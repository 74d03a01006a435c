use std::net::SocketAddr;
use std::sync::Arc;

use auth_server::{
    config::Settings,
    db,
    repository::{MemoryUserRepository, PgUserRepository, UserRepository},
    router, AppState,
};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("auth_server=info,tower_http=info")),
        )
        .init();

    let settings = Settings::parse();
    let auth_config = settings.auth_config()?;
    let registry = settings.provider_registry()?;
    tracing::info!("OAuth providers: {:?}", registry.names());

    let users: Arc<dyn UserRepository> = match settings.database_url() {
        Some(url) => {
            let pool = db::establish_connection_pool(url)?;
            Arc::new(PgUserRepository::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory user store (data is lost on restart)");
            Arc::new(MemoryUserRepository::default())
        }
    };

    let state = AppState::new(auth_config, users, registry);
    let app = router(state, &settings.allowed_origins());

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
