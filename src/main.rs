// src/main.rs
use std::net::SocketAddr;
use std::sync::Arc;

use poll_ledger::catalog::default_polls;
use poll_ledger::config::AppConfig;
use poll_ledger::db::PgStore;
use poll_ledger::handlers::AppState;
use poll_ledger::routes;
use poll_ledger::{MemoryStore, Store, VotingEngine};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok(); // Load environment variables from .env file

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "poll_ledger=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;

    let store: Arc<dyn Store> = match &config.database_url {
        Some(database_url) => {
            let store = PgStore::connect(database_url, config.max_connections).await?;
            store.run_migrations().await?;
            store.seed_polls(&default_polls()).await?;
            info!("Using Postgres store");
            Arc::new(store)
        }
        None => {
            info!("DATABASE_URL not set, using in-memory store");
            Arc::new(MemoryStore::seeded())
        }
    };

    let state = AppState::new(VotingEngine::new(store));
    let cors = routes::cors_layer(config.cors_allow_origin.as_deref())?;
    let app = routes::create_routes(state, cors);

    let addr = config.bind_addr();
    info!(%addr, "Listening");
    axum_server::bind(addr)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await?;

    Ok(())
}
