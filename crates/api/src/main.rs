//! Huddle collaboration relay server

use anyhow::Context;
use huddle_api::{
    config::LogFormat, create_router, websocket::HeartbeatMonitor, AppState, Config, MessageStore,
};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env().context("Invalid configuration")?;
    init_tracing(config.log_format);

    // Postgres backs the message log only when configured
    let (store, db) = match &config.database_url {
        Some(url) => {
            let pool = huddle_shared::db::create_pool(url, config.database_max_connections)
                .await
                .context("Failed to connect to database")?;
            huddle_shared::db::run_migrations(&pool)
                .await
                .context("Failed to run migrations")?;
            tracing::info!("Database connected, migrations applied");
            (MessageStore::Postgres(pool.clone()), Some(pool))
        }
        None => {
            tracing::info!(
                capacity = config.message_log_capacity,
                "No DATABASE_URL set, using in-memory message log"
            );
            (MessageStore::memory(config.message_log_capacity), None)
        }
    };

    let bind_address = config.bind_address.clone();
    let heartbeat_interval = config.heartbeat_interval();
    let state = AppState::new(config, store, db);

    HeartbeatMonitor::new(
        state.collab.connections.clone(),
        state.collab.relay.clone(),
        heartbeat_interval,
    )
    .spawn();

    let app = create_router(state);

    let listener = TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", bind_address))?;
    tracing::info!(
        address = %bind_address,
        heartbeat_secs = heartbeat_interval.as_secs(),
        "Huddle relay listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Huddle relay stopped");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("huddle_api=info,tower_http=info"));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutdown signal received");
}
