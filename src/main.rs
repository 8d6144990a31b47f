//! BirdNET Bridge
//!
//! Main entry point: wires the read-only repository, the REST surface and
//! the optional MQTT bridge loop together.

use birdnet_bridge::{
    bridge_loop::{BridgeLoop, ChangeTracker},
    cursor_store::CursorStore,
    detection_repository::{self, DetectionRepository},
    publisher::MqttPublisher,
    schema_adapter,
    state::{AppConfig, AppState},
    web_api,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "birdnet_bridge=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting BirdNET bridge v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration (fail fast on a missing database)
    let config = AppConfig::from_env()?;
    tracing::info!(
        database_path = %config.database_path.display(),
        cursor_path = %config.cursor_path.display(),
        poll_interval = ?config.poll_interval,
        batch_size = config.batch_size,
        mqtt_enabled = config.mqtt.is_some(),
        "Configuration loaded"
    );

    // Open the source database strictly read-only
    let pool = detection_repository::read_only_pool(&config.database_path, config.db_pool_size)
        .await?;
    tracing::info!("Database connected (read-only)");

    // Detect the physical layout; unknown layouts are fatal at startup
    let variant = schema_adapter::detect(&pool).await?;
    let repository = Arc::new(DetectionRepository::new(pool, variant));

    // Start the MQTT bridge loop when configured
    let bridge = match &config.mqtt {
        Some(mqtt_config) => {
            let publisher = Arc::new(MqttPublisher::start(mqtt_config));
            tracing::info!(
                host = %mqtt_config.host,
                port = mqtt_config.port,
                topic = %mqtt_config.topic,
                "MQTT publisher started"
            );

            let store = CursorStore::new(config.cursor_path.clone());
            let tracker = ChangeTracker::load(
                repository.clone(),
                store,
                config.batch_size,
                config.skip_backlog,
                config.max_publish_attempts,
            )
            .await?;

            let bridge = Arc::new(BridgeLoop::new(tracker, publisher, config.poll_interval));
            bridge.start().await;
            tracing::info!("Bridge loop started");
            Some(bridge)
        }
        None => {
            tracing::info!("MQTT bridge disabled (set MQTT_ENABLED=true to enable)");
            None
        }
    };

    // Create application state and router
    let state = AppState {
        config: config.clone(),
        repository,
    };

    let app = web_api::create_router(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Let an in-flight cycle commit its cursor before exit
    if let Some(bridge) = bridge {
        bridge.stop().await;
    }
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install shutdown signal handler");
    }
}
