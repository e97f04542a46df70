//! # BirdNET Detection Service - Main Application Entry Point
//!
//! Sets up an Actix-web HTTP server exposing bird species detection over:
//! - **`/ws/stream`**: realtime WebSocket sessions fed with raw PCM
//! - **`/predict/file`, `/predict/stream`**: one-shot uploads
//! - **`/health`, `/api/v1/metrics`**: monitoring
//!
//! ## Application Architecture:
//! - **config**: Application configuration (TOML file + environment variables)
//! - **state**: Shared application state, engine handles and metrics
//! - **audio**: PCM format, buffering, window scheduling and the session state machine
//! - **detection**: Detection types and the external engine integration
//! - **websocket**: The socket actor bridging actix and the session task
//! - **handlers**: One-shot prediction endpoints
//! - **middleware**: Request logging, metrics and body size limits
//! - **error**: HTTP error responses

mod audio;
mod config;
mod detection;
mod error;
mod handlers;
mod health;
mod middleware;
mod rate_limit;
mod state;
mod websocket;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use detection::CommandDetector;
use state::AppState;
use std::sync::Arc;
use tracing::{error, info};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// The main application entry point.
///
/// ## What this function does:
/// 1. **Loads configuration** from files and environment variables
/// 2. **Sets up logging**
/// 3. **Creates the detection engine and shared state**
/// 4. **Configures the HTTP server** with middleware and routes
/// 5. **Handles graceful shutdown** on SIGINT/SIGTERM
#[actix_web::main]
async fn main() -> Result<()> {
    // It's fine if there's no .env file
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting birdnet-service v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);

    std::fs::create_dir_all(&config.detector.temp_dir)?;

    let detector = Arc::new(CommandDetector::from_config(&config.detector));
    info!(
        command = %config.detector.command,
        temp_dir = %config.detector.temp_dir.display(),
        "Detection engine configured"
    );

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let max_upload_bytes = config.upload.max_bytes;
    let app_state = web::Data::new(AppState::new(config, detector));

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(app_state.clone())
            // Middleware executes in reverse order for responses
            .wrap(cors)
            .wrap(TracingLogger::default())
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics)),
            )
            .route("/health", web::get().to(health::health_check))
            .route("/ws/stream", web::get().to(websocket::stream_websocket))
            .service(
                web::scope("/predict")
                    .wrap(middleware::BodyLimit::new(max_upload_bytes))
                    .route("/file", web::post().to(handlers::predict_file))
                    .route("/stream", web::post().to(handlers::predict_stream)),
            )
    })
    .disable_signals()
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        signal = wait_for_shutdown() => {
            if let Err(e) = signal {
                error!("Failed to listen for shutdown signals: {}", e);
            }
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize tracing.
///
/// `RUST_LOG` controls what gets logged; without it the default is
/// "birdnet_service=debug,actix_web=info".
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "birdnet_service=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Resolve on SIGTERM or SIGINT (Ctrl+C).
#[cfg(unix)]
async fn wait_for_shutdown() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigint.recv() => info!("Received SIGINT"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C");
    Ok(())
}
