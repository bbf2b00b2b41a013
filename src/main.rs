//! # Realtime Transcribe Backend - Main Application Entry Point
//!
//! Streams live audio from WebSocket clients to an external streaming
//! speech-recognition engine and routes partial/final transcript events
//! back to the originating client in real time.
//!
//! ## Application Architecture:
//! - **config**: layered configuration (TOML file + environment variables)
//! - **state**: shared application state and streaming metrics
//! - **events**: topic-based event bus connecting gateway, adapter, dispatch
//! - **session**: session registry and per-session audio frame channels
//! - **transcription**: engine seam and the streaming recognition adapter
//! - **websocket**: per-connection gateway actor
//!
//! Every component is constructed here and wired by reference — the bus,
//! registry, and service have no global instances, so their lifecycle is
//! exactly the process lifecycle.

mod config;
mod error;
mod events;
mod health;
mod protocol;
mod session;
mod state;
mod transcription;
mod websocket;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use events::EventBus;
use session::registry::SessionRegistry;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};
use transcription::engine::{StreamConfig, WsRecognitionEngine};
use transcription::service::TranscriptionService;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Set when a shutdown signal has been received.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!(
        "Starting realtime-transcribe-backend v{}",
        env!("CARGO_PKG_VERSION")
    );
    info!(
        "Configuration loaded: {}:{}, engine {}",
        config.server.host, config.server.port, config.engine.url
    );

    let app_state = AppState::new(config.clone());
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    // Composition root: everything below is constructed once and shared
    // by reference — no global singletons.
    let bus = EventBus::new();
    let registry = Arc::new(SessionRegistry::new(
        config.performance.max_concurrent_sessions,
    ));
    let engine = Arc::new(WsRecognitionEngine::new(config.engine.url.clone()));
    let stream_config = StreamConfig {
        language: config.engine.language.clone(),
        sample_rate: config.engine.sample_rate,
        encoding: config.engine.encoding.clone(),
    };

    let service = Arc::new(TranscriptionService::new(
        bus.clone(),
        registry.clone(),
        engine,
        stream_config,
        app_state.clone(),
    ));
    TranscriptionService::setup_subscriptions(&service);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let registry_data = web::Data::from(registry);
    let bus_data = web::Data::new(bus);
    let state_data = web::Data::new(app_state);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(state_data.clone())
            .app_data(registry_data.clone())
            .app_data(bus_data.clone())
            .wrap(cors)
            .wrap(Logger::default())
            .route("/ws", web::get().to(websocket::transcribe_websocket))
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    // Race the server against the shutdown signal.
    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize the tracing (logging) system for the application.
///
/// `RUST_LOG` controls verbosity; the default keeps this crate at debug
/// and actix at info.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "realtime_transcribe_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Listen for SIGTERM/SIGINT and flip the shutdown flag.
fn setup_signal_handlers() {
    tokio::spawn(async {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM handler");
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Resolve once the shutdown flag has been set.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
