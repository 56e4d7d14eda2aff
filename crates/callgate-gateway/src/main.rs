//! Callgate Gateway: telephony media streams in, paced reply audio out.
//!
//! Each carrier WebSocket on `/media-stream` becomes one call actor from
//! `callgate-voice`. Utterances go to the configured responder; `/calls`
//! lists live calls with their counters.

mod config;
mod error;
mod protocol;
mod responder;
mod state;
mod stream;

use crate::config::{GatewayConfig, ResponderKind};
use crate::error::GatewayResult;
use crate::responder::{EchoResponder, SilentResponder};
use crate::state::{AppState, CallSummary};
use axum::{extract::State, routing::get, Json, Router};
use callgate_voice::UtteranceHandler;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> GatewayResult<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = GatewayConfig::load()?;
    config.validate()?;

    let responder = build_responder(&config);
    let addr = config.bind_addr();
    info!(
        responder = ?config.responder,
        barge_in = config.session.barge_in_enabled,
        turn_source = ?config.session.turn_source,
        recognizer_rate = config.session.recognizer_rate,
        "⚙️ Configuration loaded"
    );

    let app = build_app(AppState::new(config, responder));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("🚀 Callgate gateway listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("👋 Callgate gateway stopped");
    Ok(())
}

fn build_responder(config: &GatewayConfig) -> Arc<dyn UtteranceHandler> {
    match config.responder {
        ResponderKind::Echo => Arc::new(EchoResponder::new(config.echo.clone())),
        ResponderKind::Silent => Arc::new(SilentResponder),
    }
}

fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/calls", get(list_calls))
        .route("/media-stream", get(stream::media_stream))
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

async fn list_calls(State(state): State<AppState>) -> Json<Vec<CallSummary>> {
    Json(state.calls.snapshot())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // No signal handler available; run until the process is killed.
        std::future::pending::<()>().await;
    }
    info!("🛑 Shutdown signal received");
}
