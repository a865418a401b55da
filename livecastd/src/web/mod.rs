//! HTTP control plane: overlay CRUD, stream lifecycle, and the HLS output
//! directory served as static files.

mod error;
mod overlays;
mod stream;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use livecast_core::{SqliteOverlayStore, StreamSupervisor};

pub use error::ApiError;

#[derive(Debug, Clone)]
pub struct WebState {
    pub supervisor: Arc<StreamSupervisor>,
    pub overlays: SqliteOverlayStore,
}

impl WebState {
    pub fn new(supervisor: Arc<StreamSupervisor>, overlays: SqliteOverlayStore) -> Self {
        Self {
            supervisor,
            overlays,
        }
    }
}

pub fn router(state: WebState, cors_permissive: bool) -> Router {
    let static_dir = state.supervisor.output().dir.clone();

    let api = Router::new()
        .route("/health", get(health))
        .route("/overlays", get(overlays::list).post(overlays::create))
        .route(
            "/overlays/{name}",
            get(overlays::get)
                .put(overlays::update)
                .delete(overlays::delete),
        )
        .route("/stream/start", post(stream::start))
        .route("/stream/stop", post(stream::stop))
        .route("/stream/status", get(stream::status))
        .route("/stream/test", post(stream::test_pattern));

    let cors = if cors_permissive {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/", get(index))
        .nest("/api", api)
        .nest_service("/static", ServeDir::new(static_dir))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serves until SIGINT/SIGTERM, then stops the active conversion.
pub async fn serve(addr: SocketAddr, state: WebState, cors_permissive: bool) -> io::Result<()> {
    let supervisor = Arc::clone(&state.supervisor);
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "control plane listening");

    axum::serve(listener, router(state, cors_permissive))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    supervisor.shutdown().await;
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let terminate = async {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(err) => {
                    warn!(error = %err, "failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

async fn index() -> impl IntoResponse {
    Json(json!({
        "message": "RTSP Livestream API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "overlays": "/api/overlays",
            "stream": "/api/stream",
            "health": "/api/health",
        },
    }))
}

async fn health(State(state): State<WebState>) -> impl IntoResponse {
    let store = state.overlays.clone();
    let ping = tokio::task::spawn_blocking(move || store.ping()).await;
    match ping {
        Ok(Ok(())) => (
            StatusCode::OK,
            Json(json!({"status": "healthy", "database": "connected"})),
        ),
        Ok(Err(err)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"status": "unhealthy", "error": err.to_string()})),
        ),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"status": "unhealthy", "error": err.to_string()})),
        ),
    }
}
