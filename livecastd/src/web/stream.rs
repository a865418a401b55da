use std::future::Future;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use livecast_core::{SourceDescriptor, StartReport, StreamSupervisor, SupervisorError};

use super::{ApiError, WebState};

#[derive(Debug, Default, Deserialize)]
pub(super) struct StartRequest {
    #[serde(default, alias = "rtsp_url")]
    source: Option<String>,
}

/// Runs a supervisor call on its own task so a client disconnect cannot
/// drop it halfway through a launch or a stop.
async fn detached<T, F, Fut>(state: &WebState, call: F) -> Result<T, ApiError>
where
    F: FnOnce(Arc<StreamSupervisor>) -> Fut,
    Fut: Future<Output = Result<T, SupervisorError>> + Send + 'static,
    T: Send + 'static,
{
    let task = tokio::spawn(call(Arc::clone(&state.supervisor)));
    Ok(task.await??)
}

fn started(message: &str, report: StartReport) -> Json<Value> {
    Json(json!({
        "message": message,
        "hls_url": report.hls_url.clone(),
        "details": report,
    }))
}

pub(super) async fn start(
    State(state): State<WebState>,
    body: Result<Json<StartRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(request) = body?;
    let raw = request
        .source
        .filter(|source| !source.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("RTSP URL is required".into()))?;
    let source = SourceDescriptor::parse(&raw)?;
    let report = detached(&state, |supervisor| async move { supervisor.start(source).await }).await?;
    Ok(started("Stream conversion started", report))
}

pub(super) async fn test_pattern(State(state): State<WebState>) -> Result<Json<Value>, ApiError> {
    let report =
        detached(&state, |supervisor| async move { supervisor.start_test_pattern().await })
            .await?;
    Ok(started("Test stream started", report))
}

pub(super) async fn stop(State(state): State<WebState>) -> Result<Json<Value>, ApiError> {
    let report = detached(&state, |supervisor| async move { supervisor.stop().await }).await?;
    Ok(Json(json!({
        "message": "Stream conversion stopped",
        "details": report,
    })))
}

pub(super) async fn status(State(state): State<WebState>) -> Json<Value> {
    let status = state.supervisor.status().await;
    Json(json!({ "status": status }))
}
