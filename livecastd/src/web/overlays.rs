use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use livecast_core::{NewOverlay, OverlayError, OverlayPatch, OverlayResult};

use super::{ApiError, WebState};

/// Store calls are synchronous SQLite; keep them off the async workers.
async fn blocking<T, F>(call: F) -> Result<T, ApiError>
where
    F: FnOnce() -> OverlayResult<T> + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::task::spawn_blocking(call).await??)
}

pub(super) async fn create(
    State(state): State<WebState>,
    payload: Result<Json<NewOverlay>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let Json(payload) = payload?;
    let store = state.overlays.clone();
    let overlay = blocking(move || store.create(payload)).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({"message": "Overlay created successfully", "overlay": overlay})),
    ))
}

pub(super) async fn list(State(state): State<WebState>) -> Result<Json<Value>, ApiError> {
    let store = state.overlays.clone();
    let overlays = blocking(move || store.list()).await?;
    Ok(Json(json!({ "overlays": overlays })))
}

pub(super) async fn get(
    State(state): State<WebState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let store = state.overlays.clone();
    let overlay = blocking(move || {
        store
            .get(&name)?
            .ok_or(OverlayError::NotFound { name })
    })
    .await?;
    Ok(Json(json!({ "overlay": overlay })))
}

pub(super) async fn update(
    State(state): State<WebState>,
    Path(name): Path<String>,
    patch: Result<Json<OverlayPatch>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(patch) = patch?;
    let store = state.overlays.clone();
    let overlay = blocking(move || store.update(&name, patch)).await?;
    Ok(Json(json!({
        "message": "Overlay updated successfully",
        "overlay": overlay,
    })))
}

pub(super) async fn delete(
    State(state): State<WebState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let store = state.overlays.clone();
    blocking(move || store.delete(&name)).await?;
    Ok(Json(json!({"message": "Overlay deleted successfully"})))
}
