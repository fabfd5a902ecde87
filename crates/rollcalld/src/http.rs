use crate::error::{AppError, Result};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rollcall_core::Observation;
use rollcall_engine::{EngineError, EngineHandle, EngineStatus, SessionError, SharedSnapshot};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;

const DASHBOARD_HTML: &str = include_str!("dashboard.html");

pub struct AppState {
    pub engine: EngineHandle,
    pub snapshot: SharedSnapshot,
    pub attendance_file: PathBuf,
}

pub fn create_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/session/start", post(start_handler))
        .route("/session/stop", post(stop_handler))
        .route("/status", get(status_handler))
        .route("/frame.jpg", get(frame_handler))
        .route("/observations", get(observations_handler))
        .route("/attendance.csv", get(attendance_handler))
        .with_state(state)
}

async fn index_handler() -> Html<&'static str> {
    Html(DASHBOARD_HTML)
}

async fn start_handler(State(state): State<Arc<AppState>>) -> Result<Json<EngineStatus>> {
    match state.engine.start().await {
        Ok(()) => {}
        Err(e @ EngineError::Session(SessionError::Camera(_))) => {
            return Err(AppError::new(StatusCode::CONFLICT, e));
        }
        Err(e) => return Err(e.into()),
    }
    Ok(Json(state.engine.status().await?))
}

async fn stop_handler(State(state): State<Arc<AppState>>) -> Result<Json<Value>> {
    let stopped = state.engine.stop().await?;
    Ok(Json(json!({ "stopped": stopped })))
}

async fn status_handler(State(state): State<Arc<AppState>>) -> Result<Json<EngineStatus>> {
    Ok(Json(state.engine.status().await?))
}

async fn frame_handler(State(state): State<Arc<AppState>>) -> Result<Response> {
    let jpeg = state
        .snapshot
        .read()
        .map_err(|_| anyhow::anyhow!("snapshot lock poisoned"))?
        .jpeg
        .clone();
    let Some(jpeg) = jpeg else {
        return Ok(StatusCode::NO_CONTENT.into_response());
    };
    Ok((
        [(header::CONTENT_TYPE, "image/jpeg"), (header::CACHE_CONTROL, "no-store")],
        jpeg,
    )
        .into_response())
}

async fn observations_handler(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Observation>>> {
    let snapshot = state
        .snapshot
        .read()
        .map_err(|_| anyhow::anyhow!("snapshot lock poisoned"))?;
    Ok(Json(snapshot.observations.clone()))
}

async fn attendance_handler(State(state): State<Arc<AppState>>) -> Result<Response> {
    let bytes = match tokio::fs::read(&state.attendance_file).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(AppError::new(
                StatusCode::NOT_FOUND,
                anyhow::anyhow!("no attendance recorded yet"),
            ));
        }
        Err(e) => return Err(e.into()),
    };
    let file_name = state
        .attendance_file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "Attendance.csv".to_string());
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{file_name}\"")),
        ],
        bytes,
    )
        .into_response())
}
