use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;

use super::lifecycle::{ScanError, ScanLifecycle};
use crate::wire::{AgentScanRecord, ContainerInfo, StartScanRequest};

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for ScanError {
    fn into_response(self) -> Response {
        let (status, error) = match &self {
            ScanError::ContainerNotFound(_) | ScanError::ScanNotFound(_) => {
                (StatusCode::NOT_FOUND, "not_found")
            }
            ScanError::Runtime(e) => {
                log::error!("Container runtime failure: {e}");
                (StatusCode::INTERNAL_SERVER_ERROR, "runtime_error")
            }
        };
        let body = ErrorBody {
            error,
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub fn router(lifecycle: ScanLifecycle) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/containers", get(list_containers))
        .route("/scan", post(start_scan))
        .route("/scan/{scan_id}", get(get_scan_status))
        .with_state(lifecycle)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok", "service": "aegis-agent" }))
}

async fn list_containers(
    State(lifecycle): State<ScanLifecycle>,
) -> Result<Json<Vec<ContainerInfo>>, ScanError> {
    Ok(Json(lifecycle.list_containers().await?))
}

async fn start_scan(
    State(lifecycle): State<ScanLifecycle>,
    Json(request): Json<StartScanRequest>,
) -> Result<Json<AgentScanRecord>, ScanError> {
    Ok(Json(lifecycle.start_scan(&request.container_id).await?))
}

async fn get_scan_status(
    State(lifecycle): State<ScanLifecycle>,
    Path(scan_id): Path<String>,
) -> Result<Json<AgentScanRecord>, ScanError> {
    Ok(Json(lifecycle.get_scan_status(&scan_id).await?))
}
