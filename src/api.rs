// src/api.rs
//! Admin HTTP surface: health, worker status and mapping management.
//! Mapping changes are forwarded to the supervisor as reconcile commands.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;

use crate::error::StoreError;
use crate::mapping::{Mapping, MappingStore, NewMapping};
use crate::supervisor::{SupervisorHandle, WorkerStatus};

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn MappingStore>,
    pub supervisor: SupervisorHandle,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/workers", get(list_workers))
        .route("/mappings", get(list_mappings).post(create_mapping))
        .route("/mappings/{id}", delete(delete_mapping))
        .with_state(state)
}

/// Mapping as shown to operators: no credentials, shortened webhook.
#[derive(Debug, Serialize)]
pub struct MappingView {
    pub id: u64,
    pub server: String,
    pub topic: String,
    pub webhook: String,
    pub auth: &'static str,
}

impl From<&Mapping> for MappingView {
    fn from(m: &Mapping) -> Self {
        Self {
            id: m.id,
            server: m.source_server_url.clone(),
            topic: m.source_topic.clone(),
            webhook: m.webhook_display(),
            auth: m.auth.display_kind(),
        }
    }
}

pub struct ApiError(StoreError);

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            StoreError::NotFound(_) => StatusCode::NOT_FOUND,
            StoreError::Duplicate { .. } => StatusCode::CONFLICT,
            StoreError::Invalid(_) => StatusCode::BAD_REQUEST,
            StoreError::Io(_) | StoreError::Json(_) => {
                tracing::error!(error = %self.0, "mapping store failure");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

async fn list_workers(State(state): State<ApiState>) -> Json<Vec<WorkerStatus>> {
    Json(state.supervisor.status().await)
}

async fn list_mappings(State(state): State<ApiState>) -> Result<Json<Vec<MappingView>>, ApiError> {
    let mappings = state.store.list_mappings().await?;
    Ok(Json(mappings.iter().map(MappingView::from).collect()))
}

async fn create_mapping(
    State(state): State<ApiState>,
    Json(body): Json<NewMapping>,
) -> Result<(StatusCode, Json<MappingView>), ApiError> {
    let mapping = state.store.create_mapping(body).await?;
    state.supervisor.reconcile().await;
    Ok((StatusCode::CREATED, Json(MappingView::from(&mapping))))
}

async fn delete_mapping(
    State(state): State<ApiState>,
    Path(id): Path<u64>,
) -> Result<StatusCode, ApiError> {
    state.store.delete_mapping(id).await?;
    state.supervisor.reconcile().await;
    Ok(StatusCode::NO_CONTENT)
}
