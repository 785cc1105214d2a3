/// API request handlers
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use tracing::error;

use crate::api::types::ApiResponse;
use crate::api::types::HealthResponse;
use crate::rag::CounselingPipeline;
use crate::services::Services;
use crate::session::SessionManager;
use crate::vector::VectorIndex;
use crate::MindcareError;

pub mod chat;
pub mod sessions;

pub use chat::*;
pub use sessions::*;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<CounselingPipeline>,
    pub sessions: Arc<SessionManager>,
    pub index: Arc<dyn VectorIndex>,
}

impl From<&Services> for AppState {
    fn from(services: &Services) -> Self {
        Self {
            pipeline: Arc::clone(&services.pipeline),
            sessions: Arc::clone(&services.sessions),
            index: Arc::clone(&services.index),
        }
    }
}

pub type ApiError = (StatusCode, Json<ApiResponse<()>>);
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

/// Map a pipeline error to a status code and a message safe to show
pub fn api_error(e: &MindcareError) -> ApiError {
    let status = match e {
        MindcareError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        MindcareError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        MindcareError::InvalidTransition { .. } => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let message = match e {
        MindcareError::SessionNotFound(_) | MindcareError::InvalidInput(_) => e.to_string(),
        _ => {
            error!("Request failed: {}", e);
            e.user_message().to_string()
        }
    };
    (status, Json(ApiResponse::error(message)))
}

/// Health check handler
pub async fn health(State(state): State<AppState>) -> Json<ApiResponse<HealthResponse>> {
    Json(ApiResponse::success(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        indexed_passages: state.index.len().await.ok(),
    }))
}
