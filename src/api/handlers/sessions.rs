/// Session lifecycle handlers
use axum::extract::Path;
use axum::extract::State;
use axum::Json;
use tracing::info;

use super::api_error;
use super::ApiResult;
use super::AppState;
use crate::api::types::ApiResponse;
use crate::api::types::CreateSessionRequest;
use crate::api::types::SessionResponse;
use crate::models::Utterance;

/// POST /api/sessions
pub async fn create_session(
    State(state): State<AppState>,
    body: Option<Json<CreateSessionRequest>>,
) -> ApiResult<SessionResponse> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let session = state
        .sessions
        .start_session(request.screening_result)
        .await
        .map_err(|e| api_error(&e))?;
    info!("POST /api/sessions -> {}", session.id);
    Ok(Json(ApiResponse::success(SessionResponse::new(session, None))))
}

/// GET /api/sessions/:id
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<SessionResponse> {
    let session = state
        .sessions
        .get_session(&session_id)
        .await
        .map_err(|e| api_error(&e))?;
    let escalation = state
        .sessions
        .store()
        .get_escalation(&session_id)
        .await
        .map_err(|e| api_error(&e))?;
    Ok(Json(ApiResponse::success(SessionResponse::new(session, escalation))))
}

/// GET /api/sessions/:id/messages
pub async fn list_messages(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Vec<Utterance>> {
    // 404 for unknown sessions rather than an empty list
    state
        .sessions
        .get_session(&session_id)
        .await
        .map_err(|e| api_error(&e))?;
    let messages = state
        .sessions
        .store()
        .get_messages(&session_id)
        .await
        .map_err(|e| api_error(&e))?;
    Ok(Json(ApiResponse::success(messages)))
}
