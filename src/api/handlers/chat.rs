/// Streaming chat handler
use std::convert::Infallible;

use axum::extract::Path;
use axum::extract::State;
use axum::response::sse::Event;
use axum::response::sse::KeepAlive;
use axum::response::sse::Sse;
use axum::Json;
use futures::stream;
use futures::Stream;
use serde::Serialize;
use tracing::info;
use tracing::warn;

use super::api_error;
use super::ApiError;
use super::AppState;
use crate::api::types::ChunkEvent;
use crate::api::types::DoneEvent;
use crate::api::types::ErrorEvent;
use crate::api::types::MessageRequest;
use crate::api::types::PassageView;
use crate::api::types::RoutedEvent;
use crate::rag::TurnEvent;
use crate::rag::TurnHandle;
use crate::rag::TurnOptions;

/// POST /api/sessions/:id/messages
///
/// Streams `routed`, `chunk`*, then `done` or `error`. Closing the connection
/// cancels generation; the user message stays recorded.
pub async fn post_message(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<MessageRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>> + Send + 'static>, ApiError> {
    info!("POST /api/sessions/{}/messages", session_id);

    let options = TurnOptions {
        strategy: request.strategy,
        top_k: request.top_k,
        filter: request.filter(),
    };
    let handle = state
        .pipeline
        .respond(&session_id, &request.message, options)
        .await
        .map_err(|e| api_error(&e))?;

    Ok(Sse::new(turn_events(handle)).keep_alive(KeepAlive::default()))
}

fn json_event<T: Serialize>(name: &str, payload: &T) -> Event {
    Event::default()
        .event(name)
        .json_data(payload)
        .unwrap_or_else(|e| {
            warn!("Failed to encode {} event: {}", name, e);
            Event::default().event("error").data("{}")
        })
}

/// SSE events of one turn; dropping the stream drops the handle and cancels
fn turn_events(handle: TurnHandle) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
    stream::unfold(Some(handle), |state| async move {
        let mut handle = state?;
        let event = match handle.next_event().await? {
            Ok(TurnEvent::Routed {
                intent,
                query,
                passages,
            }) => json_event(
                "routed",
                &RoutedEvent {
                    intent,
                    query,
                    passages: passages.iter().map(PassageView::from).collect(),
                },
            ),
            Ok(TurnEvent::Chunk(text)) => json_event("chunk", &ChunkEvent { text }),
            Ok(TurnEvent::Finished(outcome)) => json_event("done", &DoneEvent::from(&outcome)),
            Err(e) => {
                let event = json_event(
                    "error",
                    &ErrorEvent {
                        message: e.user_message().to_string(),
                    },
                );
                return Some((Ok(event), None));
            }
        };
        Some((Ok(event), Some(handle)))
    })
}
