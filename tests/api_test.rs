mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::Request;
use axum::http::StatusCode;
use axum::Router;
use common::*;
use mindcare::api::build_router;
use mindcare::api::handlers::AppState;
use mindcare::database::MemoryStore;
use mindcare::Services;
use serde_json::json;
use serde_json::Value;
use tower::ServiceExt;

async fn app(generation: ScriptedGeneration) -> Router {
    let config = test_config();
    let services = Services::assemble(
        &config,
        Arc::new(MemoryStore::new()),
        Arc::new(sample_index().await),
        Arc::new(HashEmbeddings::default()),
        Arc::new(generation),
        None,
    );
    build_router(AppState::from(&services), false, 8)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, String) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn create_session(app: &Router) -> String {
    let (status, body) = send(app, post_json("/api/sessions", &json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    let value: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(value["data"]["status"], "active");
    value["data"]["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health_reports_index_size() {
    let app = app(ScriptedGeneration::new(vec![])).await;
    let (status, body) = send(&app, get("/api/health")).await;

    assert_eq!(status, StatusCode::OK);
    let value: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(value["success"], true);
    assert_eq!(value["data"]["indexed_passages"], 4);
}

#[tokio::test]
async fn test_message_streams_events_in_order() {
    let app = app(ScriptedGeneration::new(vec![Script::Chunks(vec![
        "많이 힘드셨겠어요. ",
        MARKER,
        "전문가와 이야기해 보세요.",
    ])]))
    .await;
    let id = create_session(&app).await;

    let (status, body) = send(
        &app,
        post_json(
            &format!("/api/sessions/{id}/messages"),
            &json!({ "message": "요즘 너무 우울해요", "strategy": "similarity" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let routed = body.find("event: routed").unwrap();
    let chunk = body.find("event: chunk").unwrap();
    let done = body.find("event: done").unwrap();
    assert!(routed < chunk && chunk < done);
    assert!(!body.contains("EXPERT_REFERRAL"));
    assert!(body.contains(r#""referred":true"#));
    assert!(body.contains(r#""intent":"EMOTION""#));

    let (_, session) = send(&app, get(&format!("/api/sessions/{id}"))).await;
    let session: Value = serde_json::from_str(&session).unwrap();
    assert_eq!(session["data"]["status"], "referred");
    assert_eq!(session["data"]["escalation"]["severity"], "severe");

    let (_, messages) = send(&app, get(&format!("/api/sessions/{id}/messages"))).await;
    let messages: Value = serde_json::from_str(&messages).unwrap();
    let messages = messages["data"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(messages[1]["text"], "많이 힘드셨겠어요. 전문가와 이야기해 보세요.");
}

#[tokio::test]
async fn test_model_router_handles_unmatched_utterances() {
    let app = app(ScriptedGeneration::new(vec![]).with_complete_reply("QUESTION")).await;
    let id = create_session(&app).await;

    let (status, body) = send(
        &app,
        post_json(
            &format!("/api/sessions/{id}/messages"),
            &json!({ "message": "회사 동료와 잘 지내는 방법이 궁금해요" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains(r#""intent":"QUESTION""#));
}

#[tokio::test]
async fn test_generation_failure_sends_error_event() {
    let app = app(ScriptedGeneration::new(vec![Script::FailAfter(vec![])])).await;
    let id = create_session(&app).await;

    let (_, body) = send(
        &app,
        post_json(
            &format!("/api/sessions/{id}/messages"),
            &json!({ "message": "스트레스 때문에 힘들어요" }),
        ),
    )
    .await;
    assert!(body.contains("event: error"));
    assert!(!body.contains("event: done"));
    assert!(!body.contains("connection reset"));
}

#[tokio::test]
async fn test_empty_message_is_bad_request() {
    let app = app(ScriptedGeneration::new(vec![])).await;
    let id = create_session(&app).await;

    let (status, body) = send(
        &app,
        post_json(&format!("/api/sessions/{id}/messages"), &json!({ "message": "  " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let value: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(value["success"], false);
}

#[tokio::test]
async fn test_unknown_session_is_not_found() {
    let app = app(ScriptedGeneration::new(vec![])).await;

    let (status, _) = send(&app, get("/api/sessions/missing")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app, get("/api/sessions/missing/messages")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
