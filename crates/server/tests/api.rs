//! HTTP surface tests: envelope shape, status mapping, request ids,
//! rate limiting and the admin catalog flow.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use task_router_config::Settings;
use task_router_server::{create_router, AppState};

fn state() -> AppState {
    let mut settings = Settings::default();
    settings.rate_limit.enabled = false;
    AppState::build(settings).unwrap()
}

fn chat_body(user_id: &str, input: &str, session_id: Option<&str>) -> Body {
    let mut payload = serde_json::json!({ "user_id": user_id, "input": input });
    if let Some(id) = session_id {
        payload["session_id"] = serde_json::json!(id);
    }
    Body::from(payload.to_string())
}

async fn post_chat(
    router: &axum::Router,
    user_id: &str,
    input: &str,
    session_id: Option<&str>,
) -> (StatusCode, Option<String>, serde_json::Value) {
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/chat")
                .header("content-type", "application/json")
                .body(chat_body(user_id, input, session_id))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let request_id = response
        .headers()
        .get("x-request-id")
        .map(|v| v.to_str().unwrap().to_string());
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    (status, request_id, json)
}

#[tokio::test]
async fn chat_turn_returns_envelope_with_request_id() {
    let router = create_router(state());
    let (status, request_id, json) = post_chat(&router, "u1", "查询余额", None).await;

    assert_eq!(status, StatusCode::OK);
    assert!(request_id.is_some());
    assert_eq!(json["success"], true);
    assert_eq!(json["error"], serde_json::Value::Null);
    assert_eq!(json["request_id"].as_str(), request_id.as_deref());

    let data = &json["data"];
    assert_eq!(data["intent"], "check_balance");
    assert_eq!(data["status"], "incomplete");
    assert_eq!(data["response_type"], "slot_prompt");
    assert!(data["session_id"].as_str().unwrap().len() > 10);
    assert_eq!(data["conversation_turn"], 1);
    assert!(data["missing_slots"]
        .as_array()
        .unwrap()
        .iter()
        .any(|s| s == "card_number"));
}

#[tokio::test]
async fn session_continues_across_requests() {
    let router = create_router(state());
    let (_, _, first) = post_chat(&router, "u1", "查询余额", None).await;
    let session_id = first["data"]["session_id"].as_str().unwrap().to_string();

    let (status, _, second) = post_chat(&router, "u1", "我不知道", Some(&session_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["data"]["session_id"], session_id.as_str());
    assert_eq!(second["data"]["conversation_turn"], 2);
}

#[tokio::test]
async fn empty_input_maps_to_400() {
    let router = create_router(state());
    let (status, request_id, json) = post_chat(&router, "u1", "   ", None).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(request_id.is_some());
    assert_eq!(json["success"], false);
    assert_eq!(json["error"]["code"], "E2002");
    assert_eq!(json["metadata"]["request_id"].as_str(), request_id.as_deref());
    // User-safe message, no internals.
    assert!(json["message"].as_str().unwrap().contains("必填"));
}

#[tokio::test]
async fn oversized_input_maps_to_resource_error() {
    let router = create_router(state());
    let big = "订".repeat(2000);
    let (status, _, json) = post_chat(&router, "u1", &big, None).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["error"]["code"], "E9000");
}

#[tokio::test]
async fn rate_limit_maps_to_429_with_retry_after() {
    let mut settings = Settings::default();
    settings.rate_limit.enabled = true;
    settings.rate_limit.burst = 2;
    settings.rate_limit.user_per_minute = 1;
    let router = create_router(AppState::build(settings).unwrap());

    let (a, _, _) = post_chat(&router, "u-limited", "查询余额", None).await;
    let (b, _, _) = post_chat(&router, "u-limited", "查询余额", None).await;
    assert_eq!(a, StatusCode::OK);
    assert_eq!(b, StatusCode::OK);

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/chat")
                .header("content-type", "application/json")
                .body(chat_body("u-limited", "查询余额", None))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().get("retry-after").is_some());
}

#[tokio::test]
async fn health_reports_dependencies() {
    let router = create_router(state());
    let response = router
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["dependencies"]["nlu"], "healthy");
    assert_eq!(json["dependencies"]["store"], "healthy");
    assert_eq!(json["dependencies"]["cache"], "healthy");
}

#[tokio::test]
async fn unknown_session_snapshot_is_404() {
    let router = create_router(state());
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/admin/sessions/nope")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["error"]["code"], "E4002");
}

#[tokio::test]
async fn admin_catalog_replace_bumps_version() {
    let router = create_router(state());
    let yaml = r#"
version: 2
intents:
  - name: demo
    display_name: 演示
    confidence_threshold: 0.7
    function_name: demo_fn
    slots:
      - { name: topic, display_name: 主题, type: text, required: true }
"#;
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/api/v1/admin/catalog")
                .header("content-type", "application/yaml")
                .body(Body::from(yaml))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["data"]["intents"], 1);

    // Health reflects the published version.
    let response = router
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let health: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(health["metrics"]["catalog_version"], 2);
}

#[tokio::test]
async fn admin_catalog_rejects_invalid_yaml() {
    let router = create_router(state());
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/api/v1/admin/catalog")
                .body(Body::from("intents: [this is not a catalog"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["error"]["code"], "E7002");
}

#[tokio::test]
async fn error_stats_endpoint_counts_failures() {
    let router = create_router(state());
    // Trip a validation failure first.
    post_chat(&router, "u1", "   ", None).await;

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/admin/errors")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert!(json["data"]["total"].as_u64().unwrap() >= 1);
    assert!(json["data"]["by_code"]["E2002"].as_u64().unwrap() >= 1);
}
