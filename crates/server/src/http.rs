//! HTTP endpoints
//!
//! The chat turn endpoint plus health, metrics and the admin surface.
//! Every response carries `X-Request-ID`; failures translate through the
//! error envelope with the status mapped from the error code.

use axum::{
    extract::{Json, Path, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Router,
};
use std::time::{Duration, Instant};
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use task_router_config::load_catalog_str;
use task_router_core::{Error, ErrorCode};

use crate::envelope::{ApiResponse, ChatData, ChatRequest, ErrorEnvelope, sanitize, slots_to_wire};
use crate::state::AppState;

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let cors_layer = build_cors_layer(
        &state.settings.server.cors_origins,
        state.settings.server.cors_enabled,
    );

    Router::new()
        // Chat turn
        .route("/api/v1/chat", post(chat))
        // Session surface
        .route("/api/v1/sessions/:id", delete(close_session))
        // Health and metrics
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        // Admin surface
        .route("/api/v1/admin/sessions/:id", get(get_session))
        .route("/api/v1/admin/catalog", put(replace_catalog))
        .route("/api/v1/admin/catalog/reload", post(reload_catalog))
        .route("/api/v1/admin/errors", get(error_stats))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_millis(
            state.settings.server.request_timeout_ms,
        )))
        .layer(cors_layer)
        .with_state(state)
}

fn build_cors_layer(origins: &[String], enabled: bool) -> CorsLayer {
    if !enabled {
        return CorsLayer::permissive();
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| {
            origin.parse::<HeaderValue>().ok().or_else(|| {
                tracing::warn!(origin, "invalid CORS origin ignored");
                None
            })
        })
        .collect();
    if parsed.is_empty() {
        tracing::info!("no valid CORS origins configured, defaulting to localhost:3000");
        return CorsLayer::new()
            .allow_origin("http://localhost:3000".parse::<HeaderValue>().unwrap())
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
            .allow_headers(Any);
    }
    CorsLayer::new()
        .allow_origin(parsed)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any)
}

/// Attach `X-Request-ID` and serialize a body with a status.
fn respond<T: serde::Serialize>(status: StatusCode, request_id: &str, body: &T) -> Response {
    let mut response = (status, axum::Json(serde_json::to_value(body).unwrap_or_default()))
        .into_response();
    if let Ok(value) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

fn error_response(state: &AppState, err: &Error, request_id: &str, started: Instant) -> Response {
    let status =
        StatusCode::from_u16(err.code().http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let envelope = ErrorEnvelope::from_detail(
        &err.detail,
        request_id,
        started.elapsed().as_millis() as u64,
    );
    let mut response = respond(status, request_id, &envelope);
    if err.code() == ErrorCode::RateLimited {
        let retry_after = state.rate_limiter.retry_after_secs().to_string();
        response.headers_mut().insert(
            header::RETRY_AFTER,
            HeaderValue::from_str(&retry_after)
                .unwrap_or_else(|_| HeaderValue::from_static("1")),
        );
    }
    response
}

/// POST /api/v1/chat: one dialogue turn.
async fn chat(State(state): State<AppState>, Json(request): Json<ChatRequest>) -> Response {
    let started = Instant::now();
    let inbound = request
        .context
        .map(|c| c.into_inbound())
        .unwrap_or_default();
    let request_id = inbound
        .request_trace_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    match process_chat(&state, &request.user_id, &request.input, request.session_id.as_deref(), inbound)
        .await
    {
        Ok(data) => {
            metrics::counter!("router_turns_total").increment(1);
            respond(StatusCode::OK, &request_id, &ApiResponse::ok(data, &request_id))
        },
        Err(err) => {
            state.monitor.observe(&err.detail);
            err.record();
            tracing::warn!(
                code = %err.code(),
                request_id = %request_id,
                detail = %err.detail.message,
                "chat turn failed"
            );
            error_response(&state, &err, &request_id, started)
        },
    }
}

async fn process_chat(
    state: &AppState,
    user_id: &str,
    input: &str,
    session_id: Option<&str>,
    inbound: task_router_core::InboundContext,
) -> Result<ChatData, Error> {
    if user_id.is_empty() || user_id.len() > 100 {
        return Err(Error::new(ErrorCode::InvalidInput, "user_id must be 1..100 characters"));
    }
    if input.trim().is_empty() {
        return Err(Error::new(ErrorCode::MissingRequiredField, "input is empty"));
    }
    if input.chars().count() > state.settings.server.max_input_chars {
        return Err(Error::new(ErrorCode::ResourceExhausted, "input over size limit")
            .with_context("max_chars", state.settings.server.max_input_chars as u64));
    }
    if session_id.map(|id| id.len() > 50).unwrap_or(false) {
        return Err(Error::new(ErrorCode::InvalidInput, "session_id too long"));
    }

    state
        .rate_limiter
        .check(user_id, inbound.ip_address.as_deref())?;

    let mut acquired = state.sessions.acquire(session_id, user_id).await?;
    let outcome = state
        .engine
        .process_turn(&mut acquired.guard, input, &inbound)
        .await?;

    state.sessions.persist(&acquired.guard).await;
    state
        .sessions
        .persist_context(&acquired.session_id, &inbound)
        .await;

    Ok(ChatData::from_outcome(outcome, &acquired.session_id))
}

/// GET /api/v1/admin/sessions/:id: read-only snapshot for operators.
async fn get_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    match state.sessions.snapshot(&id).await {
        Some(session) => {
            let body = ApiResponse::ok(
                serde_json::json!({
                    "session_id": session.session_id,
                    "user_id": session.user_id,
                    "state": session.state,
                    "current_intent": session.current_intent,
                    "intent_stack": session.intent_stack.iter().map(|f| f.intent.clone()).collect::<Vec<_>>(),
                    "turn_count": session.turn_count,
                    "slots": slots_to_wire(&session.collected_slots),
                    "failed_attempts": session.failed_attempts,
                    "last_seen_at": session.last_seen_at,
                }),
                &request_id,
            );
            respond(StatusCode::OK, &request_id, &body)
        },
        None => {
            let err = Error::new(ErrorCode::ResourceNotFound, format!("session '{id}' not found"));
            error_response(&state, &err, &request_id, Instant::now())
        },
    }
}

/// DELETE /api/v1/sessions/:id: close explicitly.
async fn close_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    match state.sessions.close(&id).await {
        Ok(()) => respond(
            StatusCode::OK,
            &request_id,
            &ApiResponse::ok(serde_json::json!({ "closed": id }), &request_id),
        ),
        Err(err) => error_response(&state, &err, &request_id, Instant::now()),
    }
}

/// GET /health
async fn health(State(state): State<AppState>) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let dependencies = state.dependency_health().await;
    let any_down = dependencies.iter().any(|(_, status)| *status == "down");

    let body = serde_json::json!({
        "status": if any_down { "degraded" } else { "healthy" },
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
        "dependencies": dependencies
            .iter()
            .map(|(name, status)| (name.to_string(), serde_json::json!(status)))
            .collect::<serde_json::Map<_, _>>(),
        "metrics": {
            "live_sessions": state.sessions.live_count(),
            "catalog_version": state.catalog.current().version,
            "error_total": state.monitor.stats().total,
        }
    });
    let status = if any_down {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    respond(status, &request_id, &body)
}

/// GET /metrics: Prometheus exposition.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()).into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "recorder not installed").into_response(),
    }
}

/// PUT /api/v1/admin/catalog: replace the catalog from a YAML body.
/// Publishing a new snapshot evicts the per-intent graph caches by
/// version.
async fn replace_catalog(State(state): State<AppState>, body: String) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let next_version = state.catalog.current().version + 1;
    match load_catalog_str(&body, next_version) {
        Ok(catalog) => {
            let count = catalog.len();
            for intent in catalog.intent_names() {
                state.engine.evict_graph(intent);
            }
            state.catalog.publish(catalog);
            respond(
                StatusCode::OK,
                &request_id,
                &ApiResponse::ok(
                    serde_json::json!({ "version": next_version, "intents": count }),
                    &request_id,
                ),
            )
        },
        Err(e) => {
            let err = Error::new(ErrorCode::InvalidConfiguration, e.to_string());
            error_response(&state, &err, &request_id, Instant::now())
        },
    }
}

/// POST /api/v1/admin/catalog/reload: reload from the configured file.
async fn reload_catalog(State(state): State<AppState>) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let path = std::path::Path::new(&state.settings.catalog_path);
    let next_version = state.catalog.current().version + 1;
    match task_router_config::load_catalog(path, next_version) {
        Ok(catalog) => {
            let count = catalog.len();
            state.catalog.publish(catalog);
            respond(
                StatusCode::OK,
                &request_id,
                &ApiResponse::ok(
                    serde_json::json!({ "version": next_version, "intents": count }),
                    &request_id,
                ),
            )
        },
        Err(e) => {
            let err = Error::new(ErrorCode::InvalidConfiguration, e.to_string());
            error_response(&state, &err, &request_id, Instant::now())
        },
    }
}

/// GET /api/v1/admin/errors: windowed error counters.
async fn error_stats(State(state): State<AppState>) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let stats = state.monitor.stats();
    let body = ApiResponse::ok(
        sanitize(serde_json::to_value(&stats).unwrap_or_default()),
        &request_id,
    );
    respond(StatusCode::OK, &request_id, &body)
}
