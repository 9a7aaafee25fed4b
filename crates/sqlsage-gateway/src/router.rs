use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api;
use crate::state::SharedState;

/// Build the main application router with all routes.
///
/// `/health` stays open; everything under `/api` requires the gateway key
/// when one is configured.
pub fn build_router(state: SharedState) -> Router {
    let api = Router::new()
        .route("/api/status", get(status))
        .route("/api/chat", post(api::chat))
        .route("/api/ask", post(api::ask))
        .route("/api/execute-sql", post(api::execute_sql))
        .route("/api/collections", get(api::list_collections))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .route("/health", get(health))
        .merge(api)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn status(State(state): State<SharedState>) -> Json<serde_json::Value> {
    let generator = state.orchestrator.as_ref().map(|o| {
        let provider = o.generator();
        json!({
            "provider": provider.provider_id(),
            "model": provider.configured_model(),
        })
    });
    let database = state.database.as_ref().map(|db| db.status());
    let sandbox = state.sandbox.as_ref().map(|s| {
        let defaults = s.defaults();
        json!({
            "engine": s.engine_id(),
            "timeout_ms": u64::try_from(defaults.timeout.as_millis()).unwrap_or(u64::MAX),
            "max_rows": defaults.max_rows,
            "allowed_statements": defaults.allowlist.keywords(),
        })
    });

    Json(json!({
        "status": "running",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.uptime_secs(),
        "assistant": generator,
        "collections": state.catalog.is_some(),
        "sandbox": sandbox,
        "database": database,
    }))
}

/// Accepts `Authorization: Bearer <key>` or `x-api-key: <key>`.
async fn require_api_key(
    State(state): State<SharedState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.config.gateway.api_key.as_deref().filter(|k| !k.is_empty()) else {
        return next.run(request).await;
    };

    if presented_key(request.headers()) == Some(expected) {
        next.run(request).await
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "missing or invalid API key" })),
        )
            .into_response()
    }
}

fn presented_key(headers: &HeaderMap) -> Option<&str> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    bearer.or_else(|| headers.get("x-api-key").and_then(|v| v.to_str().ok()))
}
