use std::convert::Infallible;

use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{Value, json};
use sqlsage_agents::Turn;
use sqlsage_common::{CollectionSelector, ConversationMessage, Error};
use sqlsage_sandbox::SandboxOverrides;
use tracing::{info, warn};

use crate::state::SharedState;

const QUERY_REQUIRED: &str = "Query is required and must be a string";

/// Body of `/api/chat` and `/api/ask`.
#[derive(Debug, Deserialize)]
pub struct TurnRequest {
    pub messages: Vec<ConversationMessage>,
    #[serde(default, alias = "selectedCollectionId")]
    pub selected_collection_id: CollectionSelector,
}

impl TurnRequest {
    fn into_turn(self) -> sqlsage_common::Result<Turn> {
        Turn::new(self.messages, self.selected_collection_id)
    }
}

/// JSON error body with a status derived from the error kind.
pub fn error_response(error: &Error) -> Response {
    let status = match error {
        Error::InvalidRequest(_) | Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        Error::Generation(_) | Error::Retrieval(_) | Error::Search(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": error.to_string() }))).into_response()
}

fn unavailable(what: &str) -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "error": format!("{what} is not configured") })),
    )
        .into_response()
}

/// POST /api/chat: streamed markdown answer.
///
/// Failures before the first byte are JSON errors; once streaming has begun a
/// failure is appended to the body as an `**Error:**` line and the body ends.
pub async fn chat(State(state): State<SharedState>, Json(body): Json<TurnRequest>) -> Response {
    let Some(orchestrator) = state.orchestrator.clone() else {
        return unavailable("the SQL assistant");
    };
    let turn = match body.into_turn() {
        Ok(turn) => turn,
        Err(e) => return error_response(&e),
    };

    let stream = match orchestrator.answer_stream(&turn).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("chat turn failed before streaming: {e}");
            return error_response(&e);
        }
    };

    info!(
        "streaming answer (schema degraded: {}, query-log degraded: {})",
        stream.findings.schema.is_degraded(),
        stream.findings.query_log.is_degraded()
    );

    let body = stream.text.map(|chunk| {
        Ok::<_, Infallible>(match chunk {
            Ok(text) => text,
            Err(e) => {
                warn!("chat stream broke: {e}");
                format!("\n\n**Error:** {e}\n")
            }
        })
    });

    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(body),
    )
        .into_response()
}

/// POST /api/ask: the whole answer as JSON, with extracted statements and
/// both agents' findings.
pub async fn ask(State(state): State<SharedState>, Json(body): Json<TurnRequest>) -> Response {
    let Some(orchestrator) = state.orchestrator.clone() else {
        return unavailable("the SQL assistant");
    };
    let turn = match body.into_turn() {
        Ok(turn) => turn,
        Err(e) => return error_response(&e),
    };

    match orchestrator.answer(&turn).await {
        Ok(output) => Json(output).into_response(),
        Err(e) => {
            warn!("ask turn failed: {e}");
            error_response(&e)
        }
    }
}

/// POST /api/execute-sql: run one statement through the sandbox.
///
/// Only a missing or non-string `query` is a `400`; every other outcome,
/// rejected statements included, is a `200` carrying the execution result.
pub async fn execute_sql(State(state): State<SharedState>, Json(body): Json<Value>) -> Response {
    let Some(query) = body.get("query").and_then(Value::as_str) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "error": QUERY_REQUIRED })),
        )
            .into_response();
    };

    let overrides = match body.get("options") {
        None | Some(Value::Null) => None,
        Some(raw) => match serde_json::from_value::<SandboxOverrides>(raw.clone()) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "success": false, "error": format!("Invalid options: {e}") })),
                )
                    .into_response();
            }
        },
    };

    let Some(sandbox) = state.sandbox.clone() else {
        return unavailable("the target database");
    };

    let result = sandbox.run(query, overrides.as_ref()).await;
    Json(result).into_response()
}

/// GET /api/collections: every collection, ordered by name.
pub async fn list_collections(State(state): State<SharedState>) -> Response {
    let Some(catalog) = state.catalog.clone() else {
        return unavailable("the collection catalog");
    };

    match catalog.list_collections().await {
        Ok(collections) => Json(json!({ "collections": collections })).into_response(),
        Err(e) => {
            warn!("listing collections failed: {e}");
            error_response(&e)
        }
    }
}
