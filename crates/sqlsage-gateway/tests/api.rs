use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use futures::Stream;
use serde_json::{Value, json};
use sqlsage_agents::{
    AgentKind, ContentBlock, EmbeddingProvider, LlmProvider, LlmRequest, LlmResponse,
    Orchestrator, QueryLogSearchTool, RetrievalAgent, SchemaSearchTool, StreamEvent,
};
use sqlsage_common::{Error, Result};
use sqlsage_config::{AppConfig, DatabaseConfig};
use sqlsage_db::{SqliteEngine, TargetDatabase};
use sqlsage_gateway::{AppState, build_router};
use sqlsage_sandbox::SqlSandbox;
use sqlsage_search::{
    Collection, CollectionCatalog, QueryLogMatch, QueryLogSearchRequest, SimilaritySearch,
    TableMatch, TableSearchRequest,
};
use tower::ServiceExt;

#[derive(Clone, Copy)]
enum Generation {
    Streams,
    FailsUpFront,
    BreaksMidway,
}

/// Answers retrieval rounds with plain text and generation from a script.
struct ScriptedModel {
    generation: Generation,
}

fn text(body: &str) -> LlmResponse {
    LlmResponse {
        content: vec![ContentBlock::Text { text: body.into() }],
        model: "scripted".into(),
        usage: None,
        stop_reason: None,
    }
}

#[async_trait]
impl LlmProvider for ScriptedModel {
    fn provider_id(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        if !request.tools.is_empty() {
            return Ok(text("Nothing relevant was found."));
        }
        match self.generation {
            Generation::FailsUpFront => Err(Error::Generation("deployment not found".into())),
            _ => Ok(text("```sql\nSELECT custid FROM accounts\n```")),
        }
    }

    async fn stream_complete(
        &self,
        _request: &LlmRequest,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>> {
        let events = match self.generation {
            Generation::FailsUpFront => {
                return Err(Error::Generation("deployment not found".into()));
            }
            Generation::Streams => vec![
                Ok(StreamEvent::TextDelta("```sql\nSELECT cu".into())),
                Ok(StreamEvent::TextDelta("stid FROM accounts\n```".into())),
                Ok(StreamEvent::MessageStop),
            ],
            Generation::BreaksMidway => vec![
                Ok(StreamEvent::TextDelta("Here is the query: ".into())),
                Err(Error::Generation("connection reset".into())),
            ],
        };
        Ok(Box::pin(futures::stream::iter(events)))
    }

    fn configured_model(&self) -> Option<&str> {
        Some("scripted-1")
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

struct ZeroEmbeddings;

#[async_trait]
impl EmbeddingProvider for ZeroEmbeddings {
    fn provider_id(&self) -> &str {
        "zero"
    }
    fn model(&self) -> &str {
        "zero"
    }
    async fn embed_query(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![0.0; 3])
    }
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

struct EmptySearch;

#[async_trait]
impl SimilaritySearch for EmptySearch {
    fn backend_id(&self) -> &str {
        "empty"
    }
    async fn match_tables(&self, _request: &TableSearchRequest) -> Result<Vec<TableMatch>> {
        Ok(vec![])
    }
    async fn match_queries(&self, _request: &QueryLogSearchRequest) -> Result<Vec<QueryLogMatch>> {
        Ok(vec![])
    }
}

#[async_trait]
impl CollectionCatalog for EmptySearch {
    async fn list_collections(&self) -> Result<Vec<Collection>> {
        Ok(vec![Collection {
            db_id: "bank".into(),
            name: "Bank".into(),
            description: None,
        }])
    }
}

fn orchestrator(generation: Generation) -> Arc<Orchestrator> {
    let model: Arc<dyn LlmProvider> = Arc::new(ScriptedModel { generation });
    let embeddings: Arc<dyn EmbeddingProvider> = Arc::new(ZeroEmbeddings);
    let search: Arc<dyn SimilaritySearch> = Arc::new(EmptySearch);
    let agent = |kind: AgentKind| {
        let tool: Arc<dyn sqlsage_agents::SearchTool> = match kind {
            AgentKind::Schema => Arc::new(SchemaSearchTool::new(
                embeddings.clone(),
                search.clone(),
                5,
            )),
            AgentKind::QueryLog => Arc::new(QueryLogSearchTool::new(
                embeddings.clone(),
                search.clone(),
                5,
            )),
        };
        RetrievalAgent::new(kind, model.clone(), tool, 256)
    };
    Arc::new(Orchestrator::new(
        agent(AgentKind::Schema),
        agent(AgentKind::QueryLog),
        model.clone(),
        512,
    ))
}

fn sandbox(dir: &tempfile::TempDir) -> (Arc<TargetDatabase>, Arc<SqlSandbox>) {
    let path = dir.path().join("target.db");
    let conn = rusqlite::Connection::open(&path).unwrap();
    conn.execute_batch(
        "CREATE TABLE accounts (customer_id INTEGER, balance REAL);
         INSERT INTO accounts VALUES (1, 10.5), (2, 20.0), (3, 7.25);",
    )
    .unwrap();
    drop(conn);

    let database = Arc::new(TargetDatabase::open_path(&path, &DatabaseConfig::default()).unwrap());
    let engine = Arc::new(SqliteEngine::new(database.clone()));
    let sandbox = SqlSandbox::from_config(engine, &AppConfig::default().sandbox);
    (database, Arc::new(sandbox))
}

fn state(generation: Generation) -> AppState {
    AppState::new(AppConfig::default())
        .with_orchestrator(orchestrator(generation))
        .with_catalog(Arc::new(EmptySearch))
}

async fn post(state: AppState, uri: &str, body: Value) -> (StatusCode, String) {
    let response = build_router(Arc::new(state))
        .oneshot(
            Request::post(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

fn question() -> Value {
    json!({
        "messages": [{"role": "user", "content": "Show customer ids"}],
        "selectedCollectionId": "bank"
    })
}

#[tokio::test]
async fn chat_streams_normalized_markdown() {
    let (status, body) = post(state(Generation::Streams), "/api/chat", question()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "```sql\nSELECT customer_id FROM accounts\n```");
}

#[tokio::test]
async fn chat_failure_before_streaming_is_bad_gateway() {
    let (status, body) = post(state(Generation::FailsUpFront), "/api/chat", question()).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    let body: Value = serde_json::from_str(&body).unwrap();
    assert!(body["error"].as_str().unwrap().contains("deployment not found"));
}

#[tokio::test]
async fn chat_failure_mid_stream_is_reported_in_band() {
    let (status, body) = post(state(Generation::BreaksMidway), "/api/chat", question()).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.starts_with("Here is the query: "));
    assert!(body.contains("**Error:**"));
    assert!(body.contains("connection reset"));
}

#[tokio::test]
async fn chat_rejects_turn_not_ending_with_user() {
    let (status, _) = post(
        state(Generation::Streams),
        "/api/chat",
        json!({"messages": [{"role": "assistant", "content": "hello"}]}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn ask_returns_content_sql_and_findings() {
    let (status, body) = post(state(Generation::Streams), "/api/ask", question()).await;
    assert_eq!(status, StatusCode::OK);

    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["sql"], json!(["SELECT customer_id FROM accounts"]));
    assert_eq!(
        body["findings"]["schema"]["synthesis_text"],
        "Nothing relevant was found."
    );
    assert!(body["findings"]["query_log"].is_object());
}

#[tokio::test]
async fn chat_without_assistant_is_unavailable() {
    let (status, _) = post(AppState::new(AppConfig::default()), "/api/chat", question()).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn execute_sql_requires_string_query() {
    let dir = tempfile::tempdir().unwrap();
    let (_, sandbox) = sandbox(&dir);

    for body in [json!({}), json!({"query": 42})] {
        let state = AppState::new(AppConfig::default()).with_sandbox(sandbox.clone());
        let (status, body) = post(state, "/api/execute-sql", body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let body: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(
            body,
            json!({"success": false, "error": "Query is required and must be a string"})
        );
    }
}

#[tokio::test]
async fn execute_sql_runs_select_with_row_cap() {
    let dir = tempfile::tempdir().unwrap();
    let (database, sandbox) = sandbox(&dir);
    let state = AppState::new(AppConfig::default())
        .with_sandbox(sandbox)
        .with_database(database);

    let (status, body) = post(
        state,
        "/api/execute-sql",
        json!({
            "query": "SELECT customer_id, balance FROM accounts ORDER BY customer_id",
            "options": {"maxRows": 2}
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["row_count"], 3);
    assert_eq!(
        body["data"],
        json!([
            {"customer_id": 1, "balance": 10.5},
            {"customer_id": 2, "balance": 20.0}
        ])
    );
    assert!(body["execution_time_ms"].is_u64());
}

#[tokio::test]
async fn execute_sql_rejection_is_still_ok_status() {
    let dir = tempfile::tempdir().unwrap();
    let (_, sandbox) = sandbox(&dir);
    let state = AppState::new(AppConfig::default()).with_sandbox(sandbox);

    let (status, body) = post(
        state,
        "/api/execute-sql",
        json!({"query": "DELETE FROM accounts"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Only SELECT, WITH statements are allowed");
    assert!(body.get("data").is_none());
}

#[tokio::test]
async fn collections_and_status_are_served() {
    let router = build_router(Arc::new(state(Generation::Streams)));

    let response = router
        .clone()
        .oneshot(Request::get("/api/collections").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["collections"][0]["db_id"], "bank");

    let response = router
        .oneshot(Request::get("/api/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "running");
    assert_eq!(body["assistant"]["provider"], "scripted");
    assert_eq!(body["assistant"]["model"], "scripted-1");
    assert!(body["database"].is_null());
}
