pub mod query_log_search;
pub mod schema_search;

pub use query_log_search::QueryLogSearchTool;
pub use schema_search::SchemaSearchTool;

use async_trait::async_trait;
use serde_json::{Value, json};
use sqlsage_common::CollectionSelector;
use sqlsage_search::SimilarityMatch;
use tracing::warn;

use crate::providers::ToolDefinition;

/// The single search a retrieval agent is allowed to run per turn.
#[async_trait]
pub trait SearchTool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn input_schema(&self) -> Value;

    /// Plural noun for what this tool finds ("tables", "queries").
    fn subject(&self) -> &str;

    /// Run the search. Failures are reported inside the outcome, never as `Err`.
    async fn execute(&self, input: Value, collection: &CollectionSelector) -> SearchOutcome;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

/// Typed matches plus the JSON payload handed back to the model.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub search_query: String,
    pub matches: Vec<SimilarityMatch>,
    pub error: Option<String>,
    pub payload: Value,
}

impl SearchOutcome {
    /// Failure outcome. The model only sees the fixed `public_message`; the
    /// detailed cause stays in `error` for logs and the finding.
    pub fn failed(search_query: impl Into<String>, public_message: &str, cause: String) -> Self {
        Self {
            search_query: search_query.into(),
            matches: Vec::new(),
            error: Some(cause),
            payload: json!({ "error": public_message, "results": [] }),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Tool-result text for the next model round.
    pub fn content(&self) -> String {
        self.payload.to_string()
    }
}

/// Keep only matches the selector admits.
pub(crate) fn retain_collection(
    matches: Vec<SimilarityMatch>,
    collection: &CollectionSelector,
) -> Vec<SimilarityMatch> {
    let before = matches.len();
    let kept: Vec<SimilarityMatch> = matches
        .into_iter()
        .filter(|m| collection.admits(m.collection_id()))
        .collect();
    if kept.len() < before {
        warn!(
            "dropped {} matches outside collection {collection}",
            before - kept.len()
        );
    }
    kept
}

/// Result limit as sent by the model: integer, float, numeric string, or absent.
pub(crate) fn parse_limit(value: Option<&Value>, default: usize) -> usize {
    let limit = match value {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    };
    match limit {
        Some(0) | None => default,
        Some(n) => usize::try_from(n).unwrap_or(default),
    }
}

/// Optional string argument; empty strings from the model mean "no filter".
pub(crate) fn string_arg(input: &Value, key: &str) -> Option<String> {
    input
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
