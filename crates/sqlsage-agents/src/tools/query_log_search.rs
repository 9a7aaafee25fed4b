use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use sqlsage_common::CollectionSelector;
use sqlsage_search::{QueryLogMatch, QueryLogSearchRequest, SimilarityMatch, SimilaritySearch};
use tracing::{debug, warn};

use super::{SearchOutcome, SearchTool, parse_limit, retain_collection, string_arg};
use crate::embeddings::EmbeddingProvider;

const FAILURE_MESSAGE: &str = "Failed to search for query embeddings";

/// `find_relevant_queries`: embedding search over historical query logs.
pub struct QueryLogSearchTool {
    embeddings: Arc<dyn EmbeddingProvider>,
    search: Arc<dyn SimilaritySearch>,
    default_limit: usize,
}

impl QueryLogSearchTool {
    pub fn new(
        embeddings: Arc<dyn EmbeddingProvider>,
        search: Arc<dyn SimilaritySearch>,
        default_limit: usize,
    ) -> Self {
        Self {
            embeddings,
            search,
            default_limit,
        }
    }
}

#[async_trait]
impl SearchTool for QueryLogSearchTool {
    fn name(&self) -> &str {
        "find_relevant_queries"
    }

    fn description(&self) -> &str {
        "Search for relevant SQL queries from query logs using embedding similarity"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query to find relevant SQL queries"
                },
                "limit": {
                    "type": "number",
                    "description": "Maximum number of queries to return",
                    "default": self.default_limit
                },
                "query_type": {
                    "type": "string",
                    "description": "Optional filter by query type (e.g., SELECT, INSERT, UPDATE, DELETE)"
                },
                "category": {
                    "type": "string",
                    "description": "Optional filter by semantic category"
                }
            },
            "required": ["query"]
        })
    }

    fn subject(&self) -> &str {
        "queries"
    }

    async fn execute(&self, input: Value, collection: &CollectionSelector) -> SearchOutcome {
        let query = string_arg(&input, "query").unwrap_or_default();
        let limit = parse_limit(input.get("limit"), self.default_limit);
        let query_type = string_arg(&input, "query_type");
        let category = string_arg(&input, "category");
        debug!("query-log search: query={query:?} limit={limit} type={query_type:?} category={category:?}");

        let embedding = match self.embeddings.embed_query(&query).await {
            Ok(v) => v,
            Err(e) => {
                warn!("query-log search embedding failed: {e}");
                return SearchOutcome::failed(query, FAILURE_MESSAGE, e.to_string());
            }
        };

        let request = QueryLogSearchRequest::new(embedding, limit, collection.clone())
            .with_filters(query_type.clone(), category.clone());
        let rows = match self.search.match_queries(&request).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!("query-log search failed: {e}");
                return SearchOutcome::failed(query, FAILURE_MESSAGE, e.to_string());
            }
        };

        let matches = retain_collection(
            rows.into_iter().map(SimilarityMatch::QueryLog).collect(),
            collection,
        );
        let queries: Vec<&QueryLogMatch> = matches
            .iter()
            .filter_map(|m| match m {
                SimilarityMatch::QueryLog(q) => Some(q),
                SimilarityMatch::Table(_) => None,
            })
            .collect();

        let payload = json!({
            "queries": queries,
            "searchQuery": query,
            "resultsCount": queries.len(),
            "selectedCollection": collection.as_str(),
            "filters": {
                "query_type": query_type.as_deref().unwrap_or("all"),
                "category": category.as_deref().unwrap_or("all"),
            },
        });

        SearchOutcome {
            search_query: query,
            matches,
            error: None,
            payload,
        }
    }
}
