use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use sqlsage_common::CollectionSelector;
use sqlsage_search::{SimilarityMatch, SimilaritySearch, TableMatch, TableSearchRequest};
use tracing::{debug, warn};

use super::{SearchOutcome, SearchTool, parse_limit, retain_collection, string_arg};
use crate::embeddings::EmbeddingProvider;

const FAILURE_MESSAGE: &str = "Failed to search for table embeddings";

/// `find_relevant_tables`: embedding search over table and column descriptions.
pub struct SchemaSearchTool {
    embeddings: Arc<dyn EmbeddingProvider>,
    search: Arc<dyn SimilaritySearch>,
    default_limit: usize,
}

impl SchemaSearchTool {
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
impl SearchTool for SchemaSearchTool {
    fn name(&self) -> &str {
        "find_relevant_tables"
    }

    fn description(&self) -> &str {
        "Search for relevant database tables using embedding similarity"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query to find relevant tables"
                },
                "limit": {
                    "type": "number",
                    "description": "Maximum number of tables to return",
                    "default": self.default_limit
                },
                "table_name": {
                    "type": "string",
                    "description": "Optional specific table name to filter results"
                }
            },
            "required": ["query"]
        })
    }

    fn subject(&self) -> &str {
        "tables"
    }

    async fn execute(&self, input: Value, collection: &CollectionSelector) -> SearchOutcome {
        let query = string_arg(&input, "query").unwrap_or_default();
        let limit = parse_limit(input.get("limit"), self.default_limit);
        let table_name = string_arg(&input, "table_name");
        debug!("schema search: query={query:?} limit={limit} table={table_name:?}");

        let embedding = match self.embeddings.embed_query(&query).await {
            Ok(v) => v,
            Err(e) => {
                warn!("schema search embedding failed: {e}");
                return SearchOutcome::failed(query, FAILURE_MESSAGE, e.to_string());
            }
        };

        let request = TableSearchRequest::new(embedding, limit, collection.clone())
            .with_table_name(table_name);
        let tables = match self.search.match_tables(&request).await {
            Ok(tables) => tables,
            Err(e) => {
                warn!("schema search failed: {e}");
                return SearchOutcome::failed(query, FAILURE_MESSAGE, e.to_string());
            }
        };

        let matches = retain_collection(
            tables.into_iter().map(SimilarityMatch::Table).collect(),
            collection,
        );
        let tables: Vec<&TableMatch> = matches
            .iter()
            .filter_map(|m| match m {
                SimilarityMatch::Table(t) => Some(t),
                SimilarityMatch::QueryLog(_) => None,
            })
            .collect();
        // One hit per matched column; a table with no column rows still counts once.
        let results_count: usize = tables.iter().map(|t| t.columns.len().max(1)).sum();

        let payload = json!({
            "tables": tables,
            "searchQuery": query,
            "resultsCount": results_count,
            "selectedCollection": collection.as_str(),
        });

        SearchOutcome {
            search_query: query,
            matches,
            error: None,
            payload,
        }
    }
}
