use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlsage_common::{CollectionSelector, Result};

use crate::matches::{QueryLogMatch, TableMatch};

/// Minimum similarity every search is issued with.
pub const SIMILARITY_THRESHOLD: f32 = 0.3;

/// Search over schema fragments (tables and their columns).
#[derive(Debug, Clone, Serialize)]
pub struct TableSearchRequest {
    pub embedding: Vec<f32>,
    pub similarity_threshold: f32,
    pub max_results: usize,
    pub collection: CollectionSelector,
    /// Restrict results to one table.
    pub table_name: Option<String>,
}

impl TableSearchRequest {
    pub fn new(embedding: Vec<f32>, max_results: usize, collection: CollectionSelector) -> Self {
        Self {
            embedding,
            similarity_threshold: SIMILARITY_THRESHOLD,
            max_results,
            collection,
            table_name: None,
        }
    }

    pub fn with_table_name(mut self, table_name: Option<String>) -> Self {
        self.table_name = table_name;
        self
    }
}

/// Search over historical queries.
#[derive(Debug, Clone, Serialize)]
pub struct QueryLogSearchRequest {
    pub embedding: Vec<f32>,
    pub similarity_threshold: f32,
    pub max_results: usize,
    pub collection: CollectionSelector,
    /// Restrict results to one statement kind (`SELECT`, ...).
    pub query_type: Option<String>,
    /// Restrict results to one semantic category.
    pub category: Option<String>,
}

impl QueryLogSearchRequest {
    pub fn new(embedding: Vec<f32>, max_results: usize, collection: CollectionSelector) -> Self {
        Self {
            embedding,
            similarity_threshold: SIMILARITY_THRESHOLD,
            max_results,
            collection,
            query_type: None,
            category: None,
        }
    }

    pub fn with_filters(mut self, query_type: Option<String>, category: Option<String>) -> Self {
        self.query_type = query_type;
        self.category = category;
        self
    }
}

/// The vector-search service both retrieval agents sit on.
///
/// Results come back in descending similarity order. Implementations return
/// `Err` on service failure; callers turn that into an in-band marker.
#[async_trait]
pub trait SimilaritySearch: Send + Sync {
    fn backend_id(&self) -> &str;

    async fn match_tables(&self, request: &TableSearchRequest) -> Result<Vec<TableMatch>>;

    async fn match_queries(&self, request: &QueryLogSearchRequest) -> Result<Vec<QueryLogMatch>>;
}

/// A selectable logical database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub db_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[async_trait]
pub trait CollectionCatalog: Send + Sync {
    /// All collections, ordered by name.
    async fn list_collections(&self) -> Result<Vec<Collection>>;
}
