use async_trait::async_trait;
use serde::Serialize;
use sqlsage_common::{Error, Result};
use tracing::{debug, instrument};
use url::Url;

use crate::matches::{QueryLogMatch, TableEmbeddingRow, TableMatch, group_table_rows};
use crate::search::{
    Collection, CollectionCatalog, QueryLogSearchRequest, SimilaritySearch, TableSearchRequest,
};

const MATCH_TABLES_FN: &str = "match_table_embeddings";
const MATCH_QUERIES_FN: &str = "match_query_embeddings";

/// Client for a PostgREST (Supabase) endpoint exposing the two
/// `match_*_embeddings` stored procedures and the `collections` relation.
pub struct RpcSearchClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl RpcSearchClient {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self> {
        let parsed = Url::parse(base_url)
            .map_err(|e| Error::Config(format!("invalid search url '{base_url}': {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "search url must be http(s), got '{}'",
                parsed.scheme()
            )));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn rpc_endpoint(&self, function: &str) -> String {
        format!("{}/rest/v1/rpc/{}", self.base_url, function)
    }

    fn collections_endpoint(&self) -> String {
        format!(
            "{}/rest/v1/collections?select=db_id,name,description&order=name",
            self.base_url
        )
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("apikey", key).bearer_auth(key),
            None => request,
        }
    }

    async fn call<B, T>(&self, function: &str, body: &B) -> Result<Vec<T>>
    where
        B: Serialize + ?Sized,
        T: serde::de::DeserializeOwned,
    {
        let response = self
            .authorize(self.client.post(self.rpc_endpoint(function)))
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Search(format!("{function} request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Search(format!(
                "{function} failed: status={status}, body={body}"
            )));
        }

        // PostgREST answers `null` when the function returns no set.
        let rows: Option<Vec<T>> = response
            .json()
            .await
            .map_err(|e| Error::Search(format!("failed to decode {function} rows: {e}")))?;
        Ok(rows.unwrap_or_default())
    }
}

#[derive(Debug, Serialize)]
struct MatchTablesArgs<'a> {
    query_embedding: &'a [f32],
    match_threshold: f32,
    match_count: usize,
    filter_db_id: Option<&'a str>,
    filter_table_name: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct MatchQueriesArgs<'a> {
    query_embedding: &'a [f32],
    match_threshold: f32,
    match_count: usize,
    filter_db_id: Option<&'a str>,
    filter_query_type: Option<&'a str>,
    filter_category: Option<&'a str>,
}

#[async_trait]
impl SimilaritySearch for RpcSearchClient {
    fn backend_id(&self) -> &str {
        "postgrest"
    }

    #[instrument(skip(self, request), fields(collection = %request.collection, limit = request.max_results))]
    async fn match_tables(&self, request: &TableSearchRequest) -> Result<Vec<TableMatch>> {
        let args = MatchTablesArgs {
            query_embedding: &request.embedding,
            match_threshold: request.similarity_threshold,
            match_count: request.max_results,
            filter_db_id: request.collection.filter(),
            filter_table_name: request.table_name.as_deref(),
        };
        let rows: Vec<TableEmbeddingRow> = self.call(MATCH_TABLES_FN, &args).await?;
        debug!("{} table rows matched", rows.len());
        Ok(group_table_rows(rows))
    }

    #[instrument(skip(self, request), fields(collection = %request.collection, limit = request.max_results))]
    async fn match_queries(&self, request: &QueryLogSearchRequest) -> Result<Vec<QueryLogMatch>> {
        let args = MatchQueriesArgs {
            query_embedding: &request.embedding,
            match_threshold: request.similarity_threshold,
            match_count: request.max_results,
            filter_db_id: request.collection.filter(),
            filter_query_type: request.query_type.as_deref(),
            filter_category: request.category.as_deref(),
        };
        let rows: Vec<QueryLogMatch> = self.call(MATCH_QUERIES_FN, &args).await?;
        debug!("{} query rows matched", rows.len());
        Ok(rows.into_iter().map(QueryLogMatch::clamped).collect())
    }
}

#[async_trait]
impl CollectionCatalog for RpcSearchClient {
    async fn list_collections(&self) -> Result<Vec<Collection>> {
        let response = self
            .authorize(self.client.get(self.collections_endpoint()))
            .send()
            .await
            .map_err(|e| Error::Search(format!("collections request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Search(format!(
                "collections request failed: status={status}, body={body}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| Error::Search(format!("failed to decode collections: {e}")))
    }
}
