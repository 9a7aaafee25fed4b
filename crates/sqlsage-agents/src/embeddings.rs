use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlsage_common::{Error, Result};

use crate::openai::ApiFlavor;

const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// Turns free text into the vectors the similarity search compares against.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn provider_id(&self) -> &str;
    fn model(&self) -> &str;
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;
    async fn health_check(&self) -> Result<bool>;
}

/// OpenAI / Azure OpenAI embeddings endpoint.
pub struct OpenAiEmbeddingProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    flavor: ApiFlavor,
}

impl OpenAiEmbeddingProvider {
    pub fn new(
        api_key: impl Into<String>,
        model: Option<String>,
        base_url: Option<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            flavor: ApiFlavor::OpenAi,
        }
    }

    pub fn azure(
        api_key: impl Into<String>,
        deployment: Option<String>,
        base_url: impl Into<String>,
        api_version: Option<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: deployment.unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
            base_url: base_url.into(),
            flavor: ApiFlavor::azure(api_version),
        }
    }

    fn endpoint(&self) -> String {
        self.flavor.endpoint(&self.base_url, &self.model, "embeddings")
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    fn provider_id(&self) -> &str {
        self.flavor.id()
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let id = self.flavor.id();
        let body = EmbedRequest {
            model: &self.model,
            input: [text.replace('\n', " ")],
        };

        let response = self
            .flavor
            .authorize(self.client.post(self.endpoint()), &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Search(format!("{id} embedding request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Search(format!(
                "{id} embedding request failed: status={status}, body={body}"
            )));
        }

        let payload: EmbedResponse = response
            .json()
            .await
            .map_err(|e| Error::Search(format!("failed to decode {id} embeddings: {e}")))?;

        payload.into_first()
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.embed_query("health check").await.is_ok())
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: [String; 1],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl EmbedResponse {
    fn into_first(self) -> Result<Vec<f32>> {
        self.data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| Error::Search("embedding response contained no vectors".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn parses_first_vector() {
        let payload: EmbedResponse = serde_json::from_str(
            r#"{"object":"list","data":[{"index":0,"embedding":[0.1,0.2,0.3]}],"model":"text-embedding-3-small"}"#,
        )
        .unwrap();
        assert_eq!(payload.into_first().unwrap(), vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn empty_payload_is_an_error() {
        let payload: EmbedResponse = serde_json::from_str(r#"{"data":[]}"#).unwrap();
        assert!(payload.into_first().is_err());
    }

    #[tokio::test]
    async fn azure_embeddings_use_deployment_path_and_api_key_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/openai/deployments/embed-small/embeddings"))
            .and(query_param("api-version", "2024-06-01"))
            .and(header("api-key", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"embedding": [0.5, 0.25]}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = OpenAiEmbeddingProvider::azure(
            "secret",
            Some("embed-small".into()),
            server.uri(),
            Some("2024-06-01".into()),
        );
        let vector = provider.embed_query("accounts by region").await.unwrap();
        assert_eq!(vector, vec![0.5, 0.25]);
    }

    #[tokio::test]
    async fn service_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let provider = OpenAiEmbeddingProvider::new("key", None, Some(server.uri()));
        let err = provider.embed_query("x").await.unwrap_err();
        assert!(err.to_string().contains("429"));
    }
}
