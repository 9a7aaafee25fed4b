use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub llm: HashMap<String, LlmProviderConfig>,

    #[serde(default)]
    pub embeddings: HashMap<String, EmbeddingProviderConfig>,

    #[serde(default)]
    pub agents: AgentsConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub sandbox: SandboxConfig,

    #[serde(default)]
    pub log_level: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            llm: HashMap::new(),
            embeddings: HashMap::new(),
            agents: AgentsConfig::default(),
            search: SearchConfig::default(),
            database: DatabaseConfig::default(),
            sandbox: SandboxConfig::default(),
            log_level: Some("info".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            api_key: None,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

/// A named generative-model endpoint. `provider` is `openai` or `azure`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmProviderConfig {
    pub provider: String,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    /// Azure OpenAI `api-version` query parameter.
    pub api_version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingProviderConfig {
    pub provider: String,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub api_version: Option<String>,
}

/// Which configured endpoints the retrieval agents and the generation step use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentsConfig {
    /// Key into `llm` for the schema and query-log agents.
    #[serde(default)]
    pub retrieval_provider: Option<String>,

    /// Key into `llm` for the SQL generation step. Falls back to `retrieval_provider`.
    #[serde(default)]
    pub generation_provider: Option<String>,

    /// Key into `embeddings`.
    #[serde(default)]
    pub embedding_provider: Option<String>,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Result limit used when the model omits one from its tool call.
    #[serde(default = "default_result_limit")]
    pub default_result_limit: usize,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            retrieval_provider: None,
            generation_provider: None,
            embedding_provider: None,
            max_tokens: default_max_tokens(),
            default_result_limit: default_result_limit(),
        }
    }
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_result_limit() -> usize {
    5
}

/// PostgREST-compatible endpoint exposing the `match_*_embeddings` procedures.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file queries are executed against. Opened read-only.
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_connections: default_max_connections(),
            idle_timeout_secs: default_idle_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

fn default_max_connections() -> u32 {
    10
}

fn default_idle_timeout_secs() -> u64 {
    20
}

fn default_connect_timeout_secs() -> u64 {
    10
}

/// Defaults applied to every sandboxed execution unless a call overrides them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_max_rows")]
    pub max_rows: usize,

    #[serde(default = "default_allowed_statements")]
    pub allowed_statements: Vec<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_rows: default_max_rows(),
            allowed_statements: default_allowed_statements(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_rows() -> usize {
    1000
}

fn default_allowed_statements() -> Vec<String> {
    vec!["SELECT".to_string(), "WITH".to_string()]
}
