use std::collections::HashMap;
use std::sync::Arc;

use sqlsage_agents::{
    AgentKind, EmbeddingProvider, LlmProvider, OpenAiEmbeddingProvider, OpenAiProvider,
    Orchestrator, QueryLogSearchTool, RetrievalAgent, SchemaSearchTool,
};
use sqlsage_config::{AppConfig, EmbeddingProviderConfig, LlmProviderConfig};
use sqlsage_db::{SqliteEngine, TargetDatabase};
use sqlsage_sandbox::SqlSandbox;
use sqlsage_search::{RpcSearchClient, SimilaritySearch};
use tracing::{info, warn};

use crate::state::AppState;

/// Resolve a secret: non-empty config value first, then the environment.
fn resolve_api_key(config_key: Option<&str>, env_var: &str) -> Option<String> {
    if let Some(key) = config_key
        && !key.is_empty()
    {
        return Some(key.to_string());
    }

    std::env::var(env_var).ok().filter(|v| !v.is_empty())
}

/// Azure endpoints default to `https://{AZURE_RESOURCE_NAME}.openai.azure.com`.
fn resolve_azure_base_url(config_url: Option<&str>) -> Option<String> {
    if let Some(url) = config_url
        && !url.is_empty()
    {
        return Some(url.to_string());
    }

    std::env::var("AZURE_RESOURCE_NAME")
        .ok()
        .filter(|v| !v.is_empty())
        .map(|name| format!("https://{name}.openai.azure.com"))
}

/// Pick the entry named by `wanted`, or the only entry when nothing is named.
fn select<'a, T>(
    entries: &'a HashMap<String, T>,
    wanted: Option<&str>,
    what: &str,
) -> Option<(&'a str, &'a T)> {
    match wanted {
        Some(name) => match entries.get_key_value(name) {
            Some((k, v)) => Some((k.as_str(), v)),
            None => {
                warn!("{what} {name:?} is not defined in config");
                None
            }
        },
        None if entries.len() == 1 => entries.iter().next().map(|(k, v)| (k.as_str(), v)),
        None => {
            if !entries.is_empty() {
                warn!("several {what}s are configured but none is selected");
            }
            None
        }
    }
}

pub fn build_llm_provider(name: &str, config: &LlmProviderConfig) -> Option<Arc<dyn LlmProvider>> {
    match config.provider.as_str() {
        "openai" => {
            let Some(key) = resolve_api_key(config.api_key.as_deref(), "OPENAI_API_KEY") else {
                warn!(
                    "skipping openai provider {name}: no API key (set api_key in config or OPENAI_API_KEY env var)"
                );
                return None;
            };
            info!("configured openai provider: {name}");
            Some(Arc::new(OpenAiProvider::new(
                key,
                config.model.clone(),
                config.base_url.clone(),
            )))
        }
        "azure" => {
            let Some(key) = resolve_api_key(config.api_key.as_deref(), "AZURE_API_KEY") else {
                warn!(
                    "skipping azure provider {name}: no API key (set api_key in config or AZURE_API_KEY env var)"
                );
                return None;
            };
            let Some(base_url) = resolve_azure_base_url(config.base_url.as_deref()) else {
                warn!(
                    "skipping azure provider {name}: no endpoint (set base_url in config or AZURE_RESOURCE_NAME env var)"
                );
                return None;
            };
            info!("configured azure provider: {name}");
            Some(Arc::new(OpenAiProvider::azure(
                key,
                config.model.clone(),
                base_url,
                config.api_version.clone(),
            )))
        }
        other => {
            warn!("unknown LLM provider type: {other}, skipping {name}");
            None
        }
    }
}

pub fn build_embedding_provider(
    name: &str,
    config: &EmbeddingProviderConfig,
) -> Option<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "openai" => {
            let Some(key) = resolve_api_key(config.api_key.as_deref(), "OPENAI_API_KEY") else {
                warn!("skipping openai embedding provider {name}: no API key");
                return None;
            };
            info!("configured openai embedding provider: {name}");
            Some(Arc::new(OpenAiEmbeddingProvider::new(
                key,
                config.model.clone(),
                config.base_url.clone(),
            )))
        }
        "azure" => {
            let key = resolve_api_key(config.api_key.as_deref(), "AZURE_API_KEY");
            let base_url = resolve_azure_base_url(config.base_url.as_deref());
            let (Some(key), Some(base_url)) = (key, base_url) else {
                warn!("skipping azure embedding provider {name}: missing API key or endpoint");
                return None;
            };
            info!("configured azure embedding provider: {name}");
            Some(Arc::new(OpenAiEmbeddingProvider::azure(
                key,
                config.model.clone(),
                base_url,
                config.api_version.clone(),
            )))
        }
        other => {
            warn!("unknown embedding provider type: {other}, skipping {name}");
            None
        }
    }
}

/// PostgREST client for similarity search and the collection catalog.
/// Falls back to `SUPABASE_URL` / `SUPABASE_KEY`.
pub fn build_search_client(config: &AppConfig) -> Option<Arc<RpcSearchClient>> {
    let url = config
        .search
        .url
        .clone()
        .filter(|u| !u.is_empty())
        .or_else(|| std::env::var("SUPABASE_URL").ok().filter(|v| !v.is_empty()))?;
    let key = resolve_api_key(config.search.api_key.as_deref(), "SUPABASE_KEY");

    match RpcSearchClient::new(&url, key) {
        Ok(client) => {
            info!("similarity search at {url}");
            Some(Arc::new(client))
        }
        Err(e) => {
            warn!("search service disabled: {e}");
            None
        }
    }
}

/// Wire both retrieval agents and the generator from config.
pub fn build_orchestrator(
    config: &AppConfig,
    search: Arc<dyn SimilaritySearch>,
) -> Option<Orchestrator> {
    let agents = &config.agents;

    let (retrieval_name, retrieval_config) =
        select(&config.llm, agents.retrieval_provider.as_deref(), "llm provider")?;
    let retrieval = build_llm_provider(retrieval_name, retrieval_config)?;

    let generator = match agents.generation_provider.as_deref() {
        Some(name) if name != retrieval_name => {
            let (name, generation_config) = select(&config.llm, Some(name), "llm provider")?;
            build_llm_provider(name, generation_config)?
        }
        _ => retrieval.clone(),
    };

    let (embed_name, embed_config) = select(
        &config.embeddings,
        agents.embedding_provider.as_deref(),
        "embedding provider",
    )?;
    let embeddings = build_embedding_provider(embed_name, embed_config)?;

    let limit = agents.default_result_limit;
    let schema_agent = RetrievalAgent::new(
        AgentKind::Schema,
        retrieval.clone(),
        Arc::new(SchemaSearchTool::new(embeddings.clone(), search.clone(), limit)),
        agents.max_tokens,
    );
    let query_log_agent = RetrievalAgent::new(
        AgentKind::QueryLog,
        retrieval,
        Arc::new(QueryLogSearchTool::new(embeddings, search, limit)),
        agents.max_tokens,
    );

    Some(Orchestrator::new(
        schema_agent,
        query_log_agent,
        generator,
        agents.max_tokens,
    ))
}

/// Open the target database pool and put a sandbox in front of it.
pub fn build_sandbox(config: &AppConfig) -> Option<(Arc<TargetDatabase>, SqlSandbox)> {
    config.database.path.as_ref()?;

    match TargetDatabase::open(&config.database) {
        Ok(database) => {
            let database = Arc::new(database);
            let engine = Arc::new(SqliteEngine::new(database.clone()));
            Some((database, SqlSandbox::from_config(engine, &config.sandbox)))
        }
        Err(e) => {
            warn!("sql execution disabled: {e}");
            None
        }
    }
}

/// Build the full gateway state. Missing pieces are logged and left out.
pub fn build_app_state(config: AppConfig) -> AppState {
    let search = build_search_client(&config);
    let orchestrator = match &search {
        Some(search) => build_orchestrator(&config, search.clone()),
        None => {
            warn!("no search service configured (search.url or SUPABASE_URL); chat is disabled");
            None
        }
    };
    let sandbox = build_sandbox(&config);

    let mut state = AppState::new(config);
    if let Some(orchestrator) = orchestrator {
        state = state.with_orchestrator(Arc::new(orchestrator));
    } else {
        warn!("SQL assistant not available; check llm, embeddings and agents config");
    }
    if let Some(search) = search {
        state = state.with_catalog(search);
    }
    if let Some((database, sandbox)) = sandbox {
        state = state.with_database(database).with_sandbox(Arc::new(sandbox));
    } else {
        info!("no target database configured (database.path); execute-sql is disabled");
    }
    state
}
