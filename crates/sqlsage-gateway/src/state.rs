use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlsage_agents::Orchestrator;
use sqlsage_config::AppConfig;
use sqlsage_db::TargetDatabase;
use sqlsage_sandbox::SqlSandbox;
use sqlsage_search::CollectionCatalog;

/// Shared application state accessible from all request handlers.
///
/// Every collaborator is optional so the gateway can start with a partial
/// configuration; routes whose collaborator is missing answer `503`.
pub struct AppState {
    pub config: AppConfig,
    pub orchestrator: Option<Arc<Orchestrator>>,
    pub sandbox: Option<Arc<SqlSandbox>>,
    pub catalog: Option<Arc<dyn CollectionCatalog>>,
    /// Kept so shutdown can drain the pool and `/api/status` can report it.
    pub database: Option<Arc<TargetDatabase>>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            orchestrator: None,
            sandbox: None,
            catalog: None,
            database: None,
            started_at: Utc::now(),
        }
    }

    pub fn with_orchestrator(mut self, orchestrator: Arc<Orchestrator>) -> Self {
        self.orchestrator = Some(orchestrator);
        self
    }

    pub fn with_sandbox(mut self, sandbox: Arc<SqlSandbox>) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn CollectionCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn with_database(mut self, database: Arc<TargetDatabase>) -> Self {
        self.database = Some(database);
        self
    }

    pub fn uptime_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }
}

pub type SharedState = Arc<AppState>;
