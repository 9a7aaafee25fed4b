use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use sqlsage_common::{Error, Result};
use sqlsage_config::SandboxConfig;
use sqlsage_db::{Row, SqlEngine};
use tracing::{debug, info, instrument, warn};

use crate::allowlist::StatementAllowlist;
use crate::validation::SqlValidator;

/// Effective limits for one execution.
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxOptions {
    pub timeout: Duration,
    /// `0` disables the cap.
    pub max_rows: usize,
    pub allowlist: StatementAllowlist,
}

impl SandboxOptions {
    pub fn from_config(config: &SandboxConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.timeout_ms),
            max_rows: config.max_rows,
            allowlist: StatementAllowlist::new(&config.allowed_statements),
        }
    }

    /// Apply per-call overrides on top of these defaults.
    pub fn merged(&self, overrides: Option<&SandboxOverrides>) -> Self {
        let Some(overrides) = overrides else {
            return self.clone();
        };
        Self {
            timeout: overrides
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(self.timeout),
            max_rows: overrides.max_rows.unwrap_or(self.max_rows),
            allowlist: overrides
                .allowed_statements
                .as_ref()
                .map(StatementAllowlist::new)
                .unwrap_or_else(|| self.allowlist.clone()),
        }
    }
}

impl Default for SandboxOptions {
    fn default() -> Self {
        Self::from_config(&SandboxConfig::default())
    }
}

/// Per-call options as they arrive on the wire. Both snake_case and the
/// camelCase names older clients send are accepted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SandboxOverrides {
    #[serde(default, alias = "timeout")]
    pub timeout_ms: Option<u64>,
    #[serde(default, alias = "maxRows")]
    pub max_rows: Option<usize>,
    #[serde(default, alias = "allowedStatements")]
    pub allowed_statements: Option<Vec<String>>,
}

/// Uniform outcome of a sandboxed execution, success or not.
#[derive(Debug, Clone, Serialize)]
pub struct SqlExecutionResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<Row>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Rows the engine produced, before the row cap was applied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<usize>,
    pub execution_time_ms: u64,
}

impl SqlExecutionResult {
    fn succeeded(mut rows: Vec<Row>, max_rows: usize, started: Instant) -> Self {
        let row_count = rows.len();
        if max_rows > 0 && row_count > max_rows {
            debug!("truncating {row_count} rows to {max_rows}");
            rows.truncate(max_rows);
        }
        Self {
            success: true,
            data: Some(rows),
            error: None,
            row_count: Some(row_count),
            execution_time_ms: elapsed_ms(started),
        }
    }

    fn failed(error: impl Into<String>, started: Instant) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            row_count: None,
            execution_time_ms: elapsed_ms(started),
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Validates and runs caller-supplied SQL under a read-only, single-statement,
/// time- and row-bounded policy. Never returns `Err`; every failure is a
/// [`SqlExecutionResult`] with `success: false`.
pub struct SqlSandbox {
    engine: Arc<dyn SqlEngine>,
    defaults: SandboxOptions,
}

impl SqlSandbox {
    pub fn new(engine: Arc<dyn SqlEngine>, defaults: SandboxOptions) -> Self {
        Self { engine, defaults }
    }

    pub fn from_config(engine: Arc<dyn SqlEngine>, config: &SandboxConfig) -> Self {
        Self::new(engine, SandboxOptions::from_config(config))
    }

    pub fn defaults(&self) -> &SandboxOptions {
        &self.defaults
    }

    pub fn engine_id(&self) -> &str {
        self.engine.engine_id()
    }

    #[instrument(skip(self, query, overrides), fields(engine = self.engine.engine_id(), len = query.len()))]
    pub async fn run(
        &self,
        query: &str,
        overrides: Option<&SandboxOverrides>,
    ) -> SqlExecutionResult {
        let started = Instant::now();
        let options = self.defaults.merged(overrides);

        if let Err(e) = SqlValidator::validate(query, &options.allowlist) {
            info!("statement rejected: {}", failure_message(&e));
            return SqlExecutionResult::failed(failure_message(&e), started);
        }

        match self.execute(query, &options).await {
            Ok(rows) => {
                let result = SqlExecutionResult::succeeded(rows, options.max_rows, started);
                info!(
                    "statement returned {} rows in {}ms",
                    result.row_count.unwrap_or_default(),
                    result.execution_time_ms
                );
                result
            }
            Err(e) => {
                warn!("statement failed: {e}");
                SqlExecutionResult::failed(failure_message(&e), started)
            }
        }
    }

    /// Race the engine against the deadline. Losing the race drops the engine
    /// future; engines that support it cancel the statement on drop.
    async fn execute(&self, query: &str, options: &SandboxOptions) -> Result<Vec<Row>> {
        let millis = options.timeout.as_millis();
        tokio::time::timeout(options.timeout, self.engine.query(query))
            .await
            .map_err(|_| Error::Timeout(format!("Query execution timed out after {millis}ms")))?
    }
}

/// Message surfaced to callers: engine and validation text passes through
/// without the error-kind prefix.
fn failure_message(error: &Error) -> String {
    match error {
        Error::Database(message) | Error::Validation(message) | Error::Timeout(message) => {
            message.clone()
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedEngine {
        rows: usize,
        calls: AtomicUsize,
    }

    impl FixedEngine {
        fn new(rows: usize) -> Self {
            Self {
                rows,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SqlEngine for FixedEngine {
        fn engine_id(&self) -> &str {
            "fixed"
        }

        async fn query(&self, _sql: &str) -> Result<Vec<Row>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok((0..self.rows)
                .map(|i| {
                    let mut row = Row::new();
                    row.insert("n".into(), json!(i));
                    row
                })
                .collect())
        }
    }

    struct HangingEngine;

    #[async_trait]
    impl SqlEngine for HangingEngine {
        fn engine_id(&self) -> &str {
            "hanging"
        }

        async fn query(&self, _sql: &str) -> Result<Vec<Row>> {
            std::future::pending().await
        }
    }

    struct FailingEngine;

    #[async_trait]
    impl SqlEngine for FailingEngine {
        fn engine_id(&self) -> &str {
            "failing"
        }

        async fn query(&self, _sql: &str) -> Result<Vec<Row>> {
            Err(Error::Database("no such table: ghosts".into()))
        }
    }

    fn sandbox(engine: Arc<dyn SqlEngine>) -> SqlSandbox {
        SqlSandbox::new(engine, SandboxOptions::default())
    }

    #[tokio::test]
    async fn select_runs_and_reports_rows() {
        let result = sandbox(Arc::new(FixedEngine::new(1))).run("SELECT 1", None).await;
        assert!(result.success);
        assert_eq!(result.row_count, Some(1));
        assert_eq!(result.data.map(|d| d.len()), Some(1));
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn rejected_statements_never_reach_the_engine() {
        let engine = Arc::new(FixedEngine::new(1));
        let sandbox = sandbox(engine.clone());

        for query in ["select 1; select 2", "UPDATE t SET x=1", "SELECT * FROM t -- drop", ""] {
            let result = sandbox.run(query, None).await;
            assert!(!result.success, "{query:?} should be rejected");
            assert!(result.data.is_none());
            assert!(result.row_count.is_none());
        }
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn row_cap_truncates_data_but_not_row_count() {
        let overrides = SandboxOverrides {
            max_rows: Some(3),
            ..SandboxOverrides::default()
        };
        let result = sandbox(Arc::new(FixedEngine::new(5)))
            .run("SELECT n FROM t", Some(&overrides))
            .await;
        assert!(result.success);
        assert_eq!(result.data.map(|d| d.len()), Some(3));
        assert_eq!(result.row_count, Some(5));
    }

    #[tokio::test]
    async fn zero_max_rows_disables_the_cap() {
        let overrides = SandboxOverrides {
            max_rows: Some(0),
            ..SandboxOverrides::default()
        };
        let result = sandbox(Arc::new(FixedEngine::new(5)))
            .run("SELECT n FROM t", Some(&overrides))
            .await;
        assert!(result.success);
        assert_eq!(result.data.map(|d| d.len()), Some(5));
        assert_eq!(result.row_count, Some(5));
    }

    #[tokio::test]
    async fn slow_engine_times_out_with_bound_in_message() {
        let overrides = SandboxOverrides {
            timeout_ms: Some(50),
            ..SandboxOverrides::default()
        };
        let started = Instant::now();
        let result = sandbox(Arc::new(HangingEngine))
            .run("SELECT 1", Some(&overrides))
            .await;

        assert!(!result.success);
        assert_eq!(
            result.error.as_deref(),
            Some("Query execution timed out after 50ms")
        );
        assert!(result.execution_time_ms >= 50);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn engine_error_message_passes_through() {
        let result = sandbox(Arc::new(FailingEngine)).run("SELECT * FROM ghosts", None).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("no such table: ghosts"));
    }

    #[test]
    fn overrides_accept_camel_case_aliases() {
        let overrides: SandboxOverrides = serde_json::from_value(json!({
            "timeout": 500,
            "maxRows": 7,
            "allowedStatements": ["select"]
        }))
        .unwrap();
        let merged = SandboxOptions::default().merged(Some(&overrides));
        assert_eq!(merged.timeout, Duration::from_millis(500));
        assert_eq!(merged.max_rows, 7);
        assert_eq!(merged.allowlist.keywords(), ["SELECT"]);
    }

    #[test]
    fn missing_overrides_keep_defaults() {
        let defaults = SandboxOptions::default();
        let merged = defaults.merged(Some(&SandboxOverrides::default()));
        assert_eq!(merged, defaults);
        assert_eq!(merged.timeout, Duration::from_millis(30_000));
        assert_eq!(merged.max_rows, 1000);
    }

    #[test]
    fn failure_result_omits_data_fields_on_the_wire() {
        let result = SqlExecutionResult::failed("nope", Instant::now());
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["error"], "nope");
        assert!(value.get("data").is_none());
        assert!(value.get("row_count").is_none());
        assert!(value.get("execution_time_ms").is_some());
    }
}
