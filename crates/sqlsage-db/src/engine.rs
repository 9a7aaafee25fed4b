use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, InterruptHandle};
use serde_json::Value;
use sqlsage_common::{Error, Result};
use tracing::{debug, warn};

use crate::pool::TargetDatabase;

/// One result row: column name to scalar, in select-list order.
pub type Row = serde_json::Map<String, Value>;

/// Executes one already-validated statement and returns every row the engine
/// produced. Row capping is the caller's job.
#[async_trait]
pub trait SqlEngine: Send + Sync {
    fn engine_id(&self) -> &str;

    async fn query(&self, sql: &str) -> Result<Vec<Row>>;
}

/// [`SqlEngine`] over the pooled SQLite target database.
///
/// Queries run on the blocking pool. If the returned future is dropped before
/// the query finishes (a lost timeout race), the statement is interrupted so
/// the connection goes back to the pool instead of running on unobserved.
pub struct SqliteEngine {
    database: Arc<TargetDatabase>,
}

impl SqliteEngine {
    pub fn new(database: Arc<TargetDatabase>) -> Self {
        Self { database }
    }

    pub fn database(&self) -> &Arc<TargetDatabase> {
        &self.database
    }
}

#[async_trait]
impl SqlEngine for SqliteEngine {
    fn engine_id(&self) -> &str {
        "sqlite"
    }

    async fn query(&self, sql: &str) -> Result<Vec<Row>> {
        let pool = self.database.pool().clone();
        let sql = sql.to_string();
        let guard = InterruptGuard::default();
        let slot = guard.slot.clone();

        let task = tokio::task::spawn_blocking(move || {
            let conn = pool
                .get()
                .map_err(|e| Error::Database(format!("failed to acquire connection: {e}")))?;
            if !arm(&slot, conn.get_interrupt_handle()) {
                return Err(Error::Database("query abandoned before it started".into()));
            }
            let result = run_query(&conn, &sql);
            disarm(&slot);
            result
        });

        let result = task
            .await
            .map_err(|e| Error::Database(format!("query task failed: {e}")))?;
        guard.finish();
        result
    }
}

#[derive(Default)]
struct InterruptState {
    handle: Option<InterruptHandle>,
    abandoned: bool,
}

type InterruptSlot = Arc<Mutex<InterruptState>>;

/// Register the running connection. Returns false if the caller already gave up.
fn arm(slot: &InterruptSlot, handle: InterruptHandle) -> bool {
    match slot.lock() {
        Ok(mut state) if !state.abandoned => {
            state.handle = Some(handle);
            true
        }
        Ok(_) => false,
        Err(_) => true,
    }
}

fn disarm(slot: &InterruptSlot) {
    if let Ok(mut state) = slot.lock() {
        state.handle = None;
    }
}

/// Interrupts the armed connection when dropped before `finish`.
#[derive(Default)]
struct InterruptGuard {
    slot: InterruptSlot,
    finished: bool,
}

impl InterruptGuard {
    fn finish(mut self) {
        self.finished = true;
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Ok(mut state) = self.slot.lock() {
            state.abandoned = true;
            if let Some(handle) = state.handle.take() {
                warn!("abandoning in-flight query, interrupting connection");
                handle.interrupt();
            }
        }
    }
}

fn run_query(conn: &Connection, sql: &str) -> Result<Vec<Row>> {
    let mut stmt = conn.prepare(sql).map_err(engine_error)?;
    let columns: Vec<String> = stmt
        .column_names()
        .into_iter()
        .map(str::to_string)
        .collect();

    let mut rows = stmt.query([]).map_err(engine_error)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().map_err(engine_error)? {
        let mut record = Row::new();
        for (i, name) in columns.iter().enumerate() {
            let value = row.get_ref(i).map_err(engine_error)?;
            record.insert(name.clone(), to_json(value));
        }
        out.push(record);
    }

    debug!("query produced {} rows", out.len());
    Ok(out)
}

fn engine_error(e: rusqlite::Error) -> Error {
    Error::Database(e.to_string())
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(format!("<blob {} bytes>", bytes.len())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlsage_config::DatabaseConfig;
    use std::path::Path;
    use std::time::{Duration, Instant};

    fn seeded_engine(dir: &Path, max_connections: u32) -> SqliteEngine {
        let path = dir.join("bank.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE accounts (customer_id INTEGER, name TEXT, balance REAL, photo BLOB);
             INSERT INTO accounts VALUES (1, 'Ada', 120.5, x'0102');
             INSERT INTO accounts VALUES (2, 'Grace', NULL, NULL);",
        )
        .unwrap();

        let config = DatabaseConfig {
            max_connections,
            connect_timeout_secs: 5,
            ..DatabaseConfig::default()
        };
        let db = TargetDatabase::open_path(&path, &config).unwrap();
        SqliteEngine::new(Arc::new(db))
    }

    #[tokio::test]
    async fn converts_rows_in_column_order() {
        let dir = tempfile::tempdir().unwrap();
        let engine = seeded_engine(dir.path(), 2);

        let rows = engine
            .query("SELECT name, customer_id, balance, photo FROM accounts ORDER BY customer_id")
            .await
            .unwrap();

        assert_eq!(rows.len(), 2);
        let columns: Vec<&String> = rows[0].keys().collect();
        assert_eq!(columns, ["name", "customer_id", "balance", "photo"]);
        assert_eq!(rows[0]["customer_id"], 1);
        assert_eq!(rows[0]["balance"], 120.5);
        assert_eq!(rows[0]["photo"], "<blob 2 bytes>");
        assert_eq!(rows[1]["balance"], Value::Null);
    }

    #[tokio::test]
    async fn engine_errors_pass_message_through() {
        let dir = tempfile::tempdir().unwrap();
        let engine = seeded_engine(dir.path(), 2);

        let err = engine.query("SELECT missing FROM accounts").await.unwrap_err();
        match err {
            Error::Database(message) => assert!(message.contains("no such column")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn dropped_query_is_interrupted_and_releases_its_connection() {
        let dir = tempfile::tempdir().unwrap();
        let engine = seeded_engine(dir.path(), 1);

        let endless = "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c) \
                       SELECT count(*) FROM c";
        let outcome = tokio::time::timeout(Duration::from_millis(50), engine.query(endless)).await;
        assert!(outcome.is_err(), "endless query should lose the race");

        // With a single pooled connection this only succeeds once the
        // abandoned statement has been interrupted.
        let start = Instant::now();
        let rows = engine.query("SELECT 1 AS one").await.unwrap();
        assert_eq!(rows[0]["one"], 1);
        assert!(start.elapsed() < Duration::from_secs(4));
    }
}
