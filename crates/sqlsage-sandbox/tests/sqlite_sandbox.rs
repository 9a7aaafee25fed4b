use std::path::Path;
use std::sync::Arc;

use rusqlite::Connection;
use sqlsage_config::{DatabaseConfig, SandboxConfig};
use sqlsage_db::{SqliteEngine, TargetDatabase};
use sqlsage_sandbox::{SandboxOverrides, SqlSandbox};

fn bank_sandbox(dir: &Path) -> SqlSandbox {
    let path = dir.join("bank.db");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(
        "CREATE TABLE accounts (customer_id INTEGER, name TEXT, balance REAL);
         INSERT INTO accounts VALUES (1, 'Ada', 120.5);
         INSERT INTO accounts VALUES (2, 'Grace', 80.0);
         INSERT INTO accounts VALUES (3, 'Linus', 15.25);",
    )
    .unwrap();
    drop(conn);

    let db = TargetDatabase::open_path(&path, &DatabaseConfig::default()).unwrap();
    let engine = Arc::new(SqliteEngine::new(Arc::new(db)));
    SqlSandbox::from_config(engine, &SandboxConfig::default())
}

#[tokio::test]
async fn runs_select_against_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let sandbox = bank_sandbox(dir.path());

    let result = sandbox
        .run("SELECT name, balance FROM accounts ORDER BY customer_id", None)
        .await;
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.row_count, Some(3));
    let data = result.data.unwrap();
    assert_eq!(data[0]["name"], "Ada");
    assert_eq!(data[2]["balance"], 15.25);
}

#[tokio::test]
async fn caps_rows_from_real_engine() {
    let dir = tempfile::tempdir().unwrap();
    let sandbox = bank_sandbox(dir.path());
    let overrides: SandboxOverrides = serde_json::from_str(r#"{"maxRows": 2}"#).unwrap();

    let result = sandbox
        .run("SELECT * FROM accounts", Some(&overrides))
        .await;
    assert!(result.success);
    assert_eq!(result.data.unwrap().len(), 2);
    assert_eq!(result.row_count, Some(3));
}

#[tokio::test]
async fn endless_query_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let sandbox = bank_sandbox(dir.path());
    let overrides: SandboxOverrides = serde_json::from_str(r#"{"timeout_ms": 100}"#).unwrap();

    let result = sandbox
        .run(
            "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c) SELECT count(*) FROM c",
            Some(&overrides),
        )
        .await;
    assert!(!result.success);
    assert_eq!(
        result.error.as_deref(),
        Some("Query execution timed out after 100ms")
    );

    // The interrupted statement hands its connection back.
    let follow_up = sandbox.run("SELECT count(*) AS n FROM accounts", None).await;
    assert!(follow_up.success);
}

#[tokio::test]
async fn engine_errors_surface_as_failures() {
    let dir = tempfile::tempdir().unwrap();
    let sandbox = bank_sandbox(dir.path());

    let result = sandbox.run("SELECT * FROM ghosts", None).await;
    assert!(!result.success);
    assert!(result.error.unwrap().contains("no such table"));
}
