use std::path::{Path, PathBuf};
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::OpenFlags;
use serde::Serialize;
use sqlsage_common::{Error, Result};
use sqlsage_config::DatabaseConfig;
use tracing::info;

/// Process-wide connection pool for the database user queries run against.
///
/// Built once at startup and shared by every sandbox call. Connections are
/// opened read-only, so a statement that slips past validation still cannot
/// write.
pub struct TargetDatabase {
    pool: Pool<SqliteConnectionManager>,
    path: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub path: String,
    pub max_connections: u32,
    pub connections: u32,
    pub idle_connections: u32,
}

impl TargetDatabase {
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        let path = config
            .path
            .clone()
            .ok_or_else(|| Error::Config("database.path is not set".into()))?;
        Self::open_path(&path, config)
    }

    pub fn open_path(path: &Path, config: &DatabaseConfig) -> Result<Self> {
        info!(
            "opening target database at {} (max_connections={})",
            path.display(),
            config.max_connections
        );

        let manager = SqliteConnectionManager::file(path).with_flags(
            OpenFlags::SQLITE_OPEN_READ_ONLY
                | OpenFlags::SQLITE_OPEN_NO_MUTEX
                | OpenFlags::SQLITE_OPEN_URI,
        );

        let pool = Pool::builder()
            .max_size(config.max_connections.max(1))
            .min_idle(Some(1))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
            .connection_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build(manager)
            .map_err(|e| {
                Error::Database(format!(
                    "failed to open target database {}: {e}",
                    path.display()
                ))
            })?;

        Ok(Self {
            pool,
            path: path.to_path_buf(),
        })
    }

    pub fn pool(&self) -> &Pool<SqliteConnectionManager> {
        &self.pool
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.pool.state();
        PoolStatus {
            path: self.path.display().to_string(),
            max_connections: self.pool.max_size(),
            connections: state.connections,
            idle_connections: state.idle_connections,
        }
    }

    /// Log the pool state before the last handle is dropped at shutdown.
    /// Idle connections close when the pool is dropped; checked-out ones close
    /// as their queries return.
    pub fn drain(&self) {
        let status = self.status();
        info!(
            "draining target database pool: {} connections ({} idle)",
            status.connections, status.idle_connections
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn seeded_db(dir: &Path) -> PathBuf {
        let path = dir.join("target.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch("CREATE TABLE accounts (customer_id INTEGER, name TEXT);")
            .unwrap();
        path
    }

    #[test]
    fn open_requires_a_path() {
        let err = TargetDatabase::open(&DatabaseConfig::default())
            .err()
            .expect("missing path should fail");
        assert!(err.to_string().contains("database.path"));
    }

    #[test]
    fn opens_existing_file_with_configured_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = seeded_db(dir.path());

        let config = DatabaseConfig {
            path: Some(path.clone()),
            max_connections: 3,
            ..DatabaseConfig::default()
        };
        let db = TargetDatabase::open(&config).unwrap();
        let status = db.status();
        assert_eq!(status.max_connections, 3);
        assert!(status.connections >= 1);
        assert_eq!(db.path(), path.as_path());
    }

    #[test]
    fn connections_are_read_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = seeded_db(dir.path());
        let db = TargetDatabase::open_path(&path, &DatabaseConfig::default()).unwrap();

        let conn = db.pool().get().unwrap();
        let err = conn
            .execute("INSERT INTO accounts VALUES (1, 'x')", [])
            .unwrap_err();
        assert!(err.to_string().to_lowercase().contains("readonly"));
    }

    #[test]
    fn missing_file_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            connect_timeout_secs: 1,
            ..DatabaseConfig::default()
        };
        assert!(TargetDatabase::open_path(&dir.path().join("absent.db"), &config).is_err());
    }
}
