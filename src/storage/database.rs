// HF Download Suite - Model Repository Download Orchestrator
// Copyright (C) 2025 HF Suite Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Database connection and management
//!
//! Single-file SQLite store behind a connection pool:
//! - WAL mode for concurrent readers alongside the single writer
//! - Foreign keys enabled
//! - Normal synchronous mode (balance safety/speed)
//! - 30 s busy timeout so concurrent callers queue instead of erroring
//!
//! A database file that exists but cannot be opened (corrupt, wrong format)
//! surfaces as [`SuiteError::StoreOpen`]; it is never silently recreated.

use crate::error::{Result, SuiteError};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions},
    ConnectOptions,
};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Pooled handle to the suite database.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    path: Option<PathBuf>, // None for in-memory databases
}

impl Database {
    /// Open (or create) the database at `database_path` and bring the schema
    /// up to date.
    pub async fn open<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        let path = database_path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    SuiteError::StoreOpen(format!(
                        "failed to create database directory {}: {e}",
                        parent.display()
                    ))
                })?;
            }
        }

        let connection_string = format!("sqlite://{}?mode=rwc", path.display());
        let connect_opts = SqliteConnectOptions::from_str(&connection_string)
            .map_err(|e| SuiteError::StoreOpen(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .foreign_keys(true)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(30))
            .disable_statement_logging();

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(connect_opts)
            .await
            .map_err(|e| SuiteError::StoreOpen(format!("{}: {e}", path.display())))?;

        let db = Self {
            pool,
            path: Some(path.to_path_buf()),
        };
        db.migrate().await?;

        Ok(db)
    }

    /// In-memory database for testing.
    pub async fn open_in_memory() -> Result<Self> {
        let connect_opts = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| SuiteError::StoreOpen(e.to_string()))?
            .foreign_keys(true)
            .disable_statement_logging();

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connect_opts)
            .await
            .map_err(|e| SuiteError::StoreOpen(e.to_string()))?;

        let db = Self { pool, path: None };
        db.migrate().await?;

        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        crate::storage::migrations::run_migrations(&self.pool)
            .await
            .map_err(|e| SuiteError::StoreOpen(format!("migration failed: {e}")))
    }

    /// Connection pool for executing queries.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Database file path; `None` for in-memory databases.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Close the database, waiting for active connections to finish.
    pub async fn close(self) {
        self.pool.close().await;
    }

    /// Runs the SQLite integrity check; true when the file is sound.
    pub async fn check_integrity(&self) -> Result<bool> {
        let result: String = sqlx::query_scalar("PRAGMA quick_check")
            .fetch_one(&self.pool)
            .await?;
        Ok(result == "ok")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_in_memory_database() {
        let db = Database::open_in_memory().await.unwrap();
        let result: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(result, 1);
    }

    #[tokio::test]
    async fn test_open_creates_file_and_parents() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("suite.db");
        let db = Database::open(&path).await.unwrap();
        assert!(path.exists());
        assert!(db.check_integrity().await.unwrap());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_not_recreated() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("suite.db");
        std::fs::write(&path, b"this is not a sqlite database, not even close").unwrap();

        let err = Database::open(&path).await.unwrap_err();
        assert!(matches!(err, SuiteError::StoreOpen(_)));
        // The garbage file must still be there, untouched.
        assert_eq!(
            std::fs::read(&path).unwrap(),
            b"this is not a sqlite database, not even close"
        );
    }
}
