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


//! Durable persistence of tasks, file entries, history, settings, and the
//! opaque collaborator records (locations, profiles, tokens, local models)
//!
//! Every operation is a single statement or a short transaction, safe to
//! call from any task; SQLite serializes writers behind the pool. Rows are
//! returned as value snapshots; the store is the only owner of durable
//! state.

use crate::error::Result;
use crate::storage::database::Database;
use crate::storage::models::{
    DownloadTask, FileEntry, HistoryEntry, LocalModelRecord, NamedLocation, NewHistoryEntry,
    NewLocalModel, NewTask, Platform, Profile, RepoType, TaskPatch, TaskStatus, TokenRecord,
};
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

/// Per-file state recorded as the worker finishes files.
#[derive(Debug, Clone)]
pub struct FileEntryUpsert {
    pub path: String,
    pub size: u64,
    pub downloaded_bytes: u64,
    pub status: TaskStatus,
    pub checksum: Option<String>,
    pub verified: bool,
}

/// Handle to the durable store.
#[derive(Debug, Clone)]
pub struct Store {
    db: Database,
}

impl Store {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn pool(&self) -> &SqlitePool {
        self.db.pool()
    }

    // ========================================================================
    // Tasks
    // ========================================================================

    /// Persist a new task and return its assigned id.
    pub async fn add_task(&self, task: &NewTask) -> Result<i64> {
        let files_json = if task.selected_files.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&task.selected_files)?)
        };

        let result = sqlx::query(
            r#"
            INSERT INTO downloads (
                repo_id, platform, repo_type, status, save_path, files_json,
                priority, profile_id, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&task.repo_id)
        .bind(task.platform.as_str())
        .bind(task.repo_type.as_str())
        .bind(task.status.as_str())
        .bind(&task.save_path)
        .bind(files_json)
        .bind(task.priority as i64)
        .bind(task.profile_id)
        .bind(Utc::now())
        .execute(self.pool())
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn get_task(&self, id: i64) -> Result<Option<DownloadTask>> {
        let row = sqlx::query("SELECT * FROM downloads WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;

        row.map(row_to_task).transpose()
    }

    pub async fn get_by_status(&self, status: TaskStatus) -> Result<Vec<DownloadTask>> {
        let rows = sqlx::query("SELECT * FROM downloads WHERE status = ? ORDER BY id")
            .bind(status.as_str())
            .fetch_all(self.pool())
            .await?;

        rows.into_iter().map(row_to_task).collect()
    }

    /// Tasks waiting to run, ordered by ascending priority then id.
    ///
    /// Rows still marked `downloading` belong to a previous process and are
    /// recycled to `queued` first, so a restart re-dispatches interrupted
    /// work.
    pub async fn get_pending(&self) -> Result<Vec<DownloadTask>> {
        sqlx::query("UPDATE downloads SET status = ? WHERE status = ?")
            .bind(TaskStatus::Queued.as_str())
            .bind(TaskStatus::Downloading.as_str())
            .execute(self.pool())
            .await?;

        let rows = sqlx::query(
            "SELECT * FROM downloads WHERE status IN ('pending', 'queued') ORDER BY priority, id",
        )
        .fetch_all(self.pool())
        .await?;

        rows.into_iter().map(row_to_task).collect()
    }

    /// Apply a partial update; returns whether a row matched. Safe to call
    /// repeatedly with the same patch (progress streams are throttled and
    /// idempotent).
    pub async fn update_task(&self, id: i64, patch: &TaskPatch) -> Result<bool> {
        if patch.is_empty() {
            return Ok(self.get_task(id).await?.is_some());
        }

        let mut sets: Vec<&str> = Vec::new();
        if patch.status.is_some() {
            sets.push("status = ?");
        }
        if patch.total_bytes.is_some() {
            sets.push("total_bytes = ?");
        }
        if patch.downloaded_bytes.is_some() {
            sets.push("downloaded_bytes = ?");
        }
        if patch.speed_bps.is_some() {
            sets.push("speed_bps = ?");
        }
        if patch.priority.is_some() {
            sets.push("priority = ?");
        }
        if patch.retry_count.is_some() {
            sets.push("retry_count = ?");
        }
        if patch.error_message.is_some() {
            sets.push("error_message = ?");
        }
        if patch.started_at.is_some() {
            sets.push("started_at = ?");
        }
        if patch.completed_at.is_some() {
            sets.push("completed_at = ?");
        }

        let sql = format!("UPDATE downloads SET {} WHERE id = ?", sets.join(", "));
        let mut query = sqlx::query(&sql);

        if let Some(status) = patch.status {
            query = query.bind(status.as_str());
        }
        if let Some(total) = patch.total_bytes {
            query = query.bind(total as i64);
        }
        if let Some(downloaded) = patch.downloaded_bytes {
            query = query.bind(downloaded as i64);
        }
        if let Some(speed) = patch.speed_bps {
            query = query.bind(speed);
        }
        if let Some(priority) = patch.priority {
            query = query.bind(priority as i64);
        }
        if let Some(retries) = patch.retry_count {
            query = query.bind(retries as i64);
        }
        if let Some(ref message) = patch.error_message {
            query = query.bind(message);
        }
        if let Some(started) = patch.started_at {
            query = query.bind(started);
        }
        if let Some(completed) = patch.completed_at {
            query = query.bind(completed);
        }

        let result = query.bind(id).execute(self.pool()).await?;
        Ok(result.rows_affected() > 0)
    }

    /// Move a row from one status to another only if it is still in the
    /// expected state; returns whether the transition happened. Lets racing
    /// callers settle on the row without overwriting each other (terminal
    /// states stay absorbing).
    pub async fn transition_status(
        &self,
        id: i64,
        from: TaskStatus,
        to: TaskStatus,
    ) -> Result<bool> {
        let result = sqlx::query("UPDATE downloads SET status = ? WHERE id = ? AND status = ?")
            .bind(to.as_str())
            .bind(id)
            .bind(from.as_str())
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_task(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM downloads WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ========================================================================
    // File entries
    // ========================================================================

    pub async fn upsert_file_entry(&self, task_id: i64, entry: &FileEntryUpsert) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO download_files (download_id, file_path, file_size, downloaded_bytes, status, checksum, verified)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(download_id, file_path) DO UPDATE SET
                file_size = excluded.file_size,
                downloaded_bytes = excluded.downloaded_bytes,
                status = excluded.status,
                checksum = excluded.checksum,
                verified = excluded.verified
            "#,
        )
        .bind(task_id)
        .bind(&entry.path)
        .bind(entry.size as i64)
        .bind(entry.downloaded_bytes as i64)
        .bind(entry.status.as_str())
        .bind(&entry.checksum)
        .bind(entry.verified)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    pub async fn get_file_entries(&self, task_id: i64) -> Result<Vec<FileEntry>> {
        let rows =
            sqlx::query("SELECT * FROM download_files WHERE download_id = ? ORDER BY file_path")
                .bind(task_id)
                .fetch_all(self.pool())
                .await?;

        rows.into_iter()
            .map(|row| {
                Ok(FileEntry {
                    id: row.try_get("id")?,
                    task_id: row.try_get("download_id")?,
                    path: row.try_get("file_path")?,
                    size: row.try_get::<i64, _>("file_size")? as u64,
                    downloaded_bytes: row.try_get::<i64, _>("downloaded_bytes")? as u64,
                    status: TaskStatus::parse(row.try_get("status")?)?,
                    checksum: row.try_get("checksum")?,
                    verified: row.try_get("verified")?,
                })
            })
            .collect()
    }

    // ========================================================================
    // History
    // ========================================================================

    pub async fn append_history(&self, entry: &NewHistoryEntry) -> Result<i64> {
        let tags_json = serde_json::to_string(&entry.tags)?;
        let result = sqlx::query(
            r#"
            INSERT INTO history (repo_id, platform, repo_type, save_path, total_bytes, duration_seconds, completed_at, tags)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.repo_id)
        .bind(entry.platform.as_str())
        .bind(entry.repo_type.as_str())
        .bind(&entry.save_path)
        .bind(entry.total_bytes as i64)
        .bind(entry.duration_seconds as i64)
        .bind(Utc::now())
        .bind(tags_json)
        .execute(self.pool())
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn get_history(&self, limit: usize, favorites_only: bool) -> Result<Vec<HistoryEntry>> {
        let sql = if favorites_only {
            "SELECT * FROM history WHERE is_favorite = 1 ORDER BY completed_at DESC LIMIT ?"
        } else {
            "SELECT * FROM history ORDER BY completed_at DESC LIMIT ?"
        };

        let rows = sqlx::query(sql)
            .bind(limit as i64)
            .fetch_all(self.pool())
            .await?;

        rows.into_iter().map(row_to_history).collect()
    }

    pub async fn toggle_favorite(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("UPDATE history SET is_favorite = NOT is_favorite WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ========================================================================
    // Settings
    // ========================================================================

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(self.pool())
            .await?;
        Ok(value)
    }

    pub async fn get_setting_or(&self, key: &str, default: &str) -> Result<String> {
        Ok(self
            .get_setting(key)
            .await?
            .unwrap_or_else(|| default.to_string()))
    }

    pub async fn get_all_settings(&self) -> Result<HashMap<String, String>> {
        let rows = sqlx::query("SELECT key, value FROM settings")
            .fetch_all(self.pool())
            .await?;

        let mut settings = HashMap::new();
        for row in rows {
            let key: String = row.try_get("key")?;
            let value: Option<String> = row.try_get("value")?;
            settings.insert(key, value.unwrap_or_default());
        }
        Ok(settings)
    }

    // ========================================================================
    // Local models
    // ========================================================================

    /// Insert or update a scanned model record, keyed by `file_path`.
    pub async fn add_local_model(&self, model: &NewLocalModel) -> Result<i64> {
        let metadata_json = model
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO local_models (file_path, file_name, file_size, file_hash, model_type, source_repo, source_platform, scanned_at, metadata_json)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(file_path) DO UPDATE SET
                file_name = excluded.file_name,
                file_size = excluded.file_size,
                file_hash = COALESCE(excluded.file_hash, local_models.file_hash),
                model_type = excluded.model_type,
                source_repo = COALESCE(excluded.source_repo, local_models.source_repo),
                source_platform = COALESCE(excluded.source_platform, local_models.source_platform),
                scanned_at = excluded.scanned_at,
                metadata_json = COALESCE(excluded.metadata_json, local_models.metadata_json)
            "#,
        )
        .bind(&model.file_path)
        .bind(&model.file_name)
        .bind(model.file_size as i64)
        .bind(&model.file_hash)
        .bind(&model.model_type)
        .bind(&model.source_repo)
        .bind(model.source_platform.map(|p| p.as_str()))
        .bind(Utc::now())
        .bind(metadata_json)
        .execute(self.pool())
        .await?;

        let id: i64 = sqlx::query_scalar("SELECT id FROM local_models WHERE file_path = ?")
            .bind(&model.file_path)
            .fetch_one(self.pool())
            .await?;
        Ok(id)
    }

    pub async fn get_local_models(&self, model_type: Option<&str>) -> Result<Vec<LocalModelRecord>> {
        let rows = if let Some(kind) = model_type {
            sqlx::query("SELECT * FROM local_models WHERE model_type = ? ORDER BY file_name")
                .bind(kind)
                .fetch_all(self.pool())
                .await?
        } else {
            sqlx::query("SELECT * FROM local_models ORDER BY file_name")
                .fetch_all(self.pool())
                .await?
        };

        rows.into_iter().map(row_to_local_model).collect()
    }

    /// Groups of records sharing a non-null content hash (count >= 2).
    pub async fn find_duplicates(&self) -> Result<Vec<(String, Vec<LocalModelRecord>)>> {
        let hashes: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT file_hash FROM local_models
            WHERE file_hash IS NOT NULL
            GROUP BY file_hash
            HAVING COUNT(*) >= 2
            "#,
        )
        .fetch_all(self.pool())
        .await?;

        let mut duplicates = Vec::with_capacity(hashes.len());
        for hash in hashes {
            let rows = sqlx::query("SELECT * FROM local_models WHERE file_hash = ? ORDER BY file_path")
                .bind(&hash)
                .fetch_all(self.pool())
                .await?;
            let records: Result<Vec<_>> = rows.into_iter().map(row_to_local_model).collect();
            duplicates.push((hash, records?));
        }
        Ok(duplicates)
    }

    // ========================================================================
    // Locations, profiles, tokens (opaque collaborator records)
    // ========================================================================

    pub async fn add_location(
        &self,
        name: &str,
        path: &str,
        tool_type: Option<&str>,
        model_type: Option<&str>,
    ) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO locations (name, path, tool_type, model_type, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(name)
        .bind(path)
        .bind(tool_type)
        .bind(model_type)
        .bind(Utc::now())
        .execute(self.pool())
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn get_locations(&self) -> Result<Vec<NamedLocation>> {
        let rows = sqlx::query("SELECT * FROM locations ORDER BY name")
            .fetch_all(self.pool())
            .await?;

        rows.into_iter()
            .map(|row| {
                Ok(NamedLocation {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    path: row.try_get("path")?,
                    tool_type: row.try_get("tool_type")?,
                    model_type: row.try_get("model_type")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    pub async fn delete_location(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM locations WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn add_profile(&self, profile: &Profile) -> Result<i64> {
        let filters_json = serde_json::to_string(&profile.file_filters)?;
        let result = sqlx::query(
            r#"
            INSERT INTO profiles (name, platform, endpoint, default_path, token_id, file_filters, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&profile.name)
        .bind(profile.platform.map(|p| p.as_str()))
        .bind(&profile.endpoint)
        .bind(&profile.default_path)
        .bind(profile.token_id)
        .bind(filters_json)
        .bind(Utc::now())
        .execute(self.pool())
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn get_profile(&self, id: i64) -> Result<Option<Profile>> {
        let row = sqlx::query("SELECT * FROM profiles WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.map(row_to_profile).transpose()
    }

    pub async fn get_profiles(&self) -> Result<Vec<Profile>> {
        let rows = sqlx::query("SELECT * FROM profiles ORDER BY name")
            .fetch_all(self.pool())
            .await?;
        rows.into_iter().map(row_to_profile).collect()
    }

    pub async fn add_token(&self, token: &TokenRecord) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO tokens (name, platform, value, scope, last_validated, is_valid) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&token.name)
        .bind(token.platform.as_str())
        .bind(&token.value)
        .bind(&token.scope)
        .bind(token.last_validated)
        .bind(token.is_valid)
        .execute(self.pool())
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn get_tokens(&self, platform: Option<Platform>) -> Result<Vec<TokenRecord>> {
        let rows = if let Some(platform) = platform {
            sqlx::query("SELECT * FROM tokens WHERE platform = ? ORDER BY id")
                .bind(platform.as_str())
                .fetch_all(self.pool())
                .await?
        } else {
            sqlx::query("SELECT * FROM tokens ORDER BY id")
                .fetch_all(self.pool())
                .await?
        };

        rows.into_iter()
            .map(|row| {
                Ok(TokenRecord {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    platform: Platform::parse(row.try_get("platform")?)?,
                    value: row.try_get("value")?,
                    scope: row.try_get("scope")?,
                    last_validated: row.try_get("last_validated")?,
                    is_valid: row.try_get("is_valid")?,
                })
            })
            .collect()
    }
}

fn row_to_task(row: SqliteRow) -> Result<DownloadTask> {
    let files_json: Option<String> = row.try_get("files_json")?;
    let selected_files = match files_json {
        Some(json) => serde_json::from_str(&json).unwrap_or_default(),
        None => Vec::new(),
    };

    Ok(DownloadTask {
        id: row.try_get("id")?,
        repo_id: row.try_get("repo_id")?,
        platform: Platform::parse(row.try_get("platform")?)?,
        repo_type: RepoType::parse(row.try_get("repo_type")?)?,
        status: TaskStatus::parse(row.try_get("status")?)?,
        save_path: row.try_get("save_path")?,
        selected_files,
        total_bytes: row.try_get::<i64, _>("total_bytes")? as u64,
        downloaded_bytes: row.try_get::<i64, _>("downloaded_bytes")? as u64,
        speed_bps: row.try_get("speed_bps")?,
        priority: row.try_get::<i64, _>("priority")? as u8,
        retry_count: row.try_get::<i64, _>("retry_count")? as u32,
        error_message: row.try_get("error_message")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        created_at: row.try_get("created_at")?,
        profile_id: row.try_get("profile_id")?,
    })
}

fn row_to_history(row: SqliteRow) -> Result<HistoryEntry> {
    let tags_json: Option<String> = row.try_get("tags")?;
    let tags = match tags_json {
        Some(json) => serde_json::from_str(&json).unwrap_or_default(),
        None => Vec::new(),
    };

    Ok(HistoryEntry {
        id: row.try_get("id")?,
        repo_id: row.try_get("repo_id")?,
        platform: Platform::parse(row.try_get("platform")?)?,
        repo_type: RepoType::parse(row.try_get("repo_type")?)?,
        save_path: row.try_get("save_path")?,
        total_bytes: row.try_get::<i64, _>("total_bytes")? as u64,
        duration_seconds: row.try_get::<i64, _>("duration_seconds")? as u64,
        completed_at: row.try_get("completed_at")?,
        is_favorite: row.try_get("is_favorite")?,
        tags,
    })
}

fn row_to_profile(row: SqliteRow) -> Result<Profile> {
    let platform: Option<String> = row.try_get("platform")?;
    let filters_json: Option<String> = row.try_get("file_filters")?;

    Ok(Profile {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        platform: platform.as_deref().map(Platform::parse).transpose()?,
        endpoint: row.try_get("endpoint")?,
        default_path: row.try_get("default_path")?,
        token_id: row.try_get("token_id")?,
        file_filters: filters_json
            .map(|json| serde_json::from_str(&json).unwrap_or_default())
            .unwrap_or_default(),
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_local_model(row: SqliteRow) -> Result<LocalModelRecord> {
    let platform: Option<String> = row.try_get("source_platform")?;
    let metadata_json: Option<String> = row.try_get("metadata_json")?;

    Ok(LocalModelRecord {
        id: row.try_get("id")?,
        file_path: row.try_get("file_path")?,
        file_name: row.try_get("file_name")?,
        file_size: row.try_get::<i64, _>("file_size")? as u64,
        file_hash: row.try_get("file_hash")?,
        model_type: row.try_get("model_type")?,
        source_repo: row.try_get("source_repo")?,
        source_platform: platform.as_deref().map(Platform::parse).transpose()?,
        scanned_at: row.try_get("scanned_at")?,
        metadata: metadata_json
            .map(|json| serde_json::from_str(&json).unwrap_or(serde_json::Value::Null))
            .unwrap_or(serde_json::Value::Null),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::database::Database;

    async fn test_store() -> Store {
        Store::new(Database::open_in_memory().await.unwrap())
    }

    fn sample_task(repo: &str, priority: u8) -> NewTask {
        NewTask::new(repo, "/tmp/models", Platform::Huggingface, RepoType::Model)
            .with_priority(priority)
    }

    #[tokio::test]
    async fn test_add_task_round_trip() {
        let store = test_store().await;

        let new_task = sample_task("openai/whisper-tiny", 3)
            .with_selected_files(vec!["config.json".to_string(), "model.safetensors".to_string()]);
        let id = store.add_task(&new_task).await.unwrap();
        assert_eq!(id, 1);

        let task = store.get_task(id).await.unwrap().unwrap();
        assert_eq!(task.repo_id, "openai/whisper-tiny");
        assert_eq!(task.platform, Platform::Huggingface);
        assert_eq!(task.repo_type, RepoType::Model);
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.priority, 3);
        assert_eq!(
            task.selected_files,
            vec!["config.json".to_string(), "model.safetensors".to_string()]
        );
        assert_eq!(task.total_bytes, 0);
        assert_eq!(task.downloaded_bytes, 0);
        assert!(task.error_message.is_none());
    }

    #[tokio::test]
    async fn test_ids_are_monotonic() {
        let store = test_store().await;
        let first = store.add_task(&sample_task("a/one", 5)).await.unwrap();
        let second = store.add_task(&sample_task("a/two", 5)).await.unwrap();
        store.delete_task(second).await.unwrap();
        let third = store.add_task(&sample_task("a/three", 5)).await.unwrap();
        assert!(first < second && second < third);
    }

    #[tokio::test]
    async fn test_update_task_patch() {
        let store = test_store().await;
        let id = store.add_task(&sample_task("o/r", 5)).await.unwrap();

        let matched = store
            .update_task(
                id,
                &TaskPatch {
                    status: Some(TaskStatus::Downloading),
                    total_bytes: Some(1000),
                    downloaded_bytes: Some(250),
                    started_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(matched);

        let task = store.get_task(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Downloading);
        assert_eq!(task.total_bytes, 1000);
        assert_eq!(task.downloaded_bytes, 250);
        assert!(task.started_at.is_some());

        let missing = store
            .update_task(9999, &TaskPatch::status(TaskStatus::Failed))
            .await
            .unwrap();
        assert!(!missing);
    }

    #[tokio::test]
    async fn test_get_pending_order_and_recycling() {
        let store = test_store().await;

        let low = store.add_task(&sample_task("a/low", 8)).await.unwrap();
        let high = store.add_task(&sample_task("a/high", 1)).await.unwrap();
        let mid_first = store.add_task(&sample_task("a/mid1", 5)).await.unwrap();
        let mid_second = store.add_task(&sample_task("a/mid2", 5)).await.unwrap();

        // Simulate a crash while one task was running.
        let interrupted = store.add_task(&sample_task("a/crashed", 5)).await.unwrap();
        store
            .update_task(interrupted, &TaskPatch::status(TaskStatus::Downloading))
            .await
            .unwrap();

        // Completed tasks never come back.
        let done = store.add_task(&sample_task("a/done", 1)).await.unwrap();
        store
            .update_task(done, &TaskPatch::status(TaskStatus::Completed))
            .await
            .unwrap();

        let pending = store.get_pending().await.unwrap();
        let ids: Vec<i64> = pending.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![high, mid_first, mid_second, interrupted, low]);

        let recycled = store.get_task(interrupted).await.unwrap().unwrap();
        assert_eq!(recycled.status, TaskStatus::Queued);
    }

    #[tokio::test]
    async fn test_transition_status_is_conditional() {
        let store = test_store().await;
        let id = store.add_task(&sample_task("o/r", 5)).await.unwrap();
        store
            .update_task(id, &TaskPatch::status(TaskStatus::Paused))
            .await
            .unwrap();

        // Matching from-state moves the row.
        assert!(store
            .transition_status(id, TaskStatus::Paused, TaskStatus::Queued)
            .await
            .unwrap());
        let task = store.get_task(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Queued);

        // Stale from-state is a no-op.
        assert!(!store
            .transition_status(id, TaskStatus::Paused, TaskStatus::Downloading)
            .await
            .unwrap());
        let task = store.get_task(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Queued);

        // A terminal row cannot be pulled back out.
        store
            .update_task(id, &TaskPatch::status(TaskStatus::Cancelled))
            .await
            .unwrap();
        assert!(!store
            .transition_status(id, TaskStatus::Paused, TaskStatus::Queued)
            .await
            .unwrap());
        let task = store.get_task(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_delete_task() {
        let store = test_store().await;
        let id = store.add_task(&sample_task("o/r", 5)).await.unwrap();
        assert!(store.delete_task(id).await.unwrap());
        assert!(!store.delete_task(id).await.unwrap());
        assert!(store.get_task(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_entries_upsert() {
        let store = test_store().await;
        let id = store.add_task(&sample_task("o/r", 5)).await.unwrap();

        let entry = FileEntryUpsert {
            path: "model.safetensors".to_string(),
            size: 100,
            downloaded_bytes: 100,
            status: TaskStatus::Completed,
            checksum: Some("abc123".to_string()),
            verified: true,
        };
        store.upsert_file_entry(id, &entry).await.unwrap();
        store.upsert_file_entry(id, &entry).await.unwrap();

        let entries = store.get_file_entries(id).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, "model.safetensors");
        assert!(entries[0].verified);
    }

    #[tokio::test]
    async fn test_history_and_favorites() {
        let store = test_store().await;

        let entry = NewHistoryEntry {
            repo_id: "o/r".to_string(),
            platform: Platform::Huggingface,
            repo_type: RepoType::Model,
            save_path: "/tmp/d/r".to_string(),
            total_bytes: 4096,
            duration_seconds: 12,
            tags: vec!["llm".to_string()],
        };
        let id = store.append_history(&entry).await.unwrap();

        let history = store.get_history(10, false).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].repo_id, "o/r");
        assert_eq!(history[0].tags, vec!["llm".to_string()]);
        assert!(!history[0].is_favorite);

        assert!(store.toggle_favorite(id).await.unwrap());
        let favorites = store.get_history(10, true).await.unwrap();
        assert_eq!(favorites.len(), 1);

        assert!(store.toggle_favorite(id).await.unwrap());
        assert!(store.get_history(10, true).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_settings() {
        let store = test_store().await;

        assert!(store.get_setting("theme").await.unwrap().is_none());
        assert_eq!(
            store.get_setting_or("theme", "dark").await.unwrap(),
            "dark"
        );

        store.set_setting("theme", "light").await.unwrap();
        store.set_setting("theme", "dark").await.unwrap();
        store.set_setting("token.huggingface", "hf_xxx").await.unwrap();

        assert_eq!(store.get_setting("theme").await.unwrap().unwrap(), "dark");
        let all = store.get_all_settings().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["token.huggingface"], "hf_xxx");
    }

    #[tokio::test]
    async fn test_local_models_upsert_and_duplicates() {
        let store = test_store().await;

        let mut model = NewLocalModel {
            file_path: "/models/a.safetensors".to_string(),
            file_name: "a.safetensors".to_string(),
            file_size: 10,
            file_hash: Some("h1".to_string()),
            model_type: Some("checkpoint".to_string()),
            ..Default::default()
        };
        let first = store.add_local_model(&model).await.unwrap();

        // Re-scan of the same path updates in place.
        model.file_size = 20;
        let again = store.add_local_model(&model).await.unwrap();
        assert_eq!(first, again);

        let copy = NewLocalModel {
            file_path: "/models/b.safetensors".to_string(),
            file_name: "b.safetensors".to_string(),
            file_size: 20,
            file_hash: Some("h1".to_string()),
            model_type: Some("checkpoint".to_string()),
            ..Default::default()
        };
        store.add_local_model(&copy).await.unwrap();

        let unique = NewLocalModel {
            file_path: "/models/c.gguf".to_string(),
            file_name: "c.gguf".to_string(),
            file_size: 5,
            file_hash: Some("h2".to_string()),
            model_type: Some("gguf".to_string()),
            ..Default::default()
        };
        store.add_local_model(&unique).await.unwrap();

        let all = store.get_local_models(None).await.unwrap();
        assert_eq!(all.len(), 3);
        let checkpoints = store.get_local_models(Some("checkpoint")).await.unwrap();
        assert_eq!(checkpoints.len(), 2);

        let duplicates = store.find_duplicates().await.unwrap();
        assert_eq!(duplicates.len(), 1);
        assert_eq!(duplicates[0].0, "h1");
        assert_eq!(duplicates[0].1.len(), 2);
    }

    #[tokio::test]
    async fn test_locations_crud() {
        let store = test_store().await;
        let id = store
            .add_location("comfy checkpoints", "/comfy/models/checkpoints", Some("comfyui"), Some("checkpoint"))
            .await
            .unwrap();

        let locations = store.get_locations().await.unwrap();
        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0].name, "comfy checkpoints");

        assert!(store.delete_location(id).await.unwrap());
        assert!(store.get_locations().await.unwrap().is_empty());
    }
}
