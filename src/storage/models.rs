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


//! Durable entities and their value types
//!
//! Rows are handed out of the store as plain value snapshots; nothing in
//! here holds a database handle. Status, platform and repo-type enums
//! round-trip through their lowercase text forms, which is also how they
//! are persisted.

use crate::error::{Result, SuiteError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a download task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Queued,
    Downloading,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Queued => "queued",
            TaskStatus::Downloading => "downloading",
            TaskStatus::Paused => "paused",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "queued" => Ok(TaskStatus::Queued),
            "downloading" => Ok(TaskStatus::Downloading),
            "paused" => Ok(TaskStatus::Paused),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            _ => Err(SuiteError::InvalidInput(format!("invalid task status: {s}"))),
        }
    }

    /// Terminal states are absorbing in the store; leaving one requires a
    /// new task id.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// Upstream hub a repository lives on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Huggingface,
    Modelscope,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Huggingface => "huggingface",
            Platform::Modelscope => "modelscope",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "huggingface" => Ok(Platform::Huggingface),
            "modelscope" => Ok(Platform::Modelscope),
            _ => Err(SuiteError::InvalidInput(format!("unsupported platform: {s}"))),
        }
    }

    /// Environment variables consulted (in order) when resolving a token.
    /// Reading them is always an explicit opt-in by the caller.
    pub fn token_env_vars(&self) -> &'static [&'static str] {
        match self {
            Platform::Huggingface => &["HF_TOKEN", "HUGGING_FACE_HUB_TOKEN"],
            Platform::Modelscope => &["MODELSCOPE_API_TOKEN"],
        }
    }
}

/// Repository type; affects which metadata endpoint is used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoType {
    Model,
    Dataset,
}

impl RepoType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepoType::Model => "model",
            RepoType::Dataset => "dataset",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "model" => Ok(RepoType::Model),
            "dataset" => Ok(RepoType::Dataset),
            _ => Err(SuiteError::InvalidInput(format!("unsupported repo type: {s}"))),
        }
    }
}

/// One submission to the scheduler: a repository download, possibly
/// filtered to a subset of files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadTask {
    pub id: i64,
    pub repo_id: String,
    pub platform: Platform,
    pub repo_type: RepoType,
    pub status: TaskStatus,
    pub save_path: String,
    /// Repo-relative paths in download order; empty means "whole repo"
    pub selected_files: Vec<String>,
    pub total_bytes: u64,
    pub downloaded_bytes: u64,
    pub speed_bps: f64,
    /// 1..=10, lower is higher priority
    pub priority: u8,
    pub retry_count: u32,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub profile_id: Option<i64>,
}

impl DownloadTask {
    /// Last `/`-segment of the repo id; names the destination directory.
    pub fn repo_name(&self) -> &str {
        self.repo_id.rsplit('/').next().unwrap_or(&self.repo_id)
    }

    pub fn progress_percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        (self.downloaded_bytes as f64 / self.total_bytes as f64) * 100.0
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Fields for persisting a new task
#[derive(Debug, Clone)]
pub struct NewTask {
    pub repo_id: String,
    pub platform: Platform,
    pub repo_type: RepoType,
    pub status: TaskStatus,
    pub save_path: String,
    pub selected_files: Vec<String>,
    pub priority: u8,
    pub profile_id: Option<i64>,
}

impl NewTask {
    pub fn new(repo_id: &str, save_path: &str, platform: Platform, repo_type: RepoType) -> Self {
        Self {
            repo_id: repo_id.to_string(),
            platform,
            repo_type,
            status: TaskStatus::Queued,
            save_path: save_path.to_string(),
            selected_files: Vec::new(),
            priority: 5,
            profile_id: None,
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_selected_files(mut self, files: Vec<String>) -> Self {
        self.selected_files = files;
        self
    }
}

/// Partial update applied to a task row; unset fields are left alone.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub status: Option<TaskStatus>,
    pub total_bytes: Option<u64>,
    pub downloaded_bytes: Option<u64>,
    pub speed_bps: Option<f64>,
    pub priority: Option<u8>,
    pub retry_count: Option<u32>,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskPatch {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.total_bytes.is_none()
            && self.downloaded_bytes.is_none()
            && self.speed_bps.is_none()
            && self.priority.is_none()
            && self.retry_count.is_none()
            && self.error_message.is_none()
            && self.started_at.is_none()
            && self.completed_at.is_none()
    }
}

/// Per-file row under a task. File-level progress in the resume sidecar is
/// authoritative for resumption; these rows exist for inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    pub id: i64,
    pub task_id: i64,
    pub path: String,
    pub size: u64,
    pub downloaded_bytes: u64,
    pub status: TaskStatus,
    pub checksum: Option<String>,
    pub verified: bool,
}

/// Immutable snapshot of a completed task (only favorite flag and tags may
/// change afterwards).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub repo_id: String,
    pub platform: Platform,
    pub repo_type: RepoType,
    pub save_path: String,
    pub total_bytes: u64,
    pub duration_seconds: u64,
    pub completed_at: DateTime<Utc>,
    pub is_favorite: bool,
    pub tags: Vec<String>,
}

/// Fields for appending a history row
#[derive(Debug, Clone)]
pub struct NewHistoryEntry {
    pub repo_id: String,
    pub platform: Platform,
    pub repo_type: RepoType,
    pub save_path: String,
    pub total_bytes: u64,
    pub duration_seconds: u64,
    pub tags: Vec<String>,
}

/// Saved path preset (opaque to the core)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedLocation {
    pub id: i64,
    pub name: String,
    pub path: String,
    pub tool_type: Option<String>,
    pub model_type: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Download profile preset (opaque to the core)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: i64,
    pub name: String,
    pub platform: Option<Platform>,
    pub endpoint: Option<String>,
    pub default_path: Option<String>,
    pub token_id: Option<i64>,
    pub file_filters: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Stored credential record (opaque to the core)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    pub id: i64,
    pub name: String,
    pub platform: Platform,
    pub value: String,
    pub scope: Option<String>,
    pub last_validated: Option<DateTime<Utc>>,
    pub is_valid: bool,
}

/// Scanned local model file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalModelRecord {
    pub id: i64,
    pub file_path: String,
    pub file_name: String,
    pub file_size: u64,
    pub file_hash: Option<String>,
    pub model_type: Option<String>,
    pub source_repo: Option<String>,
    pub source_platform: Option<Platform>,
    pub scanned_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

/// Fields for upserting a scanned local model (keyed by `file_path`)
#[derive(Debug, Clone, Default)]
pub struct NewLocalModel {
    pub file_path: String,
    pub file_name: String,
    pub file_size: u64,
    pub file_hash: Option<String>,
    pub model_type: Option<String>,
    pub source_repo: Option<String>,
    pub source_platform: Option<Platform>,
    pub metadata: Option<serde_json::Value>,
}
