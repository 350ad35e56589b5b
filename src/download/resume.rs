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


//! Per-task resume sidecars
//!
//! One JSON file per task id under the resume-state directory records which
//! repo-relative files have completed. The worker is the only writer for a
//! task (the scheduler guarantees a single worker per id); writes go
//! through a temp file and rename so a crash never leaves a torn sidecar.
//! Unreadable state is treated as "no resume state", not as an error.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::warn;

/// Resumable state for one task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResumeState {
    #[serde(default)]
    pub completed_files: HashSet<String>,
    #[serde(default)]
    pub downloaded_bytes: u64,
    #[serde(default)]
    pub current_file: Option<String>,
    #[serde(default)]
    pub files_completed: usize,
}

/// Sidecar storage, keyed by task id.
#[derive(Debug, Clone)]
pub struct ResumeStore {
    dir: PathBuf,
}

impl ResumeStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn state_path(&self, task_id: i64) -> PathBuf {
        self.dir.join(format!("task_{task_id}.json"))
    }

    /// Load the state for a task; missing or corrupt sidecars yield the
    /// default (empty) state.
    pub async fn load(&self, task_id: i64) -> ResumeState {
        let path = self.state_path(task_id);
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(task_id, "ignoring corrupt resume state: {e}");
                ResumeState::default()
            }),
            Err(_) => ResumeState::default(),
        }
    }

    /// Persist the state atomically (write temp sibling, rename).
    pub async fn save(&self, task_id: i64, state: &ResumeState) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.state_path(task_id);
        let tmp = self.dir.join(format!("task_{task_id}.json.tmp"));

        let json = serde_json::to_string(state)?;
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Remove a task's sidecar; returns whether one existed.
    pub async fn clear(&self, task_id: i64) -> bool {
        tokio::fs::remove_file(self.state_path(task_id)).await.is_ok()
    }

    /// Task ids with resumable state on disk.
    pub async fn list_resumable(&self) -> Vec<i64> {
        let mut ids = Vec::new();
        let Ok(mut entries) = tokio::fs::read_dir(&self.dir).await else {
            return ids;
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(id) = name
                .strip_prefix("task_")
                .and_then(|rest| rest.strip_suffix(".json"))
                .and_then(|id| id.parse().ok())
            {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        ids
    }
}
