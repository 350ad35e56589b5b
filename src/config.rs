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


//! Configuration file handling
//!
//! A single JSON document holds download, network, and path settings plus a
//! short list of recently used repository ids. Fields this version does not
//! recognize are preserved verbatim on save (older and newer builds share
//! the file), and out-of-range values are clamped rather than rejected.
//!
//! There is no process-global config; callers load one at startup and hand
//! clones to the components that need it.

use crate::error::{Result, SuiteError};
use crate::storage::models::Platform;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_HF_ENDPOINT: &str = "https://huggingface.co";
pub const HF_MIRROR_ENDPOINT: &str = "https://hf-mirror.com";
pub const DEFAULT_MS_ENDPOINT: &str = "https://modelscope.cn";

const MAX_WORKERS_RANGE: (usize, usize) = (1, 8);
const MAX_RETRIES_RANGE: (u32, u32) = (0, 10);
const TIMEOUT_RANGE: (u64, u64) = (30, 600);
const RECENT_REPOS_CAP: usize = 20;

/// Download-related settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadSettings {
    /// Maximum concurrent download workers (clamped to 1..=8)
    pub max_workers: usize,
    /// Bandwidth cap in bytes/s; None = unlimited
    pub bandwidth_limit: Option<u64>,
    /// Whether failed attempts are retried at all
    pub auto_retry: bool,
    /// Maximum retry attempts after the first failure (clamped to 0..=10)
    pub max_retries: u32,
    /// Base delay between attempts in seconds; doubles per attempt
    pub retry_delay: u64,
    /// Verify files against listing checksums when available
    pub verify_checksums: bool,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            max_workers: 3,
            bandwidth_limit: None,
            auto_retry: true,
            max_retries: 3,
            retry_delay: 5,
            verify_checksums: true,
            extra: serde_json::Map::new(),
        }
    }
}

/// Network-related settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    /// Request timeout in seconds (clamped to 30..=600)
    pub timeout: u64,
    pub hf_endpoint: String,
    pub use_hf_mirror: bool,
    pub ms_endpoint: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            timeout: 300,
            hf_endpoint: DEFAULT_HF_ENDPOINT.to_string(),
            use_hf_mirror: false,
            ms_endpoint: DEFAULT_MS_ENDPOINT.to_string(),
            extra: serde_json::Map::new(),
        }
    }
}

/// Path-related settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    pub default_save_path: String,
    pub comfy_root: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Main configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub download: DownloadSettings,
    pub network: NetworkSettings,
    pub paths: PathSettings,
    /// Most-recent-first, capped at 20 entries
    pub recent_repos: Vec<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Config {
    /// Load config from `path`, creating the file with defaults if missing.
    /// A malformed file is an error; the caller decides whether to reset.
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| SuiteError::Config(format!("failed to read {}: {e}", path.display())))?;
            let mut config: Config = serde_json::from_str(&raw)
                .map_err(|e| SuiteError::Config(format!("invalid config {}: {e}", path.display())))?;
            config.clamp();
            return Ok(config);
        }

        let config = Config::default();
        config.save(path)?;
        Ok(config)
    }

    /// Write the config to `path`, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SuiteError::Config(format!("failed to create {}: {e}", parent.display())))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .map_err(|e| SuiteError::Config(format!("failed to write {}: {e}", path.display())))?;
        Ok(())
    }

    /// Pull out-of-range values back into their documented ranges.
    pub fn clamp(&mut self) {
        self.download.max_workers = self
            .download
            .max_workers
            .clamp(MAX_WORKERS_RANGE.0, MAX_WORKERS_RANGE.1);
        self.download.max_retries = self
            .download
            .max_retries
            .clamp(MAX_RETRIES_RANGE.0, MAX_RETRIES_RANGE.1);
        self.network.timeout = self.network.timeout.clamp(TIMEOUT_RANGE.0, TIMEOUT_RANGE.1);
        self.recent_repos.truncate(RECENT_REPOS_CAP);
    }

    /// Effective endpoint URL for a platform, honoring the mirror toggle.
    pub fn effective_endpoint(&self, platform: Platform) -> &str {
        match platform {
            Platform::Huggingface => {
                if self.network.use_hf_mirror {
                    HF_MIRROR_ENDPOINT
                } else {
                    &self.network.hf_endpoint
                }
            }
            Platform::Modelscope => &self.network.ms_endpoint,
        }
    }

    /// Record a repo id as most recently used (deduplicated, capped at 20).
    pub fn add_recent_repo(&mut self, repo_id: &str) {
        self.recent_repos.retain(|r| r != repo_id);
        self.recent_repos.insert(0, repo_id.to_string());
        self.recent_repos.truncate(RECENT_REPOS_CAP);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_creates_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.json");

        let config = Config::load(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.download.max_workers, 3);
        assert_eq!(config.network.hf_endpoint, DEFAULT_HF_ENDPOINT);
        assert!(config.recent_repos.is_empty());
    }

    #[test]
    fn test_out_of_range_values_are_clamped() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"download":{"max_workers":99,"max_retries":50},"network":{"timeout":5}}"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.download.max_workers, 8);
        assert_eq!(config.download.max_retries, 10);
        assert_eq!(config.network.timeout, 30);
    }

    #[test]
    fn test_unknown_fields_survive_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"download":{"max_workers":2,"open_folder_after":true},"ui":{"theme":"dark"}}"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        config.save(&path).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["ui"]["theme"], "dark");
        assert_eq!(raw["download"]["open_folder_after"], true);
        assert_eq!(raw["download"]["max_workers"], 2);
    }

    #[test]
    fn test_mirror_endpoint_selection() {
        let mut config = Config::default();
        assert_eq!(
            config.effective_endpoint(Platform::Huggingface),
            DEFAULT_HF_ENDPOINT
        );

        config.network.use_hf_mirror = true;
        assert_eq!(
            config.effective_endpoint(Platform::Huggingface),
            HF_MIRROR_ENDPOINT
        );
        assert_eq!(
            config.effective_endpoint(Platform::Modelscope),
            DEFAULT_MS_ENDPOINT
        );
    }

    #[test]
    fn test_recent_repos_dedup_and_cap() {
        let mut config = Config::default();
        for i in 0..25 {
            config.add_recent_repo(&format!("owner/repo-{i}"));
        }
        assert_eq!(config.recent_repos.len(), 20);
        assert_eq!(config.recent_repos[0], "owner/repo-24");

        config.add_recent_repo("owner/repo-10");
        assert_eq!(config.recent_repos[0], "owner/repo-10");
        assert_eq!(
            config
                .recent_repos
                .iter()
                .filter(|r| *r == "owner/repo-10")
                .count(),
            1
        );
    }
}
