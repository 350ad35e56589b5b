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


//! Repository API abstraction
//!
//! One capability trait, [`RepoApi`], with a concrete provider per upstream
//! hub. A provider instance is constructed with its token and endpoint
//! (selection is scoped to the instance; nothing process-wide is touched)
//! and handed to a worker as `Arc<dyn RepoApi>`, so tests substitute a mock
//! at the same seam via [`ProviderFactory`].

pub mod cache;
pub mod huggingface;
pub mod modelscope;
pub mod transfer;

pub use cache::{CacheStats, ResponseCache};
pub use huggingface::HuggingFaceApi;
pub use modelscope::ModelScopeApi;
pub use transfer::TransferSignals;

use crate::config::Config;
use crate::error::{Result, SuiteError};
use crate::storage::models::{DownloadTask, Platform, RepoType};
use crate::storage::Store;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Repository metadata as reported by the upstream hub.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepoMetadata {
    pub repo_id: String,
    pub platform: String,
    pub repo_type: String,
    pub author: String,
    pub name: String,
    pub description: String,
    pub downloads: u64,
    pub likes: u64,
    pub tags: Vec<String>,
    pub private: bool,
    pub gated: bool,
    pub last_modified: Option<String>,
}

/// One file in a repository listing. Size may be 0 when the upstream does
/// not expose it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepoFile {
    pub path: String,
    pub size: u64,
    pub blob_id: Option<String>,
    pub lfs: bool,
    pub sha256: Option<String>,
}

/// Progress callback: (bytes transferred for this file, file total or 0).
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Search filter criteria; providers ignore what they cannot express.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub task: Option<String>,
    pub library: Option<String>,
}

/// Everything a provider needs for one file fetch.
pub struct FileDownloadRequest<'a> {
    pub repo_id: &'a str,
    pub filename: &'a str,
    pub local_dir: &'a Path,
    pub repo_type: RepoType,
    pub progress: Option<ProgressFn>,
    pub signals: TransferSignals,
    /// Bandwidth cap in bytes/s for this transfer, if configured
    pub bandwidth_limit: Option<u64>,
}

/// Polymorphic capability set exposed by each hub provider.
#[async_trait]
pub trait RepoApi: Send + Sync {
    fn platform_name(&self) -> &'static str;

    async fn get_repo_info(&self, repo_id: &str, repo_type: RepoType) -> Result<RepoMetadata>;

    /// Files ordered by path ascending; sizes populated when the upstream
    /// exposes them.
    async fn list_files(&self, repo_id: &str, repo_type: RepoType) -> Result<Vec<RepoFile>>;

    /// Fetch one file into `local_dir`, writing a temp sibling and renaming
    /// atomically on success. Resumes from an existing partial, and honors
    /// the pause/cancel signals at the next chunk boundary.
    async fn download_file(&self, request: &FileDownloadRequest<'_>) -> Result<PathBuf>;

    async fn search(
        &self,
        _query: &str,
        _limit: usize,
        _filters: &SearchFilters,
    ) -> Result<Vec<RepoMetadata>> {
        Err(SuiteError::InvalidState(
            "search not supported for this platform".to_string(),
        ))
    }

    /// Repository id sanity check; identical across providers.
    fn validate_repo_id(&self, repo_id: &str) -> bool {
        validate_repo_id(repo_id)
    }
}

/// Validate a repository id: exactly two non-empty `/`-separated segments,
/// neither starting with `.`.
pub fn validate_repo_id(repo_id: &str) -> bool {
    let mut parts = repo_id.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(owner), Some(name), None) => {
            !owner.is_empty() && !name.is_empty() && !owner.starts_with('.') && !name.starts_with('.')
        }
        _ => false,
    }
}

/// Resolve a credential for `platform`: the store setting
/// `token.<platform>` wins, then the platform's environment variables.
/// Environment access happens only inside this explicit call.
pub async fn resolve_token(store: &Store, platform: Platform) -> Result<Option<String>> {
    let key = format!("token.{}", platform.as_str());
    if let Some(token) = store.get_setting(&key).await? {
        if !token.is_empty() {
            return Ok(Some(token));
        }
    }

    for var in platform.token_env_vars() {
        if let Ok(token) = std::env::var(var) {
            if !token.is_empty() {
                return Ok(Some(token));
            }
        }
    }

    Ok(None)
}

/// Builds the provider a worker will use for one task.
#[async_trait]
pub trait ProviderFactory: Send + Sync {
    async fn create(&self, task: &DownloadTask) -> Result<Arc<dyn RepoApi>>;
}

/// Production factory: endpoint from config, token from settings/env,
/// metadata calls backed by the shared response cache.
pub struct HubProviderFactory {
    config: Config,
    store: Store,
    cache: Arc<ResponseCache>,
}

impl HubProviderFactory {
    pub fn new(config: Config, store: Store, cache: Arc<ResponseCache>) -> Self {
        Self {
            config,
            store,
            cache,
        }
    }
}

#[async_trait]
impl ProviderFactory for HubProviderFactory {
    async fn create(&self, task: &DownloadTask) -> Result<Arc<dyn RepoApi>> {
        let token = resolve_token(&self.store, task.platform).await?;
        let endpoint = self.config.effective_endpoint(task.platform).to_string();
        let timeout = self.config.network.timeout;

        let api: Arc<dyn RepoApi> = match task.platform {
            Platform::Huggingface => Arc::new(
                HuggingFaceApi::new(token, Some(endpoint), timeout)?
                    .with_cache(Arc::clone(&self.cache)),
            ),
            Platform::Modelscope => Arc::new(
                ModelScopeApi::new(token, Some(endpoint), timeout)?
                    .with_cache(Arc::clone(&self.cache)),
            ),
        };
        Ok(api)
    }
}
