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


//! HuggingFace Hub provider
//!
//! Talks to the Hub REST API directly:
//! - repo metadata: `GET /api/{models|datasets}/{repo_id}`
//! - file listing: the same endpoint with `?blobs=true` (sibling entries
//!   carry sizes and LFS sha256 oids)
//! - file fetch: `GET /{repo_id}/resolve/main/{filename}` through the
//!   shared resumable transfer
//! - search: `GET /api/models?search=...`
//!
//! The endpoint (main site or a mirror) and token live on the instance;
//! metadata calls go through the advisory response cache when one is
//! attached.

use crate::api::cache::{ResponseCache, TTL_FILE_LIST, TTL_REPO_INFO, TTL_SEARCH};
use crate::api::transfer;
use crate::api::{FileDownloadRequest, RepoApi, RepoFile, RepoMetadata, SearchFilters};
use crate::error::Result;
use crate::storage::models::RepoType;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_ENDPOINT: &str = "https://huggingface.co";

const PLATFORM: &str = "huggingface";

/// HuggingFace Hub API client.
pub struct HuggingFaceApi {
    client: Client,
    token: Option<String>,
    endpoint: String,
    cache: Option<Arc<ResponseCache>>,
}

impl HuggingFaceApi {
    pub fn new(token: Option<String>, endpoint: Option<String>, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        let endpoint = endpoint
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            client,
            token,
            endpoint,
            cache: None,
        })
    }

    /// Route metadata calls through a response cache.
    pub fn with_cache(mut self, cache: Arc<ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    fn info_url(&self, repo_id: &str, repo_type: RepoType, with_blobs: bool) -> String {
        let segment = match repo_type {
            RepoType::Model => "models",
            RepoType::Dataset => "datasets",
        };
        let suffix = if with_blobs { "?blobs=true" } else { "" };
        format!("{}/api/{segment}/{repo_id}{suffix}", self.endpoint)
    }

    fn resolve_url(&self, repo_id: &str, repo_type: RepoType, filename: &str) -> String {
        let encoded: Vec<String> = filename
            .split('/')
            .map(|seg| urlencoding::encode(seg).into_owned())
            .collect();
        let prefix = match repo_type {
            RepoType::Model => String::new(),
            RepoType::Dataset => "datasets/".to_string(),
        };
        format!(
            "{}/{prefix}{repo_id}/resolve/main/{}",
            self.endpoint,
            encoded.join("/")
        )
    }

    async fn fetch_json(&self, url: &str, repo_id: &str) -> Result<Value> {
        let mut request = self.client.get(url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok());
            return Err(transfer::map_http_status(status, PLATFORM, repo_id, retry_after));
        }

        Ok(response.json().await?)
    }

    async fn repo_json(&self, repo_id: &str, repo_type: RepoType, with_blobs: bool) -> Result<Value> {
        let key = ResponseCache::key(
            if with_blobs { "hf.file_list" } else { "hf.repo_info" },
            &[&self.endpoint, repo_id, repo_type.as_str()],
        );
        let ttl = if with_blobs { TTL_FILE_LIST } else { TTL_REPO_INFO };

        if let Some(cache) = &self.cache {
            if let Some(cached) = cache.get(&key) {
                debug!(repo_id, "metadata served from cache");
                return Ok(cached);
            }
        }

        let value = self
            .fetch_json(&self.info_url(repo_id, repo_type, with_blobs), repo_id)
            .await?;

        if let Some(cache) = &self.cache {
            cache.set(&key, &value, ttl);
        }
        Ok(value)
    }
}

/// `gated` arrives as `false` or as a mode string ("auto", "manual").
fn gated_flag(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => !s.is_empty() && s != "false",
        _ => false,
    }
}

fn parse_metadata(info: &Value, fallback_repo_id: &str, repo_type: RepoType) -> RepoMetadata {
    let repo_id = info
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or(fallback_repo_id)
        .to_string();
    let name = repo_id.rsplit('/').next().unwrap_or(&repo_id).to_string();
    let author = info
        .get("author")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| repo_id.split('/').next().unwrap_or_default().to_string());

    RepoMetadata {
        repo_id,
        platform: PLATFORM.to_string(),
        repo_type: repo_type.as_str().to_string(),
        author,
        name,
        description: info
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        downloads: info.get("downloads").and_then(Value::as_u64).unwrap_or(0),
        likes: info.get("likes").and_then(Value::as_u64).unwrap_or(0),
        tags: info
            .get("tags")
            .and_then(Value::as_array)
            .map(|tags| {
                tags.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        private: info.get("private").and_then(Value::as_bool).unwrap_or(false),
        gated: gated_flag(info.get("gated")),
        last_modified: info
            .get("lastModified")
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}

fn parse_siblings(info: &Value) -> Vec<RepoFile> {
    let mut files: Vec<RepoFile> = info
        .get("siblings")
        .and_then(Value::as_array)
        .map(|siblings| {
            siblings
                .iter()
                .filter_map(|sibling| {
                    let path = sibling.get("rfilename")?.as_str()?.to_string();
                    let lfs = sibling.get("lfs").filter(|v| !v.is_null());
                    Some(RepoFile {
                        path,
                        size: sibling
                            .get("size")
                            .and_then(Value::as_u64)
                            .or_else(|| lfs.and_then(|l| l.get("size")).and_then(Value::as_u64))
                            .unwrap_or(0),
                        blob_id: sibling
                            .get("blobId")
                            .and_then(Value::as_str)
                            .map(str::to_string),
                        lfs: lfs.is_some(),
                        sha256: lfs
                            .and_then(|l| l.get("oid"))
                            .and_then(Value::as_str)
                            .map(str::to_string),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    files.sort_by(|a, b| a.path.cmp(&b.path));
    files
}

#[async_trait]
impl RepoApi for HuggingFaceApi {
    fn platform_name(&self) -> &'static str {
        PLATFORM
    }

    async fn get_repo_info(&self, repo_id: &str, repo_type: RepoType) -> Result<RepoMetadata> {
        let info = self.repo_json(repo_id, repo_type, false).await?;
        Ok(parse_metadata(&info, repo_id, repo_type))
    }

    async fn list_files(&self, repo_id: &str, repo_type: RepoType) -> Result<Vec<RepoFile>> {
        let info = self.repo_json(repo_id, repo_type, true).await?;
        Ok(parse_siblings(&info))
    }

    async fn download_file(&self, request: &FileDownloadRequest<'_>) -> Result<PathBuf> {
        let dest = request.local_dir.join(request.filename);
        let url = self.resolve_url(request.repo_id, request.repo_type, request.filename);

        transfer::download_to_path(
            &self.client,
            &url,
            self.token.as_deref(),
            PLATFORM,
            request.repo_id,
            &dest,
            &request.signals,
            request.progress.as_ref(),
            request.bandwidth_limit,
        )
        .await?;

        Ok(dest)
    }

    async fn search(
        &self,
        query: &str,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<RepoMetadata>> {
        let mut url = format!(
            "{}/api/models?search={}&limit={limit}&sort=downloads&direction=-1",
            self.endpoint,
            urlencoding::encode(query)
        );
        if let Some(task) = &filters.task {
            url.push_str(&format!("&pipeline_tag={}", urlencoding::encode(task)));
        }
        if let Some(library) = &filters.library {
            url.push_str(&format!("&library={}", urlencoding::encode(library)));
        }

        let key = ResponseCache::key("hf.search", &[&self.endpoint, &url]);
        if let Some(cache) = &self.cache {
            if let Some(cached) = cache.get(&key) {
                return Ok(serde_json::from_value(cached)?);
            }
        }

        let results = self.fetch_json(&url, query).await?;
        let models: Vec<RepoMetadata> = results
            .as_array()
            .map(|models| {
                models
                    .iter()
                    .map(|m| parse_metadata(m, "", RepoType::Model))
                    .collect()
            })
            .unwrap_or_default();

        if let Some(cache) = &self.cache {
            cache.set(&key, &serde_json::to_value(&models)?, TTL_SEARCH);
        }
        Ok(models)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn api() -> HuggingFaceApi {
        HuggingFaceApi::new(None, None, 30).unwrap()
    }

    #[test]
    fn test_url_builders() {
        let api = HuggingFaceApi::new(None, Some("https://hf-mirror.com/".to_string()), 30).unwrap();
        assert_eq!(
            api.info_url("o/r", RepoType::Model, false),
            "https://hf-mirror.com/api/models/o/r"
        );
        assert_eq!(
            api.info_url("o/d", RepoType::Dataset, true),
            "https://hf-mirror.com/api/datasets/o/d?blobs=true"
        );
        assert_eq!(
            api.resolve_url("o/r", RepoType::Model, "sub dir/model.bin"),
            "https://hf-mirror.com/o/r/resolve/main/sub%20dir/model.bin"
        );
        assert_eq!(
            api.resolve_url("o/d", RepoType::Dataset, "data.csv"),
            "https://hf-mirror.com/datasets/o/d/resolve/main/data.csv"
        );
    }

    #[test]
    fn test_parse_metadata() {
        let _ = api();
        let info = json!({
            "id": "openai/whisper-tiny",
            "author": "openai",
            "downloads": 123456,
            "likes": 789,
            "tags": ["audio", "asr"],
            "private": false,
            "gated": false,
            "lastModified": "2024-05-01T10:00:00.000Z",
        });

        let metadata = parse_metadata(&info, "openai/whisper-tiny", RepoType::Model);
        assert_eq!(metadata.repo_id, "openai/whisper-tiny");
        assert_eq!(metadata.name, "whisper-tiny");
        assert_eq!(metadata.author, "openai");
        assert_eq!(metadata.downloads, 123456);
        assert_eq!(metadata.tags, vec!["audio", "asr"]);
        assert!(!metadata.gated);
        assert_eq!(
            metadata.last_modified.as_deref(),
            Some("2024-05-01T10:00:00.000Z")
        );
    }

    #[test]
    fn test_gated_flag_variants() {
        assert!(!gated_flag(Some(&json!(false))));
        assert!(gated_flag(Some(&json!(true))));
        assert!(gated_flag(Some(&json!("auto"))));
        assert!(gated_flag(Some(&json!("manual"))));
        assert!(!gated_flag(Some(&json!("false"))));
        assert!(!gated_flag(None));
    }

    #[test]
    fn test_parse_siblings_sorted_with_lfs_checksums() {
        let info = json!({
            "siblings": [
                {"rfilename": "model.safetensors", "lfs": {"oid": "deadbeef", "size": 5000}},
                {"rfilename": "config.json", "size": 120, "blobId": "abc"},
                {"rfilename": "README.md"},
            ]
        });

        let files = parse_siblings(&info);
        assert_eq!(files.len(), 3);
        assert_eq!(files[0].path, "README.md");
        assert_eq!(files[0].size, 0);
        assert_eq!(files[1].path, "config.json");
        assert_eq!(files[1].size, 120);
        assert!(!files[1].lfs);
        assert_eq!(files[2].path, "model.safetensors");
        assert_eq!(files[2].size, 5000);
        assert!(files[2].lfs);
        assert_eq!(files[2].sha256.as_deref(), Some("deadbeef"));
    }
}
