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


//! ModelScope provider
//!
//! Uses the ModelScope REST API (`/api/v1`). Responses wrap their payload
//! in `{Code, Data}` envelopes and use PascalCase keys; file listings mix
//! blobs and tree entries, so directories are filtered out here. Sizes are
//! absent for some repos, in which case they contribute 0 to estimates.

use crate::api::cache::{ResponseCache, TTL_FILE_LIST, TTL_REPO_INFO, TTL_SEARCH};
use crate::api::transfer;
use crate::api::{FileDownloadRequest, RepoApi, RepoFile, RepoMetadata, SearchFilters};
use crate::error::{Result, SuiteError};
use crate::storage::models::RepoType;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_ENDPOINT: &str = "https://modelscope.cn";

const PLATFORM: &str = "modelscope";

/// ModelScope API client.
pub struct ModelScopeApi {
    client: Client,
    token: Option<String>,
    endpoint: String,
    cache: Option<Arc<ResponseCache>>,
}

impl ModelScopeApi {
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

    fn repo_segment(repo_type: RepoType) -> &'static str {
        match repo_type {
            RepoType::Model => "models",
            RepoType::Dataset => "datasets",
        }
    }

    fn info_url(&self, repo_id: &str, repo_type: RepoType) -> String {
        format!(
            "{}/api/v1/{}/{repo_id}",
            self.endpoint,
            Self::repo_segment(repo_type)
        )
    }

    fn files_url(&self, repo_id: &str, repo_type: RepoType) -> String {
        format!(
            "{}/api/v1/{}/{repo_id}/repo/files?Recursive=true",
            self.endpoint,
            Self::repo_segment(repo_type)
        )
    }

    fn file_url(&self, repo_id: &str, repo_type: RepoType, filename: &str) -> String {
        format!(
            "{}/api/v1/{}/{repo_id}/repo?FilePath={}",
            self.endpoint,
            Self::repo_segment(repo_type),
            urlencoding::encode(filename)
        )
    }

    async fn fetch_data(&self, url: &str, repo_id: &str) -> Result<Value> {
        let mut request = self.client.get(url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(transfer::map_http_status(status, PLATFORM, repo_id, None));
        }

        let body: Value = response.json().await?;

        // The envelope reports failures with 2xx transport status.
        if let Some(code) = body.get("Code").and_then(Value::as_i64) {
            if code != 200 {
                let message = body
                    .get("Message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error");
                if message.to_lowercase().contains("not exist")
                    || message.to_lowercase().contains("not found")
                {
                    return Err(SuiteError::NotFound {
                        repo_id: repo_id.to_string(),
                        platform: PLATFORM.to_string(),
                    });
                }
                return Err(SuiteError::Api {
                    message: format!("ModelScope error {code}: {message}"),
                    status_code: None,
                });
            }
        }

        Ok(body.get("Data").cloned().unwrap_or(body))
    }
}

fn parse_metadata(data: &Value, repo_id: &str, repo_type: RepoType) -> RepoMetadata {
    RepoMetadata {
        repo_id: repo_id.to_string(),
        platform: PLATFORM.to_string(),
        repo_type: repo_type.as_str().to_string(),
        author: repo_id.split('/').next().unwrap_or_default().to_string(),
        name: repo_id.rsplit('/').next().unwrap_or(repo_id).to_string(),
        description: data
            .get("Description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        downloads: data.get("Downloads").and_then(Value::as_u64).unwrap_or(0),
        likes: data.get("Stars").and_then(Value::as_u64).unwrap_or(0),
        tags: data
            .get("Tags")
            .and_then(Value::as_array)
            .map(|tags| {
                tags.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        private: data
            .get("Private")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        gated: false,
        last_modified: data
            .get("LastUpdatedTime")
            .and_then(Value::as_i64)
            .map(|t| t.to_string()),
    }
}

fn parse_files(data: &Value) -> Vec<RepoFile> {
    let mut files: Vec<RepoFile> = data
        .get("Files")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter(|entry| {
                    entry.get("Type").and_then(Value::as_str).unwrap_or("blob") != "tree"
                })
                .filter_map(|entry| {
                    let path = entry
                        .get("Path")
                        .or_else(|| entry.get("Name"))?
                        .as_str()?
                        .to_string();
                    Some(RepoFile {
                        path,
                        size: entry.get("Size").and_then(Value::as_u64).unwrap_or(0),
                        blob_id: entry
                            .get("Revision")
                            .and_then(Value::as_str)
                            .map(str::to_string),
                        lfs: entry
                            .get("IsLFS")
                            .and_then(Value::as_bool)
                            .unwrap_or(false),
                        sha256: entry
                            .get("Sha256")
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
impl RepoApi for ModelScopeApi {
    fn platform_name(&self) -> &'static str {
        PLATFORM
    }

    async fn get_repo_info(&self, repo_id: &str, repo_type: RepoType) -> Result<RepoMetadata> {
        let key = ResponseCache::key(
            "ms.repo_info",
            &[&self.endpoint, repo_id, repo_type.as_str()],
        );
        if let Some(cache) = &self.cache {
            if let Some(cached) = cache.get(&key) {
                return Ok(serde_json::from_value(cached)?);
            }
        }

        let data = self
            .fetch_data(&self.info_url(repo_id, repo_type), repo_id)
            .await?;
        let metadata = parse_metadata(&data, repo_id, repo_type);

        if let Some(cache) = &self.cache {
            cache.set(&key, &serde_json::to_value(&metadata)?, TTL_REPO_INFO);
        }
        Ok(metadata)
    }

    async fn list_files(&self, repo_id: &str, repo_type: RepoType) -> Result<Vec<RepoFile>> {
        let key = ResponseCache::key(
            "ms.file_list",
            &[&self.endpoint, repo_id, repo_type.as_str()],
        );
        if let Some(cache) = &self.cache {
            if let Some(cached) = cache.get(&key) {
                return Ok(serde_json::from_value(cached)?);
            }
        }

        let data = self
            .fetch_data(&self.files_url(repo_id, repo_type), repo_id)
            .await?;
        let files = parse_files(&data);

        if let Some(cache) = &self.cache {
            cache.set(&key, &serde_json::to_value(&files)?, TTL_FILE_LIST);
        }
        Ok(files)
    }

    async fn download_file(&self, request: &FileDownloadRequest<'_>) -> Result<PathBuf> {
        let dest = request.local_dir.join(request.filename);
        let url = self.file_url(request.repo_id, request.repo_type, request.filename);

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
        _filters: &SearchFilters,
    ) -> Result<Vec<RepoMetadata>> {
        let url = format!(
            "{}/api/v1/models?Search={}&PageSize={limit}",
            self.endpoint,
            urlencoding::encode(query)
        );

        let key = ResponseCache::key("ms.search", &[&self.endpoint, &url]);
        if let Some(cache) = &self.cache {
            if let Some(cached) = cache.get(&key) {
                return Ok(serde_json::from_value(cached)?);
            }
        }

        let data = self.fetch_data(&url, query).await?;
        let models: Vec<RepoMetadata> = data
            .get("Models")
            .or_else(|| data.get("Model"))
            .and_then(Value::as_array)
            .map(|models| {
                models
                    .iter()
                    .filter_map(|model| {
                        let name = model.get("Name").and_then(Value::as_str)?;
                        let path = model
                            .get("Path")
                            .and_then(Value::as_str)
                            .unwrap_or_default();
                        let repo_id = if path.is_empty() {
                            name.to_string()
                        } else {
                            format!("{path}/{name}")
                        };
                        Some(parse_metadata(model, &repo_id, RepoType::Model))
                    })
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

    #[test]
    fn test_url_builders() {
        let api = ModelScopeApi::new(None, None, 30).unwrap();
        assert_eq!(
            api.info_url("damo/cv_resnet", RepoType::Model),
            "https://modelscope.cn/api/v1/models/damo/cv_resnet"
        );
        assert_eq!(
            api.files_url("damo/cv_resnet", RepoType::Model),
            "https://modelscope.cn/api/v1/models/damo/cv_resnet/repo/files?Recursive=true"
        );
        assert_eq!(
            api.file_url("damo/cv_resnet", RepoType::Model, "weights/model.bin"),
            "https://modelscope.cn/api/v1/models/damo/cv_resnet/repo?FilePath=weights%2Fmodel.bin"
        );
    }

    #[test]
    fn test_parse_metadata() {
        let data = json!({
            "Description": "a vision model",
            "Downloads": 1000,
            "Stars": 25,
            "Tags": ["cv"],
            "Private": false,
        });

        let metadata = parse_metadata(&data, "damo/cv_resnet", RepoType::Model);
        assert_eq!(metadata.repo_id, "damo/cv_resnet");
        assert_eq!(metadata.author, "damo");
        assert_eq!(metadata.name, "cv_resnet");
        assert_eq!(metadata.downloads, 1000);
        assert_eq!(metadata.likes, 25);
        assert_eq!(metadata.platform, "modelscope");
    }

    #[test]
    fn test_parse_files_skips_directories() {
        let data = json!({
            "Files": [
                {"Path": "weights", "Type": "tree"},
                {"Path": "weights/model.bin", "Type": "blob", "Size": 2048, "IsLFS": true},
                {"Path": "config.json", "Type": "blob", "Size": 64},
            ]
        });

        let files = parse_files(&data);
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].path, "config.json");
        assert_eq!(files[1].path, "weights/model.bin");
        assert_eq!(files[1].size, 2048);
        assert!(files[1].lfs);
    }
}
