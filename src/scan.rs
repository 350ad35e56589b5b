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


//! Local model scanner
//!
//! Walks directories for model files, infers a model type from the path,
//! and upserts the results into the store's `local_models` table. Hashing
//! is opt-in (it reads every byte of possibly very large files); duplicate
//! detection in the store only sees hashed records.

use crate::api::transfer::file_sha256;
use crate::error::Result;
use crate::storage::models::NewLocalModel;
use crate::storage::Store;
use std::path::Path;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const MODEL_EXTENSIONS: [&str; 6] = ["safetensors", "ckpt", "pt", "pth", "bin", "gguf"];

/// Scan statistics.
#[derive(Debug, Clone, Default)]
pub struct ScanResults {
    pub files_found: usize,
    pub files_recorded: usize,
    pub paths_skipped: usize,
}

/// Scans directories for model files and records them in the store.
pub struct ModelScanner {
    store: Store,
    compute_hashes: bool,
}

impl ModelScanner {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            compute_hashes: false,
        }
    }

    /// Also hash each file (sha256), enabling duplicate detection.
    pub fn with_hashes(mut self) -> Self {
        self.compute_hashes = true;
        self
    }

    /// Scan each path recursively; nonexistent paths are counted and
    /// skipped.
    pub async fn scan_paths<P: AsRef<Path>>(&self, paths: &[P]) -> Result<ScanResults> {
        let mut results = ScanResults::default();

        for path in paths {
            let path = path.as_ref();
            if !path.exists() {
                debug!(path = %path.display(), "skipping nonexistent scan path");
                results.paths_skipped += 1;
                continue;
            }
            self.scan_directory(path, &mut results).await?;
        }

        info!(
            found = results.files_found,
            recorded = results.files_recorded,
            "model scan finished"
        );
        Ok(results)
    }

    async fn scan_directory(&self, root: &Path, results: &mut ScanResults) -> Result<()> {
        for entry in WalkDir::new(root).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("scan error under {}: {e}", root.display());
                    continue;
                }
            };
            if !entry.file_type().is_file() || !is_model_file(entry.path()) {
                continue;
            }

            results.files_found += 1;

            let path = entry.path();
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            let file_hash = if self.compute_hashes {
                match file_sha256(path).await {
                    Ok(hash) => Some(hash),
                    Err(e) => {
                        warn!(path = %path.display(), "failed to hash file: {e}");
                        None
                    }
                }
            } else {
                None
            };

            let record = NewLocalModel {
                file_path: path.display().to_string(),
                file_name: entry.file_name().to_string_lossy().into_owned(),
                file_size: size,
                file_hash,
                model_type: Some(infer_model_type(path).to_string()),
                ..Default::default()
            };

            match self.store.add_local_model(&record).await {
                Ok(_) => results.files_recorded += 1,
                Err(e) => warn!(path = %path.display(), "failed to record model: {e}"),
            }
        }

        Ok(())
    }
}

fn is_model_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| MODEL_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Guess the model type from path segments; checkpoints are the default.
fn infer_model_type(path: &Path) -> &'static str {
    let lowered = path.display().to_string().to_lowercase();
    if lowered.contains("lora") {
        "lora"
    } else if lowered.contains("vae") {
        "vae"
    } else if lowered.contains("controlnet") || lowered.contains("control_net") {
        "controlnet"
    } else if lowered.contains("embedding") {
        "embedding"
    } else if lowered.contains("upscale") {
        "upscaler"
    } else if path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gguf"))
    {
        "gguf"
    } else {
        "checkpoint"
    }
}
