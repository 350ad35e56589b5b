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


//! Model-name resolver
//!
//! Maps the filenames workflows reference to repositories: a built-in table
//! of well-known files first (exact, then case-insensitive), then an
//! optional hub search scored by token overlap between the filename and the
//! candidate repo name. Resolution is best-effort; an unresolvable name is
//! simply `None`.

use crate::api::{RepoApi, SearchFilters};
use crate::workflow::parser::ModelReference;
use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

/// Minimum search score worth surfacing at all.
const SEARCH_CONFIDENCE_FLOOR: f64 = 0.3;

/// Well-known model filename to (repo id, file within the repo).
static KNOWN_MAPPINGS: &[(&str, &str, Option<&str>)] = &[
    // Stable Diffusion checkpoints
    ("v1-5-pruned-emaonly.safetensors", "runwayml/stable-diffusion-v1-5", Some("v1-5-pruned-emaonly.safetensors")),
    ("v1-5-pruned.safetensors", "runwayml/stable-diffusion-v1-5", Some("v1-5-pruned.safetensors")),
    ("sd_xl_base_1.0.safetensors", "stabilityai/stable-diffusion-xl-base-1.0", Some("sd_xl_base_1.0.safetensors")),
    ("sd_xl_refiner_1.0.safetensors", "stabilityai/stable-diffusion-xl-refiner-1.0", Some("sd_xl_refiner_1.0.safetensors")),
    ("sd3_medium_incl_clips.safetensors", "stabilityai/stable-diffusion-3-medium", Some("sd3_medium_incl_clips.safetensors")),
    ("flux1-dev.safetensors", "black-forest-labs/FLUX.1-dev", Some("flux1-dev.safetensors")),
    ("flux1-schnell.safetensors", "black-forest-labs/FLUX.1-schnell", Some("flux1-schnell.safetensors")),
    // VAE
    ("vae-ft-mse-840000-ema-pruned.safetensors", "stabilityai/sd-vae-ft-mse", Some("vae-ft-mse-840000-ema-pruned.safetensors")),
    ("sdxl_vae.safetensors", "stabilityai/sdxl-vae", Some("sdxl_vae.safetensors")),
    ("ae.safetensors", "black-forest-labs/FLUX.1-dev", Some("ae.safetensors")),
    // CLIP / text encoders
    ("clip_l.safetensors", "comfyanonymous/flux_text_encoders", Some("clip_l.safetensors")),
    ("t5xxl_fp16.safetensors", "comfyanonymous/flux_text_encoders", Some("t5xxl_fp16.safetensors")),
    ("t5xxl_fp8_e4m3fn.safetensors", "comfyanonymous/flux_text_encoders", Some("t5xxl_fp8_e4m3fn.safetensors")),
    // ControlNet
    ("control_v11p_sd15_canny.pth", "lllyasviel/ControlNet-v1-1", Some("control_v11p_sd15_canny.pth")),
    ("control_v11p_sd15_openpose.pth", "lllyasviel/ControlNet-v1-1", Some("control_v11p_sd15_openpose.pth")),
    ("control_v11f1p_sd15_depth.pth", "lllyasviel/ControlNet-v1-1", Some("control_v11f1p_sd15_depth.pth")),
    // Upscalers
    ("RealESRGAN_x4plus.pth", "ai-forever/Real-ESRGAN", Some("RealESRGAN_x4plus.pth")),
    ("RealESRGAN_x4plus_anime_6B.pth", "ai-forever/Real-ESRGAN", Some("RealESRGAN_x4plus_anime_6B.pth")),
    ("4x-UltraSharp.pth", "Kim2091/4x-UltraSharp", Some("4x-UltraSharp.pth")),
];

/// A model reference resolved to a downloadable source.
#[derive(Debug, Clone)]
pub struct ResolvedModel {
    pub original: ModelReference,
    pub repo_id: String,
    pub platform: String,
    /// Specific file within the repo, when known
    pub file_path: Option<String>,
    /// 0..=1; 1.0 for table hits
    pub confidence: f64,
}

impl ResolvedModel {
    pub fn page_url(&self) -> String {
        format!("https://huggingface.co/{}", self.repo_id)
    }
}

/// Resolves workflow model names to repositories.
#[derive(Debug, Default)]
pub struct ModelResolver {
    search_enabled: bool,
}

impl ModelResolver {
    pub fn new() -> Self {
        Self {
            search_enabled: true,
        }
    }

    /// Table lookups only; never hits the network.
    pub fn offline() -> Self {
        Self {
            search_enabled: false,
        }
    }

    /// Resolve one reference. `api` is consulted for unknown names when
    /// search is enabled.
    pub async fn resolve(
        &self,
        model: &ModelReference,
        api: Option<&dyn RepoApi>,
    ) -> Option<ResolvedModel> {
        let name = model.display_name();

        if let Some((repo_id, file_path)) = lookup_known(&name) {
            return Some(ResolvedModel {
                original: model.clone(),
                repo_id: repo_id.to_string(),
                platform: "huggingface".to_string(),
                file_path: file_path.map(str::to_string),
                confidence: 1.0,
            });
        }

        if let Some((repo_id, file_path)) = lookup_known_case_insensitive(&name) {
            return Some(ResolvedModel {
                original: model.clone(),
                repo_id: repo_id.to_string(),
                platform: "huggingface".to_string(),
                file_path: file_path.map(str::to_string),
                confidence: 0.95,
            });
        }

        if self.search_enabled {
            if let Some(api) = api {
                return self.resolve_via_search(model, &name, api).await;
            }
        }

        None
    }

    /// Resolve a batch; unresolvable names map to `None`.
    pub async fn resolve_all(
        &self,
        models: &[ModelReference],
        api: Option<&dyn RepoApi>,
    ) -> Vec<(ModelReference, Option<ResolvedModel>)> {
        let mut results = Vec::with_capacity(models.len());
        for model in models {
            let resolved = self.resolve(model, api).await;
            results.push((model.clone(), resolved));
        }
        results
    }

    async fn resolve_via_search(
        &self,
        model: &ModelReference,
        name: &str,
        api: &dyn RepoApi,
    ) -> Option<ResolvedModel> {
        let query = search_query(name);
        let results = match api.search(&query, 5, &SearchFilters::default()).await {
            Ok(results) => results,
            Err(e) => {
                debug!(name, "search failed during resolution: {e}");
                return None;
            }
        };

        let top = results.first()?;
        let confidence = match_confidence(name, &top.repo_id);
        if confidence < SEARCH_CONFIDENCE_FLOOR {
            return None;
        }

        Some(ResolvedModel {
            original: model.clone(),
            repo_id: top.repo_id.clone(),
            platform: top.platform.clone(),
            file_path: None,
            confidence,
        })
    }
}

fn lookup_known(name: &str) -> Option<(&'static str, Option<&'static str>)> {
    KNOWN_MAPPINGS
        .iter()
        .find(|(known, _, _)| *known == name)
        .map(|(_, repo, file)| (*repo, *file))
}

fn lookup_known_case_insensitive(name: &str) -> Option<(&'static str, Option<&'static str>)> {
    KNOWN_MAPPINGS
        .iter()
        .find(|(known, _, _)| known.eq_ignore_ascii_case(name))
        .map(|(_, repo, file)| (*repo, *file))
}

fn extension_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\.(safetensors|ckpt|pt|pth|bin|gguf)$").expect("valid"))
}

fn token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[-_\s.]+").expect("valid"))
}

/// Filename to search terms: drop the extension, split separators.
fn search_query(name: &str) -> String {
    let stem = extension_regex().replace(name, "");
    token_regex().replace_all(&stem, " ").trim().to_string()
}

/// Token-overlap score between a model filename and a candidate repo id.
fn match_confidence(name: &str, repo_id: &str) -> f64 {
    let name_lower = name.to_lowercase();
    let repo_name = repo_id.rsplit('/').next().unwrap_or(repo_id).to_lowercase();

    let stem = extension_regex().replace(&name_lower, "").into_owned();
    if !stem.is_empty() && repo_name.contains(&stem) {
        return 0.9;
    }

    let name_tokens: std::collections::HashSet<String> = token_regex()
        .split(&stem)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();
    let repo_tokens: std::collections::HashSet<String> = token_regex()
        .split(&repo_name)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();

    let common = name_tokens.intersection(&repo_tokens).count();
    if common == 0 || name_tokens.is_empty() {
        return 0.2;
    }
    (0.3 + (common as f64 / name_tokens.len() as f64) * 0.5).min(0.8)
}
