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


//! ComfyUI workflow parser
//!
//! Extracts model references from workflow JSON in both shapes ComfyUI
//! writes: the editor's `nodes` array (model names live in
//! `widgets_values`) and the API export (numbered node keys with an
//! `inputs` map). Embedding references are pulled out of text prompts via
//! the `embedding:<name>` convention. Parse problems are collected per
//! workflow instead of failing the whole document.

use regex::Regex;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Loader node types that reference model files.
struct NodeSpec {
    class_type: &'static str,
    inputs: &'static [&'static str],
    model_type: &'static str,
    /// When set, input text is scanned with this pattern instead of being
    /// taken verbatim.
    pattern: Option<&'static str>,
}

const EMBEDDING_PATTERN: &str = r"embedding:([^\s,]+)";

static NODE_SPECS: &[NodeSpec] = &[
    NodeSpec { class_type: "CheckpointLoaderSimple", inputs: &["ckpt_name"], model_type: "checkpoint", pattern: None },
    NodeSpec { class_type: "CheckpointLoader", inputs: &["ckpt_name"], model_type: "checkpoint", pattern: None },
    NodeSpec { class_type: "UNETLoader", inputs: &["unet_name"], model_type: "checkpoint", pattern: None },
    NodeSpec { class_type: "Efficient Loader", inputs: &["ckpt_name"], model_type: "checkpoint", pattern: None },
    NodeSpec { class_type: "LoraLoader", inputs: &["lora_name"], model_type: "lora", pattern: None },
    NodeSpec { class_type: "LoraLoaderModelOnly", inputs: &["lora_name"], model_type: "lora", pattern: None },
    NodeSpec { class_type: "VAELoader", inputs: &["vae_name"], model_type: "vae", pattern: None },
    NodeSpec { class_type: "ControlNetLoader", inputs: &["control_net_name"], model_type: "controlnet", pattern: None },
    NodeSpec { class_type: "DiffControlNetLoader", inputs: &["control_net_name"], model_type: "controlnet", pattern: None },
    NodeSpec { class_type: "UpscaleModelLoader", inputs: &["model_name"], model_type: "upscaler", pattern: None },
    NodeSpec { class_type: "CLIPLoader", inputs: &["clip_name"], model_type: "clip", pattern: None },
    NodeSpec { class_type: "CLIPVisionLoader", inputs: &["clip_name"], model_type: "clip", pattern: None },
    NodeSpec { class_type: "DualCLIPLoader", inputs: &["clip_name1", "clip_name2"], model_type: "clip", pattern: None },
    NodeSpec { class_type: "StyleModelLoader", inputs: &["style_model_name"], model_type: "style", pattern: None },
    NodeSpec { class_type: "GLIGENLoader", inputs: &["gligen_name"], model_type: "gligen", pattern: None },
    NodeSpec { class_type: "IPAdapterModelLoader", inputs: &["ipadapter_file"], model_type: "ipadapter", pattern: None },
    NodeSpec { class_type: "CLIPTextEncode", inputs: &["text"], model_type: "embedding", pattern: Some(EMBEDDING_PATTERN) },
];

fn spec_for(class_type: &str) -> Option<&'static NodeSpec> {
    NODE_SPECS.iter().find(|s| s.class_type == class_type)
}

fn embedding_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(EMBEDDING_PATTERN).expect("embedding pattern is valid"))
}

/// A reference to a model file found in a workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelReference {
    pub name: String,
    pub model_type: String,
    pub node_type: String,
    pub node_id: String,
}

impl ModelReference {
    /// Bare filename, with any workflow-internal directory prefix dropped.
    pub fn display_name(&self) -> String {
        self.name
            .replace('\\', "/")
            .rsplit('/')
            .next()
            .unwrap_or(&self.name)
            .to_string()
    }
}

/// Parsed workflow document.
#[derive(Debug, Default)]
pub struct WorkflowInfo {
    pub source_file: Option<PathBuf>,
    pub format: &'static str,
    pub node_count: usize,
    pub models: Vec<ModelReference>,
    pub missing_models: Vec<ModelReference>,
    pub errors: Vec<String>,
}

impl WorkflowInfo {
    pub fn models_of_type(&self, model_type: &str) -> Vec<&ModelReference> {
        self.models
            .iter()
            .filter(|m| m.model_type == model_type)
            .collect()
    }
}

/// Parser for ComfyUI workflow files.
#[derive(Debug, Default)]
pub struct WorkflowParser {
    comfy_root: Option<PathBuf>,
}

impl WorkflowParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables missing-model detection against a ComfyUI installation.
    pub fn with_comfy_root<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.comfy_root = Some(root.into());
        self
    }

    /// Parse a workflow JSON file.
    pub fn parse_file(&self, path: &Path) -> WorkflowInfo {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) => {
                return WorkflowInfo {
                    errors: vec![format!("failed to read {}: {e}", path.display())],
                    ..Default::default()
                }
            }
        };

        let value: Value = match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(e) => {
                return WorkflowInfo {
                    source_file: Some(path.to_path_buf()),
                    errors: vec![format!("invalid JSON: {e}")],
                    ..Default::default()
                }
            }
        };

        let mut info = self.parse_value(&value);
        info.source_file = Some(path.to_path_buf());
        info
    }

    /// Parse an already-deserialized workflow document.
    pub fn parse_value(&self, workflow: &Value) -> WorkflowInfo {
        let mut info = WorkflowInfo::default();

        if let Some(nodes) = workflow.get("nodes").and_then(Value::as_array) {
            info.format = "nodes_array";
            info.node_count = nodes.len();
            for node in nodes {
                self.extract_from_array_node(node, &mut info);
            }
        } else if let Some(map) = workflow.as_object() {
            info.format = "api";
            for (node_id, node) in map {
                if !node.is_object() {
                    continue;
                }
                info.node_count += 1;
                self.extract_from_api_node(node_id, node, &mut info);
            }
        } else {
            info.errors.push("unrecognized workflow structure".to_string());
        }

        dedup_in_place(&mut info.models);

        if self.comfy_root.is_some() {
            info.missing_models = self.find_missing(&info.models);
        }

        info
    }

    /// Editor format: the loader's model name is a widget value. The model
    /// name is the first string widget (loader nodes put it first); text
    /// nodes are scanned for embedding references instead.
    fn extract_from_array_node(&self, node: &Value, info: &mut WorkflowInfo) {
        let Some(class_type) = node.get("type").and_then(Value::as_str) else {
            return;
        };
        let Some(spec) = spec_for(class_type) else {
            return;
        };
        let node_id = match node.get("id") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };

        let strings: Vec<&str> = node
            .get("widgets_values")
            .and_then(Value::as_array)
            .map(|values| values.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        if spec.pattern.is_some() {
            for text in strings {
                push_embedding_refs(text, class_type, &node_id, info);
            }
            return;
        }

        for name in strings.iter().take(spec.inputs.len()) {
            if name.is_empty() {
                continue;
            }
            info.models.push(ModelReference {
                name: name.to_string(),
                model_type: spec.model_type.to_string(),
                node_type: class_type.to_string(),
                node_id: node_id.clone(),
            });
        }
    }

    /// API format: named inputs.
    fn extract_from_api_node(&self, node_id: &str, node: &Value, info: &mut WorkflowInfo) {
        let Some(class_type) = node.get("class_type").and_then(Value::as_str) else {
            return;
        };
        let Some(spec) = spec_for(class_type) else {
            return;
        };
        let Some(inputs) = node.get("inputs").and_then(Value::as_object) else {
            return;
        };

        for input in spec.inputs {
            let Some(value) = inputs.get(*input).and_then(Value::as_str) else {
                continue;
            };
            if value.is_empty() {
                continue;
            }

            if spec.pattern.is_some() {
                push_embedding_refs(value, class_type, node_id, info);
            } else {
                info.models.push(ModelReference {
                    name: value.to_string(),
                    model_type: spec.model_type.to_string(),
                    node_type: class_type.to_string(),
                    node_id: node_id.to_string(),
                });
            }
        }
    }

    fn find_missing(&self, models: &[ModelReference]) -> Vec<ModelReference> {
        let Some(root) = &self.comfy_root else {
            return Vec::new();
        };

        models
            .iter()
            .filter(|model| {
                let dir = root.join("models").join(model_type_folder(&model.model_type));
                !model_exists_in(&dir, &model.name)
            })
            .cloned()
            .collect()
    }
}

fn push_embedding_refs(text: &str, class_type: &str, node_id: &str, info: &mut WorkflowInfo) {
    for capture in embedding_regex().captures_iter(text) {
        info.models.push(ModelReference {
            name: capture[1].to_string(),
            model_type: "embedding".to_string(),
            node_type: class_type.to_string(),
            node_id: node_id.to_string(),
        });
    }
}

/// Remove duplicate (name, type) pairs, preserving first-seen order.
fn dedup_in_place(models: &mut Vec<ModelReference>) {
    let mut seen = std::collections::HashSet::new();
    models.retain(|m| seen.insert((m.name.clone(), m.model_type.clone())));
}

/// ComfyUI folder name for a model type.
pub fn model_type_folder(model_type: &str) -> &str {
    match model_type {
        "checkpoint" => "checkpoints",
        "lora" => "loras",
        "vae" => "vae",
        "controlnet" => "controlnet",
        "upscaler" => "upscale_models",
        "clip" => "clip",
        "embedding" => "embeddings",
        "style" => "style_models",
        "gligen" => "gligen",
        "ipadapter" => "ipadapter",
        other => other,
    }
}

fn model_exists_in(dir: &Path, name: &str) -> bool {
    let candidate = dir.join(name);
    if candidate.exists() {
        return true;
    }
    // Embedding references frequently drop the extension.
    const EXTENSIONS: [&str; 5] = [".safetensors", ".ckpt", ".pt", ".pth", ".bin"];
    EXTENSIONS
        .iter()
        .any(|ext| dir.join(format!("{name}{ext}")).exists())
}
