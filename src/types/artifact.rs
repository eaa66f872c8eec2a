//! Artifacts exchanged between transformers and the planner

use crate::environment::paths::TranslatePaths;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Path-type tag marking the directories a service is rooted at.
/// Directories listed under this tag are claimed and never re-detected.
pub const SERVICE_DIR_PATH_TYPE: &str = "ServiceDirectories";

/// Path-type tag for manifest files (go.mod, package.json, ...)
pub const MANIFEST_PATH_TYPE: &str = "Manifests";

/// Artifact type produced by the service detectors
pub const SERVICE_ARTIFACT_TYPE: &str = "Service";

/// Config-type tag carrying the service name a detector inferred
pub const SERVICE_CONFIG_TYPE: &str = "Service";

/// Typed bag of transformer output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub artifact_type: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub paths: BTreeMap<String, Vec<PathBuf>>,

    /// Free-form payload, never path-translated
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub configs: BTreeMap<String, serde_json::Value>,
}

impl Artifact {
    pub fn new(name: impl Into<String>, artifact_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            artifact_type: artifact_type.into(),
            ..Default::default()
        }
    }

    pub fn with_path(mut self, path_type: &str, path: impl Into<PathBuf>) -> Self {
        self.paths
            .entry(path_type.to_string())
            .or_default()
            .push(path.into());
        self
    }

    pub fn with_config(mut self, config_type: &str, value: serde_json::Value) -> Self {
        self.configs.insert(config_type.to_string(), value);
        self
    }

    pub fn paths_of(&self, path_type: &str) -> &[PathBuf] {
        self.paths.get(path_type).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn service_dirs(&self) -> &[PathBuf] {
        self.paths_of(SERVICE_DIR_PATH_TYPE)
    }
}

impl TranslatePaths for Artifact {
    fn visit_paths(&mut self, visit: &mut dyn FnMut(&mut PathBuf)) {
        self.paths.visit_paths(visit);
    }
}

/// How a transformer wants a produced file placed in the output tree
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PathMappingType {
    /// Copy the source path to the destination
    #[default]
    Default,
    /// Render the source as a template with the mapping's template config
    Template,
    /// Copy source-relative content into the output source tree
    Source,
    /// Remove the destination
    Delete,
}

/// Placement instruction returned by `Transformer::transform`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathMapping {
    #[serde(rename = "type", default)]
    pub mapping_type: PathMappingType,

    #[serde(default, skip_serializing_if = "crate::types::is_empty_path")]
    pub src_path: PathBuf,

    pub dest_path: PathBuf,

    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub template_config: serde_json::Value,
}

/// Only the source side is translated; `dest_path` is always relative to the
/// output root.
impl TranslatePaths for PathMapping {
    fn visit_paths(&mut self, visit: &mut dyn FnMut(&mut PathBuf)) {
        visit(&mut self.src_path);
    }
}

/// Services keyed by name as a transformer reports them. The empty name
/// means the transformer left naming to the planner.
pub type DetectedServices = BTreeMap<String, Vec<Artifact>>;
