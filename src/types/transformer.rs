//! Transformer configuration documents
//!
//! Each transformer is described by one YAML document:
//!
//! ```yaml
//! apiVersion: m2k-planner.io/v1alpha1
//! kind: Transformer
//! metadata:
//!   name: Golang-Dockerfile
//!   labels:
//!     m2k-planner.io/built-in: "true"
//! spec:
//!   class: ManifestDetector
//!   directoryDetect:
//!     levels: -1
//!   overrideSelector: "m2k-planner.io/generic=true"
//!   config:
//!     manifests: [go.mod]
//! ```

use crate::selector::{Labels, Selector, SelectorError, SelectorSpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const TRANSFORMER_KIND: &str = "Transformer";

/// Label that removes a transformer from the default selection when `false`
pub const DEFAULT_SELECTED_LABEL: &str = "m2k-planner.io/default-selected";

#[derive(Debug, Error)]
pub enum TransformerConfigError {
    #[error("Failed to read transformer config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse transformer config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("{path} is of kind '{kind}', expected '{TRANSFORMER_KIND}'")]
    WrongKind { path: PathBuf, kind: String },

    #[error("Transformer config {0} has no name")]
    MissingName(PathBuf),

    #[error("Transformer '{0}' has no class")]
    MissingClass(String),

    #[error("Invalid {field} selector in transformer '{name}': {source}")]
    Selector {
        name: String,
        field: &'static str,
        source: SelectorError,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: Labels,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryDetect {
    /// 0: never during the walk, 1: root only, anything else: every directory
    #[serde(default)]
    pub levels: i32,
}

impl DirectoryDetect {
    pub fn at_root_only(&self) -> bool {
        self.levels == 1
    }

    pub fn during_walk(&self) -> bool {
        self.levels != 0 && self.levels != 1
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSpec {
    #[serde(default)]
    pub image: String,

    /// Working directory inside the container, defaults to the context copy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,

    /// Command keeping the container alive between execs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keep_alive_command: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvokedByDefault {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformerSpec {
    #[serde(default)]
    pub class: String,

    #[serde(default)]
    pub directory_detect: DirectoryDetect,

    #[serde(default)]
    pub isolated: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<ContainerSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_selector: Option<SelectorSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependency: Option<SelectorSpec>,

    #[serde(default)]
    pub invoked_by_default: InvokedByDefault,

    /// Files copied from `src` to `dest` (both relative to the config's
    /// directory) before the transformer is initialized
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub external_files: BTreeMap<String, String>,

    /// Templates directory relative to the config's directory
    #[serde(default, rename = "templates", skip_serializing_if = "String::is_empty")]
    pub templates_dir: String,

    /// Class-specific settings
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub config: serde_json::Value,
}

/// Static descriptor of one transformer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformerConfig {
    #[serde(default)]
    pub api_version: String,

    #[serde(default)]
    pub kind: String,

    #[serde(default)]
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: TransformerSpec,

    /// Location of the YAML document this config was read from
    #[serde(skip)]
    pub path: PathBuf,
}

impl TransformerConfig {
    pub fn from_yaml(contents: &str, path: &Path) -> Result<Self, TransformerConfigError> {
        let mut config: TransformerConfig =
            serde_yaml::from_str(contents).map_err(|source| TransformerConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.path = path.to_path_buf();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, TransformerConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|source| TransformerConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_yaml(&contents, path)
    }

    pub fn validate(&self) -> Result<(), TransformerConfigError> {
        if self.kind != TRANSFORMER_KIND {
            return Err(TransformerConfigError::WrongKind {
                path: self.path.clone(),
                kind: self.kind.clone(),
            });
        }
        if self.metadata.name.trim().is_empty() {
            return Err(TransformerConfigError::MissingName(self.path.clone()));
        }
        if self.spec.class.trim().is_empty() {
            return Err(TransformerConfigError::MissingClass(self.metadata.name.clone()));
        }
        self.override_selector()?;
        self.dependency_selector()?;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn labels(&self) -> &Labels {
        &self.metadata.labels
    }

    pub fn class(&self) -> &str {
        &self.spec.class
    }

    /// Directory the config was loaded from; relative config paths resolve here
    pub fn context_dir(&self) -> PathBuf {
        self.path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }

    pub fn container_image(&self) -> Option<&str> {
        self.spec
            .container
            .as_ref()
            .map(|c| c.image.as_str())
            .filter(|image| !image.is_empty())
    }

    /// Compiled override selector. `None` when unset or empty, since an empty
    /// selector would otherwise override every transformer.
    pub fn override_selector(&self) -> Result<Option<Selector>, TransformerConfigError> {
        self.compile(self.spec.override_selector.as_ref(), "override")
    }

    pub fn dependency_selector(&self) -> Result<Option<Selector>, TransformerConfigError> {
        self.compile(self.spec.dependency.as_ref(), "dependency")
    }

    /// Whether the transformer is part of the default selection
    pub fn selected_by_default(&self) -> bool {
        self.labels()
            .get(DEFAULT_SELECTED_LABEL)
            .map_or(true, |v| v.parse::<bool>().unwrap_or(true))
    }

    fn compile(
        &self,
        spec: Option<&SelectorSpec>,
        field: &'static str,
    ) -> Result<Option<Selector>, TransformerConfigError> {
        let Some(spec) = spec else {
            return Ok(None);
        };
        let selector = spec
            .to_selector()
            .map_err(|source| TransformerConfigError::Selector {
                name: self.metadata.name.clone(),
                field,
                source,
            })?;
        Ok(if selector.is_empty() { None } else { Some(selector) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GO_YAML: &str = r#"
apiVersion: m2k-planner.io/v1alpha1
kind: Transformer
metadata:
  name: Golang-Dockerfile
  labels:
    lang: go
spec:
  class: ManifestDetector
  directoryDetect:
    levels: -1
  overrideSelector: "lang=generic"
  dependency:
    matchLabels:
      kind: builder
  invokedByDefault:
    enabled: true
  externalFiles:
    ../shared/Dockerfile: templates/Dockerfile
  templates: templates/
  config:
    manifests: [go.mod]
"#;

    #[test]
    fn test_parse_full_config() {
        let config =
            TransformerConfig::from_yaml(GO_YAML, Path::new("/assets/go/transformer.yaml")).unwrap();

        assert_eq!(config.name(), "Golang-Dockerfile");
        assert_eq!(config.class(), "ManifestDetector");
        assert!(config.spec.directory_detect.during_walk());
        assert!(config.spec.invoked_by_default.enabled);
        assert_eq!(config.context_dir(), PathBuf::from("/assets/go"));
        assert_eq!(config.spec.templates_dir, "templates/");
        assert_eq!(config.spec.config["manifests"][0], "go.mod");
        assert!(config.container_image().is_none());

        let override_selector = config.override_selector().unwrap().unwrap();
        let mut generic = Labels::new();
        generic.insert("lang".to_string(), "generic".to_string());
        assert!(override_selector.matches(&generic));
        assert!(config.dependency_selector().unwrap().is_some());
    }

    #[test]
    fn test_wrong_kind_rejected() {
        let yaml = GO_YAML.replace("kind: Transformer", "kind: Plan");
        let err = TransformerConfig::from_yaml(&yaml, Path::new("x.yaml")).unwrap_err();
        assert!(matches!(err, TransformerConfigError::WrongKind { .. }));
    }

    #[test]
    fn test_missing_class_rejected() {
        let yaml = "kind: Transformer\nmetadata:\n  name: a\n";
        let err = TransformerConfig::from_yaml(yaml, Path::new("x.yaml")).unwrap_err();
        assert!(matches!(err, TransformerConfigError::MissingClass(_)));
    }

    #[test]
    fn test_invalid_selector_rejected() {
        let yaml = GO_YAML.replace("\"lang=generic\"", "\"lang in ()\"");
        let err = TransformerConfig::from_yaml(&yaml, Path::new("x.yaml")).unwrap_err();
        assert!(matches!(
            err,
            TransformerConfigError::Selector { field: "override", .. }
        ));
    }

    #[test]
    fn test_empty_override_selector_is_ignored() {
        let yaml = GO_YAML.replace("\"lang=generic\"", "{}");
        let config = TransformerConfig::from_yaml(&yaml, Path::new("x.yaml")).unwrap();
        assert!(config.override_selector().unwrap().is_none());
    }

    #[test]
    fn test_default_selection_label() {
        let mut config = TransformerConfig::from_yaml(GO_YAML, Path::new("x.yaml")).unwrap();
        assert!(config.selected_by_default());
        config
            .metadata
            .labels
            .insert(DEFAULT_SELECTED_LABEL.to_string(), "false".to_string());
        assert!(!config.selected_by_default());
    }

    #[test]
    fn test_directory_detect_levels() {
        assert!(!DirectoryDetect { levels: 0 }.during_walk());
        assert!(DirectoryDetect { levels: 1 }.at_root_only());
        assert!(!DirectoryDetect { levels: 1 }.during_walk());
        assert!(DirectoryDetect { levels: -1 }.during_walk());
        assert!(DirectoryDetect { levels: 3 }.during_walk());
    }
}
