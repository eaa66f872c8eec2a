//! Generic manifest-file service detector
//!
//! ```yaml
//! spec:
//!   class: ManifestDetector
//!   config:
//!     manifests: [go.mod]
//!     namePattern: '(?m)^module\s+(\S+)'
//!     nameFromDirectory: false
//! ```
//!
//! A directory holding any of `manifests` is a service. Its name comes from the
//! first capture of `namePattern` in the manifest (last `/` segment), else from
//! the directory when `nameFromDirectory` is set, else it is left unnamed for
//! the planner's naming pass.

use super::{dir_service_name, service_output_dir, Transformer, TransformerClass, TransformerError};
use crate::environment::{Environment, EnvironmentError};
use crate::types::{
    Artifact, DetectedServices, PathMapping, PathMappingType, TransformerConfig,
    MANIFEST_PATH_TYPE, SERVICE_ARTIFACT_TYPE, SERVICE_CONFIG_TYPE, SERVICE_DIR_PATH_TYPE,
};
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestDetectorConfig {
    #[serde(default)]
    manifests: Vec<String>,

    #[serde(default)]
    name_pattern: Option<String>,

    #[serde(default)]
    name_from_directory: bool,
}

pub struct ManifestDetector {
    config: TransformerConfig,
    env: Environment,
    manifests: Vec<String>,
    name_pattern: Option<Regex>,
    name_from_directory: bool,
}

impl TransformerClass for ManifestDetector {
    const CLASS: &'static str = "ManifestDetector";

    fn init(config: TransformerConfig, env: Environment) -> Result<Self, TransformerError> {
        let invalid = |reason: String| TransformerError::InvalidConfig {
            name: config.name().to_string(),
            reason,
        };
        let settings: ManifestDetectorConfig = if config.spec.config.is_null() {
            ManifestDetectorConfig::default()
        } else {
            serde_json::from_value(config.spec.config.clone()).map_err(|e| invalid(e.to_string()))?
        };
        if settings.manifests.is_empty() {
            return Err(invalid("no manifests configured".to_string()));
        }
        let name_pattern = settings
            .name_pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| invalid(e.to_string()))?;

        Ok(Self {
            config,
            env,
            manifests: settings.manifests,
            name_pattern,
            name_from_directory: settings.name_from_directory,
        })
    }
}

impl ManifestDetector {
    fn find_manifest(&self, dir: &Path) -> Result<Option<PathBuf>, TransformerError> {
        for manifest in &self.manifests {
            let candidate = dir.join(manifest);
            match self.env.stat(&candidate) {
                Ok(metadata) if metadata.is_file() => return Ok(Some(candidate)),
                Ok(_) | Err(EnvironmentError::NotFound(_)) => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(None)
    }

    fn service_name(&mut self, dir: &Path, manifest: &Path) -> String {
        if let Some(pattern) = &self.name_pattern {
            match self.env.read_to_string(manifest) {
                Ok(contents) => {
                    if let Some(name) = pattern
                        .captures(&contents)
                        .and_then(|c| c.get(1))
                        .and_then(|m| m.as_str().rsplit('/').next())
                        .filter(|n| !n.is_empty())
                    {
                        return name.to_string();
                    }
                }
                Err(err) => {
                    debug!(manifest = %manifest.display(), error = %err, "Could not read manifest for naming");
                }
            }
        }
        if self.name_from_directory {
            return dir_service_name(dir);
        }
        String::new()
    }
}

impl Transformer for ManifestDetector {
    fn get_config(&self) -> (&TransformerConfig, &Environment) {
        (&self.config, &self.env)
    }

    fn environment_mut(&mut self) -> &mut Environment {
        &mut self.env
    }

    fn directory_detect(&mut self, dir: &Path) -> Result<DetectedServices, TransformerError> {
        let mut services = DetectedServices::new();
        let Some(manifest) = self.find_manifest(dir)? else {
            trace!(transformer = %self.config.name(), dir = %dir.display(), "No manifest");
            return Ok(services);
        };

        let name = self.service_name(dir, &manifest);
        let mut artifact = Artifact::new(name.clone(), SERVICE_ARTIFACT_TYPE)
            .with_path(SERVICE_DIR_PATH_TYPE, dir)
            .with_path(MANIFEST_PATH_TYPE, &manifest);
        if !name.is_empty() {
            artifact = artifact.with_config(SERVICE_CONFIG_TYPE, json!({ "serviceName": name }));
        }
        debug!(
            transformer = %self.config.name(),
            dir = %dir.display(),
            service = %name,
            "Detected service"
        );
        services.entry(name).or_default().push(artifact);
        Ok(services)
    }

    fn transform(
        &mut self,
        new_artifacts: &[Artifact],
        already_seen: &[Artifact],
    ) -> Result<(Vec<PathMapping>, Vec<Artifact>), TransformerError> {
        let mut mappings = Vec::new();
        for artifact in new_artifacts {
            if artifact.artifact_type != SERVICE_ARTIFACT_TYPE || already_seen.contains(artifact) {
                continue;
            }
            for dir in artifact.service_dirs() {
                let service = if artifact.name.is_empty() {
                    dir_service_name(dir)
                } else {
                    artifact.name.clone()
                };
                mappings.push(PathMapping {
                    mapping_type: PathMappingType::Source,
                    src_path: dir.clone(),
                    dest_path: service_output_dir(&service),
                    template_config: serde_json::Value::Null,
                });
            }
        }
        Ok((mappings, Vec::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::local::LocalBackend;
    use crate::environment::{EnvInfo, DEFAULT_EXEC_TIMEOUT};
    use std::fs;
    use tempfile::TempDir;

    fn detector(tmp: &TempDir, config: serde_json::Value) -> Result<ManifestDetector, TransformerError> {
        let yaml = format!(
            "kind: Transformer\nmetadata:\n  name: Go\nspec:\n  class: ManifestDetector\n  config: {}\n",
            config
        );
        let config = TransformerConfig::from_yaml(&yaml, &tmp.path().join("go.yaml")).unwrap();
        let info = EnvInfo {
            name: "Go".to_string(),
            project_name: "demo".to_string(),
            isolated: false,
            source: tmp.path().join("src"),
            output: tmp.path().join("out"),
            context: tmp.path().to_path_buf(),
            rel_templates_dir: String::new(),
            temp_root: tmp.path().join("temp"),
            container: None,
            exec_timeout: DEFAULT_EXEC_TIMEOUT,
        };
        let backend = LocalBackend::new(&info).unwrap();
        let env = Environment::with_backend(info, Box::new(backend));
        ManifestDetector::init(config, env)
    }

    fn write(tmp: &TempDir, rel: &str, contents: &str) -> PathBuf {
        let path = tmp.path().join("src").join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_requires_manifests() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(
            detector(&tmp, json!({})),
            Err(TransformerError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_unnamed_service_by_default() {
        let tmp = TempDir::new().unwrap();
        write(&tmp, "api/go.mod", "module x\n");
        let mut detector = detector(&tmp, json!({"manifests": ["go.mod"]})).unwrap();

        let dir = tmp.path().join("src/api");
        let services = detector.directory_detect(&dir).unwrap();
        let artifacts = &services[""];
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].service_dirs(), &[dir.clone()]);
        assert_eq!(artifacts[0].paths_of(MANIFEST_PATH_TYPE), &[dir.join("go.mod")]);
    }

    #[test]
    fn test_no_manifest_detects_nothing() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("src/docs")).unwrap();
        let mut detector = detector(&tmp, json!({"manifests": ["go.mod"]})).unwrap();
        assert!(detector
            .directory_detect(&tmp.path().join("src/docs"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_name_from_manifest_pattern() {
        let tmp = TempDir::new().unwrap();
        write(&tmp, "api/go.mod", "module github.com/acme/orders\n\ngo 1.21\n");
        let mut detector = detector(
            &tmp,
            json!({"manifests": ["go.mod"], "namePattern": "(?m)^module\\s+(\\S+)"}),
        )
        .unwrap();

        let services = detector
            .directory_detect(&tmp.path().join("src/api"))
            .unwrap();
        let artifact = &services["orders"][0];
        assert_eq!(artifact.configs[SERVICE_CONFIG_TYPE]["serviceName"], "orders");
    }

    #[test]
    fn test_name_from_directory() {
        let tmp = TempDir::new().unwrap();
        write(&tmp, "web/package.json", "{}");
        let mut detector = detector(
            &tmp,
            json!({"manifests": ["package.json"], "nameFromDirectory": true}),
        )
        .unwrap();

        let services = detector
            .directory_detect(&tmp.path().join("src/web"))
            .unwrap();
        assert!(services.contains_key("web"));
    }

    #[test]
    fn test_transform_maps_service_dirs() {
        let tmp = TempDir::new().unwrap();
        let mut detector = detector(&tmp, json!({"manifests": ["go.mod"]})).unwrap();
        let artifact = Artifact::new("orders", SERVICE_ARTIFACT_TYPE)
            .with_path(SERVICE_DIR_PATH_TYPE, "/src/orders");

        let (mappings, created) = detector
            .transform(std::slice::from_ref(&artifact), &[])
            .unwrap();
        assert!(created.is_empty());
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].dest_path, PathBuf::from("source/orders"));
        assert_eq!(mappings[0].mapping_type, PathMappingType::Source);

        let (mappings, _) = detector
            .transform(std::slice::from_ref(&artifact), std::slice::from_ref(&artifact))
            .unwrap();
        assert!(mappings.is_empty());
    }
}
