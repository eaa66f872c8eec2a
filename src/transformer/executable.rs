//! Transformer backed by external commands
//!
//! ```yaml
//! spec:
//!   class: Executable
//!   config:
//!     directoryDetectCmd: ["./detect.sh"]
//!     transformCmd: ["./transform.sh"]
//! ```
//!
//! `directoryDetectCmd` runs with the directory appended as the last argument
//! and prints a JSON object of service name to artifact list. `transformCmd`
//! runs with the path of a JSON file holding `newArtifacts` and
//! `alreadySeenArtifacts` appended, and prints `pathMappings` and
//! `createdArtifacts`. Commands run in the transformer's environment, so every
//! path they see or print is in sandbox addressing.

use super::{Transformer, TransformerClass, TransformerError};
use crate::environment::Environment;
use crate::types::{Artifact, DetectedServices, PathMapping, TransformerConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecutableConfig {
    #[serde(default)]
    directory_detect_cmd: Vec<String>,

    #[serde(default)]
    transform_cmd: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TransformInput<'a> {
    new_artifacts: &'a [Artifact],
    already_seen_artifacts: &'a [Artifact],
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransformOutput {
    #[serde(default)]
    path_mappings: Vec<PathMapping>,

    #[serde(default)]
    created_artifacts: Vec<Artifact>,
}

pub struct Executable {
    config: TransformerConfig,
    env: Environment,
    settings: ExecutableConfig,
}

impl TransformerClass for Executable {
    const CLASS: &'static str = "Executable";

    fn init(config: TransformerConfig, env: Environment) -> Result<Self, TransformerError> {
        let settings: ExecutableConfig = if config.spec.config.is_null() {
            ExecutableConfig::default()
        } else {
            serde_json::from_value(config.spec.config.clone()).map_err(|e| {
                TransformerError::InvalidConfig {
                    name: config.name().to_string(),
                    reason: e.to_string(),
                }
            })?
        };
        if settings.directory_detect_cmd.is_empty() && settings.transform_cmd.is_empty() {
            warn!(transformer = %config.name(), "Executable transformer has no commands configured");
        }
        Ok(Self {
            config,
            env,
            settings,
        })
    }
}

impl Executable {
    fn run(&mut self, base: &[String], arg: &Path) -> Result<String, TransformerError> {
        let mut command = base.to_vec();
        command.push(arg.display().to_string());
        let output = self.env.exec(&command, &[]);
        if let Some(err) = output.error {
            return Err(err.into());
        }
        if output.exit_code != 0 {
            return Err(TransformerError::CommandFailed {
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output.stdout)
    }

    /// Writes the transform input under the shared temp root, where encoding
    /// uploads it into the sandbox
    fn write_input(&self, input: &TransformInput<'_>) -> Result<PathBuf, TransformerError> {
        let dir = self
            .env
            .info()
            .temp_root
            .join("executable")
            .join(Uuid::new_v4().simple().to_string());
        fs::create_dir_all(&dir)
            .map_err(|e| crate::environment::EnvironmentError::io(&dir, e))?;
        let path = dir.join("artifacts.json");
        let contents = serde_json::to_vec_pretty(input)?;
        fs::write(&path, contents).map_err(|e| crate::environment::EnvironmentError::io(&path, e))?;
        Ok(path)
    }
}

impl Transformer for Executable {
    fn get_config(&self) -> (&TransformerConfig, &Environment) {
        (&self.config, &self.env)
    }

    fn environment_mut(&mut self) -> &mut Environment {
        &mut self.env
    }

    fn directory_detect(&mut self, dir: &Path) -> Result<DetectedServices, TransformerError> {
        if self.settings.directory_detect_cmd.is_empty() {
            return Ok(DetectedServices::new());
        }
        let command = self.settings.directory_detect_cmd.clone();
        let stdout = self.run(&command, dir)?;
        if stdout.trim().is_empty() {
            return Ok(DetectedServices::new());
        }
        let services: DetectedServices = serde_json::from_str(&stdout)?;
        debug!(
            transformer = %self.config.name(),
            dir = %dir.display(),
            services = services.len(),
            "Detect command finished"
        );
        Ok(services)
    }

    fn transform(
        &mut self,
        new_artifacts: &[Artifact],
        already_seen: &[Artifact],
    ) -> Result<(Vec<PathMapping>, Vec<Artifact>), TransformerError> {
        if self.settings.transform_cmd.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }
        let new_artifacts = self.env.encode(&new_artifacts.to_vec()).into_result()?;
        let already_seen = self.env.encode(&already_seen.to_vec()).into_result()?;
        let input_path = self.write_input(&TransformInput {
            new_artifacts: &new_artifacts,
            already_seen_artifacts: &already_seen,
        })?;
        let sandbox_input = self.env.encode(&input_path).into_result()?;

        let command = self.settings.transform_cmd.clone();
        let stdout = self.run(&command, &sandbox_input)?;
        let output: TransformOutput = if stdout.trim().is_empty() {
            TransformOutput::default()
        } else {
            serde_json::from_str(&stdout)?
        };
        let mappings = self.env.decode(&output.path_mappings).into_result()?;
        let created = self.env.decode(&output.created_artifacts).into_result()?;
        Ok((mappings, created))
    }
}
