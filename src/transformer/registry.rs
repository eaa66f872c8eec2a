//! Loading, selecting and initializing the active transformer set
//!
//! A registry is built once per run. [`TransformerRegistry::initialize`] takes
//! the parsed configs in precedence order and leaves behind the active
//! transformers sorted by name, each bound to its own [`Environment`].

use super::{ClassRegistry, Transformer, TransformerError};
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::environment::{EnvInfo, Environment, EnvironmentError, DEFAULT_EXEC_TIMEOUT};
use crate::selector::Selector;
use crate::types::{TransformerConfig, TransformerConfigError};
use crate::util::fs::{find_yaml_files, replicate};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Transformer configs compiled into the binary, keyed by file stem
const BUILTIN_CONFIGS: &[(&str, &str)] = &[
    ("dockerfile", include_str!("../../assets/transformers/dockerfile.yaml")),
    ("golang", include_str!("../../assets/transformers/golang.yaml")),
    ("maven", include_str!("../../assets/transformers/maven.yaml")),
    ("nodejs", include_str!("../../assets/transformers/nodejs.yaml")),
    ("python", include_str!("../../assets/transformers/python.yaml")),
    ("rust", include_str!("../../assets/transformers/rust.yaml")),
];

/// Run-wide inputs shared by every environment the registry builds
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    pub project_name: String,
    pub source: PathBuf,
    pub output: PathBuf,
    pub temp_root: PathBuf,
    /// Run selector. An empty selector picks every config not labelled
    /// `default-selected: "false"`.
    pub selector: Selector,
    pub exec_timeout: Duration,
}

impl RegistryOptions {
    pub fn new(
        project_name: impl Into<String>,
        source: impl Into<PathBuf>,
        temp_root: impl Into<PathBuf>,
    ) -> Self {
        let temp_root = temp_root.into();
        Self {
            project_name: project_name.into(),
            source: source.into(),
            output: temp_root.join("output"),
            temp_root,
            selector: Selector::everything(),
            exec_timeout: DEFAULT_EXEC_TIMEOUT,
        }
    }
}

/// Outcome of [`TransformerRegistry::initialize`]
#[derive(Debug, Default)]
pub struct ActivationReport {
    /// Active transformer names, sorted
    pub active: Vec<String>,
    /// Configs that were not activated, name to config path
    pub deselected: BTreeMap<String, PathBuf>,
    pub invoked_by_default: Vec<String>,
    pub diagnostics: Diagnostics,
}

pub struct TransformerRegistry {
    classes: ClassRegistry,
    transformers: Vec<Box<dyn Transformer>>,
    deselected: BTreeMap<String, PathBuf>,
    invoked_by_default: Vec<String>,
}

impl std::fmt::Debug for TransformerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformerRegistry")
            .field("classes", &self.classes)
            .field("active", &self.names())
            .field("deselected", &self.deselected)
            .finish()
    }
}

impl Default for TransformerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl TransformerRegistry {
    pub fn new(classes: ClassRegistry) -> Self {
        Self {
            classes,
            transformers: Vec::new(),
            deselected: BTreeMap::new(),
            invoked_by_default: Vec::new(),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ClassRegistry::with_defaults())
    }

    pub fn classes(&self) -> &ClassRegistry {
        &self.classes
    }

    /// Parses every `*.yaml`/`*.yml` under `dir` in sorted path order.
    /// Documents of another kind are skipped silently.
    pub fn load_dir(dir: &Path) -> (Vec<TransformerConfig>, Diagnostics) {
        let mut configs = Vec::new();
        let mut diagnostics = Diagnostics::new();
        for path in find_yaml_files(dir) {
            match TransformerConfig::from_file(&path) {
                Ok(config) => configs.push(config),
                Err(TransformerConfigError::WrongKind { path, kind }) => {
                    debug!(path = %path.display(), kind = %kind, "Skipping non-transformer document");
                }
                Err(err) => diagnostics.push(err),
            }
        }
        debug!(dir = %dir.display(), count = configs.len(), "Loaded transformer configs");
        (configs, diagnostics)
    }

    /// Materializes the embedded configs under `temp_root` so each has a
    /// real context directory, then parses them.
    pub fn builtin_configs(temp_root: &Path) -> (Vec<TransformerConfig>, Diagnostics) {
        let mut configs = Vec::new();
        let mut diagnostics = Diagnostics::new();
        for (stem, contents) in BUILTIN_CONFIGS {
            let dir = temp_root.join("builtin-transformers").join(stem);
            let path = dir.join(format!("{stem}.yaml"));
            let written = fs::create_dir_all(&dir).and_then(|_| fs::write(&path, contents));
            if let Err(source) = written {
                diagnostics.push(TransformerConfigError::Read { path, source });
                continue;
            }
            match TransformerConfig::from_yaml(contents, &path) {
                Ok(config) => configs.push(config),
                Err(err) => diagnostics.push(err),
            }
        }
        (configs, diagnostics)
    }

    /// Replaces the active set with the transformers selected from `configs`.
    ///
    /// `configs` is in precedence order: on a name clash the first one wins.
    pub fn initialize(
        &mut self,
        configs: Vec<TransformerConfig>,
        options: &RegistryOptions,
    ) -> ActivationReport {
        let mut diagnostics = self.destroy();
        self.deselected.clear();
        self.invoked_by_default.clear();

        let known = self.accept(configs, &mut diagnostics);
        let candidates = self.select(known, &options.selector);
        let survivors = self.apply_overrides(candidates, &mut diagnostics);

        for config in survivors {
            let name = config.name().to_string();
            let path = config.path.clone();
            match self.activate(config, options, &mut diagnostics) {
                Ok(transformer) => self.transformers.push(transformer),
                Err(err) => {
                    diagnostics.push(err.into_diagnostic(&name));
                    self.deselected.insert(name, path);
                }
            }
        }

        self.invoked_by_default = self
            .transformers
            .iter()
            .filter(|t| t.get_config().0.spec.invoked_by_default.enabled)
            .map(|t| t.name().to_string())
            .collect();
        self.check_dependencies(&mut diagnostics);

        info!(
            active = self.transformers.len(),
            deselected = self.deselected.len(),
            "Initialized transformers"
        );
        ActivationReport {
            active: self.names().into_iter().map(str::to_string).collect(),
            deselected: self.deselected.clone(),
            invoked_by_default: self.invoked_by_default.clone(),
            diagnostics,
        }
    }

    /// Drops duplicate names and configs whose class has no constructor
    fn accept(
        &self,
        configs: Vec<TransformerConfig>,
        diagnostics: &mut Diagnostics,
    ) -> Vec<TransformerConfig> {
        let mut seen: BTreeMap<String, PathBuf> = BTreeMap::new();
        let mut accepted = Vec::new();
        for config in configs {
            if let Some(kept) = seen.get(config.name()) {
                diagnostics.push(Diagnostic::DuplicateName {
                    name: config.name().to_string(),
                    kept: kept.clone(),
                    ignored: config.path.clone(),
                });
                continue;
            }
            seen.insert(config.name().to_string(), config.path.clone());
            if !self.classes.contains(config.class()) {
                diagnostics.push(Diagnostic::UnknownClass {
                    name: config.name().to_string(),
                    class: config.class().to_string(),
                    path: config.path.clone(),
                });
                continue;
            }
            accepted.push(config);
        }
        accepted
    }

    fn select(&mut self, configs: Vec<TransformerConfig>, selector: &Selector) -> Vec<TransformerConfig> {
        let (candidates, rejected): (Vec<_>, Vec<_>) = configs.into_iter().partition(|config| {
            if selector.is_empty() {
                config.selected_by_default()
            } else {
                selector.matches(config.labels())
            }
        });
        for config in rejected {
            debug!(transformer = %config.name(), "Not selected");
            self.deselected.insert(config.name().to_string(), config.path);
        }
        candidates
    }

    /// Removes every candidate matched by another candidate's override
    /// selector. Exclusion is evaluated once against the full candidate set,
    /// so an overridden transformer's own selector still applies.
    fn apply_overrides(
        &mut self,
        candidates: Vec<TransformerConfig>,
        diagnostics: &mut Diagnostics,
    ) -> Vec<TransformerConfig> {
        let mut excluded: BTreeMap<String, String> = BTreeMap::new();
        for config in &candidates {
            let Ok(Some(selector)) = config.override_selector() else {
                continue;
            };
            for other in &candidates {
                if other.name() != config.name()
                    && selector.matches(other.labels())
                    && !excluded.contains_key(other.name())
                {
                    excluded.insert(other.name().to_string(), config.name().to_string());
                }
            }
        }

        let mut survivors = Vec::new();
        for config in candidates {
            match excluded.remove(config.name()) {
                Some(by) => {
                    diagnostics.push(Diagnostic::Overridden {
                        name: config.name().to_string(),
                        by,
                    });
                    self.deselected.insert(config.name().to_string(), config.path);
                }
                None => survivors.push(config),
            }
        }
        survivors.sort_by(|a, b| a.name().cmp(b.name()));
        survivors
    }

    fn activate(
        &self,
        config: TransformerConfig,
        options: &RegistryOptions,
        diagnostics: &mut Diagnostics,
    ) -> Result<Box<dyn Transformer>, ActivationError> {
        let context = config.context_dir();
        for (src, dest) in &config.spec.external_files {
            if let Err(err) = replicate(&context.join(src), &context.join(dest)) {
                // The transformer may still work without them
                diagnostics.push(Diagnostic::ExternalFiles {
                    name: config.name().to_string(),
                    reason: format!("{src} -> {dest}: {err}"),
                });
            }
        }

        let info = EnvInfo {
            name: config.name().to_string(),
            project_name: options.project_name.clone(),
            isolated: config.spec.isolated,
            source: options.source.clone(),
            output: options.output.clone(),
            context,
            rel_templates_dir: config.spec.templates_dir.clone(),
            temp_root: options.temp_root.clone(),
            container: config.spec.container.clone(),
            exec_timeout: options.exec_timeout,
        };
        let env = Environment::new(info).map_err(ActivationError::Environment)?;
        let transformer = self
            .classes
            .construct(config, env)
            .map_err(ActivationError::Transformer)?;
        debug!(transformer = %transformer.name(), "Activated transformer");
        Ok(transformer)
    }

    fn check_dependencies(&self, diagnostics: &mut Diagnostics) {
        for transformer in &self.transformers {
            let config = transformer.get_config().0;
            let Ok(Some(dependency)) = config.dependency_selector() else {
                continue;
            };
            let satisfied = self.transformers.iter().any(|other| {
                other.name() != config.name() && dependency.matches(other.get_config().0.labels())
            });
            if !satisfied {
                diagnostics.push(Diagnostic::MissingDependency {
                    name: config.name().to_string(),
                });
            }
        }
    }

    pub fn len(&self) -> usize {
        self.transformers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transformers.is_empty()
    }

    /// Active transformer names in activation order
    pub fn names(&self) -> Vec<&str> {
        self.transformers.iter().map(|t| t.name()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&dyn Transformer> {
        self.transformers
            .iter()
            .find(|t| t.name() == name)
            .map(|t| &**t)
    }

    pub fn transformers(&self) -> impl Iterator<Item = &dyn Transformer> {
        self.transformers.iter().map(|t| &**t)
    }

    /// Active transformers whose labels match `selector`, in name order
    pub fn filtered_mut<'a>(
        &'a mut self,
        selector: &'a Selector,
    ) -> impl Iterator<Item = &'a mut (dyn Transformer + 'static)> + 'a {
        self.transformers
            .iter_mut()
            .filter(move |t| selector.matches(t.get_config().0.labels()))
            .map(|t| &mut **t)
    }

    /// Active transformer name to config path
    pub fn active_configs(&self) -> BTreeMap<String, PathBuf> {
        self.transformers
            .iter()
            .map(|t| (t.name().to_string(), t.get_config().0.path.clone()))
            .collect()
    }

    pub fn deselected(&self) -> &BTreeMap<String, PathBuf> {
        &self.deselected
    }

    pub fn invoked_by_default(&self) -> &[String] {
        &self.invoked_by_default
    }

    /// Destroys every environment and empties the active set
    pub fn destroy(&mut self) -> Diagnostics {
        let mut diagnostics = Diagnostics::new();
        let count = self.transformers.len();
        for mut transformer in self.transformers.drain(..) {
            if let Err(source) = transformer.environment_mut().destroy() {
                diagnostics.push(Diagnostic::Destroy {
                    name: transformer.name().to_string(),
                    source,
                });
            }
        }
        if count > 0 {
            debug!(count, "Destroyed transformer environments");
        }
        diagnostics
    }
}

impl Drop for TransformerRegistry {
    fn drop(&mut self) {
        self.destroy();
    }
}

enum ActivationError {
    Environment(EnvironmentError),
    Transformer(TransformerError),
}

impl ActivationError {
    fn into_diagnostic(self, name: &str) -> Diagnostic {
        let name = name.to_string();
        match self {
            ActivationError::Environment(source)
            | ActivationError::Transformer(TransformerError::Environment(source))
                if source.is_no_container_runtime() =>
            {
                Diagnostic::NoContainerRuntime { name, source }
            }
            ActivationError::Environment(err) => Diagnostic::InitFailed {
                name,
                reason: err.to_string(),
            },
            ActivationError::Transformer(err) => Diagnostic::InitFailed {
                name,
                reason: err.to_string(),
            },
        }
    }
}
