//! Transformer plugin contract and class dispatch
//!
//! A transformer is bound to one [`TransformerConfig`] and owns one
//! [`Environment`] for its entire lifetime. Concrete behaviour is chosen by the
//! config's `class` string through a [`ClassRegistry`].

pub mod executable;
pub mod manifest;
pub mod registry;

pub use executable::Executable;
pub use manifest::ManifestDetector;
pub use registry::{ActivationReport, TransformerRegistry};

use crate::environment::{Environment, EnvironmentError, TranslateError};
use crate::types::{Artifact, DetectedServices, PathMapping, TransformerConfig};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransformerError {
    #[error(transparent)]
    Environment(#[from] EnvironmentError),

    #[error("Path translation failed: {0}")]
    Translation(#[from] TranslateError),

    #[error("Invalid configuration for transformer '{name}': {reason}")]
    InvalidConfig { name: String, reason: String },

    #[error("Command failed with exit code {exit_code}: {stderr}")]
    CommandFailed { exit_code: i32, stderr: String },

    #[error("Failed to parse transformer output: {0}")]
    Output(#[from] serde_json::Error),

    #[error("Unknown transformer class '{0}'")]
    UnknownClass(String),
}

/// Capability set of an initialized transformer
pub trait Transformer: Send {
    fn get_config(&self) -> (&TransformerConfig, &Environment);

    fn environment_mut(&mut self) -> &mut Environment;

    /// Services rooted at or under `dir`. `dir` is already in this
    /// transformer's sandbox addressing. Implementations must not walk deeper
    /// than the directory itself asks for; the planner decides what to visit.
    fn directory_detect(&mut self, dir: &Path) -> Result<DetectedServices, TransformerError>;

    /// Placement instructions and new artifacts for `new_artifacts`
    fn transform(
        &mut self,
        new_artifacts: &[Artifact],
        already_seen: &[Artifact],
    ) -> Result<(Vec<PathMapping>, Vec<Artifact>), TransformerError>;

    fn name(&self) -> &str {
        self.get_config().0.name()
    }
}

/// A transformer variant constructible from its config
pub trait TransformerClass: Transformer + Sized + 'static {
    const CLASS: &'static str;

    /// Binds the config and environment. A failure keeps the transformer out
    /// of the active set.
    fn init(config: TransformerConfig, env: Environment) -> Result<Self, TransformerError>;
}

pub type Constructor = Arc<
    dyn Fn(TransformerConfig, Environment) -> Result<Box<dyn Transformer>, TransformerError>
        + Send
        + Sync,
>;

/// Class identifier to constructor
#[derive(Clone, Default)]
pub struct ClassRegistry {
    constructors: BTreeMap<String, Constructor>,
}

impl std::fmt::Debug for ClassRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassRegistry")
            .field("classes", &self.constructors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register::<ManifestDetector>();
        registry.register::<Executable>();
        registry
    }

    pub fn register<T: TransformerClass>(&mut self) {
        self.register_fn(T::CLASS, |config, env| {
            T::init(config, env).map(|t| Box::new(t) as Box<dyn Transformer>)
        });
    }

    pub fn register_fn<F>(&mut self, class: &str, constructor: F)
    where
        F: Fn(TransformerConfig, Environment) -> Result<Box<dyn Transformer>, TransformerError>
            + Send
            + Sync
            + 'static,
    {
        self.constructors
            .insert(class.to_string(), Arc::new(constructor));
    }

    pub fn contains(&self, class: &str) -> bool {
        self.constructors.contains_key(class)
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    pub fn construct(
        &self,
        config: TransformerConfig,
        env: Environment,
    ) -> Result<Box<dyn Transformer>, TransformerError> {
        let constructor = self
            .constructors
            .get(config.class())
            .ok_or_else(|| TransformerError::UnknownClass(config.class().to_string()))?;
        constructor(config, env)
    }
}

/// Names a service after the last component of its directory
pub(crate) fn dir_service_name(dir: &Path) -> String {
    dir.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Output location of a service's sources: `source/<service>`
pub(crate) fn service_output_dir(service: &str) -> PathBuf {
    Path::new("source").join(service)
}
