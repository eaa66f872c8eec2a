//! Non-fatal conditions collected during a run
//!
//! Operations that log and continue return their value together with a
//! [`Diagnostics`] list, so callers and tests can inspect what was skipped.

use crate::environment::{EnvironmentError, TranslateError};
use crate::types::TransformerConfigError;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Debug,
    Warning,
    Error,
}

#[derive(Debug, Error)]
pub enum Diagnostic {
    #[error("{0}")]
    ConfigParse(#[from] TransformerConfigError),

    #[error("Transformer '{name}' ({path}) uses unknown class '{class}'")]
    UnknownClass {
        name: String,
        class: String,
        path: PathBuf,
    },

    #[error("Ignoring transformer '{name}' from {ignored}, already loaded from {kept}")]
    DuplicateName {
        name: String,
        kept: PathBuf,
        ignored: PathBuf,
    },

    #[error("Transformer '{name}' excluded by the override selector of '{by}'")]
    Overridden { name: String, by: String },

    #[error("Failed to replicate external files for transformer '{name}': {reason}")]
    ExternalFiles { name: String, reason: String },

    #[error("Transformer '{name}' skipped: {source}")]
    NoContainerRuntime {
        name: String,
        source: EnvironmentError,
    },

    #[error("Failed to initialize transformer '{name}': {reason}")]
    InitFailed { name: String, reason: String },

    #[error("Dependency selector of transformer '{name}' matches no active transformer")]
    MissingDependency { name: String },

    #[error("Path translation failed in transformer '{transformer}': {source}")]
    Translation {
        transformer: String,
        source: TranslateError,
    },

    #[error("Failed to reset environment of transformer '{transformer}': {source}")]
    Reset {
        transformer: String,
        source: EnvironmentError,
    },

    #[error("Transformer '{transformer}' failed to detect services in {dir}: {reason}")]
    DetectFailed {
        transformer: String,
        dir: PathBuf,
        reason: String,
    },

    #[error("Skipping unreadable entry: {reason}")]
    WalkEntry { path: Option<PathBuf>, reason: String },

    #[error("Failed to read ignore file {path}: {reason}")]
    IgnoreFile { path: PathBuf, reason: String },

    #[error("Failed to destroy environment of transformer '{name}': {source}")]
    Destroy {
        name: String,
        source: EnvironmentError,
    },
}

impl Diagnostic {
    pub fn severity(&self) -> Severity {
        match self {
            Diagnostic::NoContainerRuntime { .. } | Diagnostic::Overridden { .. } => {
                Severity::Debug
            }
            Diagnostic::InitFailed { .. } | Diagnostic::Destroy { .. } => Severity::Error,
            _ => Severity::Warning,
        }
    }
}

/// Ordered list of diagnostics. Every pushed diagnostic is also logged at its
/// severity.
#[derive(Debug, Default)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: impl Into<Diagnostic>) {
        let diagnostic = diagnostic.into();
        match diagnostic.severity() {
            Severity::Debug => debug!("{}", diagnostic),
            Severity::Warning => warn!("{}", diagnostic),
            Severity::Error => error!("{}", diagnostic),
        }
        self.items.push(diagnostic);
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.items.extend(other.items);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.items.iter().filter(|d| d.severity() == severity).count()
    }

    /// Rendered diagnostics at or above `min`, in push order
    pub fn messages(&self, min: Severity) -> Vec<String> {
        self.items
            .iter()
            .filter(|d| d.severity() >= min)
            .map(ToString::to_string)
            .collect()
    }

    /// True when any diagnostic satisfies `predicate`
    pub fn any(&self, predicate: impl Fn(&Diagnostic) -> bool) -> bool {
        self.items.iter().any(predicate)
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.items
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}
