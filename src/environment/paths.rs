//! Host/sandbox path translation
//!
//! Values crossing an environment boundary are deep-copied and every path found
//! inside them is rewritten one at a time. The rewrite rules themselves are pure
//! functions over the environment's roots; [`Environment`](super::Environment)
//! supplies the side effects (uploads) the rules ask for.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Structural access to every path held by a value
///
/// Map keys are never visited, only values. Free-form payloads such as JSON
/// configs are opaque and should not be visited either.
pub trait TranslatePaths {
    fn visit_paths(&mut self, visit: &mut dyn FnMut(&mut PathBuf));
}

impl TranslatePaths for PathBuf {
    fn visit_paths(&mut self, visit: &mut dyn FnMut(&mut PathBuf)) {
        visit(self);
    }
}

impl<T: TranslatePaths> TranslatePaths for Option<T> {
    fn visit_paths(&mut self, visit: &mut dyn FnMut(&mut PathBuf)) {
        if let Some(inner) = self {
            inner.visit_paths(visit);
        }
    }
}

impl<T: TranslatePaths> TranslatePaths for Box<T> {
    fn visit_paths(&mut self, visit: &mut dyn FnMut(&mut PathBuf)) {
        (**self).visit_paths(visit);
    }
}

impl<T: TranslatePaths> TranslatePaths for Vec<T> {
    fn visit_paths(&mut self, visit: &mut dyn FnMut(&mut PathBuf)) {
        for item in self.iter_mut() {
            item.visit_paths(visit);
        }
    }
}

impl<K: Ord, V: TranslatePaths> TranslatePaths for BTreeMap<K, V> {
    fn visit_paths(&mut self, visit: &mut dyn FnMut(&mut PathBuf)) {
        for value in self.values_mut() {
            value.visit_paths(visit);
        }
    }
}

impl<K, V: TranslatePaths, S> TranslatePaths for HashMap<K, V, S> {
    fn visit_paths(&mut self, visit: &mut dyn FnMut(&mut PathBuf)) {
        for value in self.values_mut() {
            value.visit_paths(visit);
        }
    }
}

/// A path that could not be translated. The path is replaced by an empty path
/// in the translated value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranslateError {
    #[error("Path {0} is not under any known root")]
    UnknownPath(PathBuf),

    #[error("Cannot decode relative path {0}")]
    RelativeDecode(PathBuf),

    #[error("Failed to upload {path}: {reason}")]
    UploadFailed { path: PathBuf, reason: String },
}

impl TranslateError {
    pub fn path(&self) -> &Path {
        match self {
            TranslateError::UnknownPath(path) | TranslateError::RelativeDecode(path) => path,
            TranslateError::UploadFailed { path, .. } => path,
        }
    }
}

/// Translated copy of a value plus the paths that could not be translated
#[derive(Debug, Clone, PartialEq)]
pub struct Translation<T> {
    pub value: T,
    pub diagnostics: Vec<TranslateError>,
}

impl<T> Translation<T> {
    /// Returns the translated copy unchanged
    pub fn unchanged(value: T) -> Self {
        Self {
            value,
            diagnostics: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn into_parts(self) -> (T, Vec<TranslateError>) {
        (self.value, self.diagnostics)
    }

    /// The translated value, or the first rejected path
    pub fn into_result(self) -> Result<T, TranslateError> {
        match self.diagnostics.into_iter().next() {
            Some(err) => Err(err),
            None => Ok(self.value),
        }
    }
}

/// Clones `value` and rewrites every path in the copy. Paths the rewrite
/// rejects become empty and are reported; siblings are still rewritten.
pub fn translate<T, F>(value: &T, mut rewrite: F) -> Translation<T>
where
    T: TranslatePaths + Clone,
    F: FnMut(&Path) -> Result<PathBuf, TranslateError>,
{
    let mut copy = value.clone();
    let mut diagnostics = Vec::new();
    copy.visit_paths(&mut |path| match rewrite(path) {
        Ok(rewritten) => *path = rewritten,
        Err(err) => {
            diagnostics.push(err);
            *path = PathBuf::new();
        }
    });
    Translation {
        value: copy,
        diagnostics,
    }
}

/// Roots the rewrite rules need, in both addressing spaces
#[derive(Debug, Clone, Copy)]
pub struct Roots<'a> {
    pub host_source: &'a Path,
    pub host_context: &'a Path,
    pub sandbox_source: &'a Path,
    pub sandbox_context: &'a Path,
    pub temp: &'a Path,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeAction {
    Unchanged,
    /// Join this relative path onto the sandbox-local output root
    JoinOutput(PathBuf),
    Rebased(PathBuf),
    /// Upload the host path and use the returned sandbox path
    Upload,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeAction {
    Unchanged,
    Relative,
    Rebased(PathBuf),
    /// Path relative to the host output root
    OutputRelative(PathBuf),
    Unknown,
}

pub fn encode_rule(path: &Path, roots: &Roots<'_>) -> EncodeAction {
    if path.as_os_str().is_empty() {
        return EncodeAction::Unchanged;
    }
    if path.is_relative() {
        return EncodeAction::JoinOutput(path.to_path_buf());
    }
    if let Some(rebased) = rebase(path, roots.host_source, roots.sandbox_source) {
        return EncodeAction::Rebased(rebased);
    }
    if let Some(rebased) = rebase(path, roots.host_context, roots.sandbox_context) {
        return EncodeAction::Rebased(rebased);
    }
    if path.starts_with(roots.temp) {
        return EncodeAction::Upload;
    }
    EncodeAction::Unknown
}

/// `sandbox_output` is the cached sandbox-local output root, if an upload
/// happened in the current reset epoch.
pub fn decode_rule(path: &Path, roots: &Roots<'_>, sandbox_output: Option<&Path>) -> DecodeAction {
    if path.as_os_str().is_empty() {
        return DecodeAction::Unchanged;
    }
    if path.is_relative() {
        return DecodeAction::Relative;
    }
    if let Some(rebased) = rebase(path, roots.sandbox_source, roots.host_source) {
        return DecodeAction::Rebased(rebased);
    }
    if let Some(rebased) = rebase(path, roots.sandbox_context, roots.host_context) {
        return DecodeAction::Rebased(rebased);
    }
    if let Some(output) = sandbox_output {
        if let Ok(rel) = path.strip_prefix(output) {
            return DecodeAction::OutputRelative(rel.to_path_buf());
        }
    }
    if path.starts_with(roots.temp) {
        return DecodeAction::Unchanged;
    }
    DecodeAction::Unknown
}

/// Moves `path` from under `from` to under `to`, keeping the relative offset.
/// Prefix checks are component-wise, so `/src-old` is not under `/src`.
pub fn rebase(path: &Path, from: &Path, to: &Path) -> Option<PathBuf> {
    if from.as_os_str().is_empty() {
        return None;
    }
    let rel = path.strip_prefix(from).ok()?;
    if rel.as_os_str().is_empty() {
        Some(to.to_path_buf())
    } else {
        Some(to.join(rel))
    }
}
