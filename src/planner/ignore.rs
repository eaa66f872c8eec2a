//! `.m2kignore` marker files
//!
//! Each trimmed, non-empty line names a path relative to the marker's
//! directory. A trailing `*` prunes the whole subtree; without it only
//! detection on that directory is skipped and its children are still walked.

use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::util::fs::find_files_named;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const IGNORE_FILENAME: &str = ".m2kignore";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IgnoreRules {
    skip_detection: BTreeSet<PathBuf>,
    prune: BTreeSet<PathBuf>,
}

impl IgnoreRules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collects the rules of every marker file under `root`
    pub fn load(root: &Path) -> (Self, Diagnostics) {
        let mut rules = Self::new();
        let mut diagnostics = Diagnostics::new();
        for marker in find_files_named(root, IGNORE_FILENAME) {
            let Some(dir) = marker.parent() else {
                continue;
            };
            match fs::read_to_string(&marker) {
                Ok(contents) => rules.add(dir, &contents),
                Err(err) => diagnostics.push(Diagnostic::IgnoreFile {
                    path: marker.clone(),
                    reason: err.to_string(),
                }),
            }
        }
        debug!(
            skip_detection = rules.skip_detection.len(),
            prune = rules.prune.len(),
            "Loaded ignore rules"
        );
        (rules, diagnostics)
    }

    /// Adds the rules of one marker file found in `dir`
    pub fn add(&mut self, dir: &Path, contents: &str) {
        for line in contents.lines().map(str::trim).filter(|l| !l.is_empty()) {
            match line.strip_suffix('*') {
                Some(prefix) => {
                    self.prune.insert(dir.join(prefix));
                }
                None => {
                    self.skip_detection.insert(dir.join(line));
                }
            }
        }
    }

    /// Whether the subtree at `dir` is left out entirely
    pub fn prunes(&self, dir: &Path) -> bool {
        self.prune.contains(dir)
    }

    pub fn skips_detection(&self, dir: &Path) -> bool {
        self.skip_detection.contains(dir) || self.prunes(dir)
    }

    pub fn is_empty(&self) -> bool {
        self.skip_detection.is_empty() && self.prune.is_empty()
    }
}
