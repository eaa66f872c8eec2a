//! Recursive service discovery
//!
//! [`Planner::get_services`] runs the root-only transformers once on the base
//! directory, then walks the tree pre-order and asks every walk transformer
//! about each directory it keeps. Directories a transformer reports as service
//! directories are claimed and never examined again. The unnamed services left
//! at the end get names from [`naming::name_services`].

pub mod ignore;
pub mod naming;

pub use ignore::{IgnoreRules, IGNORE_FILENAME};
pub use naming::{name_services, normalize_name};

use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::progress::{NoOpHandler, ProgressEvent, ProgressHandler};
use crate::selector::Selector;
use crate::transformer::{Transformer, TransformerRegistry};
use crate::types::ServiceMap;
use regex::Regex;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

/// Directory names pruned before any transformer sees them
pub const DEFAULT_IGNORE_DIR_PATTERNS: &[&str] = &[r"^\..+", r"^node_modules$", r"^__pycache__$"];

#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("Failed to read source directory {path}: {source}")]
    Root {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Source path {0} is not a directory")]
    NotADirectory(PathBuf),

    #[error("Invalid ignore pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        source: regex::Error,
    },
}

/// Services found in one run, already named
#[derive(Debug, Default)]
pub struct PlanningResult {
    pub services: ServiceMap,
    /// Directories the walk transformers were asked to detect in
    pub directories_visited: usize,
    pub diagnostics: Diagnostics,
}

pub struct Planner<'r> {
    registry: &'r mut TransformerRegistry,
    ignore_dirs: Vec<Regex>,
    progress: Arc<dyn ProgressHandler>,
}

impl<'r> Planner<'r> {
    pub fn new(registry: &'r mut TransformerRegistry) -> Self {
        Self {
            registry,
            ignore_dirs: default_ignore_dirs(),
            progress: Arc::new(NoOpHandler),
        }
    }

    pub fn with_progress(mut self, handler: Arc<dyn ProgressHandler>) -> Self {
        self.progress = handler;
        self
    }

    /// Replaces the built-in directory name patterns
    pub fn with_ignore_patterns(mut self, patterns: &[&str]) -> Result<Self, PlannerError> {
        self.ignore_dirs = patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|source| PlannerError::Pattern {
                    pattern: pattern.to_string(),
                    source,
                })
            })
            .collect::<Result<_, _>>()?;
        Ok(self)
    }

    /// Detects and names the services under `root` using the active
    /// transformers matching `selector` (all of them when `None`).
    ///
    /// Only an unreadable `root` is fatal. Everything else is reported in
    /// [`PlanningResult::diagnostics`].
    pub fn get_services(
        &mut self,
        project: &str,
        root: &Path,
        selector: Option<&Selector>,
    ) -> Result<PlanningResult, PlannerError> {
        let started = Instant::now();
        let metadata = std::fs::metadata(root).map_err(|source| {
            self.progress.on_progress(&ProgressEvent::Failed {
                error: source.to_string(),
            });
            PlannerError::Root {
                path: root.to_path_buf(),
                source,
            }
        })?;
        if !metadata.is_dir() {
            return Err(PlannerError::NotADirectory(root.to_path_buf()));
        }
        self.progress.on_progress(&ProgressEvent::Started {
            root: root.to_path_buf(),
        });

        let everything = Selector::everything();
        let selector = selector.unwrap_or(&everything);
        let mut run = Run {
            root,
            transformers: self.registry.filtered_mut(selector).collect(),
            ignore_dirs: &self.ignore_dirs,
            progress: self.progress.as_ref(),
            rules: IgnoreRules::new(),
            claimed: BTreeSet::new(),
            services: ServiceMap::new(),
            visited: 0,
            diagnostics: Diagnostics::new(),
        };
        debug!(transformers = run.transformers.len(), root = %root.display(), "Planning services");

        let (rules, ignore_diagnostics) = IgnoreRules::load(root);
        run.rules = rules;
        run.diagnostics.extend(ignore_diagnostics);

        run.root_pass();
        run.walk()?;

        let Run {
            services,
            visited,
            diagnostics,
            ..
        } = run;
        let services = name_services(services, project, root);
        info!("[Named Services] Identified {} named services", services.named_count());
        self.progress.on_progress(&ProgressEvent::Completed {
            named_services: services.named_count(),
            directories_visited: visited,
            total_time: started.elapsed(),
        });

        Ok(PlanningResult {
            services,
            directories_visited: visited,
            diagnostics,
        })
    }
}

fn default_ignore_dirs() -> Vec<Regex> {
    DEFAULT_IGNORE_DIR_PATTERNS
        .iter()
        .map(|pattern| Regex::new(pattern).expect("valid regex"))
        .collect()
}

/// State of one `get_services` call
struct Run<'a> {
    root: &'a Path,
    transformers: Vec<&'a mut (dyn Transformer + 'static)>,
    ignore_dirs: &'a [Regex],
    progress: &'a dyn ProgressHandler,
    rules: IgnoreRules,
    claimed: BTreeSet<PathBuf>,
    services: ServiceMap,
    visited: usize,
    diagnostics: Diagnostics,
}

enum Visit {
    Descend,
    Prune,
}

impl Run<'_> {
    fn root_pass(&mut self) {
        let mut found = ServiceMap::new();
        for transformer in self.transformers.iter_mut() {
            if !transformer.get_config().0.spec.directory_detect.at_root_only() {
                continue;
            }
            let Some(services) = detect(&mut **transformer, self.root, &mut self.diagnostics) else {
                continue;
            };
            self.progress.on_progress(&ProgressEvent::RootTransformer {
                transformer: transformer.name().to_string(),
                services: services.len(),
            });
            found.merge(services);
        }
        if !found.is_empty() {
            info!("[Base Directory] {}", found.summary());
        }
        self.services.merge(found);
    }

    fn walk(&mut self) -> Result<(), PlannerError> {
        let mut entries = WalkDir::new(self.root).sort_by_file_name().into_iter();
        while let Some(entry) = entries.next() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) if err.depth() == 0 => {
                    let path = self.root.to_path_buf();
                    let source = err
                        .into_io_error()
                        .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "walk failed"));
                    return Err(PlannerError::Root { path, source });
                }
                Err(err) => {
                    self.diagnostics.push(Diagnostic::WalkEntry {
                        path: err.path().map(Path::to_path_buf),
                        reason: err.to_string(),
                    });
                    continue;
                }
            };
            if !entry.file_type().is_dir() {
                continue;
            }
            if let Visit::Prune = self.visit(entry.path(), entry.depth()) {
                entries.skip_current_dir();
            }
        }
        Ok(())
    }

    fn visit(&mut self, dir: &Path, depth: usize) -> Visit {
        if depth > 0 && self.is_ignored_name(dir) {
            debug!(dir = %dir.display(), "Pruning ignored directory");
            return Visit::Prune;
        }
        if self.claimed.contains(dir) {
            debug!(dir = %dir.display(), "Pruning claimed service directory");
            return Visit::Prune;
        }
        if self.rules.prunes(dir) {
            debug!(dir = %dir.display(), "Pruning directory listed in {}", IGNORE_FILENAME);
            return Visit::Prune;
        }

        if self.rules.skips_detection(dir) {
            debug!(dir = %dir.display(), "Skipping detection for directory listed in {}", IGNORE_FILENAME);
            return Visit::Descend;
        }
        self.visited += 1;
        self.progress.on_progress(&ProgressEvent::DirectoryVisited {
            dir: dir.to_path_buf(),
            depth,
        });

        let rel = dir.strip_prefix(self.root).unwrap_or(dir).to_path_buf();
        let mut claimed_here = false;
        for transformer in self.transformers.iter_mut() {
            if !transformer.get_config().0.spec.directory_detect.during_walk() {
                continue;
            }
            let Some(services) = detect(&mut **transformer, dir, &mut self.diagnostics) else {
                continue;
            };
            if services.is_empty() {
                continue;
            }
            for artifact in services.iter().flat_map(|(_, artifacts)| artifacts) {
                for service_dir in artifact.artifact.service_dirs() {
                    if service_dir.as_os_str().is_empty() {
                        continue;
                    }
                    claimed_here |= service_dir == dir;
                    self.claimed.insert(service_dir.clone());
                }
            }
            self.progress.on_progress(&ProgressEvent::ServicesDetected {
                transformer: transformer.name().to_string(),
                dir: dir.to_path_buf(),
                services: services.len(),
            });
            info!("[Directory Walk] {} in {}", services.summary(), rel.display());
            self.services.merge(services);
        }

        if claimed_here {
            Visit::Prune
        } else {
            Visit::Descend
        }
    }

    fn is_ignored_name(&self, dir: &Path) -> bool {
        let Some(name) = dir.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        self.ignore_dirs.iter().any(|re| re.is_match(name))
    }
}

/// Runs one transformer on one host directory: reset, encode, detect, decode.
/// `None` when any step failed; the failure is recorded.
fn detect(
    transformer: &mut dyn Transformer,
    dir: &Path,
    diagnostics: &mut Diagnostics,
) -> Option<ServiceMap> {
    let name = transformer.name().to_string();
    let env = transformer.environment_mut();
    if let Err(source) = env.reset() {
        diagnostics.push(Diagnostic::Reset {
            transformer: name,
            source,
        });
        return None;
    }

    let (sandbox_dir, errors) = env.encode(&dir.to_path_buf()).into_parts();
    let failed = !errors.is_empty();
    for source in errors {
        diagnostics.push(Diagnostic::Translation {
            transformer: name.clone(),
            source,
        });
    }
    if failed {
        return None;
    }

    let detected = match transformer.directory_detect(&sandbox_dir) {
        Ok(detected) => detected,
        Err(err) => {
            diagnostics.push(Diagnostic::DetectFailed {
                transformer: name,
                dir: dir.to_path_buf(),
                reason: err.to_string(),
            });
            return None;
        }
    };

    let (detected, errors) = transformer.get_config().1.decode(&detected).into_parts();
    for source in errors {
        diagnostics.push(Diagnostic::Translation {
            transformer: name.clone(),
            source,
        });
    }
    Some(ServiceMap::from_detected(&name, detected))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ignore_patterns() {
        let dirs = default_ignore_dirs();
        let ignored = |name: &str| dirs.iter().any(|re| re.is_match(name));
        assert!(ignored(".git"));
        assert!(ignored(".venv"));
        assert!(ignored("node_modules"));
        assert!(ignored("__pycache__"));
        assert!(!ignored("src"));
        assert!(!ignored("node_modules_backup"));
        assert!(!ignored("."));
    }

    #[test]
    fn test_invalid_custom_pattern() {
        let mut registry = TransformerRegistry::with_defaults();
        let result = Planner::new(&mut registry).with_ignore_patterns(&["("]);
        assert!(matches!(result, Err(PlannerError::Pattern { .. })));
    }
}
