//! Registry integration tests
//!
//! Configs are loaded from directories on disk the way the CLI loads them.

use m2k_planner::diagnostics::Diagnostic;
use m2k_planner::transformer::registry::RegistryOptions;
use m2k_planner::{Selector, TransformerRegistry};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn write(dir: &Path, file: &str, contents: &str) -> PathBuf {
    let path = dir.join(file);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, contents).unwrap();
    path
}

fn detector(name: &str, labels: &str, extra: &str) -> String {
    format!(
        "apiVersion: m2k-planner.io/v1alpha1\n\
         kind: Transformer\n\
         metadata:\n  name: {name}\n  labels: {{{labels}}}\n\
         spec:\n  class: ManifestDetector\n  directoryDetect:\n    levels: -1\n{extra}\
         \x20 config:\n    manifests: [{name}.manifest]\n"
    )
}

fn options(tmp: &TempDir) -> RegistryOptions {
    let source = tmp.path().join("source");
    fs::create_dir_all(&source).unwrap();
    RegistryOptions::new("shop", source, tmp.path().join("temp"))
}

#[test]
fn test_override_selector_excludes_matching_transformer() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("transformers");
    write(
        &dir,
        "specific.yaml",
        &detector("Specific", "kind: specific", "  overrideSelector: \"kind=generic\"\n"),
    );
    write(&dir, "generic.yaml", &detector("Generic", "kind: generic", ""));
    write(&dir, "other.yaml", &detector("Other", "kind: other", ""));

    let (configs, diagnostics) = TransformerRegistry::load_dir(&dir);
    assert!(diagnostics.is_empty());
    let mut registry = TransformerRegistry::with_defaults();
    let report = registry.initialize(configs, &options(&tmp));

    assert_eq!(report.active, vec!["Other", "Specific"]);
    assert!(registry.get("Generic").is_none());
    assert!(report.diagnostics.any(
        |d| matches!(d, Diagnostic::Overridden { name, by } if name == "Generic" && by == "Specific")
    ));
}

#[test]
fn test_load_dir_skips_other_kinds_and_reports_broken_files() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("transformers");
    write(&dir, "go/go.yaml", &detector("Go", "", ""));
    write(&dir, "notes.yml", "kind: Notes\nmetadata:\n  name: readme\n");
    write(&dir, "broken.yaml", "kind: [unclosed\n");
    write(&dir, "README.md", "# not yaml\n");

    let (configs, diagnostics) = TransformerRegistry::load_dir(&dir);

    assert_eq!(configs.len(), 1);
    assert_eq!(configs[0].name(), "Go");
    assert_eq!(configs[0].path, dir.join("go/go.yaml"));
    assert_eq!(diagnostics.len(), 1);
    assert!(diagnostics.any(|d| matches!(d, Diagnostic::ConfigParse(_))));
}

#[test]
fn test_user_configs_shadow_builtins() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("transformers");
    let user_golang = write(&dir, "golang.yaml", &detector("Golang", "origin: user", ""));

    let (mut configs, _) = TransformerRegistry::load_dir(&dir);
    let (builtin, _) = TransformerRegistry::builtin_configs(&tmp.path().join("temp"));
    configs.extend(builtin);

    let mut registry = TransformerRegistry::with_defaults();
    let report = registry.initialize(configs, &options(&tmp));

    assert_eq!(registry.active_configs()["Golang"], user_golang);
    assert_eq!(
        registry.get("Golang").unwrap().get_config().0.labels().get("origin"),
        Some(&"user".to_string())
    );
    assert!(report
        .diagnostics
        .any(|d| matches!(d, Diagnostic::DuplicateName { name, .. } if name == "Golang")));
}

#[test]
fn test_run_selector_overrides_default_selection() {
    let tmp = TempDir::new().unwrap();
    let (configs, _) = TransformerRegistry::builtin_configs(&tmp.path().join("temp"));

    let mut opts = options(&tmp);
    opts.selector = Selector::parse("m2k-planner.io/default-selected=false").unwrap();
    let mut registry = TransformerRegistry::with_defaults();
    let report = registry.initialize(configs, &opts);

    assert_eq!(report.active, vec!["Dockerfile"]);
    assert!(report.deselected.contains_key("Golang"));
}

#[test]
fn test_invalid_class_config_is_deselected() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("transformers");
    write(
        &dir,
        "empty.yaml",
        "kind: Transformer\nmetadata:\n  name: Empty\nspec:\n  class: ManifestDetector\n  directoryDetect:\n    levels: -1\n",
    );
    write(&dir, "go.yaml", &detector("Go", "", ""));

    let (configs, _) = TransformerRegistry::load_dir(&dir);
    let mut registry = TransformerRegistry::with_defaults();
    let report = registry.initialize(configs, &options(&tmp));

    assert_eq!(report.active, vec!["Go"]);
    assert!(report.deselected.contains_key("Empty"));
    assert!(report
        .diagnostics
        .any(|d| matches!(d, Diagnostic::InitFailed { name, .. } if name == "Empty")));
}

#[test]
fn test_reinitialize_replaces_active_set() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("transformers");
    write(&dir, "a.yaml", &detector("A", "", ""));
    write(&dir, "b.yaml", &detector("B", "", ""));
    let (configs, _) = TransformerRegistry::load_dir(&dir);

    let mut registry = TransformerRegistry::with_defaults();
    registry.initialize(configs.clone(), &options(&tmp));
    assert_eq!(registry.len(), 2);

    let only_a: Vec<_> = configs.into_iter().filter(|c| c.name() == "A").collect();
    let report = registry.initialize(only_a, &options(&tmp));
    assert_eq!(report.active, vec!["A"]);
    assert_eq!(registry.names(), vec!["A"]);
}
