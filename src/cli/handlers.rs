//! Subcommand handlers. Each returns the process exit code.

use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::commands::{PlanArgs, TransformerSourceArgs, TransformersArgs};
use super::output::{OutputFormatter, TransformerListing};
use crate::config::PlannerConfig;
use crate::diagnostics::{Diagnostics, Severity};
use crate::planner::Planner;
use crate::progress::LoggingHandler;
use crate::selector::Selector;
use crate::transformer::registry::RegistryOptions;
use crate::transformer::TransformerRegistry;
use crate::types::{Plan, TransformerConfig};

pub fn handle_plan(args: &PlanArgs, config: &PlannerConfig) -> i32 {
    match run_plan(args, config) {
        Ok(()) => 0,
        Err(e) => {
            error!("Planning failed: {:#}", e);
            eprintln!("Error: {:#}", e);
            1
        }
    }
}

pub fn handle_transformers(args: &TransformersArgs, config: &PlannerConfig) -> i32 {
    match run_transformers(args, config) {
        Ok(()) => 0,
        Err(e) => {
            error!("Listing transformers failed: {:#}", e);
            eprintln!("Error: {:#}", e);
            1
        }
    }
}

fn run_plan(args: &PlanArgs, config: &PlannerConfig) -> Result<()> {
    let source = args
        .source
        .clone()
        .unwrap_or_else(|| PathBuf::from("."));
    let source = source
        .canonicalize()
        .with_context(|| format!("Failed to resolve source path {}", source.display()))?;
    let project = args
        .name
        .clone()
        .unwrap_or_else(|| default_project_name(&source));

    let transformer_selector = args
        .transformer_selector
        .as_deref()
        .map(Selector::parse)
        .transpose()
        .context("Invalid --transformer-selector")?;

    let timeout = args
        .timeout
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.exec_timeout());

    info!(source = %source.display(), project = %project, "Planning");

    let temp = temp_dir()?;
    let mut registry = TransformerRegistry::with_defaults();
    let options = registry_options(&project, &source, temp.path(), &args.transformer_source, timeout)?;
    let (configs, mut diagnostics) = load_configs(&args.transformer_source, config, temp.path());
    diagnostics.extend(registry.initialize(configs, &options).diagnostics);

    let result = {
        let mut planner =
            Planner::new(&mut registry).with_progress(Arc::new(LoggingHandler));
        planner.get_services(&project, &source, transformer_selector.as_ref())
    };
    let result = match result {
        Ok(result) => result,
        Err(e) => {
            registry.destroy();
            return Err(e).context("Service discovery failed");
        }
    };
    diagnostics.extend(result.diagnostics);
    let problems = diagnostics.count(Severity::Warning) + diagnostics.count(Severity::Error);
    if problems > 0 {
        warn!(problems, "Planning finished with non-fatal problems");
    }

    let mut plan = Plan::new(&project, source);
    plan.spec.services = result.services;
    plan.spec.transformers = registry.active_configs();
    plan.spec.disabled_transformers = registry.deselected().clone();
    registry.destroy();

    let formatted = OutputFormatter::new(args.format.into()).format_plan(&plan)?;
    write_output(&formatted, args.output.as_deref())
}

fn run_transformers(args: &TransformersArgs, config: &PlannerConfig) -> Result<()> {
    let source = std::env::current_dir().context("Failed to read current directory")?;
    let project = default_project_name(&source);
    let temp = temp_dir()?;

    let mut registry = TransformerRegistry::with_defaults();
    let options = registry_options(
        &project,
        &source,
        temp.path(),
        &args.transformer_source,
        config.exec_timeout(),
    )?;
    let (configs, mut diagnostics) = load_configs(&args.transformer_source, config, temp.path());
    diagnostics.extend(registry.initialize(configs, &options).diagnostics);

    let listing = TransformerListing {
        active: registry.active_configs(),
        deselected: registry.deselected().clone(),
        invoked_by_default: registry.invoked_by_default().to_vec(),
        problems: diagnostics.messages(Severity::Debug),
    };
    registry.destroy();

    let formatted = OutputFormatter::new(args.format.into()).format_transformers(&listing)?;
    write_output(&formatted, None)
}

fn temp_dir() -> Result<tempfile::TempDir> {
    tempfile::Builder::new()
        .prefix("m2k-planner-")
        .tempdir()
        .context("Failed to create temporary directory")
}

fn registry_options(
    project: &str,
    source: &Path,
    temp_root: &Path,
    args: &TransformerSourceArgs,
    timeout: Duration,
) -> Result<RegistryOptions> {
    let mut options = RegistryOptions::new(project, source, temp_root);
    if let Some(expr) = &args.selector {
        options.selector = Selector::parse(expr).context("Invalid --selector")?;
    }
    options.exec_timeout = timeout;
    Ok(options)
}

/// User configs first so they shadow built-ins of the same name
fn load_configs(
    args: &TransformerSourceArgs,
    config: &PlannerConfig,
    temp_root: &Path,
) -> (Vec<TransformerConfig>, Diagnostics) {
    let mut configs = Vec::new();
    let mut diagnostics = Diagnostics::new();

    if let Some(dir) = args.transformers.as_ref().or(config.transformers_dir.as_ref()) {
        let (loaded, diags) = TransformerRegistry::load_dir(dir);
        info!(count = loaded.len(), dir = %dir.display(), "Loaded transformer configs");
        configs.extend(loaded);
        diagnostics.extend(diags);
    }

    if config.builtin_transformers && !args.no_builtin {
        let (builtin, diags) = TransformerRegistry::builtin_configs(temp_root);
        configs.extend(builtin);
        diagnostics.extend(diags);
    }

    debug!(
        configs = configs.len(),
        diagnostics = diagnostics.len(),
        "Collected transformer configs"
    );
    (configs, diagnostics)
}

fn default_project_name(source: &Path) -> String {
    source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "project".to_string())
}

fn write_output(content: &str, path: Option<&Path>) -> Result<()> {
    match path {
        Some(path) => {
            fs::write(path, content)
                .with_context(|| format!("Failed to write output to {}", path.display()))?;
            info!(path = %path.display(), "Wrote plan");
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(content.as_bytes())
                .context("Failed to write to stdout")?;
            if !content.ends_with('\n') {
                writeln!(stdout).context("Failed to write to stdout")?;
            }
        }
    }
    Ok(())
}
