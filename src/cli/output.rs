//! Output formatting for plans and transformer listings
//!
//! JSON and YAML render the serialized documents; the human format is a short
//! tree meant for terminals.

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::types::{Plan, SERVICE_DIR_PATH_TYPE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Yaml,
    Human,
}

/// Active and deselected transformers of one registry initialization
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformerListing {
    pub active: BTreeMap<String, PathBuf>,
    pub deselected: BTreeMap<String, PathBuf>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub invoked_by_default: Vec<String>,
    /// Why configs were skipped or deselected
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub problems: Vec<String>,
}

pub struct OutputFormatter {
    format: OutputFormat,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn format_plan(&self, plan: &Plan) -> Result<String> {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(plan).context("Failed to serialize plan to JSON")
            }
            OutputFormat::Yaml => {
                serde_yaml::to_string(plan).context("Failed to serialize plan to YAML")
            }
            OutputFormat::Human => Ok(self.format_plan_human(plan)),
        }
    }

    pub fn format_transformers(&self, listing: &TransformerListing) -> Result<String> {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(listing)
                .context("Failed to serialize transformers to JSON"),
            OutputFormat::Yaml => {
                serde_yaml::to_string(listing).context("Failed to serialize transformers to YAML")
            }
            OutputFormat::Human => Ok(self.format_transformers_human(listing)),
        }
    }

    fn format_plan_human(&self, plan: &Plan) -> String {
        let mut output = String::new();
        output.push_str(&format!("\u{2713} Plan: {}\n", plan.metadata.name));
        output.push_str(&"\u{2501}".repeat(42));
        output.push_str("\n\n");
        output.push_str(&format!("Source: {}\n\n", plan.spec.source_dir.display()));

        let services = &plan.spec.services;
        if services.is_empty() {
            output.push_str("No services detected\n");
        } else {
            output.push_str(&format!("Services ({}):\n", services.len()));
            for (name, artifacts) in services.iter() {
                output.push_str(&format!("\u{251C}\u{2500} {}\n", name));
                for (i, artifact) in artifacts.iter().enumerate() {
                    let connector = if i + 1 == artifacts.len() {
                        "\u{2514}"
                    } else {
                        "\u{251C}"
                    };
                    let dirs: Vec<String> = artifact
                        .artifact
                        .paths_of(SERVICE_DIR_PATH_TYPE)
                        .iter()
                        .map(|p| relative(p, &plan.spec.source_dir))
                        .collect();
                    output.push_str(&format!(
                        "\u{2502}  {}\u{2500} {} [{}]\n",
                        connector,
                        artifact.transformer_name,
                        dirs.join(", ")
                    ));
                }
            }
        }

        if !plan.spec.transformers.is_empty() {
            output.push_str(&format!(
                "\nTransformers: {}\n",
                plan.spec
                    .transformers
                    .keys()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }
        output
    }

    fn format_transformers_human(&self, listing: &TransformerListing) -> String {
        let mut output = String::new();
        output.push_str(&format!("Active transformers ({}):\n", listing.active.len()));
        for (name, path) in &listing.active {
            let marker = if listing.invoked_by_default.contains(name) {
                " (invoked by default)"
            } else {
                ""
            };
            output.push_str(&format!("  \u{2713} {}{}  {}\n", name, marker, path.display()));
        }
        if !listing.deselected.is_empty() {
            output.push_str(&format!(
                "\nDeselected transformers ({}):\n",
                listing.deselected.len()
            ));
            for (name, path) in &listing.deselected {
                output.push_str(&format!("  - {}  {}\n", name, path.display()));
            }
        }
        if !listing.problems.is_empty() {
            output.push_str(&format!("\nProblems ({}):\n", listing.problems.len()));
            for problem in &listing.problems {
                output.push_str(&format!("  ! {}\n", problem));
            }
        }
        output
    }
}

fn relative(path: &std::path::Path, root: &std::path::Path) -> String {
    match path.strip_prefix(root) {
        Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
        Ok(rel) => rel.display().to_string(),
        Err(_) => path.display().to_string(),
    }
}
