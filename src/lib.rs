//! m2k-planner - transformer-driven service discovery for source trees
//!
//! The planner walks a source directory and asks a set of pluggable
//! transformers which directories hold services. What it finds is written as
//! a plan document that later stages turn into deployment artifacts.
//!
//! # Core Concepts
//!
//! - **Transformers**: detectors described by YAML configs, selected with
//!   label selectors and bound to an execution [`environment`]
//! - **Environments**: where a transformer runs, either on the host or inside
//!   a container, with paths translated between the two
//! - **Planner**: the directory walk that collects and names services
//!
//! # Example Usage
//!
//! ```no_run
//! use m2k_planner::transformer::registry::RegistryOptions;
//! use m2k_planner::{Planner, TransformerRegistry};
//! use std::path::Path;
//!
//! let temp = tempfile::tempdir().unwrap();
//! let source = Path::new("/src/shop");
//!
//! let mut registry = TransformerRegistry::with_defaults();
//! let (configs, _) = TransformerRegistry::builtin_configs(temp.path());
//! registry.initialize(configs, &RegistryOptions::new("shop", source, temp.path()));
//!
//! let result = Planner::new(&mut registry)
//!     .get_services("shop", source, None)
//!     .unwrap();
//! for (name, artifacts) in result.services.iter() {
//!     println!("{}: {} artifacts", name, artifacts.len());
//! }
//! ```
//!
//! # Project Structure
//!
//! - [`selector`]: label selector parsing and matching
//! - [`types`]: transformer configs, artifacts and the plan document
//! - [`environment`]: local and container execution environments
//! - [`transformer`]: transformer classes and the registry
//! - [`planner`]: the directory walk and service naming

pub mod cli;
pub mod config;
pub mod diagnostics;
pub mod environment;
pub mod planner;
pub mod progress;
pub mod selector;
pub mod transformer;
pub mod types;
pub mod util;

pub use config::{ConfigError, PlannerConfig};
pub use diagnostics::{Diagnostic, Diagnostics, Severity};
pub use environment::{EnvInfo, Environment, EnvironmentError};
pub use planner::{Planner, PlannerError, PlanningResult};
pub use selector::{Selector, SelectorError};
pub use transformer::{Transformer, TransformerError, TransformerRegistry};
pub use types::{Artifact, Plan, PlanArtifact, ServiceMap, TransformerConfig};
pub use util::{init_default, init_from_env, init_logging, LoggingConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
