//! Serializable data model shared by transformers, the registry and the planner

pub mod artifact;
pub mod plan;
pub mod transformer;

use std::path::Path;

/// API group/version stamped on every document this crate writes
pub const API_VERSION: &str = "m2k-planner.io/v1alpha1";

pub use artifact::{
    Artifact, DetectedServices, PathMapping, PathMappingType, MANIFEST_PATH_TYPE,
    SERVICE_ARTIFACT_TYPE, SERVICE_CONFIG_TYPE, SERVICE_DIR_PATH_TYPE,
};
pub use plan::{Plan, PlanArtifact, PlanMetadata, PlanSpec, ServiceMap, PLAN_KIND};
pub use transformer::{
    ContainerSpec, DirectoryDetect, InvokedByDefault, ObjectMeta, TransformerConfig,
    TransformerConfigError, TransformerSpec, DEFAULT_SELECTED_LABEL,
    TRANSFORMER_KIND,
};

pub(crate) fn is_empty_path(path: &Path) -> bool {
    path.as_os_str().is_empty()
}
