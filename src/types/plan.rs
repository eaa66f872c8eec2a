//! Plan-level types: the service map the planner builds and the plan document

use super::artifact::{Artifact, DetectedServices};
use crate::environment::paths::TranslatePaths;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub const PLAN_KIND: &str = "Plan";

/// An artifact paired with the transformer that produced it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanArtifact {
    pub transformer_name: String,

    #[serde(flatten)]
    pub artifact: Artifact,
}

impl PlanArtifact {
    pub fn new(transformer_name: impl Into<String>, artifact: Artifact) -> Self {
        Self {
            transformer_name: transformer_name.into(),
            artifact,
        }
    }
}

impl TranslatePaths for PlanArtifact {
    fn visit_paths(&mut self, visit: &mut dyn FnMut(&mut PathBuf)) {
        self.artifact.visit_paths(visit);
    }
}

/// Service name to the artifacts detected for it. The empty name collects
/// services no transformer named yet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceMap(BTreeMap<String, Vec<PlanArtifact>>);

impl ServiceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tags every artifact of a transformer's detection result with its name
    pub fn from_detected(transformer_name: &str, detected: DetectedServices) -> Self {
        let services = detected
            .into_iter()
            .map(|(name, artifacts)| {
                let plan_artifacts = artifacts
                    .into_iter()
                    .map(|a| PlanArtifact::new(transformer_name, a))
                    .collect();
                (name, plan_artifacts)
            })
            .collect();
        Self(services)
    }

    /// Union of `self` and `other`. Artifacts already present under the same
    /// name are not duplicated; nothing is ever overwritten.
    pub fn merge(&mut self, other: ServiceMap) {
        for (name, artifacts) in other.0 {
            let existing = self.0.entry(name).or_default();
            for artifact in artifacts {
                if !existing.contains(&artifact) {
                    existing.push(artifact);
                }
            }
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, artifact: PlanArtifact) {
        let existing = self.0.entry(name.into()).or_default();
        if !existing.contains(&artifact) {
            existing.push(artifact);
        }
    }

    pub fn get(&self, name: &str) -> Option<&Vec<PlanArtifact>> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Vec<PlanArtifact>> {
        self.0.remove(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<PlanArtifact>)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn artifact_count(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }

    /// Number of keyed services, not counting the unnamed bucket
    pub fn named_count(&self) -> usize {
        self.0.keys().filter(|k| !k.is_empty()).count()
    }

    /// Number of artifacts still waiting for a name
    pub fn unnamed_count(&self) -> usize {
        self.0.get("").map_or(0, Vec::len)
    }

    pub fn summary(&self) -> String {
        format!(
            "Identified {} named services and {} to-be-named services",
            self.named_count(),
            self.unnamed_count()
        )
    }
}

impl From<BTreeMap<String, Vec<PlanArtifact>>> for ServiceMap {
    fn from(map: BTreeMap<String, Vec<PlanArtifact>>) -> Self {
        Self(map)
    }
}

impl IntoIterator for ServiceMap {
    type Item = (String, Vec<PlanArtifact>);
    type IntoIter = std::collections::btree_map::IntoIter<String, Vec<PlanArtifact>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl TranslatePaths for ServiceMap {
    fn visit_paths(&mut self, visit: &mut dyn FnMut(&mut PathBuf)) {
        self.0.visit_paths(visit);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanMetadata {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanSpec {
    pub source_dir: PathBuf,

    #[serde(default)]
    pub services: ServiceMap,

    /// Active transformers and the config file each came from
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub transformers: BTreeMap<String, PathBuf>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub disabled_transformers: BTreeMap<String, PathBuf>,
}

/// The document handed to downstream artifact generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub api_version: String,
    pub kind: String,
    pub metadata: PlanMetadata,
    pub spec: PlanSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Plan {
    pub fn new(name: impl Into<String>, source_dir: PathBuf) -> Self {
        Self {
            api_version: super::API_VERSION.to_string(),
            kind: PLAN_KIND.to_string(),
            metadata: PlanMetadata { name: name.into() },
            spec: PlanSpec {
                source_dir,
                ..Default::default()
            },
            generated_at: Some(chrono::Utc::now()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::artifact::SERVICE_DIR_PATH_TYPE;
    use std::collections::HashSet;

    fn plan_artifact(transformer: &str, dir: &str) -> PlanArtifact {
        PlanArtifact::new(
            transformer,
            Artifact::new("", "Service").with_path(SERVICE_DIR_PATH_TYPE, dir),
        )
    }

    fn as_set(map: &ServiceMap) -> HashSet<(String, String)> {
        map.iter()
            .flat_map(|(name, artifacts)| {
                artifacts
                    .iter()
                    .map(move |a| (name.clone(), serde_json::to_string(a).unwrap()))
            })
            .collect()
    }

    #[test]
    fn test_merge_is_union() {
        let mut a = ServiceMap::new();
        a.insert("web", plan_artifact("Go", "/src/web"));
        a.insert("", plan_artifact("Go", "/src/tool"));

        let mut b = ServiceMap::new();
        b.insert("web", plan_artifact("Dockerfile", "/src/web"));
        b.insert("api", plan_artifact("Node", "/src/api"));

        a.merge(b);
        assert_eq!(a.len(), 3);
        assert_eq!(a.get("web").unwrap().len(), 2);
        assert_eq!(a.artifact_count(), 4);
    }

    #[test]
    fn test_merge_does_not_duplicate() {
        let mut a = ServiceMap::new();
        a.insert("web", plan_artifact("Go", "/src/web"));

        let mut b = ServiceMap::new();
        b.insert("web", plan_artifact("Go", "/src/web"));

        a.merge(b);
        assert_eq!(a.get("web").unwrap().len(), 1);
    }

    #[test]
    fn test_merge_is_commutative() {
        let mut a = ServiceMap::new();
        a.insert("web", plan_artifact("Go", "/src/web"));
        a.insert("", plan_artifact("Go", "/src/tool"));
        let mut b = ServiceMap::new();
        b.insert("web", plan_artifact("Node", "/src/web"));
        b.insert("", plan_artifact("Go", "/src/tool"));
        b.insert("", plan_artifact("Node", "/src/cli"));

        let mut ab = a.clone();
        ab.merge(b.clone());
        let mut ba = b.clone();
        ba.merge(a.clone());

        assert_eq!(as_set(&ab), as_set(&ba));
        assert!(as_set(&ab).is_superset(&as_set(&a)));
        assert!(as_set(&ab).is_superset(&as_set(&b)));
    }

    #[test]
    fn test_named_and_unnamed_counts() {
        let mut map = ServiceMap::new();
        map.insert("", plan_artifact("Go", "/a"));
        map.insert("", plan_artifact("Go", "/b"));
        map.insert("web", plan_artifact("Go", "/web"));

        assert_eq!(map.named_count(), 1);
        assert_eq!(map.unnamed_count(), 2);
        assert_eq!(
            map.summary(),
            "Identified 1 named services and 2 to-be-named services"
        );
    }

    #[test]
    fn test_plan_serializes_flattened_artifacts() {
        let mut plan = Plan::new("shop", PathBuf::from("/src"));
        plan.spec.services.insert("web", plan_artifact("Go", "/src/web"));
        plan.generated_at = None;

        let yaml = serde_yaml::to_string(&plan).unwrap();
        assert!(yaml.contains("kind: Plan"));
        assert!(yaml.contains("transformerName: Go"));
        assert!(yaml.contains("ServiceDirectories"));

        let back: Plan = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, plan);
    }
}
