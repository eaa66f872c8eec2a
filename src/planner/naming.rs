//! Naming pass over the unnamed bucket of a service map

use crate::types::{PlanArtifact, ServiceMap};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Longest name a service may carry
pub const MAX_NAME_LEN: usize = 63;

const HASH_LEN: usize = 32;

fn disallowed() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new("[^a-z0-9-]").expect("valid regex"))
}

/// Lowercase DNS label form of `raw`: disallowed characters become `-`,
/// leading and trailing `-` are dropped, and names longer than
/// [`MAX_NAME_LEN`] are shortened with a content hash. `None` when nothing
/// usable is left.
pub fn normalize_name(raw: &str) -> Option<String> {
    let lowered = raw.trim().to_lowercase();
    let mut name = disallowed().replace_all(&lowered, "-").into_owned();
    if name.len() > MAX_NAME_LEN {
        let hash = hex::encode(Sha256::digest(lowered.as_bytes()));
        name.truncate(MAX_NAME_LEN - HASH_LEN - 1);
        name = format!("{}-{}", name.trim_end_matches('-'), &hash[..HASH_LEN]);
    }
    let name = name.trim_matches('-');
    if name.is_empty() {
        return None;
    }
    if !name.starts_with(|c: char| c.is_ascii_alphabetic()) {
        debug!(name, "Service name does not start with a letter");
    }
    Some(name.to_string())
}

/// Gives every unnamed artifact a name. Named entries are never renamed.
///
/// An unnamed artifact whose service directory is already claimed by a
/// named entry joins that entry. The rest are grouped by their first service
/// directory and named after it; the group at `root` (or without any
/// directory) is named after `project`.
pub fn name_services(mut services: ServiceMap, project: &str, root: &Path) -> ServiceMap {
    let Some(unnamed) = services.remove("") else {
        return services;
    };

    let mut owners: BTreeMap<PathBuf, String> = BTreeMap::new();
    for (name, artifacts) in services.iter() {
        for dir in artifacts.iter().flat_map(|a| a.artifact.service_dirs()) {
            owners.entry(dir.clone()).or_insert_with(|| name.clone());
        }
    }

    let mut groups: BTreeMap<PathBuf, Vec<PlanArtifact>> = BTreeMap::new();
    for artifact in unnamed {
        let dirs = artifact.artifact.service_dirs();
        if let Some(owner) = dirs.iter().find_map(|d| owners.get(d)) {
            debug!(service = %owner, transformer = %artifact.transformer_name, "Joining named service");
            services.insert(owner.clone(), artifact);
            continue;
        }
        let key = dirs
            .iter()
            .find(|d| !d.as_os_str().is_empty())
            .cloned()
            .unwrap_or_else(|| root.to_path_buf());
        groups.entry(key).or_default().push(artifact);
    }

    for (dir, artifacts) in groups {
        let base = base_name(&dir, project, root);
        let name = unique_name(&services, &base);
        debug!(service = %name, dir = %dir.display(), artifacts = artifacts.len(), "Named service");
        for artifact in artifacts {
            services.insert(name.clone(), artifact);
        }
    }
    services
}

fn base_name(dir: &Path, project: &str, root: &Path) -> String {
    let from_dir = if dir == root {
        None
    } else {
        dir.file_name()
            .and_then(|n| normalize_name(&n.to_string_lossy()))
    };
    from_dir
        .or_else(|| normalize_name(project))
        .unwrap_or_else(|| {
            warn!(project, "Project name is not usable as a service name");
            "service".to_string()
        })
}

/// `base`, or `base-2`, `base-3`, ... whichever is free first
fn unique_name(services: &ServiceMap, base: &str) -> String {
    if !services.contains(base) {
        return base.to_string();
    }
    (2..)
        .map(|n| {
            let suffix = format!("-{n}");
            let mut stem = base.to_string();
            stem.truncate(MAX_NAME_LEN - suffix.len());
            format!("{}{}", stem.trim_end_matches('-'), suffix)
        })
        .find(|candidate| !services.contains(candidate))
        .unwrap_or_else(|| base.to_string())
}
