//! Filesystem helpers shared by the environment backends, the registry and the
//! planner

use ignore::WalkBuilder;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Copies `src` to `dest`. Directories are copied recursively, merging into an
/// existing `dest`; symlinks are copied as the files they point to.
pub fn replicate(src: &Path, dest: &Path) -> io::Result<()> {
    let metadata = fs::metadata(src)?;
    if metadata.is_file() {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(src, dest)?;
        return Ok(());
    }

    fs::create_dir_all(dest)?;
    for entry in WalkDir::new(src).min_depth(1).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(src = %src.display(), error = %err, "Skipping unreadable entry while copying");
                continue;
            }
        };
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
    }
    debug!(src = %src.display(), dest = %dest.display(), "Replicated path");
    Ok(())
}

/// Every file named `name` under `root`, hidden directories included, sorted
pub fn find_files_named(root: &Path, name: &str) -> Vec<PathBuf> {
    find_files(root, |path| {
        path.file_name().map_or(false, |file_name| file_name == name)
    })
}

/// Every `*.yaml` / `*.yml` file under `root`, sorted
pub fn find_yaml_files(root: &Path) -> Vec<PathBuf> {
    find_files(root, |path| {
        matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        )
    })
}

fn find_files(root: &Path, keep: impl Fn(&Path) -> bool) -> Vec<PathBuf> {
    let mut found = Vec::new();
    for result in WalkBuilder::new(root)
        .hidden(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .ignore(false)
        .parents(false)
        .build()
    {
        let entry = match result {
            Ok(entry) => entry,
            Err(err) => {
                warn!(error = %err, "Failed to read directory entry");
                continue;
            }
        };
        let is_file = entry.file_type().map_or(false, |t| t.is_file());
        if is_file && keep(entry.path()) {
            found.push(entry.into_path());
        }
    }
    found.sort();
    found
}

/// Removes every entry inside `dir`, keeping `dir` itself
pub fn clear_dir(dir: &Path) -> io::Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_replicate_directory_tree() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        fs::create_dir_all(src.join("a/b")).unwrap();
        fs::write(src.join("top.txt"), "top").unwrap();
        fs::write(src.join("a/b/deep.txt"), "deep").unwrap();

        let dest = tmp.path().join("dest");
        replicate(&src, &dest).unwrap();

        assert_eq!(fs::read_to_string(dest.join("top.txt")).unwrap(), "top");
        assert_eq!(fs::read_to_string(dest.join("a/b/deep.txt")).unwrap(), "deep");
    }

    #[test]
    fn test_replicate_single_file_creates_parents() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("one.txt");
        fs::write(&src, "1").unwrap();

        let dest = tmp.path().join("x/y/one.txt");
        replicate(&src, &dest).unwrap();
        assert_eq!(fs::read_to_string(dest).unwrap(), "1");
    }

    #[test]
    fn test_replicate_missing_source_fails() {
        let tmp = TempDir::new().unwrap();
        assert!(replicate(&tmp.path().join("nope"), &tmp.path().join("d")).is_err());
    }

    #[test]
    fn test_find_files_includes_hidden_and_sorts() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("b/.hidden")).unwrap();
        fs::create_dir_all(tmp.path().join("a")).unwrap();
        fs::write(tmp.path().join("b/.hidden/.m2kignore"), "").unwrap();
        fs::write(tmp.path().join("a/.m2kignore"), "").unwrap();
        fs::write(tmp.path().join("a/other"), "").unwrap();

        let found = find_files_named(tmp.path(), ".m2kignore");
        assert_eq!(
            found,
            vec![
                tmp.path().join("a/.m2kignore"),
                tmp.path().join("b/.hidden/.m2kignore")
            ]
        );
    }

    #[test]
    fn test_find_yaml_files() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("z.yml"), "").unwrap();
        fs::write(tmp.path().join("a.yaml"), "").unwrap();
        fs::write(tmp.path().join("readme.md"), "").unwrap();

        let found = find_yaml_files(tmp.path());
        assert_eq!(
            found,
            vec![tmp.path().join("a.yaml"), tmp.path().join("z.yml")]
        );
    }

    #[test]
    fn test_clear_dir_keeps_root() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("d/e")).unwrap();
        fs::write(tmp.path().join("f"), "").unwrap();

        clear_dir(tmp.path()).unwrap();
        assert!(tmp.path().exists());
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
    }
}
