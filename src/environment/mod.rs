//! Execution environments
//!
//! Every transformer runs inside one [`Environment`]. The environment owns a
//! sandbox backend ([`local::LocalBackend`] or [`container::ContainerBackend`]),
//! translates paths on the way in ([`Environment::encode`]) and on the way out
//! ([`Environment::decode`]), and tears the sandbox down when destroyed.
//!
//! Host addressing is the orchestrator's view of the filesystem. Sandbox
//! addressing is whatever the backend uses for the same trees; for the
//! non-isolated local backend the two coincide.

pub mod container;
pub mod error;
pub mod local;
pub mod paths;

pub use error::EnvironmentError;
pub use paths::{TranslateError, TranslatePaths, Translation};

use crate::types::ContainerSpec;
use paths::{decode_rule, encode_rule, translate, DecodeAction, EncodeAction, Roots};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error};

pub const PROJECT_NAME_ENV: &str = "M2K_PROJECT_NAME";
pub const SOURCE_ENV: &str = "M2K_SOURCE";
pub const OUTPUT_ENV: &str = "M2K_OUTPUT";
pub const CONTEXT_ENV: &str = "M2K_CONTEXT";
pub const CURRENT_OUTPUT_ENV: &str = "M2K_CURRENT_OUTPUT";
pub const RELATIVE_TEMPLATES_DIR_ENV: &str = "M2K_RELATIVE_TEMPLATES_DIR";
pub const TEMP_ENV: &str = "M2K_TEMP";
pub const ENV_NAME_ENV: &str = "M2K_ENV_NAME";

pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(300);

/// Exit code reported when a command cannot be started
pub const EXIT_NOT_RUNNABLE: i32 = 127;

/// Exit code reported when a command exceeds its deadline
pub const EXIT_TIMED_OUT: i32 = 124;

/// Everything needed to build an environment
#[derive(Debug, Clone)]
pub struct EnvInfo {
    pub name: String,
    pub project_name: String,
    pub isolated: bool,
    pub source: PathBuf,
    pub output: PathBuf,
    pub context: PathBuf,
    pub rel_templates_dir: String,
    /// Shared scratch root of the run
    pub temp_root: PathBuf,
    pub container: Option<ContainerSpec>,
    pub exec_timeout: Duration,
}

impl EnvInfo {
    pub fn container_image(&self) -> Option<&str> {
        self.container
            .as_ref()
            .map(|c| c.image.as_str())
            .filter(|image| !image.is_empty())
    }
}

/// Metadata about a path inside an environment
#[derive(Debug, Clone)]
pub struct FileMetadata {
    pub size: u64,
    pub file_type: FileType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    File,
    Directory,
    Symlink,
}

impl FileMetadata {
    pub fn is_file(&self) -> bool {
        self.file_type == FileType::File
    }

    pub fn is_dir(&self) -> bool {
        self.file_type == FileType::Directory
    }

    pub(crate) fn from_std(metadata: &fs::Metadata) -> Self {
        let file_type = if metadata.file_type().is_symlink() {
            FileType::Symlink
        } else if metadata.is_dir() {
            FileType::Directory
        } else {
            FileType::File
        };
        Self {
            size: metadata.len(),
            file_type,
        }
    }
}

/// Result of running a command in an environment. A command that could not be
/// run at all has a non-zero exit code and `error` set.
#[derive(Debug, Default)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub error: Option<EnvironmentError>,
}

impl ExecOutput {
    pub fn failure(exit_code: i32, error: EnvironmentError) -> Self {
        Self {
            exit_code,
            error: Some(error),
            ..Default::default()
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0 && self.error.is_none()
    }
}

/// Capability set every sandbox backend implements
pub trait EnvironmentBackend: Send {
    /// Clears per-call sandbox state; cheap and idempotent
    fn reset(&mut self) -> Result<(), EnvironmentError>;

    fn stat(&self, path: &Path) -> Result<FileMetadata, EnvironmentError>;

    /// Copies a sandbox path to the host and returns the host path
    fn download(&mut self, path: &Path) -> Result<PathBuf, EnvironmentError>;

    /// Copies a host path into the sandbox and returns the sandbox path
    fn upload(&mut self, host_path: &Path) -> Result<PathBuf, EnvironmentError>;

    fn exec(&mut self, command: &[String], env: &[(String, String)]) -> ExecOutput;

    /// Releases all sandbox resources; safe to call more than once
    fn destroy(&mut self) -> Result<(), EnvironmentError>;

    /// Source root in sandbox addressing
    fn source(&self) -> &Path;

    /// Context root in sandbox addressing
    fn context(&self) -> &Path;

    /// Whether sandboxed processes see the host filesystem
    fn shares_host_filesystem(&self) -> bool {
        false
    }
}

pub struct Environment {
    info: EnvInfo,
    backend: Box<dyn EnvironmentBackend>,
    children: Vec<Environment>,
    /// Sandbox path of the uploaded output root, valid until the next reset
    sandbox_output: Option<PathBuf>,
    active: bool,
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("name", &self.info.name)
            .field("source", &self.backend.source())
            .field("context", &self.backend.context())
            .field("children", &self.children.len())
            .field("active", &self.active)
            .finish()
    }
}

impl Environment {
    /// Builds an environment, choosing the container backend when an image is
    /// configured and the local backend otherwise.
    pub fn new(info: EnvInfo) -> Result<Self, EnvironmentError> {
        let backend: Box<dyn EnvironmentBackend> = match info.container_image() {
            Some(image) => {
                debug!(env = %info.name, image, "Using container backend");
                Box::new(container::ContainerBackend::new(&info)?)
            }
            None => {
                debug!(env = %info.name, isolated = info.isolated, "Using local backend");
                Box::new(local::LocalBackend::new(&info)?)
            }
        };
        Ok(Self::with_backend(info, backend))
    }

    pub fn with_backend(info: EnvInfo, backend: Box<dyn EnvironmentBackend>) -> Self {
        Self {
            info,
            backend,
            children: Vec::new(),
            sandbox_output: None,
            active: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn info(&self) -> &EnvInfo {
        &self.info
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn source(&self) -> &Path {
        &self.info.source
    }

    pub fn context(&self) -> &Path {
        &self.info.context
    }

    pub fn output(&self) -> &Path {
        &self.info.output
    }

    pub fn sandbox_source(&self) -> &Path {
        self.backend.source()
    }

    pub fn sandbox_context(&self) -> &Path {
        self.backend.context()
    }

    /// Uploaded output root of the current reset epoch, if any
    pub fn sandbox_output(&self) -> Option<&Path> {
        self.sandbox_output.as_deref()
    }

    pub fn children(&self) -> &[Environment] {
        &self.children
    }

    pub fn add_child(&mut self, child: Environment) {
        self.children.push(child);
    }

    /// Forgets the uploaded output root and clears per-call sandbox state
    pub fn reset(&mut self) -> Result<(), EnvironmentError> {
        if !self.active {
            return Err(EnvironmentError::Inactive(self.info.name.clone()));
        }
        self.sandbox_output = None;
        self.backend.reset()
    }

    /// Copy of `value` with every path moved into sandbox addressing.
    /// Rejected paths are returned as diagnostics for the caller to report.
    pub fn encode<T: TranslatePaths + Clone>(&mut self, value: &T) -> Translation<T> {
        if !self.active {
            return Translation::unchanged(value.clone());
        }

        let sandbox_source = self.backend.source().to_path_buf();
        let sandbox_context = self.backend.context().to_path_buf();
        let roots = Roots {
            host_source: &self.info.source,
            host_context: &self.info.context,
            sandbox_source: &sandbox_source,
            sandbox_context: &sandbox_context,
            temp: &self.info.temp_root,
        };
        let host_output = &self.info.output;
        let backend = &mut self.backend;
        let cache = &mut self.sandbox_output;

        translate(value, |path| match encode_rule(path, &roots) {
            EncodeAction::Unchanged => Ok(path.to_path_buf()),
            EncodeAction::Rebased(rebased) => Ok(rebased),
            EncodeAction::JoinOutput(rel) => {
                let root = match cache {
                    Some(root) => root.clone(),
                    None => {
                        let root = upload_output(&mut **backend, host_output)?;
                        *cache = Some(root.clone());
                        root
                    }
                };
                Ok(root.join(rel))
            }
            EncodeAction::Upload => {
                backend
                    .upload(path)
                    .map_err(|e| TranslateError::UploadFailed {
                        path: path.to_path_buf(),
                        reason: e.to_string(),
                    })
            }
            EncodeAction::Unknown => Err(TranslateError::UnknownPath(path.to_path_buf())),
        })
    }

    /// Copy of `value` with every path moved back into host addressing.
    /// Paths under the uploaded output root come back relative to the host
    /// output root.
    pub fn decode<T: TranslatePaths + Clone>(&self, value: &T) -> Translation<T> {
        if !self.active {
            return Translation::unchanged(value.clone());
        }

        let roots = Roots {
            host_source: &self.info.source,
            host_context: &self.info.context,
            sandbox_source: self.backend.source(),
            sandbox_context: self.backend.context(),
            temp: &self.info.temp_root,
        };
        let sandbox_output = self.sandbox_output.as_deref();

        translate(value, |path| {
            match decode_rule(path, &roots, sandbox_output) {
                DecodeAction::Unchanged => Ok(path.to_path_buf()),
                DecodeAction::Rebased(rebased) | DecodeAction::OutputRelative(rebased) => {
                    Ok(rebased)
                }
                DecodeAction::Relative => Err(TranslateError::RelativeDecode(path.to_path_buf())),
                DecodeAction::Unknown => Err(TranslateError::UnknownPath(path.to_path_buf())),
            }
        })
    }

    /// Runs `command` in the sandbox with the `M2K_*` variables set in
    /// addition to `extra_env`
    pub fn exec(&mut self, command: &[String], extra_env: &[(String, String)]) -> ExecOutput {
        if !self.active {
            return ExecOutput::failure(-1, EnvironmentError::Inactive(self.info.name.clone()));
        }
        let mut env = self.sandbox_env();
        env.extend(extra_env.iter().cloned());
        debug!(env = %self.info.name, command = ?command, "Executing command");
        self.backend.exec(command, &env)
    }

    /// Stat of a path in sandbox addressing
    pub fn stat(&self, path: &Path) -> Result<FileMetadata, EnvironmentError> {
        self.ensure_active()?;
        self.backend.stat(path)
    }

    pub fn upload(&mut self, host_path: &Path) -> Result<PathBuf, EnvironmentError> {
        self.ensure_active()?;
        self.backend.upload(host_path)
    }

    pub fn download(&mut self, path: &Path) -> Result<PathBuf, EnvironmentError> {
        self.ensure_active()?;
        self.backend.download(path)
    }

    /// Reads a sandbox file through a download
    pub fn read_to_string(&mut self, path: &Path) -> Result<String, EnvironmentError> {
        let host = self.download(path)?;
        fs::read_to_string(&host).map_err(|e| EnvironmentError::io(host, e))
    }

    /// Destroys the children, then the backend. Child failures are logged and
    /// do not stop the teardown. Calling this again is a no-op.
    pub fn destroy(&mut self) -> Result<(), EnvironmentError> {
        if !self.active {
            return Ok(());
        }
        self.active = false;
        self.sandbox_output = None;
        for child in &mut self.children {
            if let Err(err) = child.destroy() {
                error!(env = %self.info.name, child = %child.info.name, error = %err, "Failed to destroy child environment");
            }
        }
        debug!(env = %self.info.name, "Destroying environment");
        self.backend.destroy()
    }

    fn ensure_active(&self) -> Result<(), EnvironmentError> {
        if self.active {
            Ok(())
        } else {
            Err(EnvironmentError::Inactive(self.info.name.clone()))
        }
    }

    fn sandbox_env(&self) -> Vec<(String, String)> {
        let mut env = vec![
            (PROJECT_NAME_ENV.to_string(), self.info.project_name.clone()),
            (SOURCE_ENV.to_string(), self.backend.source().display().to_string()),
            (CONTEXT_ENV.to_string(), self.backend.context().display().to_string()),
            (
                RELATIVE_TEMPLATES_DIR_ENV.to_string(),
                self.info.rel_templates_dir.clone(),
            ),
            (TEMP_ENV.to_string(), self.info.temp_root.display().to_string()),
            (ENV_NAME_ENV.to_string(), self.info.name.clone()),
        ];
        if self.backend.shares_host_filesystem() {
            env.push((OUTPUT_ENV.to_string(), self.info.output.display().to_string()));
        }
        if let Some(output) = &self.sandbox_output {
            env.push((CURRENT_OUTPUT_ENV.to_string(), output.display().to_string()));
        }
        env
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        if let Err(err) = self.destroy() {
            error!(env = %self.info.name, error = %err, "Failed to destroy environment on drop");
        }
    }
}

fn upload_output(
    backend: &mut dyn EnvironmentBackend,
    host_output: &Path,
) -> Result<PathBuf, TranslateError> {
    let failed = |reason: String| TranslateError::UploadFailed {
        path: host_output.to_path_buf(),
        reason,
    };
    fs::create_dir_all(host_output).map_err(|e| failed(e.to_string()))?;
    backend.upload(host_output).map_err(|e| failed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Artifact, SERVICE_DIR_PATH_TYPE};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    /// Backend with fixed sandbox roots that records calls
    struct RecordingBackend {
        source: PathBuf,
        context: PathBuf,
        upload_root: PathBuf,
        uploads: Arc<AtomicUsize>,
        destroys: Arc<AtomicUsize>,
        exec_env: Arc<Mutex<Vec<(String, String)>>>,
        fail_destroy: bool,
    }

    impl EnvironmentBackend for RecordingBackend {
        fn reset(&mut self) -> Result<(), EnvironmentError> {
            Ok(())
        }

        fn stat(&self, path: &Path) -> Result<FileMetadata, EnvironmentError> {
            Err(EnvironmentError::NotFound(path.to_path_buf()))
        }

        fn download(&mut self, path: &Path) -> Result<PathBuf, EnvironmentError> {
            Ok(path.to_path_buf())
        }

        fn upload(&mut self, host_path: &Path) -> Result<PathBuf, EnvironmentError> {
            let n = self.uploads.fetch_add(1, Ordering::SeqCst);
            let name = host_path.file_name().unwrap_or_default();
            Ok(self.upload_root.join(n.to_string()).join(name))
        }

        fn exec(&mut self, _command: &[String], env: &[(String, String)]) -> ExecOutput {
            *self.exec_env.lock().unwrap() = env.to_vec();
            ExecOutput::default()
        }

        fn destroy(&mut self) -> Result<(), EnvironmentError> {
            self.destroys.fetch_add(1, Ordering::SeqCst);
            if self.fail_destroy {
                return Err(EnvironmentError::NotFound(PathBuf::from("/gone")));
            }
            Ok(())
        }

        fn source(&self) -> &Path {
            &self.source
        }

        fn context(&self) -> &Path {
            &self.context
        }
    }

    struct Fixture {
        _tmp: TempDir,
        info: EnvInfo,
        uploads: Arc<AtomicUsize>,
        destroys: Arc<AtomicUsize>,
        exec_env: Arc<Mutex<Vec<(String, String)>>>,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = TempDir::new().unwrap();
            let info = EnvInfo {
                name: "Golang".to_string(),
                project_name: "shop".to_string(),
                isolated: false,
                source: tmp.path().join("src"),
                output: tmp.path().join("out"),
                context: tmp.path().join("assets/go"),
                rel_templates_dir: "templates".to_string(),
                temp_root: tmp.path().join("temp"),
                container: None,
                exec_timeout: DEFAULT_EXEC_TIMEOUT,
            };
            Self {
                _tmp: tmp,
                info,
                uploads: Arc::new(AtomicUsize::new(0)),
                destroys: Arc::new(AtomicUsize::new(0)),
                exec_env: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn env(&self, fail_destroy: bool) -> Environment {
            let backend = RecordingBackend {
                source: PathBuf::from("/workspace/source"),
                context: PathBuf::from("/workspace/context"),
                upload_root: self.info.temp_root.join("uploads"),
                uploads: self.uploads.clone(),
                destroys: self.destroys.clone(),
                exec_env: self.exec_env.clone(),
                fail_destroy,
            };
            Environment::with_backend(self.info.clone(), Box::new(backend))
        }
    }

    #[test]
    fn test_round_trip_under_source() {
        let fx = Fixture::new();
        let mut env = fx.env(false);
        let original = fx.info.source.join("svc/go.mod");

        let encoded = env.encode(&original);
        assert!(encoded.is_clean());
        assert_eq!(encoded.value, PathBuf::from("/workspace/source/svc/go.mod"));

        let decoded = env.decode(&encoded.value);
        assert_eq!(decoded.value, original);
    }

    #[test]
    fn test_relative_encode_uploads_output_once_per_epoch() {
        let fx = Fixture::new();
        let mut env = fx.env(false);
        let paths = vec![PathBuf::from("a/Dockerfile"), PathBuf::from("b/Dockerfile")];

        let first = env.encode(&paths);
        let second = env.encode(&PathBuf::from("c"));
        assert_eq!(fx.uploads.load(Ordering::SeqCst), 1);
        assert!(first.value[0].starts_with(env.sandbox_output().unwrap()));
        assert!(second.value.ends_with("c"));
        assert!(fx.info.output.is_dir());

        env.reset().unwrap();
        assert!(env.sandbox_output().is_none());
        env.encode(&PathBuf::from("d"));
        assert_eq!(fx.uploads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_decode_output_paths_become_relative() {
        let fx = Fixture::new();
        let mut env = fx.env(false);
        let encoded = env.encode(&PathBuf::from("web/Dockerfile")).value;

        let decoded = env.decode(&encoded);
        assert_eq!(decoded.value, PathBuf::from("web/Dockerfile"));
    }

    #[test]
    fn test_unknown_paths_are_dropped_and_reported() {
        let fx = Fixture::new();
        let mut env = fx.env(false);
        let artifact = Artifact::new("", "Service")
            .with_path(SERVICE_DIR_PATH_TYPE, fx.info.source.join("a"))
            .with_path(SERVICE_DIR_PATH_TYPE, "/etc/elsewhere");

        let encoded = env.encode(&artifact);
        assert_eq!(encoded.diagnostics.len(), 1);
        assert_eq!(
            encoded.value.service_dirs(),
            &[PathBuf::from("/workspace/source/a"), PathBuf::new()]
        );
        assert_eq!(artifact.service_dirs()[1], PathBuf::from("/etc/elsewhere"));

        let decoded = env.decode(&PathBuf::from("relative"));
        assert_eq!(
            decoded.diagnostics,
            vec![TranslateError::RelativeDecode(PathBuf::from("relative"))]
        );
    }

    #[test]
    fn test_temp_paths_are_uploaded() {
        let fx = Fixture::new();
        let mut env = fx.env(false);
        let scratch = fx.info.temp_root.join("artifacts.json");

        let encoded = env.encode(&scratch);
        assert!(encoded.is_clean());
        assert_eq!(fx.uploads.load(Ordering::SeqCst), 1);
        assert!(encoded.value.ends_with("artifacts.json"));
    }

    #[test]
    fn test_destroyed_environment_is_pass_through() {
        let fx = Fixture::new();
        let mut env = fx.env(false);
        env.destroy().unwrap();
        env.destroy().unwrap();
        assert_eq!(fx.destroys.load(Ordering::SeqCst), 1);

        let path = PathBuf::from("/etc/elsewhere");
        let encoded = env.encode(&path);
        assert!(encoded.is_clean());
        assert_eq!(encoded.value, path);
        assert!(matches!(env.reset(), Err(EnvironmentError::Inactive(_))));

        let output = env.exec(&["true".to_string()], &[]);
        assert!(!output.success());
        assert!(matches!(output.error, Some(EnvironmentError::Inactive(_))));
    }

    #[test]
    fn test_destroy_recurses_past_child_failures() {
        let fx = Fixture::new();
        let mut parent = fx.env(false);
        parent.add_child(fx.env(true));
        parent.add_child(fx.env(false));

        assert!(parent.destroy().is_ok());
        assert_eq!(fx.destroys.load(Ordering::SeqCst), 3);
        assert!(parent.children().iter().all(|c| !c.is_active()));
    }

    #[test]
    fn test_drop_destroys_active_environment() {
        let fx = Fixture::new();
        {
            let _env = fx.env(false);
        }
        assert_eq!(fx.destroys.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_exec_injects_sandbox_variables() {
        let fx = Fixture::new();
        let mut env = fx.env(false);
        env.encode(&PathBuf::from("x"));
        env.exec(
            &["detect".to_string()],
            &[("EXTRA".to_string(), "1".to_string())],
        );

        let vars: std::collections::HashMap<_, _> =
            fx.exec_env.lock().unwrap().iter().cloned().collect();
        assert_eq!(vars[PROJECT_NAME_ENV], "shop");
        assert_eq!(vars[SOURCE_ENV], "/workspace/source");
        assert_eq!(vars[CONTEXT_ENV], "/workspace/context");
        assert_eq!(vars[RELATIVE_TEMPLATES_DIR_ENV], "templates");
        assert_eq!(vars[ENV_NAME_ENV], "Golang");
        assert!(vars.contains_key(TEMP_ENV));
        assert!(vars.contains_key(CURRENT_OUTPUT_ENV));
        assert!(!vars.contains_key(OUTPUT_ENV));
        assert_eq!(vars["EXTRA"], "1");
    }
}
