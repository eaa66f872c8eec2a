//! Host-process backend
//!
//! Sandbox addressing equals host addressing unless the transformer asks for
//! isolation, in which case source and context are copied into a private
//! workspace under the run's temp root and commands run against the copies.

use super::{
    EnvInfo, EnvironmentBackend, EnvironmentError, ExecOutput, FileMetadata, EXIT_NOT_RUNNABLE,
    EXIT_TIMED_OUT,
};
use crate::util::fs::{clear_dir, replicate};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug)]
pub struct LocalBackend {
    name: String,
    source: PathBuf,
    context: PathBuf,
    workspace: PathBuf,
    isolated: bool,
    timeout: Duration,
}

impl LocalBackend {
    pub fn new(info: &EnvInfo) -> Result<Self, EnvironmentError> {
        let workspace = info
            .temp_root
            .join("environments")
            .join(format!("{}-{}", workspace_name(&info.name), Uuid::new_v4().simple()));
        fs::create_dir_all(&workspace).map_err(|e| EnvironmentError::io(&workspace, e))?;

        let (source, context) = if info.isolated {
            let source = workspace.join("source");
            let context = workspace.join("context");
            replicate(&info.source, &source).map_err(|e| EnvironmentError::io(&info.source, e))?;
            if info.context.exists() {
                replicate(&info.context, &context)
                    .map_err(|e| EnvironmentError::io(&info.context, e))?;
            } else {
                fs::create_dir_all(&context).map_err(|e| EnvironmentError::io(&context, e))?;
            }
            debug!(env = %info.name, workspace = %workspace.display(), "Replicated isolated workspace");
            (source, context)
        } else {
            (info.source.clone(), info.context.clone())
        };

        Ok(Self {
            name: info.name.clone(),
            source,
            context,
            workspace,
            isolated: info.isolated,
            timeout: info.exec_timeout,
        })
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn is_isolated(&self) -> bool {
        self.isolated
    }

    fn uploads_dir(&self) -> PathBuf {
        self.workspace.join("uploads")
    }

    fn downloads_dir(&self) -> PathBuf {
        self.workspace.join("downloads")
    }

    /// Copies `from` into a fresh `<dir>/<uuid>/<basename>`
    fn copy_into(&self, dir: &Path, from: &Path) -> Result<PathBuf, EnvironmentError> {
        if !from.exists() {
            return Err(EnvironmentError::NotFound(from.to_path_buf()));
        }
        let file_name = from
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "root".into());
        let dest = dir.join(Uuid::new_v4().simple().to_string()).join(file_name);
        replicate(from, &dest).map_err(|e| EnvironmentError::io(from, e))?;
        Ok(dest)
    }
}

impl EnvironmentBackend for LocalBackend {
    fn reset(&mut self) -> Result<(), EnvironmentError> {
        let uploads = self.uploads_dir();
        clear_dir(&uploads).map_err(|e| EnvironmentError::io(&uploads, e))
    }

    fn stat(&self, path: &Path) -> Result<FileMetadata, EnvironmentError> {
        match fs::symlink_metadata(path) {
            Ok(metadata) => Ok(FileMetadata::from_std(&metadata)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(EnvironmentError::NotFound(path.to_path_buf()))
            }
            Err(e) => Err(EnvironmentError::io(path, e)),
        }
    }

    fn download(&mut self, path: &Path) -> Result<PathBuf, EnvironmentError> {
        let dir = self.downloads_dir();
        self.copy_into(&dir, path)
    }

    fn upload(&mut self, host_path: &Path) -> Result<PathBuf, EnvironmentError> {
        let dir = self.uploads_dir();
        let dest = self.copy_into(&dir, host_path)?;
        debug!(env = %self.name, from = %host_path.display(), to = %dest.display(), "Uploaded path");
        Ok(dest)
    }

    fn exec(&mut self, command: &[String], env: &[(String, String)]) -> ExecOutput {
        run_command(command, env, &self.context, self.timeout)
    }

    fn destroy(&mut self) -> Result<(), EnvironmentError> {
        if !self.workspace.exists() {
            return Ok(());
        }
        fs::remove_dir_all(&self.workspace).map_err(|e| EnvironmentError::io(&self.workspace, e))
    }

    fn source(&self) -> &Path {
        &self.source
    }

    fn context(&self) -> &Path {
        &self.context
    }

    fn shares_host_filesystem(&self) -> bool {
        true
    }
}

/// Spawns `command` in `cwd` and collects its output, giving up once
/// `timeout` elapses. On timeout the child is killed and its pipes are
/// abandoned, so a grandchild holding them open cannot stall the caller.
pub fn run_command(
    command: &[String],
    env: &[(String, String)],
    cwd: &Path,
    timeout: Duration,
) -> ExecOutput {
    let Some((program, args)) = command.split_first() else {
        return ExecOutput::failure(
            EXIT_NOT_RUNNABLE,
            EnvironmentError::Spawn {
                command: String::new(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "empty command"),
            },
        );
    };
    let command_line = command.join(" ");

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(source) => {
            return ExecOutput::failure(
                -1,
                EnvironmentError::Spawn {
                    command: command_line,
                    source,
                },
            )
        }
    };

    let mut cmd = Command::new(program);
    cmd.args(args)
        .envs(env.iter().map(|(k, v)| (k, v)))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if cwd.is_dir() {
        cmd.current_dir(cwd);
    }

    let start = Instant::now();
    runtime.block_on(async move {
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                warn!(command = %command_line, error = %source, "Failed to start command");
                return ExecOutput::failure(
                    EXIT_NOT_RUNNABLE,
                    EnvironmentError::Spawn {
                        command: command_line,
                        source,
                    },
                );
            }
        };
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let collect = async {
            let (status, stdout, stderr) =
                tokio::join!(child.wait(), read_pipe(stdout), read_pipe(stderr));
            (status, stdout, stderr)
        };

        let outcome = tokio::time::timeout(timeout, collect).await;
        match outcome {
            Ok((Ok(status), stdout, stderr)) => {
                let exit_code = status.code().unwrap_or(-1);
                debug!(command = %command_line, exit_code, elapsed_ms = start.elapsed().as_millis(), "Command finished");
                ExecOutput {
                    stdout,
                    stderr,
                    exit_code,
                    error: None,
                }
            }
            Ok((Err(source), stdout, stderr)) => {
                warn!(command = %command_line, error = %source, "Command did not complete");
                ExecOutput {
                    stdout,
                    stderr,
                    exit_code: -1,
                    error: Some(EnvironmentError::Spawn {
                        command: command_line,
                        source,
                    }),
                }
            }
            Err(_) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                warn!(command = %command_line, timeout_ms = timeout.as_millis(), "Command timed out");
                ExecOutput::failure(
                    EXIT_TIMED_OUT,
                    EnvironmentError::Timeout {
                        command: command_line,
                        timeout,
                    },
                )
            }
        }
    })
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf).await;
    }
    String::from_utf8_lossy(&buf).into_owned()
}

fn workspace_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c.to_ascii_lowercase() } else { '-' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::DEFAULT_EXEC_TIMEOUT;
    use tempfile::TempDir;

    fn info(tmp: &TempDir, isolated: bool) -> EnvInfo {
        let source = tmp.path().join("src");
        fs::create_dir_all(source.join("svc")).unwrap();
        fs::write(source.join("svc/go.mod"), "module example.com/svc\n").unwrap();
        let context = tmp.path().join("ctx");
        fs::create_dir_all(&context).unwrap();
        EnvInfo {
            name: "Go Detector".to_string(),
            project_name: "demo".to_string(),
            isolated,
            source,
            output: tmp.path().join("out"),
            context,
            rel_templates_dir: String::new(),
            temp_root: tmp.path().join("temp"),
            container: None,
            exec_timeout: DEFAULT_EXEC_TIMEOUT,
        }
    }

    #[test]
    fn test_non_isolated_uses_host_roots() {
        let tmp = TempDir::new().unwrap();
        let info = info(&tmp, false);
        let backend = LocalBackend::new(&info).unwrap();
        assert_eq!(backend.source(), info.source);
        assert_eq!(backend.context(), info.context);
        assert!(backend.workspace().starts_with(&info.temp_root));
    }

    #[test]
    fn test_isolated_replicates_source() {
        let tmp = TempDir::new().unwrap();
        let info = info(&tmp, true);
        let backend = LocalBackend::new(&info).unwrap();

        assert_ne!(backend.source(), info.source);
        assert!(backend.source().join("svc/go.mod").is_file());
        assert!(backend.is_isolated());
    }

    #[test]
    fn test_upload_copies_and_reset_clears() {
        let tmp = TempDir::new().unwrap();
        let info = info(&tmp, false);
        let mut backend = LocalBackend::new(&info).unwrap();

        let uploaded = backend.upload(&info.source).unwrap();
        assert!(uploaded.join("svc/go.mod").is_file());
        assert!(uploaded.starts_with(backend.workspace()));

        backend.reset().unwrap();
        assert!(!uploaded.exists());
        backend.reset().unwrap();
    }

    #[test]
    fn test_upload_missing_path_fails() {
        let tmp = TempDir::new().unwrap();
        let info = info(&tmp, false);
        let mut backend = LocalBackend::new(&info).unwrap();
        assert!(matches!(
            backend.upload(&tmp.path().join("missing")),
            Err(EnvironmentError::NotFound(_))
        ));
    }

    #[test]
    fn test_stat_and_download() {
        let tmp = TempDir::new().unwrap();
        let info = info(&tmp, false);
        let mut backend = LocalBackend::new(&info).unwrap();
        let manifest = info.source.join("svc/go.mod");

        assert!(backend.stat(&manifest).unwrap().is_file());
        assert!(backend.stat(&info.source).unwrap().is_dir());
        assert!(matches!(
            backend.stat(&info.source.join("nope")),
            Err(EnvironmentError::NotFound(_))
        ));

        let downloaded = backend.download(&manifest).unwrap();
        assert_eq!(
            fs::read_to_string(downloaded).unwrap(),
            "module example.com/svc\n"
        );
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let info = info(&tmp, true);
        let mut backend = LocalBackend::new(&info).unwrap();
        backend.destroy().unwrap();
        assert!(!backend.workspace().exists());
        backend.destroy().unwrap();
    }

    #[test]
    fn test_missing_binary_reports_error() {
        let tmp = TempDir::new().unwrap();
        let output = run_command(
            &["m2k-planner-no-such-binary".to_string()],
            &[],
            tmp.path(),
            DEFAULT_EXEC_TIMEOUT,
        );
        assert_eq!(output.exit_code, EXIT_NOT_RUNNABLE);
        assert!(matches!(output.error, Some(EnvironmentError::Spawn { .. })));
        assert!(!output.success());
    }

    #[test]
    fn test_empty_command_reports_error() {
        let tmp = TempDir::new().unwrap();
        let output = run_command(&[], &[], tmp.path(), DEFAULT_EXEC_TIMEOUT);
        assert!(!output.success());
        assert!(output.error.is_some());
    }

    #[cfg(unix)]
    #[test]
    fn test_exec_captures_output_and_env() {
        let tmp = TempDir::new().unwrap();
        let command = vec![
            "sh".to_string(),
            "-c".to_string(),
            "echo \"$GREETING\"; echo oops >&2; exit 3".to_string(),
        ];
        let output = run_command(
            &command,
            &[("GREETING".to_string(), "hello".to_string())],
            tmp.path(),
            DEFAULT_EXEC_TIMEOUT,
        );
        assert_eq!(output.stdout.trim(), "hello");
        assert_eq!(output.stderr.trim(), "oops");
        assert_eq!(output.exit_code, 3);
        assert!(output.error.is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_exec_timeout_kills_command() {
        let tmp = TempDir::new().unwrap();
        let output = run_command(
            &["sleep".to_string(), "5".to_string()],
            &[],
            tmp.path(),
            Duration::from_millis(100),
        );
        assert_eq!(output.exit_code, EXIT_TIMED_OUT);
        assert!(matches!(output.error, Some(EnvironmentError::Timeout { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_exec_timeout_ignores_grandchild_holding_pipes() {
        let tmp = TempDir::new().unwrap();
        let command = vec![
            "sh".to_string(),
            "-c".to_string(),
            "sleep 6; echo late".to_string(),
        ];
        let start = Instant::now();
        let output = run_command(&command, &[], tmp.path(), Duration::from_millis(300));

        assert!(start.elapsed() < Duration::from_secs(2), "took {:?}", start.elapsed());
        assert_eq!(output.exit_code, EXIT_TIMED_OUT);
        assert!(!output.stdout.contains("late"));
    }
}
