//! Docker-backed sandbox
//!
//! One long-lived container per environment. Source and context are copied in
//! as tar archives at construction; uploads and downloads move tar archives
//! across the container boundary; commands run through `docker exec`.
//!
//! The rest of the crate is synchronous, so the backend owns a current-thread
//! Tokio runtime and blocks on every Docker call.

use super::{
    EnvInfo, EnvironmentBackend, EnvironmentError, ExecOutput, FileMetadata, FileType,
    EXIT_TIMED_OUT,
};
use bollard::container::{
    Config, CreateContainerOptions, DownloadFromContainerOptions, LogOutput,
    RemoveContainerOptions, StartContainerOptions, UploadToContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::Docker;
use futures_util::stream::StreamExt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};
use uuid::Uuid;

const WORKSPACE: &str = "/workspace";
const SOURCE_DIR: &str = "/workspace/source";
const CONTEXT_DIR: &str = "/workspace/context";
const UPLOADS_DIR: &str = "/workspace/uploads";

const SETUP_TIMEOUT: Duration = Duration::from_secs(60);

const TAR_BLOCK: usize = 512;

pub struct ContainerBackend {
    name: String,
    image: String,
    docker: Docker,
    runtime: Runtime,
    container_id: Option<String>,
    source: PathBuf,
    context: PathBuf,
    working_dir: PathBuf,
    downloads: PathBuf,
    timeout: Duration,
    /// Set by `upload`, cleared by the next `reset`
    uploads_dirty: bool,
}

impl std::fmt::Debug for ContainerBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerBackend")
            .field("name", &self.name)
            .field("image", &self.image)
            .field("container_id", &self.container_id)
            .finish()
    }
}

/// Connects to the local Docker daemon and checks that it answers
fn connect(runtime: &Runtime) -> Result<Docker, EnvironmentError> {
    let _guard = runtime.enter();
    let docker = Docker::connect_with_local_defaults().map_err(|e| {
        debug!("Failed to connect to Docker: {}", e);
        EnvironmentError::NoContainerRuntime(e.to_string())
    })?;
    runtime.block_on(docker.ping()).map_err(|e| {
        debug!("Docker did not answer ping: {}", e);
        EnvironmentError::NoContainerRuntime(e.to_string())
    })?;
    Ok(docker)
}

/// Whether a Docker daemon is reachable from this process
pub fn is_available() -> bool {
    match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => connect(&runtime).is_ok(),
        Err(_) => false,
    }
}

impl ContainerBackend {
    pub fn new(info: &EnvInfo) -> Result<Self, EnvironmentError> {
        let spec = info.container.clone().unwrap_or_default();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| EnvironmentError::io(&info.temp_root, e))?;
        let docker = connect(&runtime)?;

        let downloads = info
            .temp_root
            .join("downloads")
            .join(Uuid::new_v4().simple().to_string());
        fs::create_dir_all(&downloads).map_err(|e| EnvironmentError::io(&downloads, e))?;

        let mut backend = Self {
            name: info.name.clone(),
            image: spec.image.clone(),
            docker,
            runtime,
            container_id: None,
            source: PathBuf::from(SOURCE_DIR),
            context: PathBuf::from(CONTEXT_DIR),
            working_dir: spec
                .working_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from(CONTEXT_DIR)),
            downloads,
            timeout: info.exec_timeout,
            uploads_dirty: false,
        };

        backend.ensure_image()?;
        let keep_alive = if spec.keep_alive_command.is_empty() {
            vec!["tail".to_string(), "-f".to_string(), "/dev/null".to_string()]
        } else {
            spec.keep_alive_command.clone()
        };
        backend.start_container(keep_alive)?;

        // From here on a failure must not leak the container.
        if let Err(err) = backend.populate(info) {
            let _ = backend.destroy();
            return Err(err);
        }
        info!(env = %backend.name, image = %backend.image, "Started container environment");
        Ok(backend)
    }

    pub fn container_id(&self) -> Option<&str> {
        self.container_id.as_deref()
    }

    fn id(&self) -> Result<&str, EnvironmentError> {
        self.container_id
            .as_deref()
            .ok_or_else(|| EnvironmentError::Inactive(self.name.clone()))
    }

    fn ensure_image(&self) -> Result<(), EnvironmentError> {
        if self.runtime.block_on(self.docker.inspect_image(&self.image)).is_ok() {
            return Ok(());
        }
        info!(image = %self.image, "Pulling image");
        let options = CreateImageOptions {
            from_image: self.image.clone(),
            ..Default::default()
        };
        self.runtime.block_on(async {
            let mut stream = self.docker.create_image(Some(options), None, None);
            while let Some(progress) = stream.next().await {
                progress.map_err(|e| EnvironmentError::ImageUnavailable {
                    image: self.image.clone(),
                    reason: e.to_string(),
                })?;
            }
            Ok(())
        })
    }

    fn start_container(&mut self, keep_alive: Vec<String>) -> Result<(), EnvironmentError> {
        let name = format!("m2k-planner-{}", Uuid::new_v4().simple());
        let config = Config {
            image: Some(self.image.clone()),
            cmd: Some(keep_alive),
            working_dir: Some(WORKSPACE.to_string()),
            ..Default::default()
        };
        let options = CreateContainerOptions {
            name: name.clone(),
            platform: None,
        };
        let created = self
            .runtime
            .block_on(self.docker.create_container(Some(options), config))?;
        self.container_id = Some(created.id.clone());
        self.runtime.block_on(
            self.docker
                .start_container(&created.id, None::<StartContainerOptions<String>>),
        )?;
        debug!(env = %self.name, container = %name, "Container started");
        Ok(())
    }

    fn populate(&self, info: &EnvInfo) -> Result<(), EnvironmentError> {
        self.run_checked(&["mkdir", "-p", SOURCE_DIR, CONTEXT_DIR, UPLOADS_DIR])?;
        self.copy_in(&info.source, "source", WORKSPACE)?;
        if info.context.exists() {
            self.copy_in(&info.context, "context", WORKSPACE)?;
        }
        Ok(())
    }

    /// Runs a setup command that must succeed
    fn run_checked(&self, command: &[&str]) -> Result<(), EnvironmentError> {
        let command: Vec<String> = command.iter().map(|s| s.to_string()).collect();
        let output = self.exec_with_timeout(&command, &[], SETUP_TIMEOUT);
        if let Some(err) = output.error {
            return Err(err);
        }
        if output.exit_code != 0 {
            return Err(EnvironmentError::Spawn {
                command: command.join(" "),
                source: std::io::Error::new(
                    std::io::ErrorKind::Other,
                    format!("exit code {}: {}", output.exit_code, output.stderr.trim()),
                ),
            });
        }
        Ok(())
    }

    /// Archives `host_path` as `name` and extracts it into `dest_dir`
    fn copy_in(&self, host_path: &Path, name: &str, dest_dir: &str) -> Result<(), EnvironmentError> {
        let archive = tar_path(host_path, name)?;
        let id = self.id()?;
        let options = UploadToContainerOptions {
            path: dest_dir.to_string(),
            ..Default::default()
        };
        self.runtime
            .block_on(self.docker.upload_to_container(id, Some(options), archive.into()))?;
        Ok(())
    }

    fn fetch_archive(&self, path: &Path) -> Result<Vec<u8>, EnvironmentError> {
        let id = self.id()?;
        let options = DownloadFromContainerOptions {
            path: path.display().to_string(),
        };
        self.runtime.block_on(async {
            let mut stream = self.docker.download_from_container(id, Some(options));
            let mut archive = Vec::new();
            while let Some(chunk) = stream.next().await {
                archive.extend_from_slice(&chunk.map_err(|e| archive_error(path, e))?);
            }
            Ok(archive)
        })
    }

    /// Reads the archive of `path` only as far as its first entry header
    fn fetch_header(&self, path: &Path) -> Result<tar::Header, EnvironmentError> {
        let id = self.id()?;
        let options = DownloadFromContainerOptions {
            path: path.display().to_string(),
        };
        self.runtime.block_on(async {
            let mut stream = self.docker.download_from_container(id, Some(options));
            let mut buf = Vec::new();
            while let Some(chunk) = stream.next().await {
                buf.extend_from_slice(&chunk.map_err(|e| archive_error(path, e))?);
                if let Some(header) = leading_header(&buf) {
                    return Ok(header);
                }
            }
            Err(EnvironmentError::NotFound(path.to_path_buf()))
        })
    }

    fn exec_with_timeout(
        &self,
        command: &[String],
        env: &[(String, String)],
        timeout: Duration,
    ) -> ExecOutput {
        let id = match self.id() {
            Ok(id) => id,
            Err(err) => return ExecOutput::failure(-1, err),
        };
        let command_line = command.join(" ");
        let options = CreateExecOptions {
            cmd: Some(command.to_vec()),
            env: Some(env.iter().map(|(k, v)| format!("{}={}", k, v)).collect()),
            working_dir: Some(self.working_dir.display().to_string()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let run = async {
            let exec = self.docker.create_exec(id, options).await?;
            let mut stdout = String::new();
            let mut stderr = String::new();
            if let StartExecResults::Attached { mut output, .. } =
                self.docker.start_exec(&exec.id, None).await?
            {
                while let Some(chunk) = output.next().await {
                    match chunk? {
                        LogOutput::StdOut { message } | LogOutput::Console { message } => {
                            stdout.push_str(&String::from_utf8_lossy(&message))
                        }
                        LogOutput::StdErr { message } => {
                            stderr.push_str(&String::from_utf8_lossy(&message))
                        }
                        LogOutput::StdIn { .. } => {}
                    }
                }
            }
            let inspect = self.docker.inspect_exec(&exec.id).await?;
            Ok::<_, bollard::errors::Error>((stdout, stderr, inspect.exit_code))
        };

        match self.runtime.block_on(tokio::time::timeout(timeout, run)) {
            Ok(Ok((stdout, stderr, exit_code))) => {
                let exit_code = exit_code.unwrap_or(-1) as i32;
                debug!(env = %self.name, command = %command_line, exit_code, "Container command finished");
                ExecOutput {
                    stdout,
                    stderr,
                    exit_code,
                    error: None,
                }
            }
            Ok(Err(err)) => {
                warn!(env = %self.name, command = %command_line, error = %err, "Container command failed");
                ExecOutput::failure(-1, err.into())
            }
            Err(_) => {
                warn!(env = %self.name, command = %command_line, "Container command timed out");
                ExecOutput::failure(
                    EXIT_TIMED_OUT,
                    EnvironmentError::Timeout {
                        command: command_line,
                        timeout,
                    },
                )
            }
        }
    }
}

impl EnvironmentBackend for ContainerBackend {
    fn reset(&mut self) -> Result<(), EnvironmentError> {
        if !self.uploads_dirty {
            return Ok(());
        }
        let script = format!("rm -rf {0} && mkdir -p {0}", UPLOADS_DIR);
        self.run_checked(&["sh", "-c", script.as_str()])?;
        self.uploads_dirty = false;
        Ok(())
    }

    fn stat(&self, path: &Path) -> Result<FileMetadata, EnvironmentError> {
        let header = self.fetch_header(path)?;
        let file_type = match header.entry_type() {
            tar::EntryType::Directory => FileType::Directory,
            tar::EntryType::Symlink => FileType::Symlink,
            _ => FileType::File,
        };
        Ok(FileMetadata {
            size: header.size().unwrap_or(0),
            file_type,
        })
    }

    fn download(&mut self, path: &Path) -> Result<PathBuf, EnvironmentError> {
        let archive = self.fetch_archive(path)?;
        let dest = self.downloads.join(Uuid::new_v4().simple().to_string());
        fs::create_dir_all(&dest).map_err(|e| EnvironmentError::io(&dest, e))?;
        tar::Archive::new(archive.as_slice())
            .unpack(&dest)
            .map_err(|e| EnvironmentError::io(&dest, e))?;
        let file_name = path.file_name().unwrap_or_default();
        Ok(dest.join(file_name))
    }

    fn upload(&mut self, host_path: &Path) -> Result<PathBuf, EnvironmentError> {
        let file_name = host_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("root")
            .to_string();
        let dir = Path::new(UPLOADS_DIR).join(Uuid::new_v4().simple().to_string());
        let dir_str = dir.display().to_string();
        self.uploads_dirty = true;
        self.run_checked(&["mkdir", "-p", dir_str.as_str()])?;
        self.copy_in(host_path, &file_name, &dir_str)?;
        Ok(dir.join(file_name))
    }

    fn exec(&mut self, command: &[String], env: &[(String, String)]) -> ExecOutput {
        self.exec_with_timeout(command, env, self.timeout)
    }

    fn destroy(&mut self) -> Result<(), EnvironmentError> {
        let Some(id) = self.container_id.take() else {
            return Ok(());
        };
        debug!(env = %self.name, container = %id, "Removing container");
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.runtime
            .block_on(self.docker.remove_container(&id, Some(options)))?;
        if let Err(e) = fs::remove_dir_all(&self.downloads) {
            debug!(path = %self.downloads.display(), error = %e, "Failed to remove downloads");
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

fn archive_error(path: &Path, err: bollard::errors::Error) -> EnvironmentError {
    match err {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        } => EnvironmentError::NotFound(path.to_path_buf()),
        e => e.into(),
    }
}

/// First real entry header of a partially received tar stream, skipping PAX
/// and GNU long-name records. `None` until enough bytes have arrived.
fn leading_header(buf: &[u8]) -> Option<tar::Header> {
    let mut offset = 0;
    loop {
        let block = buf.get(offset..offset + TAR_BLOCK)?;
        let mut header = tar::Header::new_old();
        header.as_mut_bytes().copy_from_slice(block);
        let entry_type = header.entry_type();
        if entry_type.is_pax_global_extensions()
            || entry_type.is_pax_local_extensions()
            || entry_type.is_gnu_longname()
            || entry_type.is_gnu_longlink()
        {
            let size = header.entry_size().ok()? as usize;
            offset += TAR_BLOCK + (size + TAR_BLOCK - 1) / TAR_BLOCK * TAR_BLOCK;
            continue;
        }
        return Some(header);
    }
}

/// Tar archive holding `host_path` under the entry name `name`
fn tar_path(host_path: &Path, name: &str) -> Result<Vec<u8>, EnvironmentError> {
    let mut builder = tar::Builder::new(Vec::new());
    builder.follow_symlinks(true);
    let result = if host_path.is_dir() {
        builder.append_dir_all(name, host_path)
    } else {
        builder.append_path_with_name(host_path, name)
    };
    result.map_err(|e| EnvironmentError::io(host_path, e))?;
    builder
        .into_inner()
        .map_err(|e| EnvironmentError::io(host_path, e))
}
