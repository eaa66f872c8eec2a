use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnvironmentError {
    /// Containerization was requested but no runtime answered. Callers treat
    /// this as "skip the transformer", not as a failure of the run.
    #[error("No container runtime available: {0}")]
    NoContainerRuntime(String),

    #[error("Environment '{0}' has been destroyed")]
    Inactive(String),

    #[error("Command '{command}' timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("Command '{command}' could not be started: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("Path {0} does not exist in the environment")]
    NotFound(PathBuf),

    #[error("Failed to pull image '{image}': {reason}")]
    ImageUnavailable { image: String, reason: String },

    #[error("Docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl EnvironmentError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EnvironmentError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_no_container_runtime(&self) -> bool {
        matches!(self, EnvironmentError::NoContainerRuntime(_))
    }
}
