//! Logging-based progress handler

use super::{ProgressEvent, ProgressHandler};
use tracing::{debug, info, trace, warn};

/// Handler that logs progress events using tracing
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl ProgressHandler for LoggingHandler {
    fn on_progress(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Started { root } => {
                info!(root = %root.display(), "Planning started");
            }
            ProgressEvent::RootTransformer {
                transformer,
                services,
            } => {
                debug!(transformer = %transformer, services, "Root transformer finished");
            }
            ProgressEvent::DirectoryVisited { dir, depth } => {
                trace!(dir = %dir.display(), depth, "Visiting directory");
            }
            ProgressEvent::ServicesDetected {
                transformer,
                dir,
                services,
            } => {
                debug!(
                    transformer = %transformer,
                    dir = %dir.display(),
                    services,
                    "Services detected"
                );
            }
            ProgressEvent::Completed {
                named_services,
                directories_visited,
                total_time,
            } => {
                info!(
                    services = named_services,
                    directories = directories_visited,
                    total_time_ms = total_time.as_millis(),
                    "Planning complete"
                );
            }
            ProgressEvent::Failed { error } => {
                warn!(error = %error, "Planning failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn test_logging_all_events() {
        let handler = LoggingHandler;
        let events = vec![
            ProgressEvent::Started {
                root: PathBuf::from("/src"),
            },
            ProgressEvent::RootTransformer {
                transformer: "Compose".to_string(),
                services: 2,
            },
            ProgressEvent::DirectoryVisited {
                dir: PathBuf::from("/src/api"),
                depth: 1,
            },
            ProgressEvent::ServicesDetected {
                transformer: "Golang".to_string(),
                dir: PathBuf::from("/src/api"),
                services: 1,
            },
            ProgressEvent::Completed {
                named_services: 1,
                directories_visited: 3,
                total_time: Duration::from_millis(40),
            },
            ProgressEvent::Failed {
                error: "root missing".to_string(),
            },
        ];

        for event in events {
            handler.on_progress(&event);
        }
    }
}
