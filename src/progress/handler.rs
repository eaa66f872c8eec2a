//! Progress handler trait and events

use std::path::PathBuf;
use std::time::Duration;

/// Events emitted while planning
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Planning started on a source tree
    Started { root: PathBuf },

    /// A root-only transformer was run on the base directory
    RootTransformer { transformer: String, services: usize },

    /// The walk entered a directory
    DirectoryVisited { dir: PathBuf, depth: usize },

    /// A transformer reported services in a directory
    ServicesDetected {
        transformer: String,
        dir: PathBuf,
        services: usize,
    },

    /// Planning completed
    Completed {
        named_services: usize,
        directories_visited: usize,
        total_time: Duration,
    },

    /// Planning aborted
    Failed { error: String },
}

/// Trait for handling progress events during planning
pub trait ProgressHandler: Send + Sync {
    /// Called when a progress event occurs
    fn on_progress(&self, event: &ProgressEvent);
}

/// No-op handler that ignores all events
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpHandler;

impl ProgressHandler for NoOpHandler {
    fn on_progress(&self, _event: &ProgressEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingHandler {
        count: Arc<AtomicUsize>,
    }

    impl ProgressHandler for CountingHandler {
        fn on_progress(&self, _event: &ProgressEvent) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_noop_handler() {
        NoOpHandler.on_progress(&ProgressEvent::Started {
            root: PathBuf::from("/src"),
        });
    }

    #[test]
    fn test_progress_events() {
        let count = Arc::new(AtomicUsize::new(0));
        let handler = CountingHandler {
            count: count.clone(),
        };

        handler.on_progress(&ProgressEvent::Started {
            root: PathBuf::from("/src"),
        });
        handler.on_progress(&ProgressEvent::DirectoryVisited {
            dir: PathBuf::from("/src/api"),
            depth: 1,
        });
        handler.on_progress(&ProgressEvent::Completed {
            named_services: 1,
            directories_visited: 2,
            total_time: Duration::from_millis(20),
        });

        assert_eq!(count.load(Ordering::SeqCst), 3);
    }
}
