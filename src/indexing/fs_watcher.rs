//! File system watcher for automatic re-indexing of changed files
//!
//! Watches the workspace root recursively. Events for files a directory
//! walk would index are debounced per path and then handed to the indexer
//! as one batch; the indexer itself decides whether a path was updated,
//! emptied or deleted. Anything under the index directory is ignored.

use notify::{Event, EventKind, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{RwLock, mpsc};
use tokio::time::{Duration, MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::config::IGNORE_FILE;
use crate::indexing::{IncrementalIndexer, IndexFilter};

/// How often pending changes are checked for having settled.
const SETTLE_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Errors specific to file watching operations
#[derive(Error, Debug)]
pub enum FileWatchError {
    #[error(
        "Failed to initialize file watcher: {reason}\nSuggestion: Check file system permissions and the inotify/FSEvents watch limits"
    )]
    WatcherInitFailed { reason: String },

    #[error(
        "Cannot watch path {path:?}: {reason}\nSuggestion: Verify the path exists and you have read permissions"
    )]
    PathWatchFailed { path: PathBuf, reason: String },

    #[error("File watching is disabled\nSuggestion: Set file_watch.enabled = true in settings.toml")]
    Disabled,
}

/// Re-indexes files under the workspace root as they change.
pub struct FileSystemWatcher {
    indexer: Arc<RwLock<IncrementalIndexer>>,
    root: PathBuf,
    index_dir: PathBuf,
    filter: IndexFilter,
    /// How long a path must stay quiet before it is re-indexed
    debounce: Duration,
    event_rx: mpsc::Receiver<notify::Result<Event>>,
    /// Kept alive for as long as events are wanted
    watcher: notify::RecommendedWatcher,
}

impl FileSystemWatcher {
    /// Create a watcher over the indexer's workspace root.
    ///
    /// Fails with [`FileWatchError::Disabled`] when `file_watch.enabled` is
    /// off.
    pub async fn new(
        indexer: Arc<RwLock<IncrementalIndexer>>,
        debounce_ms: u64,
    ) -> Result<Self, FileWatchError> {
        if !indexer.read().await.settings().file_watch.enabled {
            return Err(FileWatchError::Disabled);
        }

        let (tx, rx) = mpsc::channel(256);

        // The notify callback is synchronous.
        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = tx.blocking_send(res);
        })
        .map_err(|e| FileWatchError::WatcherInitFailed {
            reason: e.to_string(),
        })?;

        let (root, index_dir, filter) = {
            let guard = indexer.read().await;
            let normalizer = guard.normalizer();
            let root = normalizer.root().to_path_buf();
            let filter = IndexFilter::new(guard.settings(), &root);
            (
                root,
                normalizer.resolve(&normalizer.normalize(guard.settings().index_dir())),
                filter,
            )
        };

        Ok(Self {
            indexer,
            root,
            index_dir,
            filter,
            debounce: Duration::from_millis(debounce_ms),
            event_rx: rx,
            watcher,
        })
    }

    /// Watch until the event channel closes, then re-index whatever is
    /// still pending.
    pub async fn watch(mut self) -> Result<(), FileWatchError> {
        self.watcher
            .watch(&self.root, RecursiveMode::Recursive)
            .map_err(|e| FileWatchError::PathWatchFailed {
                path: self.root.clone(),
                reason: e.to_string(),
            })?;
        info!("watching {} for changes", self.root.display());

        let mut pending_changes: HashMap<PathBuf, Instant> = HashMap::new();
        // Created once so a steady stream of events cannot postpone it.
        let mut settle_check = interval(SETTLE_CHECK_INTERVAL);
        settle_check.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                received = self.event_rx.recv() => {
                    match received {
                        Some(Ok(event)) => self.record(event, &mut pending_changes),
                        Some(Err(e)) => warn!("file watch error: {e}"),
                        None => break,
                    }
                }

                _ = settle_check.tick() => {
                    let ready = drain_settled(&mut pending_changes, Instant::now(), self.debounce);
                    if !ready.is_empty() {
                        self.reindex(ready).await;
                    }
                }
            }
        }

        if !pending_changes.is_empty() {
            let remaining: Vec<PathBuf> = pending_changes.into_keys().collect();
            self.reindex(remaining).await;
        }
        Ok(())
    }

    fn record(&mut self, event: Event, pending: &mut HashMap<PathBuf, Instant>) {
        if !is_content_event(&event.kind) {
            return;
        }
        if event.paths.iter().any(|path| is_ignore_file(path)) {
            debug!("ignore rules changed, reloading");
            self.filter.invalidate();
        }
        for path in event.paths {
            if self.is_relevant(&path) {
                pending.insert(path, Instant::now());
            }
        }
    }

    async fn reindex(&self, paths: Vec<PathBuf>) {
        debug!("re-indexing {} changed files", paths.len());
        let mut indexer = self.indexer.write().await;
        let stats = indexer.index_paths(paths).await;
        if stats.files_failed > 0 {
            for (path, error) in &stats.errors {
                warn!(path = %path, "re-index failed: {error}");
            }
        }
        info!(
            "re-indexed: {} processed ({} deleted, {} unchanged), {} chunks, {} failed",
            stats.files_processed,
            stats.files_deleted,
            stats.files_unchanged,
            stats.chunks_indexed,
            stats.files_failed
        );
    }

    fn is_relevant(&mut self, path: &Path) -> bool {
        !path.starts_with(&self.index_dir) && self.filter.is_indexable(path)
    }
}

fn is_ignore_file(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|name| name == ".gitignore" || name == IGNORE_FILE)
}

fn is_content_event(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

/// Remove and return the paths that have been quiet for at least `debounce`.
fn drain_settled(
    pending: &mut HashMap<PathBuf, Instant>,
    now: Instant,
    debounce: Duration,
) -> Vec<PathBuf> {
    let mut ready = Vec::new();
    pending.retain(|path, last_change| {
        if now.duration_since(*last_change) >= debounce {
            ready.push(path.clone());
            false
        } else {
            true
        }
    });
    ready.sort();
    ready
}

// Re-export the error type for convenience
pub use FileWatchError as WatchError;
