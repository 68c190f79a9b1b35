//! Rule file watcher
//!
//! Watches the rule file's directory (editors often replace files instead of
//! writing in place) and reloads the repository after a short debounce.
//! Reloads run on their own task and never touch the frame path.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{RuleRepository, WatchError};

/// Quiet period before a burst of change events triggers one reload
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(200);

/// Background reload driver for one rule file
pub struct RuleWatcher {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
    cancel: CancellationToken,
}

impl RuleWatcher {
    /// Start watching `path`. Must be called inside a tokio runtime.
    pub fn spawn(
        repository: Arc<RuleRepository>,
        path: PathBuf,
        debounce: Duration,
        cancel: CancellationToken,
    ) -> Result<Self, WatchError> {
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        if !parent.exists() {
            return Err(WatchError::NoParent(path.display().to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            // Receiver gone means the watcher is shutting down
            let _ = tx.send(res);
        })?;
        watcher.watch(&parent, RecursiveMode::NonRecursive)?;

        let task = tokio::spawn(watch_loop(
            repository,
            path.clone(),
            debounce,
            rx,
            cancel.clone(),
        ));

        tracing::info!(path = %path.display(), "watching rule file");

        Ok(RuleWatcher {
            _watcher: watcher,
            task,
            cancel,
        })
    }

    /// Stop watching and wait for the reload task to finish
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

fn is_relevant(event: &notify::Event, target: &Path) -> bool {
    let relevant_kind = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    );
    relevant_kind
        && event
            .paths
            .iter()
            .any(|p| p.file_name().is_some() && p.file_name() == target.file_name())
}

async fn watch_loop(
    repository: Arc<RuleRepository>,
    path: PathBuf,
    debounce: Duration,
    mut rx: mpsc::UnboundedReceiver<notify::Result<notify::Event>>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = rx.recv() => event,
        };

        let Some(event) = event else { break };
        match event {
            Ok(event) if is_relevant(&event, &path) => {}
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!(error = %e, "rule watcher error");
                continue;
            }
        }

        // Swallow the rest of the burst
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(debounce) => {}
        }
        while rx.try_recv().is_ok() {}

        let set = repository.reload(&path);
        tracing::info!(status = ?set.status(), rules = set.len(), "rule file change applied");
    }

    tracing::debug!(path = %path.display(), "rule watcher stopped");
}
