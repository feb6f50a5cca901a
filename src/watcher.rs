//! Media directory watch.
//!
//! Wraps a notify watcher on the media root and batches bursts of events
//! (a mount creates the directory, then the filesystem appears inside it)
//! into a single callback.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{sync_channel, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Bounded so a flood of events cannot grow memory without limit
const EVENT_BUFFER: usize = 100;

pub struct MediaWatcher {
    path: PathBuf,
    _watcher: RecommendedWatcher,
    cancellation_token: CancellationToken,
    debounce_thread: Option<thread::JoinHandle<()>>,
}

impl MediaWatcher {
    /// Watches `path` (non-recursively). `on_change` receives the changed
    /// paths once no further event has arrived for `debounce`.
    pub fn start<F>(path: &Path, debounce: Duration, on_change: F) -> Result<Self>
    where
        F: Fn(Vec<PathBuf>) + Send + 'static,
    {
        let cancellation_token = CancellationToken::new();
        let token = cancellation_token.clone();

        let (tx, rx) = sync_channel::<Event>(EVENT_BUFFER);

        // Directory changes and deletions of watched subdirectories both
        // matter, so every create/modify/remove is forwarded.
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            if let Ok(event) = res {
                match event.kind {
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => {
                        if tx.try_send(event).is_err() {
                            tracing::debug!("media watch buffer full, dropping event");
                        }
                    }
                    _ => {}
                }
            }
        })?;
        watcher.watch(path, RecursiveMode::NonRecursive)?;

        let debounce_thread = thread::spawn(move || {
            let mut paths = HashSet::new();
            loop {
                if token.is_cancelled() {
                    break;
                }

                let first = match rx.recv_timeout(debounce) {
                    Ok(event) => event,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                };
                paths.extend(first.paths);

                loop {
                    if token.is_cancelled() {
                        return;
                    }
                    match rx.recv_timeout(debounce) {
                        Ok(event) => paths.extend(event.paths),
                        Err(RecvTimeoutError::Timeout) => {
                            on_change(paths.drain().collect());
                            break;
                        }
                        Err(RecvTimeoutError::Disconnected) => return,
                    }
                }
            }
        });

        tracing::debug!("watching {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            _watcher: watcher,
            cancellation_token,
            debounce_thread: Some(debounce_thread),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn stop(&mut self) {
        self.cancellation_token.cancel();
        // The thread notices the token within one debounce interval.
        let _ = self.debounce_thread.take();
    }
}

impl Drop for MediaWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::mpsc;
    use tempfile::tempdir;

    #[test]
    fn test_new_subdirectory_is_reported_once() {
        let dir = tempdir().unwrap();
        let (tx, rx) = mpsc::channel();

        let mut watcher = MediaWatcher::start(dir.path(), Duration::from_millis(200), move |paths| {
            let _ = tx.send(paths);
        })
        .unwrap();

        for name in ["usb", "cam"] {
            fs::create_dir(dir.path().join(name)).unwrap();
            thread::sleep(Duration::from_millis(30));
        }

        let paths = rx
            .recv_timeout(Duration::from_secs(3))
            .expect("should receive debounced batch");
        assert!(!paths.is_empty());
        assert!(rx.recv_timeout(Duration::from_millis(400)).is_err());

        watcher.stop();
    }

    #[test]
    fn test_watching_missing_directory_fails() {
        let dir = tempdir().unwrap();
        let result = MediaWatcher::start(&dir.path().join("missing"), Duration::from_millis(50), |_| {});
        assert!(result.is_err());
    }

    #[test]
    fn test_path_accessor() {
        let dir = tempdir().unwrap();
        let watcher = MediaWatcher::start(dir.path(), Duration::from_millis(50), |_| {}).unwrap();
        assert_eq!(watcher.path(), dir.path());
    }
}
