//! Desktop volume links.
//!
//! Every mounted volume under the media root gets a symlink on the desktop;
//! links whose volume went away are removed. Each pass re-reads both
//! directories from disk.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::FilerConfig;
use crate::error::{FilerError, Result};
use crate::mounts::MountTable;
use crate::process::{argv, ProcessRunner};
use crate::watcher::MediaWatcher;

/// Links created and removed by one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub created: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
    /// Media directories that did not show up as mounts within the wait window.
    pub pending: Vec<PathBuf>,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.created.is_empty() && self.removed.is_empty()
    }
}

pub struct VolumeReconciler {
    media_root: PathBuf,
    desktop_dir: PathBuf,
    root_path: PathBuf,
    live_media_name: String,
    live_marker_file: String,
    mount_wait: Duration,
    mount_poll: Duration,
    watch_debounce: Duration,
    mounts: Arc<dyn MountTable>,
}

impl VolumeReconciler {
    /// Resolves the media root, makes sure the root-disk and Trash links are
    /// on the desktop, and runs a first pass.
    pub async fn new<R: ProcessRunner>(
        config: &FilerConfig,
        trash_path: &Path,
        mounts: Arc<dyn MountTable>,
        runner: &R,
    ) -> Result<Self> {
        let media_root = resolve_media_root(config, runner).await;
        let desktop_dir = config.desktop_dir();
        tracing::debug!("media root is {}", media_root.display());

        let reconciler = Self {
            media_root,
            desktop_dir,
            root_path: config.root_path.clone(),
            live_media_name: config.live_media_name.clone(),
            live_marker_file: config.live_marker_file.clone(),
            mount_wait: config.mount_wait_timeout(),
            mount_poll: config.mount_poll_interval(),
            watch_debounce: config.watch_debounce(),
            mounts,
        };

        tokio::fs::create_dir_all(&reconciler.desktop_dir)
            .await
            .map_err(|e| FilerError::fs("create", &reconciler.desktop_dir, e))?;

        let disk_name = root_disk_name(config, reconciler.mounts.as_ref(), runner).await;
        reconciler
            .ensure_link(&disk_name, &config.root_path)
            .await;
        reconciler
            .ensure_link(&config.trash_link_name, trash_path)
            .await;

        reconciler.reconcile().await;
        Ok(reconciler)
    }

    pub fn media_root(&self) -> &Path {
        &self.media_root
    }

    pub fn desktop_dir(&self) -> &Path {
        &self.desktop_dir
    }

    async fn ensure_link(&self, name: &str, target: &Path) {
        if name.is_empty() || name.contains('/') {
            tracing::warn!("not creating desktop link with name {name:?}");
            return;
        }
        let link = self.desktop_dir.join(name);
        if tokio::fs::symlink_metadata(&link).await.is_ok() {
            return;
        }
        if let Err(e) = tokio::fs::symlink(target, &link).await {
            tracing::warn!("linking {} -> {}: {e}", link.display(), target.display());
        }
    }

    /// One reconciliation pass. Running it again without a filesystem
    /// change in between does nothing.
    pub async fn reconcile(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        let media_dirs = self.media_subdirectories().await;
        let managed = self.managed_links().await;
        let mirrored: HashSet<&str> = managed.iter().map(|(name, _)| name.as_str()).collect();

        for name in &media_dirs {
            if mirrored.contains(name.as_str()) {
                continue;
            }
            let full_path = self.media_root.join(name);
            let link = self.desktop_dir.join(name);

            if tokio::fs::symlink_metadata(&link).await.is_ok() {
                tracing::debug!("{} already exists on the desktop", link.display());
                continue;
            }
            if self.is_live_root(&full_path).await {
                tracing::debug!("skipping {}, same filesystem as /", full_path.display());
                continue;
            }
            if !self.wait_for_mount(&full_path).await {
                tracing::debug!("giving up on {} for now", full_path.display());
                report.pending.push(full_path);
                continue;
            }

            match tokio::fs::symlink(&full_path, &link).await {
                Ok(()) => {
                    tracing::debug!("symlink created for {}", full_path.display());
                    report.created.push(link);
                }
                Err(e) => tracing::warn!("linking {}: {e}", link.display()),
            }
        }

        for (name, target) in &managed {
            if tokio::fs::try_exists(target).await.unwrap_or(true) {
                continue;
            }
            let link = self.desktop_dir.join(name);
            match tokio::fs::remove_file(&link).await {
                Ok(()) => {
                    tracing::debug!("symlink removed for {}", target.display());
                    report.removed.push(link);
                }
                Err(e) => tracing::warn!("removing {}: {e}", link.display()),
            }
        }

        report
    }

    async fn media_subdirectories(&self) -> Vec<String> {
        let mut names = Vec::new();
        let Ok(mut dir) = tokio::fs::read_dir(&self.media_root).await else {
            return names;
        };
        while let Ok(Some(entry)) = dir.next_entry().await {
            // Follows symlinks, like a directory listing would.
            if tokio::fs::metadata(entry.path()).await.is_ok_and(|m| m.is_dir()) {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        names
    }

    /// Desktop symlinks pointing strictly below the media root.
    async fn managed_links(&self) -> Vec<(String, PathBuf)> {
        let mut links = Vec::new();
        let Ok(mut dir) = tokio::fs::read_dir(&self.desktop_dir).await else {
            return links;
        };
        while let Ok(Some(entry)) = dir.next_entry().await {
            let Ok(target) = tokio::fs::read_link(entry.path()).await else {
                continue;
            };
            if target.starts_with(&self.media_root) && target != self.media_root {
                links.push((entry.file_name().to_string_lossy().into_owned(), target));
            }
        }
        links
    }

    /// A live system exposes its own root again under `<media>/LIVE`; the
    /// marker file has the same creation time in both places then.
    async fn is_live_root(&self, full_path: &Path) -> bool {
        if full_path != self.media_root.join(&self.live_media_name) {
            return false;
        }
        let created = |meta: std::io::Result<std::fs::Metadata>| meta.and_then(|m| m.created());
        let root_marker = tokio::fs::metadata(self.root_path.join(&self.live_marker_file)).await;
        let live_marker = tokio::fs::metadata(full_path.join(&self.live_marker_file)).await;
        same_marker(created(root_marker), created(live_marker))
    }

    /// Mount registration can lag behind directory creation; poll the mount
    /// table until `path` is a mount root or the wait window closes.
    async fn wait_for_mount(&self, path: &Path) -> bool {
        let deadline = Instant::now() + self.mount_wait;
        loop {
            if self.mounts.is_mount_point(path) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tracing::debug!("waiting for mount point to appear at {}", path.display());
            tokio::time::sleep(self.mount_poll).await;
        }
    }

    /// Starts a watch on the media root feeding batches into `tx`.
    pub fn watch(&self, tx: mpsc::Sender<Vec<PathBuf>>) -> Result<MediaWatcher> {
        MediaWatcher::start(&self.media_root, self.watch_debounce, move |paths| {
            if tx.try_send(paths).is_err() {
                tracing::debug!("reconcile already queued");
            }
        })
    }

    /// Runs a pass for every batch of change events until `events` closes or
    /// `cancel` fires.
    pub async fn run(&self, mut events: mpsc::Receiver<Vec<PathBuf>>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                batch = events.recv() => {
                    let Some(paths) = batch else { break };
                    tracing::debug!("media changed: {:?}", paths);
                    let report = self.reconcile().await;
                    if !report.is_noop() {
                        tracing::info!(
                            created = report.created.len(),
                            removed = report.removed.len(),
                            "desktop volume links updated"
                        );
                    }
                }
            }
        }
    }
}

/// `<media>/<user>` when the volume daemon manages mounts there, otherwise
/// `<media>`.
pub async fn resolve_media_root<R: ProcessRunner>(config: &FilerConfig, runner: &R) -> PathBuf {
    let base = config.media_base.clone();

    let probe = argv(["pidof", config.volume_daemon.as_str()]);
    let daemon_running = matches!(
        runner.run(&probe, config.probe_timeout()).await,
        Ok(output) if output.success()
    );
    if !daemon_running {
        return base;
    }

    let Some(user) = config.user_name() else {
        return base;
    };
    let candidate = base.join(user);
    if let Err(e) = tokio::fs::create_dir(&candidate).await {
        if e.kind() != std::io::ErrorKind::AlreadyExists {
            tracing::debug!("cannot create {}: {e}", candidate.display());
        }
    }
    if tokio::fs::metadata(&candidate).await.is_ok_and(|m| m.is_dir()) {
        candidate
    } else {
        base
    }
}

/// Display name for the root volume: its label, the configured default, or
/// the pool name when `/` lives on ZFS.
pub async fn root_disk_name<R: ProcessRunner>(
    config: &FilerConfig,
    mounts: &dyn MountTable,
    runner: &R,
) -> String {
    let mut label = mounts
        .volume_label(&config.root_path)
        .filter(|l| !l.trim().is_empty())
        .unwrap_or_else(|| config.default_disk_name.clone());

    if let Ok(output) = runner.run(&config.zfs_name_query, config.probe_timeout()).await {
        if output.success() {
            if let Some(name) = zfs_display_name(&output.stdout) {
                label = name;
            }
        }
    }
    label
}

/// `zroot/ROOT/default` → `ROOT`, stripped of unusual characters.
fn zfs_display_name(dataset: &str) -> Option<String> {
    let dataset = dataset.lines().next()?.trim();
    if dataset.is_empty() {
        return None;
    }
    let mut parts = dataset.split('/');
    let first = parts.next()?;
    let part = parts.next().unwrap_or(first);
    let cleaned = sanitize_label(part);
    (!cleaned.trim().is_empty()).then_some(cleaned)
}

/// Both creation times were readable and are equal.
fn same_marker(root: std::io::Result<SystemTime>, live: std::io::Result<SystemTime>) -> bool {
    matches!((root, live), (Ok(a), Ok(b)) if a == b)
}

/// Keeps ASCII letters and digits, `_`, `-`, whitespace and Latin-1 letters.
pub fn sanitize_label(label: &str) -> String {
    label
        .chars()
        .filter(|c| {
            c.is_ascii_alphanumeric()
                || matches!(c, '_' | '-')
                || c.is_whitespace()
                || ('\u{00C0}'..='\u{00FF}').contains(c)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeMounts, FakeRunner};
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        root: PathBuf,
        config: FilerConfig,
        mounts: Arc<FakeMounts>,
        runner: FakeRunner,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let root = temp.path().canonicalize().unwrap();
        fs::create_dir_all(root.join("media")).unwrap();
        fs::create_dir_all(root.join("sysroot")).unwrap();

        let config = FilerConfig {
            home_dir: root.join("home"),
            media_base: root.join("media"),
            root_path: root.join("sysroot"),
            user: Some("alice".to_string()),
            mount_wait_timeout_ms: 60,
            mount_poll_interval_ms: 10,
            ..Default::default()
        };
        let mounts = Arc::new(FakeMounts::with(&[Path::new("/")]));
        mounts.set_label(&config.root_path, "Macintosh HD");

        Fixture {
            _temp: temp,
            root,
            config,
            mounts,
            runner: FakeRunner::default(),
        }
    }

    async fn reconciler(f: &Fixture) -> VolumeReconciler {
        let trash = f.config.trash_dir();
        VolumeReconciler::new(&f.config, &trash, f.mounts.clone(), &f.runner)
            .await
            .unwrap()
    }

    #[test]
    fn test_sanitize_label() {
        assert_eq!(sanitize_label("Dätä$%disk"), "Dätädisk");
        assert_eq!(sanitize_label("my_pool-1 x"), "my_pool-1 x");
        assert_eq!(sanitize_label("€uro"), "uro");
    }

    #[test]
    fn test_zfs_display_name() {
        assert_eq!(zfs_display_name("zroot/ROOT/default\n").as_deref(), Some("ROOT"));
        assert_eq!(zfs_display_name("tank\n").as_deref(), Some("tank"));
        assert_eq!(zfs_display_name(""), None);
        assert_eq!(zfs_display_name("pool/$$$\n"), None);
    }

    #[tokio::test]
    async fn test_root_disk_name_sources() {
        let f = fixture();
        assert_eq!(
            root_disk_name(&f.config, f.mounts.as_ref(), &f.runner).await,
            "Macintosh HD"
        );

        let unlabeled = FakeMounts::default();
        assert_eq!(
            root_disk_name(&f.config, &unlabeled, &f.runner).await,
            crate::config::DEFAULT_DISK_NAME
        );

        f.runner.respond("zfs", 0, "zroot/ROOT/default\n");
        assert_eq!(root_disk_name(&f.config, f.mounts.as_ref(), &f.runner).await, "ROOT");
    }

    #[tokio::test]
    async fn test_media_root_policy() {
        let f = fixture();
        assert_eq!(resolve_media_root(&f.config, &f.runner).await, f.root.join("media"));

        f.runner.respond("pidof", 0, "1234\n");
        let root = resolve_media_root(&f.config, &f.runner).await;
        assert_eq!(root, f.root.join("media/alice"));
        assert!(root.is_dir());
        assert_eq!(f.runner.calls()[0], vec!["pidof".to_string(), "udisksd".to_string()]);
    }

    #[tokio::test]
    async fn test_media_root_falls_back_when_user_dir_unusable() {
        let f = fixture();
        fs::write(f.root.join("media/alice"), b"not a dir").unwrap();
        f.runner.respond("pidof", 0, "");
        assert_eq!(resolve_media_root(&f.config, &f.runner).await, f.root.join("media"));
    }

    #[tokio::test]
    async fn test_bootstrap_links() {
        let f = fixture();
        let r = reconciler(&f).await;
        let desktop = r.desktop_dir().to_path_buf();

        assert_eq!(fs::read_link(desktop.join("Macintosh HD")).unwrap(), f.config.root_path);
        assert_eq!(fs::read_link(desktop.join("Trash")).unwrap(), f.config.trash_dir());

        // Existing entries are left alone.
        drop(r);
        let again = reconciler(&f).await;
        assert_eq!(fs::read_dir(again.desktop_dir()).unwrap().count(), 2);
    }

    #[tokio::test]
    async fn test_reconcile_creates_and_removes_links() {
        let f = fixture();
        let r = reconciler(&f).await;
        let usb = f.root.join("media/usb");
        fs::create_dir(&usb).unwrap();
        f.mounts.mount(&usb);

        let report = r.reconcile().await;
        let link = r.desktop_dir().join("usb");
        assert_eq!(report.created, vec![link.clone()]);
        assert_eq!(fs::read_link(&link).unwrap(), usb);

        let report = r.reconcile().await;
        assert!(report.is_noop());

        fs::remove_dir(&usb).unwrap();
        f.mounts.unmount(&usb);
        let report = r.reconcile().await;
        assert_eq!(report.removed, vec![link.clone()]);
        assert!(fs::symlink_metadata(&link).is_err());

        assert!(r.reconcile().await.is_noop());
    }

    #[tokio::test]
    async fn test_unregistered_mount_is_pending_until_it_appears() {
        let f = fixture();
        let r = reconciler(&f).await;
        let cam = f.root.join("media/cam");
        fs::create_dir(&cam).unwrap();

        let report = r.reconcile().await;
        assert!(report.created.is_empty());
        assert_eq!(report.pending, vec![cam.clone()]);

        f.mounts.mount(&cam);
        let report = r.reconcile().await;
        assert_eq!(report.created.len(), 1);
        assert!(r.reconcile().await.is_noop());
    }

    #[tokio::test]
    async fn test_unrelated_desktop_entries_untouched() {
        let f = fixture();
        let r = reconciler(&f).await;
        let desktop = r.desktop_dir().to_path_buf();
        fs::write(desktop.join("notes.txt"), b"x").unwrap();
        std::os::unix::fs::symlink("/nonexistent/elsewhere", desktop.join("dangling")).unwrap();

        let report = r.reconcile().await;
        assert!(report.is_noop());
        assert!(desktop.join("notes.txt").exists());
        assert!(fs::symlink_metadata(desktop.join("dangling")).is_ok());
    }

    #[tokio::test]
    async fn test_live_media_with_same_marker_is_skipped() {
        let f = fixture();
        let r = reconciler(&f).await;
        let live = f.root.join("media/LIVE");
        fs::create_dir(&live).unwrap();
        f.mounts.mount(&live);
        // A bind mount shows the very same file under both paths.
        fs::write(f.config.root_path.join("COPYRIGHT"), b"c").unwrap();
        std::os::unix::fs::symlink(f.config.root_path.join("COPYRIGHT"), live.join("COPYRIGHT")).unwrap();

        let report = r.reconcile().await;
        let marker_supported = fs::metadata(live.join("COPYRIGHT")).unwrap().created().is_ok();
        if marker_supported {
            assert!(report.created.is_empty());
        } else {
            assert_eq!(report.created.len(), 1);
        }
    }

    #[test]
    fn test_same_marker_needs_both_times() {
        let t = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let unsupported = || Err(std::io::Error::from(std::io::ErrorKind::Unsupported));

        assert!(same_marker(Ok(t), Ok(t)));
        assert!(!same_marker(Ok(t), Ok(t + Duration::from_nanos(1))));
        assert!(!same_marker(Ok(t), unsupported()));
        assert!(!same_marker(unsupported(), unsupported()));
    }

    #[tokio::test]
    async fn test_live_media_with_other_marker_gets_link() {
        let f = fixture();
        let r = reconciler(&f).await;
        let live = f.root.join("media/LIVE");
        fs::create_dir(&live).unwrap();
        f.mounts.mount(&live);
        fs::write(f.config.root_path.join("COPYRIGHT"), b"c").unwrap();
        std::thread::sleep(Duration::from_millis(50));
        fs::write(live.join("COPYRIGHT"), b"c").unwrap();

        let report = r.reconcile().await;

        assert_eq!(report.created, vec![r.desktop_dir().join("LIVE")]);
    }

    #[tokio::test]
    async fn test_live_without_marker_gets_link() {
        let f = fixture();
        let r = reconciler(&f).await;
        let live = f.root.join("media/LIVE");
        fs::create_dir(&live).unwrap();
        f.mounts.mount(&live);

        let report = r.reconcile().await;

        assert_eq!(report.created.len(), 1);
    }

    #[tokio::test]
    async fn test_run_loop_reconciles_on_events_and_stops_on_cancel() {
        let f = fixture();
        let r = reconciler(&f).await;
        let usb = f.root.join("media/usb");
        fs::create_dir(&usb).unwrap();
        f.mounts.mount(&usb);

        let (tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        tx.send(vec![usb.clone()]).await.unwrap();

        let stopper = cancel.clone();
        let link = r.desktop_dir().join("usb");
        let run = r.run(rx, cancel);
        let check = async {
            let deadline = Instant::now() + Duration::from_secs(2);
            while fs::symlink_metadata(&link).is_err() && Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            stopper.cancel();
        };
        tokio::join!(run, check);

        assert_eq!(fs::read_link(&link).unwrap(), usb);
    }
}
