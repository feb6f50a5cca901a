//! The per-user Trash: move-in, enumeration and purge.
//!
//! The trash is flat: `<trash root>/<name>`, with no `.trashinfo` records, so
//! the original location of an item is not retained.

use std::ffi::{OsStr, OsString};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use walkdir::WalkDir;

use crate::config::FilerConfig;
use crate::error::{FilerError, Result};
use crate::error_codes::{ERR_FS_OPERATION, ERR_NOT_FOUND};
use crate::interaction::{NotifyKind, Sound, UserInteraction};
use crate::mounts::MountTable;
use crate::path_validation::{resolve_path, ProtectedPaths};
use crate::process::ProcessRunner;
use crate::system_integration::same_filesystem_id;
use crate::unmount::UnmountOrchestrator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrashEntry {
    pub name: String,
    pub path: PathBuf,
    pub kind: EntryKind,
}

/// What happened to one `move_to_trash` batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrashReport {
    pub unmounted: usize,
    pub moved: usize,
    /// Deleted permanently because the item was on another filesystem.
    pub deleted: usize,
    pub failed: usize,
    pub skipped: usize,
    /// The batch confirmation was declined.
    pub aborted: bool,
}

enum Placement {
    Moved,
    Deleted,
    Kept,
}

pub struct TrashStore<R: ProcessRunner> {
    trash_path: PathBuf,
    protected: ProtectedPaths,
    mounts: Arc<dyn MountTable>,
    ui: Arc<dyn UserInteraction>,
    unmounter: UnmountOrchestrator<R>,
}

impl<R: ProcessRunner> TrashStore<R> {
    pub fn new(
        config: &FilerConfig,
        mounts: Arc<dyn MountTable>,
        ui: Arc<dyn UserInteraction>,
        unmounter: UnmountOrchestrator<R>,
    ) -> Self {
        Self {
            trash_path: config.trash_dir(),
            protected: ProtectedPaths::with_extra(config.extra_protected_paths.iter().cloned()),
            mounts,
            ui,
            unmounter,
        }
    }

    pub fn trash_path(&self) -> &Path {
        &self.trash_path
    }

    /// Moves `paths` to the Trash in order. Mount roots are unmounted
    /// instead. Every failure is reported to the user and the batch goes on,
    /// except a declined confirmation, which stops it.
    pub async fn move_to_trash<P: AsRef<Path>>(&self, paths: &[P]) -> TrashReport {
        let mut report = TrashReport::default();
        let mut confirmed = false;

        for path in paths {
            let path = path.as_ref();
            let resolved = resolve_path(path);

            if self.protected.contains(&resolved) {
                self.report_error(&FilerError::Protected(resolved));
                report.failed += 1;
                continue;
            }

            if self.mounts.is_mount_point(&resolved) {
                if self.unmounter.unmount(&resolved).await {
                    report.unmounted += 1;
                } else {
                    report.failed += 1;
                }
                continue;
            }

            let is_dir = match tokio::fs::symlink_metadata(path).await {
                Ok(meta) => meta.is_dir(),
                Err(_) => {
                    self.ui.report(
                        NotifyKind::Warning,
                        "File not found",
                        &format!("The file or directory does not exist: {}", path.display()),
                        ERR_NOT_FOUND,
                    );
                    report.failed += 1;
                    continue;
                }
            };

            let Some(name) = path.file_name() else {
                self.report_error(&FilerError::Untrashable(path.to_path_buf()));
                report.failed += 1;
                continue;
            };

            if let Err(e) = self.ensure_trash_dir().await {
                self.report_error(&e);
                report.failed += 1;
                continue;
            }

            if !confirmed {
                confirmed = true;
                if !self.ui.confirm("Confirm", "Do you want to move the selected items to the Trash?") {
                    report.aborted = true;
                    return report;
                }
            }

            match self.place(path, &resolved, name, is_dir).await {
                Ok(Placement::Moved) => report.moved += 1,
                Ok(Placement::Deleted) => report.deleted += 1,
                Ok(Placement::Kept) => report.skipped += 1,
                Err(e) => {
                    self.report_error(&e);
                    report.failed += 1;
                }
            }
        }

        match (report.unmounted > 0, report.moved > 0) {
            (_, true) => self.ui.play_sound(Sound::MoveToTrash),
            (true, false) => self.ui.play_sound(Sound::Eject),
            (false, false) => {}
        }

        report
    }

    async fn place(&self, path: &Path, resolved: &Path, name: &OsStr, is_dir: bool) -> Result<Placement> {
        if self.same_filesystem(resolved).await {
            tracing::debug!("{} is on the Trash filesystem, renaming", path.display());
            return self
                .rename_into_trash(path, name, is_dir)
                .await
                .map(|_| Placement::Moved);
        }

        tracing::debug!("{} is on another filesystem than the Trash", path.display());
        let delete = self.ui.confirm(
            "Confirm",
            "The selected items are on a different mount point than the Trash directory. \
             Do you want to delete the selected items permanently right away?",
        );
        if !delete {
            return Ok(Placement::Kept);
        }
        remove_entry(path).await?;
        Ok(Placement::Deleted)
    }

    /// Renames `path` to the first free name in the Trash. An entry that
    /// appears under the chosen name in the meantime is never replaced.
    async fn rename_into_trash(&self, path: &Path, name: &OsStr, is_dir: bool) -> Result<PathBuf> {
        let mut n = 0u32;
        loop {
            let destination = if n == 0 {
                self.trash_path.join(name)
            } else {
                self.trash_path.join(suffixed_name(name, n, is_dir))
            };
            n += 1;

            if tokio::fs::symlink_metadata(&destination).await.is_ok() {
                continue;
            }
            match rename_no_replace(path, &destination).await {
                Ok(()) => return Ok(destination),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    restore_after_failed_move(path, &destination).await;
                    return Err(FilerError::fs("move to the Trash", path, e));
                }
            }
        }
    }

    async fn same_filesystem(&self, resolved: &Path) -> bool {
        let trash_root = resolve_path(&self.trash_path);
        let source_root = self.mounts.mount_root_of(resolved);
        let target_root = self.mounts.mount_root_of(&trash_root);

        match (source_root, target_root) {
            (Some(a), Some(b)) => a == b,
            _ => {
                let (source, trash) = (resolved.to_path_buf(), trash_root);
                tokio::task::spawn_blocking(move || same_filesystem_id(&source, &trash))
                    .await
                    .ok()
                    .flatten()
                    .unwrap_or(false)
            }
        }
    }

    async fn ensure_trash_dir(&self) -> Result<()> {
        if tokio::fs::metadata(&self.trash_path).await.is_ok_and(|m| m.is_dir()) {
            return Ok(());
        }
        tokio::fs::create_dir_all(&self.trash_path)
            .await
            .map_err(|e| FilerError::fs("create the Trash directory", &self.trash_path, e))
    }

    /// Purges the Trash. Stops at the first entry that cannot be removed.
    pub async fn empty_trash(&self) -> bool {
        if tokio::fs::symlink_metadata(&self.trash_path).await.is_err() {
            self.ui.notify(NotifyKind::Info, "Empty Trash", "Trash is already empty.");
            return true;
        }

        let entries = match self.entries().await {
            Ok(entries) => entries,
            Err(e) => {
                self.report_error(&e);
                return false;
            }
        };

        for entry in &entries {
            if let Err(e) = remove_entry(&entry.path).await {
                tracing::warn!("{e}");
                let what = if entry.kind == EntryKind::Directory { "directory" } else { "file" };
                self.ui.report(
                    NotifyKind::Critical,
                    "Error",
                    &format!("Failed to remove {what} from Trash: {}", entry.name),
                    ERR_FS_OPERATION,
                );
                return false;
            }
        }

        if let Err(e) = tokio::fs::remove_dir(&self.trash_path).await {
            tracing::warn!("removing {}: {e}", self.trash_path.display());
            self.ui.report(
                NotifyKind::Critical,
                "Error",
                "Failed to remove the Trash directory.",
                ERR_FS_OPERATION,
            );
            return false;
        }

        self.ui.play_sound(Sound::EmptyTrash);
        self.ui.notify(NotifyKind::Info, "Empty Trash", "Trash has been emptied successfully.");
        true
    }

    pub async fn is_empty(&self) -> bool {
        match tokio::fs::read_dir(&self.trash_path).await {
            Ok(mut dir) => matches!(dir.next_entry().await, Ok(None)),
            Err(_) => true,
        }
    }

    /// Top-level entries, sorted by name. A missing Trash has none.
    pub async fn entries(&self) -> Result<Vec<TrashEntry>> {
        let mut dir = match tokio::fs::read_dir(&self.trash_path).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(FilerError::fs("read", &self.trash_path, e)),
        };

        let mut entries = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| FilerError::fs("read", &self.trash_path, e))?
        {
            let path = entry.path();
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| FilerError::fs("inspect", &path, e))?;
            let kind = if file_type.is_symlink() {
                EntryKind::Symlink
            } else if file_type.is_dir() {
                EntryKind::Directory
            } else {
                EntryKind::File
            };
            entries.push(TrashEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                path,
                kind,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Bytes held by the Trash. Symlinks count as themselves, never their targets.
    pub async fn total_size(&self) -> Result<u64> {
        let root = self.trash_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut total = 0u64;
            for entry in WalkDir::new(&root).min_depth(1) {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) if e.depth() == 0 => break,
                    Err(e) => {
                        let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.clone());
                        let io = e
                            .into_io_error()
                            .unwrap_or_else(|| std::io::Error::other("filesystem loop"));
                        return Err(FilerError::fs("measure", path, io));
                    }
                };
                if let Ok(meta) = entry.metadata() {
                    if !meta.is_dir() {
                        total += meta.len();
                    }
                }
            }
            Ok(total)
        })
        .await
        .map_err(|e| FilerError::fs("measure", &self.trash_path, std::io::Error::other(e)))?
    }

    fn report_error(&self, error: &FilerError) {
        tracing::warn!(code = error.code(), "{error}");
        let (kind, title) = match error {
            FilerError::NotFound(_) => (NotifyKind::Warning, "File not found"),
            _ => (NotifyKind::Critical, "Error"),
        };
        self.ui.report(kind, title, &error.to_string(), error.code());
    }
}

/// `name` with `_<n>` inserted. Files keep their last extension
/// (`a.tar.gz` → `a.tar_1.gz`); directories and names without an extension
/// get the suffix at the end (`photos.2023` → `photos.2023_1`).
pub fn suffixed_name(name: &OsStr, n: u32, is_dir: bool) -> OsString {
    let path = Path::new(name);
    let (base, ext) = match (is_dir, path.file_stem(), path.extension()) {
        (false, Some(stem), Some(ext)) => (stem, Some(ext)),
        _ => (name, None),
    };

    let mut suffixed = base.to_os_string();
    suffixed.push(format!("_{n}"));
    if let Some(ext) = ext {
        suffixed.push(".");
        suffixed.push(ext);
    }
    suffixed
}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
async fn rename_no_replace(from: &Path, to: &Path) -> io::Result<()> {
    use nix::errno::Errno;
    use nix::fcntl::{renameat2, RenameFlags};

    let (from, to) = (from.to_path_buf(), to.to_path_buf());
    tokio::task::spawn_blocking(move || {
        match renameat2(None, &from, None, &to, RenameFlags::RENAME_NOREPLACE) {
            Ok(()) => Ok(()),
            // Filesystem without RENAME_NOREPLACE support.
            Err(Errno::EINVAL) => {
                if std::fs::symlink_metadata(&to).is_ok() {
                    return Err(io::Error::from(io::ErrorKind::AlreadyExists));
                }
                std::fs::rename(&from, &to)
            }
            Err(errno) => Err(errno.into()),
        }
    })
    .await
    .map_err(io::Error::other)?
}

#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
async fn rename_no_replace(from: &Path, to: &Path) -> io::Result<()> {
    if tokio::fs::symlink_metadata(to).await.is_ok() {
        return Err(io::Error::from(io::ErrorKind::AlreadyExists));
    }
    tokio::fs::rename(from, to).await
}

/// Best effort: put back an item that reached the Trash although the move
/// reported failure.
async fn restore_after_failed_move(path: &Path, destination: &Path) {
    let arrived = tokio::fs::symlink_metadata(destination).await.is_ok();
    let source_gone = tokio::fs::symlink_metadata(path).await.is_err();
    if arrived && source_gone {
        if let Err(back) = tokio::fs::rename(destination, path).await {
            tracing::warn!("could not restore {}: {back}", path.display());
        }
    }
}

/// Removes a file, symlink or directory tree. Symlinks are never followed.
async fn remove_entry(path: &Path) -> Result<()> {
    let meta = tokio::fs::symlink_metadata(path)
        .await
        .map_err(|e| FilerError::fs("inspect", path, e))?;
    let removed = if meta.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };
    removed.map_err(|e| FilerError::fs("remove", path, e))
}
