//! Eject-on-trash: unmount a volume whose mount root was dragged to the Trash.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::FilerConfig;
use crate::error::{FilerError, Result};
use crate::error_codes::ERR_EXTERNAL_COMMAND;
use crate::interaction::{NotifyKind, UserInteraction};
use crate::path_validation::validate_path;
use crate::process::{argv, ProcessRunner};

const VIEW_CLOSE_POLL: Duration = Duration::from_millis(20);

/// Window-management side of the shell: which folder views are open.
pub trait ViewRegistry: Send + Sync {
    fn open_views(&self) -> Vec<PathBuf>;

    /// Asks the view rooted at `root` to close. Completion is observed via
    /// [`ViewRegistry::has_view`].
    fn close_view(&self, root: &Path);

    fn has_view(&self, root: &Path) -> bool {
        self.open_views().iter().any(|v| v == root)
    }
}

/// Registry for headless use; never has any views.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoViews;

impl ViewRegistry for NoViews {
    fn open_views(&self) -> Vec<PathBuf> {
        Vec::new()
    }

    fn close_view(&self, _root: &Path) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmountOutcome {
    /// Unmounted and the mount directory is gone.
    Clean,
    /// Unmounted, but the leftover mount directory could not be removed.
    DirectoryLeftBehind,
}

pub struct UnmountOrchestrator<R: ProcessRunner> {
    runner: Arc<R>,
    ui: Arc<dyn UserInteraction>,
    views: Arc<dyn ViewRegistry>,
    eject_command: String,
    unmount_command: String,
    elevated_remove: Vec<String>,
    unmount_timeout: Duration,
    remove_timeout: Duration,
    view_close_timeout: Duration,
}

impl<R: ProcessRunner> UnmountOrchestrator<R> {
    pub fn new(
        config: &FilerConfig,
        runner: Arc<R>,
        ui: Arc<dyn UserInteraction>,
        views: Arc<dyn ViewRegistry>,
    ) -> Self {
        Self {
            runner,
            ui,
            views,
            eject_command: config.eject_command.clone(),
            unmount_command: config.unmount_command.clone(),
            elevated_remove: config.elevated_remove.clone(),
            unmount_timeout: config.unmount_timeout(),
            remove_timeout: config.mount_dir_remove_timeout(),
            view_close_timeout: config.view_close_timeout(),
        }
    }

    /// Unmounts `mounted_path`. Failures are reported to the user; the
    /// return value is `true` whenever the unmount command itself succeeded.
    pub async fn unmount(&self, mounted_path: &Path) -> bool {
        match self.try_unmount(mounted_path).await {
            Ok(UnmountOutcome::Clean) => true,
            Ok(UnmountOutcome::DirectoryLeftBehind) => {
                self.ui.report(
                    NotifyKind::Critical,
                    "Error",
                    &format!(
                        "Failed to remove the mount point directory: {}",
                        mounted_path.display()
                    ),
                    ERR_EXTERNAL_COMMAND,
                );
                true
            }
            Err(e) => {
                tracing::warn!("unmount of {} failed: {e}", mounted_path.display());
                self.ui.report(
                    NotifyKind::Critical,
                    "Error",
                    &format!("Failed to unmount the mount point: {}", mounted_path.display()),
                    e.code(),
                );
                false
            }
        }
    }

    pub async fn try_unmount(&self, mounted_path: &Path) -> Result<UnmountOutcome> {
        validate_path(mounted_path)
            .map_err(|reason| FilerError::command(&[self.unmount_command.clone()], reason))?;

        self.close_view(mounted_path).await;

        let program = if self.runner.command_exists(&self.eject_command) {
            &self.eject_command
        } else {
            &self.unmount_command
        };
        let command = argv([program.clone(), path_arg(mounted_path)]);
        let output = self.runner.run(&command, self.unmount_timeout).await?;
        if !output.success() {
            return Err(FilerError::command(
                &command,
                format!("exit code {:?}: {}", output.exit_code, output.stderr.trim()),
            ));
        }
        tracing::debug!("unmounted {}", mounted_path.display());

        if tokio::fs::try_exists(mounted_path).await.unwrap_or(false) {
            let mut command = self.elevated_remove.clone();
            command.push(path_arg(mounted_path));
            match self.runner.run(&command, self.remove_timeout).await {
                Ok(output) if output.success() => {}
                Ok(output) => {
                    tracing::warn!(
                        "removing {} exited with {:?}",
                        mounted_path.display(),
                        output.exit_code
                    );
                    return Ok(UnmountOutcome::DirectoryLeftBehind);
                }
                Err(e) => {
                    tracing::warn!("removing {} failed: {e}", mounted_path.display());
                    return Ok(UnmountOutcome::DirectoryLeftBehind);
                }
            }
        }

        Ok(UnmountOutcome::Clean)
    }

    /// Closes a view rooted at `root` and waits for it to go away, up to
    /// `view_close_timeout`. A view that outlives the deadline is logged and
    /// the unmount goes ahead.
    async fn close_view(&self, root: &Path) {
        if !self.views.has_view(root) {
            return;
        }
        self.views.close_view(root);

        let deadline = Instant::now() + self.view_close_timeout;
        while self.views.has_view(root) {
            if Instant::now() >= deadline {
                tracing::warn!("view for {} still open, unmounting anyway", root.display());
                return;
            }
            tokio::time::sleep(VIEW_CLOSE_POLL).await;
        }
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
