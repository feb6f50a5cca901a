pub mod config;
pub mod error;
pub mod error_codes;
pub mod interaction;
pub mod logging;
pub mod mounts;
pub mod path_validation;
pub mod process;
pub mod system_integration;
pub mod trash;
pub mod unmount;
pub mod volumes;
pub mod watcher;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Arc;

pub use config::FilerConfig;
pub use error::{FilerError, Result};
pub use interaction::{NotifyKind, Sound, UserInteraction};
pub use mounts::MountTable;
pub use process::{ProcessOutput, ProcessRunner};
pub use trash::{TrashEntry, TrashReport, TrashStore};
pub use unmount::{NoViews, UnmountOrchestrator, ViewRegistry};
pub use volumes::{ReconcileReport, VolumeReconciler};

use system_integration::{SystemMountTable, SystemProcessRunner};

/// The engine wired to the real mount table and process runner.
pub struct AppState {
    pub config: FilerConfig,
    pub mounts: Arc<dyn MountTable>,
    pub runner: Arc<SystemProcessRunner>,
    pub trash: TrashStore<SystemProcessRunner>,
}

impl AppState {
    pub fn new(
        config: FilerConfig,
        ui: Arc<dyn UserInteraction>,
        views: Arc<dyn ViewRegistry>,
    ) -> Self {
        let mounts: Arc<dyn MountTable> = Arc::new(SystemMountTable::new(
            config.mounts_file.clone(),
            config.labels_dir.clone(),
        ));
        let runner = Arc::new(SystemProcessRunner);
        let unmounter = UnmountOrchestrator::new(&config, runner.clone(), ui.clone(), views);
        let trash = TrashStore::new(&config, mounts.clone(), ui, unmounter);

        Self {
            config,
            mounts,
            runner,
            trash,
        }
    }

    /// Builds the volume reconciler, sharing the Trash path with the store.
    pub async fn volume_reconciler(&self) -> Result<VolumeReconciler> {
        VolumeReconciler::new(
            &self.config,
            self.trash.trash_path(),
            self.mounts.clone(),
            self.runner.as_ref(),
        )
        .await
    }
}
