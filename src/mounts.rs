//! Mount table abstraction.

use std::path::{Path, PathBuf};

use crate::error::Result;

/// Read-only view of the mounted volumes. Every call is a fresh query.
pub trait MountTable: Send + Sync {
    /// Root paths of all currently mounted volumes.
    fn mounted_volumes(&self) -> Result<Vec<PathBuf>>;

    /// Display label of the volume mounted at `mount_root`, if it has one.
    fn volume_label(&self, mount_root: &Path) -> Option<String>;

    fn is_mount_point(&self, path: &Path) -> bool {
        self.mounted_volumes()
            .map(|roots| roots.iter().any(|root| root == path))
            .unwrap_or(false)
    }

    /// The deepest mount root containing `path`.
    fn mount_root_of(&self, path: &Path) -> Option<PathBuf> {
        let roots = self.mounted_volumes().ok()?;
        deepest_mount_root(&roots, path)
    }
}

pub(crate) fn deepest_mount_root(roots: &[PathBuf], path: &Path) -> Option<PathBuf> {
    roots
        .iter()
        .filter(|root| path.starts_with(root))
        .max_by_key(|root| root.components().count())
        .cloned()
}
