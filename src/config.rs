//! Runtime configuration.
//!
//! Every key is optional in the YAML file; missing keys fall back to the
//! values derived from `$HOME` and `$USER`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{FilerError, Result};

pub const DEFAULT_DISK_NAME: &str = "Hard Disk";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilerConfig {
    pub home_dir: PathBuf,
    /// Overrides `<home>/.local/share/Trash/files`.
    pub trash_dir: Option<PathBuf>,
    /// Overrides `<home>/Desktop`.
    pub desktop_dir: Option<PathBuf>,
    pub user: Option<String>,

    pub media_base: PathBuf,
    pub root_path: PathBuf,
    pub live_media_name: String,
    pub live_marker_file: String,
    pub mounts_file: PathBuf,
    pub labels_dir: PathBuf,

    pub default_disk_name: String,
    pub trash_link_name: String,
    pub extra_protected_paths: Vec<PathBuf>,

    pub volume_daemon: String,
    pub eject_command: String,
    pub unmount_command: String,
    pub elevated_remove: Vec<String>,
    pub zfs_name_query: Vec<String>,

    pub unmount_timeout_ms: u64,
    pub mount_dir_remove_timeout_ms: u64,
    pub mount_wait_timeout_ms: u64,
    pub mount_poll_interval_ms: u64,
    pub view_close_timeout_ms: u64,
    pub probe_timeout_ms: u64,
    pub watch_debounce_ms: u64,

    /// Player invoked as `<command> <sound_dir>/<file>`; no sound when unset.
    pub sound_command: Option<String>,
    pub sound_dir: PathBuf,
}

impl Default for FilerConfig {
    fn default() -> Self {
        let home_dir = std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/"));

        Self {
            home_dir,
            trash_dir: None,
            desktop_dir: None,
            user: None,
            media_base: PathBuf::from("/media"),
            root_path: PathBuf::from("/"),
            live_media_name: "LIVE".to_string(),
            live_marker_file: "COPYRIGHT".to_string(),
            mounts_file: PathBuf::from("/proc/self/mounts"),
            labels_dir: PathBuf::from("/dev/disk/by-label"),
            default_disk_name: DEFAULT_DISK_NAME.to_string(),
            trash_link_name: "Trash".to_string(),
            extra_protected_paths: Vec::new(),
            volume_daemon: "udisksd".to_string(),
            eject_command: "eject-and-clean".to_string(),
            unmount_command: "umount".to_string(),
            elevated_remove: ["sudo", "-A", "-E", "rm", "-r"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            zfs_name_query: ["zfs", "list", "-o", "name", "-H", "/"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            unmount_timeout_ms: 10_000,
            mount_dir_remove_timeout_ms: 2_000,
            mount_wait_timeout_ms: 2_000,
            mount_poll_interval_ms: 100,
            view_close_timeout_ms: 1_000,
            probe_timeout_ms: 2_000,
            watch_debounce_ms: 250,
            sound_command: None,
            sound_dir: PathBuf::from("/usr/local/share/sounds"),
        }
    }
}

impl FilerConfig {
    /// Reads a YAML file; keys that are absent keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| FilerError::Config(format!("{}: {e}", path.display())))?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).map_err(|e| FilerError::Config(e.to_string()))
    }

    pub fn trash_dir(&self) -> PathBuf {
        self.trash_dir
            .clone()
            .unwrap_or_else(|| self.home_dir.join(".local/share/Trash/files"))
    }

    pub fn desktop_dir(&self) -> PathBuf {
        self.desktop_dir
            .clone()
            .unwrap_or_else(|| self.home_dir.join("Desktop"))
    }

    /// Configured user, then `$USER`, then the passwd entry of the current uid.
    pub fn user_name(&self) -> Option<String> {
        if let Some(user) = self.user.as_ref().filter(|u| !u.is_empty()) {
            return Some(user.clone());
        }
        if let Ok(user) = std::env::var("USER") {
            if !user.is_empty() {
                return Some(user);
            }
        }
        nix::unistd::User::from_uid(nix::unistd::getuid())
            .ok()
            .flatten()
            .map(|u| u.name)
    }

    pub fn unmount_timeout(&self) -> Duration {
        Duration::from_millis(self.unmount_timeout_ms)
    }

    pub fn mount_dir_remove_timeout(&self) -> Duration {
        Duration::from_millis(self.mount_dir_remove_timeout_ms)
    }

    pub fn mount_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.mount_wait_timeout_ms)
    }

    pub fn mount_poll_interval(&self) -> Duration {
        Duration::from_millis(self.mount_poll_interval_ms.max(1))
    }

    pub fn view_close_timeout(&self) -> Duration {
        Duration::from_millis(self.view_close_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn watch_debounce(&self) -> Duration {
        Duration::from_millis(self.watch_debounce_ms)
    }
}
