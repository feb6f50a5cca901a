//! OS-backed implementations of the mount table and process seams.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::error::{FilerError, Result};
use crate::mounts::MountTable;
use crate::process::{ProcessOutput, ProcessRunner};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub device: String,
    pub mount_point: PathBuf,
    pub fs_type: String,
}

/// Mount table read from a `/proc/mounts`-style file.
pub struct SystemMountTable {
    mounts_file: PathBuf,
    labels_dir: PathBuf,
}

impl Default for SystemMountTable {
    fn default() -> Self {
        Self::new("/proc/self/mounts", "/dev/disk/by-label")
    }
}

impl SystemMountTable {
    pub fn new(mounts_file: impl Into<PathBuf>, labels_dir: impl Into<PathBuf>) -> Self {
        Self {
            mounts_file: mounts_file.into(),
            labels_dir: labels_dir.into(),
        }
    }

    pub fn entries(&self) -> Result<Vec<MountEntry>> {
        let text = std::fs::read_to_string(&self.mounts_file)
            .map_err(|e| FilerError::fs("read", &self.mounts_file, e))?;
        Ok(Self::parse_mounts(&text))
    }

    /// Parses the `fstab(5)` layout used by `/proc/mounts` (pure, for tests).
    fn parse_mounts(text: &str) -> Vec<MountEntry> {
        text.lines()
            .filter_map(|line| {
                let mut fields = line.split_whitespace();
                let device = fields.next()?;
                let mount_point = fields.next()?;
                let fs_type = fields.next()?;
                Some(MountEntry {
                    device: unescape_octal(device),
                    mount_point: PathBuf::from(unescape_octal(mount_point)),
                    fs_type: fs_type.to_string(),
                })
            })
            .collect()
    }

    fn label_for_device(&self, device: &Path) -> Option<String> {
        let device = device.canonicalize().ok()?;
        let entries = std::fs::read_dir(&self.labels_dir).ok()?;

        entries.flatten().find_map(|entry| {
            let target = entry.path().canonicalize().ok()?;
            if target != device {
                return None;
            }
            entry.file_name().to_str().map(decode_udev_label)
        })
    }
}

impl MountTable for SystemMountTable {
    fn mounted_volumes(&self) -> Result<Vec<PathBuf>> {
        Ok(self.entries()?.into_iter().map(|e| e.mount_point).collect())
    }

    fn volume_label(&self, mount_root: &Path) -> Option<String> {
        // Stacked mounts: the last entry is the visible one.
        let entry = self
            .entries()
            .ok()?
            .into_iter()
            .rev()
            .find(|e| e.mount_point == mount_root)?;
        if !entry.device.starts_with('/') {
            return None;
        }
        self.label_for_device(Path::new(&entry.device))
    }
}

/// `/proc/mounts` escapes space, tab, newline and backslash as `\ooo`.
fn unescape_octal(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|b| (b'0'..=b'7').contains(b)) {
                let value = digits.iter().fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
                out.push(value as u8);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// udev encodes unsafe label characters as `\xHH`.
fn decode_udev_label(name: &str) -> String {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() && bytes[i + 1] == b'x' {
            let hex = &bytes[i + 2..i + 4];
            if let Some(value) = std::str::from_utf8(hex)
                .ok()
                .and_then(|h| u8::from_str_radix(h, 16).ok())
            {
                out.push(value);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// `statvfs` filesystem ids, used when the mount table cannot tell two paths apart.
pub fn same_filesystem_id(a: &Path, b: &Path) -> Option<bool> {
    let a = nix::sys::statvfs::statvfs(a).ok()?;
    let b = nix::sys::statvfs::statvfs(b).ok()?;
    Some(a.filesystem_id() == b.filesystem_id())
}

/// Spawns commands with tokio; the child is killed if the timeout elapses.
#[derive(Debug, Default, Clone)]
pub struct SystemProcessRunner;

impl ProcessRunner for SystemProcessRunner {
    async fn run(&self, argv: &[String], timeout: Duration) -> Result<ProcessOutput> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| FilerError::command(argv, "empty command line"))?;

        tracing::debug!("running {:?} (timeout {:?})", argv, timeout);

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(timeout, child).await {
            Ok(Ok(output)) => Ok(ProcessOutput {
                exit_code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            }),
            Ok(Err(e)) => Err(FilerError::command(argv, e.to_string())),
            Err(_) => Err(FilerError::command(argv, format!("timed out after {timeout:?}"))),
        }
    }

    fn command_exists(&self, program: &str) -> bool {
        which::which(program).is_ok()
    }
}
