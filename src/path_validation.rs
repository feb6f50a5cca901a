use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Maximum allowed path length
const MAX_PATH_LENGTH: usize = 4096;

/// System paths that can never be moved to the trash or deleted.
pub const PROTECTED_PATHS: &[&str] = &[
    "/",
    "/Applications",
    "/COPYRIGHT",
    "/System",
    "/Users",
    "/bin",
    "/boot",
    "/compat",
    "/dev",
    "/entropy",
    "/etc",
    "/home",
    "/lib",
    "/libexec",
    "/media",
    "/mnt",
    "/net",
    "/proc",
    "/rescue",
    "/root",
    "/sbin",
    "/sys",
    "/tmp",
    "/usr",
    "/usr/bin",
    "/usr/home",
    "/usr/lib",
    "/usr/libexec",
    "/usr/local",
    "/usr/local/bin",
    "/usr/local/etc",
    "/usr/local/games",
    "/usr/local/include",
    "/usr/local/lib",
    "/usr/local/libexec",
    "/usr/local/sbin",
    "/usr/local/share",
    "/usr/local/src",
    "/usr/obj",
    "/usr/ports",
    "/usr/sbin",
    "/usr/share",
    "/usr/src",
    "/var",
    "/zroot",
];

/// Exact-match set of protected paths. `/usr/local/lib/foo` is not protected
/// by `/usr/local/lib`; only the listed paths themselves are.
#[derive(Debug, Clone)]
pub struct ProtectedPaths {
    paths: HashSet<PathBuf>,
}

impl Default for ProtectedPaths {
    fn default() -> Self {
        Self::with_extra(std::iter::empty::<PathBuf>())
    }
}

impl ProtectedPaths {
    pub fn with_extra<I, P>(extra: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let mut paths: HashSet<PathBuf> = PROTECTED_PATHS.iter().map(PathBuf::from).collect();
        paths.extend(extra.into_iter().map(Into::into));
        Self { paths }
    }

    /// `resolved` must already be absolute with symlinks resolved.
    pub fn contains(&self, resolved: &Path) -> bool {
        self.paths.contains(resolved)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Rejects inputs no filesystem call should see.
pub fn validate_path(path: &Path) -> Result<(), String> {
    let raw = path.as_os_str().as_encoded_bytes();

    if raw.is_empty() {
        return Err("Path is empty".to_string());
    }

    if raw.len() > MAX_PATH_LENGTH {
        return Err(format!("Path too long (max {MAX_PATH_LENGTH} bytes)"));
    }

    if raw.contains(&0) {
        return Err("Path contains null bytes".to_string());
    }

    Ok(())
}

/// Canonical form of `path`: symlinks resolved when it exists, otherwise the
/// absolute, lexically joined form.
pub fn resolve_path(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}
