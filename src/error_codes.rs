//! Error code constants.
//!
//! Stable identifiers attached to notifications and log entries so that a
//! front end can translate them independently of the English message text.

/// Source path does not exist
pub const ERR_NOT_FOUND: &str = "ERR_NOT_FOUND";

/// Path has no final component to name it by in the Trash (`/`, `dir/..`)
pub const ERR_INVALID_PATH: &str = "ERR_INVALID_PATH";

/// Path is on the protected list
pub const ERR_PROTECTED: &str = "ERR_PROTECTED";

/// rename / remove / mkdir failed
pub const ERR_FS_OPERATION: &str = "ERR_FS_OPERATION";

/// External command exited non-zero, could not be spawned, or timed out
pub const ERR_EXTERNAL_COMMAND: &str = "ERR_EXTERNAL_COMMAND";

/// A confirmation prompt was answered with "no"
pub const ERR_USER_DECLINED: &str = "ERR_USER_DECLINED";

/// Configuration could not be loaded
pub const ERR_CONFIG: &str = "ERR_CONFIG";

/// Watch start failed
pub const ERR_WATCH_START_FAILED: &str = "ERR_WATCH_START_FAILED";
