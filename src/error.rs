use std::{io, path::PathBuf};

use crate::error_codes::{
    ERR_CONFIG, ERR_EXTERNAL_COMMAND, ERR_FS_OPERATION, ERR_INVALID_PATH, ERR_NOT_FOUND,
    ERR_PROTECTED, ERR_USER_DECLINED, ERR_WATCH_START_FAILED,
};

/// Errors raised by the trash and volume engine.
///
/// Public entry points (`move_to_trash`, `empty_trash`, `unmount`) turn these
/// into user notifications instead of returning them.
#[derive(thiserror::Error, Debug)]
pub enum FilerError {
    /// The source path does not exist.
    #[error("the file or directory does not exist: {}", .0.display())]
    NotFound(PathBuf),

    /// The path exists but has no name to file it under.
    #[error("cannot move {} to the Trash: the path has no file name", .0.display())]
    Untrashable(PathBuf),

    /// The path is critical for the system.
    #[error("{} is critical for the system and cannot be moved to the Trash", .0.display())]
    Protected(PathBuf),

    /// A filesystem call failed.
    #[error("failed to {action} {}: {source}", .path.display())]
    Filesystem {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// An external command failed, timed out, or could not be started.
    #[error("command `{command}` failed: {reason}")]
    ExternalCommand { command: String, reason: String },

    /// A confirmation prompt was declined.
    #[error("declined by user")]
    UserDeclined,

    /// Configuration file could not be read or parsed.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// File watch could not be established.
    #[error("failed to watch directory: {0}")]
    Watch(#[from] notify::Error),
}

impl FilerError {
    pub fn fs(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Filesystem {
            action,
            path: path.into(),
            source,
        }
    }

    pub fn command(argv: &[String], reason: impl Into<String>) -> Self {
        Self::ExternalCommand {
            command: argv.join(" "),
            reason: reason.into(),
        }
    }

    /// Stable code for translation and log filtering.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => ERR_NOT_FOUND,
            Self::Untrashable(_) => ERR_INVALID_PATH,
            Self::Protected(_) => ERR_PROTECTED,
            Self::Filesystem { .. } => ERR_FS_OPERATION,
            Self::ExternalCommand { .. } => ERR_EXTERNAL_COMMAND,
            Self::UserDeclined => ERR_USER_DECLINED,
            Self::Config(_) => ERR_CONFIG,
            Self::Watch(_) => ERR_WATCH_START_FAILED,
        }
    }
}

pub type Result<T> = std::result::Result<T, FilerError>;
