//! Boundary to whatever presents dialogs and plays sounds.
//!
//! The engine only calls through [`UserInteraction`]; the desktop shell, the
//! CLI and the tests each supply their own implementation.

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use crate::logging::LogManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyKind {
    Info,
    Warning,
    Critical,
}

impl NotifyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

/// Feedback sounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Sound {
    MoveToTrash,
    Eject,
    EmptyTrash,
}

impl Sound {
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::MoveToTrash => "ffft.wav",
            Self::Eject => "pschiuu.wav",
            Self::EmptyTrash => "rustle.wav",
        }
    }
}

pub trait UserInteraction: Send + Sync {
    /// Blocks until the user answers; `true` means "yes".
    fn confirm(&self, title: &str, message: &str) -> bool;

    fn notify(&self, kind: NotifyKind, title: &str, message: &str);

    /// A notification caused by an error; `code` is one of the `ERR_*`
    /// constants.
    fn report(&self, kind: NotifyKind, title: &str, message: &str, code: &'static str) {
        let _ = code;
        self.notify(kind, title, message);
    }

    /// Fire and forget.
    fn play_sound(&self, sound: Sound);
}

/// Terminal implementation used by `filer-cli`.
///
/// Notifications go to stderr and into the shared [`LogManager`]; prompts are
/// read from stdin unless `assume_yes` is set.
pub struct ConsoleInteraction {
    log: Arc<LogManager>,
    assume_yes: bool,
    sound_command: Option<String>,
    sound_dir: PathBuf,
}

impl ConsoleInteraction {
    pub fn new(log: Arc<LogManager>, assume_yes: bool) -> Self {
        Self {
            log,
            assume_yes,
            sound_command: None,
            sound_dir: PathBuf::new(),
        }
    }

    pub fn with_sound_player(mut self, command: Option<String>, sound_dir: PathBuf) -> Self {
        self.sound_command = command.filter(|c| !c.trim().is_empty());
        self.sound_dir = sound_dir;
        self
    }

    fn read_answer(&self, title: &str, message: &str) -> bool {
        let mut stderr = std::io::stderr().lock();
        let _ = write!(stderr, "{title}: {message} [y/N] ");
        let _ = stderr.flush();

        let mut line = String::new();
        if std::io::stdin().lock().read_line(&mut line).is_err() {
            return false;
        }
        matches!(line.trim().to_lowercase().as_str(), "y" | "yes")
    }
}

impl UserInteraction for ConsoleInteraction {
    fn confirm(&self, title: &str, message: &str) -> bool {
        let answer = self.assume_yes || self.read_answer(title, message);
        self.log.log(
            "confirm",
            &format!("{message} -> {}", if answer { "yes" } else { "no" }),
            None,
        );
        answer
    }

    fn notify(&self, kind: NotifyKind, title: &str, message: &str) {
        eprintln!("[{}] {title}: {message}", kind.as_str());
        self.log.log(kind.as_str(), &format!("{title}: {message}"), None);
    }

    fn report(&self, kind: NotifyKind, title: &str, message: &str, code: &'static str) {
        eprintln!("[{}] {title}: {message} ({code})", kind.as_str());
        self.log.log(kind.as_str(), &format!("{title}: {message}"), Some(code));
    }

    fn play_sound(&self, sound: Sound) {
        self.log.log("sound", sound.file_name(), None);

        let Some(command) = &self.sound_command else {
            return;
        };
        let file = self.sound_dir.join(sound.file_name());
        let spawned = std::process::Command::new(command)
            .arg(&file)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn();
        if let Err(e) = spawned {
            tracing::warn!("could not play {}: {e}", file.display());
        }
    }
}
