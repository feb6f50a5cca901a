//! Test doubles for the collaborator seams.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{FilerError, Result};
use crate::interaction::{NotifyKind, Sound, UserInteraction};
use crate::mounts::MountTable;
use crate::process::{ProcessOutput, ProcessRunner};
use crate::unmount::ViewRegistry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotifyKind,
    pub title: String,
    pub message: String,
    pub code: Option<&'static str>,
}

/// Records every UI call; confirmations are answered from a queue, then
/// from `default_answer`.
pub struct RecordingInteraction {
    answers: Mutex<VecDeque<bool>>,
    default_answer: bool,
    pub confirmations: Mutex<Vec<String>>,
    pub notifications: Mutex<Vec<Notification>>,
    pub sounds: Mutex<Vec<Sound>>,
}

impl RecordingInteraction {
    pub fn answering(default_answer: bool) -> Self {
        Self {
            answers: Mutex::new(VecDeque::new()),
            default_answer,
            confirmations: Mutex::new(Vec::new()),
            notifications: Mutex::new(Vec::new()),
            sounds: Mutex::new(Vec::new()),
        }
    }

    pub fn with_answers(default_answer: bool, answers: &[bool]) -> Self {
        let me = Self::answering(default_answer);
        me.answers.lock().unwrap().extend(answers.iter().copied());
        me
    }

    pub fn sounds(&self) -> Vec<Sound> {
        self.sounds.lock().unwrap().clone()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().unwrap().clone()
    }

    pub fn confirmation_count(&self) -> usize {
        self.confirmations.lock().unwrap().len()
    }

    pub fn count(&self, kind: NotifyKind) -> usize {
        self.notifications().iter().filter(|n| n.kind == kind).count()
    }
}

impl UserInteraction for RecordingInteraction {
    fn confirm(&self, _title: &str, message: &str) -> bool {
        self.confirmations.lock().unwrap().push(message.to_string());
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.default_answer)
    }

    fn notify(&self, kind: NotifyKind, title: &str, message: &str) {
        self.notifications.lock().unwrap().push(Notification {
            kind,
            title: title.to_string(),
            message: message.to_string(),
            code: None,
        });
    }

    fn report(&self, kind: NotifyKind, title: &str, message: &str, code: &'static str) {
        self.notifications.lock().unwrap().push(Notification {
            kind,
            title: title.to_string(),
            message: message.to_string(),
            code: Some(code),
        });
    }

    fn play_sound(&self, sound: Sound) {
        self.sounds.lock().unwrap().push(sound);
    }
}

/// Mutable in-memory mount table.
#[derive(Default)]
pub struct FakeMounts {
    volumes: Mutex<Vec<PathBuf>>,
    labels: Mutex<HashMap<PathBuf, String>>,
}

impl FakeMounts {
    pub fn with(volumes: &[&Path]) -> Self {
        let me = Self::default();
        for v in volumes {
            me.mount(v);
        }
        me
    }

    pub fn mount(&self, path: &Path) {
        self.volumes.lock().unwrap().push(path.to_path_buf());
    }

    pub fn unmount(&self, path: &Path) {
        self.volumes.lock().unwrap().retain(|v| v != path);
    }

    pub fn set_label(&self, path: &Path, label: &str) {
        self.labels
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), label.to_string());
    }
}

impl MountTable for FakeMounts {
    fn mounted_volumes(&self) -> Result<Vec<PathBuf>> {
        Ok(self.volumes.lock().unwrap().clone())
    }

    fn volume_label(&self, mount_root: &Path) -> Option<String> {
        self.labels.lock().unwrap().get(mount_root).cloned()
    }
}

/// Answers commands by program name; unknown programs exit 1.
#[derive(Default)]
pub struct FakeRunner {
    responses: Mutex<HashMap<String, Result<ProcessOutput>>>,
    existing: Mutex<Vec<String>>,
    pub calls: Mutex<Vec<Vec<String>>>,
    /// Deleted after a successful run of the program, mimicking a cleanup wrapper.
    removes_on_success: Mutex<HashMap<String, PathBuf>>,
}

impl FakeRunner {
    pub fn respond(&self, program: &str, exit_code: i32, stdout: &str) -> &Self {
        self.responses.lock().unwrap().insert(
            program.to_string(),
            Ok(ProcessOutput {
                exit_code: Some(exit_code),
                stdout: stdout.to_string(),
                stderr: String::new(),
            }),
        );
        self
    }

    pub fn time_out(&self, program: &str) -> &Self {
        self.responses.lock().unwrap().insert(
            program.to_string(),
            Err(FilerError::command(&[program.to_string()], "timed out")),
        );
        self
    }

    pub fn install(&self, program: &str) -> &Self {
        self.existing.lock().unwrap().push(program.to_string());
        self
    }

    pub fn remove_dir_on_success(&self, program: &str, dir: &Path) -> &Self {
        self.removes_on_success
            .lock()
            .unwrap()
            .insert(program.to_string(), dir.to_path_buf());
        self
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn programs(&self) -> Vec<String> {
        self.calls().into_iter().filter_map(|c| c.first().cloned()).collect()
    }
}

impl ProcessRunner for FakeRunner {
    async fn run(&self, argv: &[String], _timeout: Duration) -> Result<ProcessOutput> {
        self.calls.lock().unwrap().push(argv.to_vec());
        let program = argv.first().cloned().unwrap_or_default();

        let response = match self.responses.lock().unwrap().get(&program) {
            Some(Ok(output)) => Ok(output.clone()),
            Some(Err(e)) => Err(FilerError::command(argv, e.to_string())),
            None => Ok(ProcessOutput {
                exit_code: Some(1),
                ..Default::default()
            }),
        };

        if matches!(&response, Ok(out) if out.success()) {
            if let Some(dir) = self.removes_on_success.lock().unwrap().get(&program) {
                let _ = std::fs::remove_dir_all(dir);
            }
        }
        response
    }

    fn command_exists(&self, program: &str) -> bool {
        self.existing.lock().unwrap().iter().any(|p| p == program)
    }
}

/// Open folder views. `sticky` views ignore close requests.
#[derive(Default)]
pub struct FakeViews {
    open: Mutex<Vec<PathBuf>>,
    sticky: bool,
    pub close_requests: Mutex<Vec<PathBuf>>,
}

impl FakeViews {
    pub fn with_open(paths: &[&Path], sticky: bool) -> Self {
        Self {
            open: Mutex::new(paths.iter().map(|p| p.to_path_buf()).collect()),
            sticky,
            close_requests: Mutex::new(Vec::new()),
        }
    }
}

impl ViewRegistry for FakeViews {
    fn open_views(&self) -> Vec<PathBuf> {
        self.open.lock().unwrap().clone()
    }

    fn close_view(&self, root: &Path) {
        self.close_requests.lock().unwrap().push(root.to_path_buf());
        if !self.sticky {
            self.open.lock().unwrap().retain(|p| p != root);
        }
    }
}
