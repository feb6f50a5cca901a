use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Default maximum number of entries to keep in memory
pub const DEFAULT_MAX_LOG_LINES: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: u64,
    pub timestamp: String,
    pub level: String,
    pub message: String,
    pub code: Option<String>,
}

/// Installs the `tracing` subscriber for the binary. `RUST_LOG` controls
/// verbosity; `default_directive` applies when it is unset.
pub fn init_tracing(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Bounded history of everything shown to the user (notifications and sounds).
pub struct LogManager {
    entries: Arc<Mutex<VecDeque<LogEntry>>>,
    next_id: Mutex<u64>,
    max_lines: usize,
}

impl Default for LogManager {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LOG_LINES)
    }
}

impl LogManager {
    pub fn new(max_lines: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(max_lines.min(1024)))),
            next_id: Mutex::new(0),
            max_lines,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<LogEntry>> {
        // A poisoned history is still a valid history.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn log(&self, level: &str, message: &str, code: Option<&str>) {
        let id = {
            let mut next = self.next_id.lock().unwrap_or_else(|e| e.into_inner());
            *next += 1;
            *next
        };
        let entry = LogEntry {
            id,
            timestamp: chrono::Utc::now().to_rfc3339(),
            level: level.to_string(),
            message: message.to_string(),
            code: code.map(str::to_string),
        };

        let mut entries = self.lock();
        entries.push_back(entry);
        while entries.len() > self.max_lines {
            entries.pop_front();
        }
    }

    pub fn get_logs(&self, level: Option<&str>) -> Vec<LogEntry> {
        let entries = self.lock();
        match level {
            Some(level) => entries.iter().filter(|e| e.level == level).cloned().collect(),
            None => entries.iter().cloned().collect(),
        }
    }

    pub fn count(&self, level: &str) -> usize {
        self.lock().iter().filter(|e| e.level == level).count()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
