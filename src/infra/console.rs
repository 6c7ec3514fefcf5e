//! Progress display that reports through the tracing subscriber.

use std::sync::Mutex;

use tracing::{debug, error, info, warn};

use crate::{
    application::render::{BatchOutcome, FileListOptions, LogEntry, LogLevel, ProgressDisplay},
    util::lock::mutex_lock,
};

const LOCK_OWNER: &str = "infra::console";

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ConsoleSnapshot {
    pub open: bool,
    pub fraction: f64,
    pub message: String,
    pub taskbar: Option<f64>,
    pub entries: usize,
    pub files: Vec<String>,
    pub active_file: Option<usize>,
    pub outcome: Option<BatchOutcome>,
}

/// Headless stand-in for the host progress window.
#[derive(Debug, Default)]
pub struct ConsoleHost {
    state: Mutex<ConsoleSnapshot>,
}

impl ConsoleHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ConsoleSnapshot {
        mutex_lock(&self.state, LOCK_OWNER, "snapshot").clone()
    }
}

impl ProgressDisplay for ConsoleHost {
    fn open(&self) {
        let mut state = mutex_lock(&self.state, LOCK_OWNER, "open");
        *state = ConsoleSnapshot {
            open: true,
            ..ConsoleSnapshot::default()
        };
        info!(target = "infra::console", op = "open", "render batch started");
    }

    fn update(&self, fraction: f64, message: &str, sub_message: &str) {
        {
            let mut state = mutex_lock(&self.state, LOCK_OWNER, "update");
            state.fraction = fraction;
            state.message = message.to_string();
        }
        info!(
            target = "infra::console",
            op = "progress",
            percent = (fraction * 100.0).round(),
            detail = sub_message,
            "{message}"
        );
    }

    fn set_taskbar_progress(&self, fraction: Option<f64>) {
        mutex_lock(&self.state, LOCK_OWNER, "taskbar").taskbar = fraction;
    }

    fn append(&self, entry: &LogEntry) {
        mutex_lock(&self.state, LOCK_OWNER, "append").entries += 1;
        let title = entry.title.as_str();
        let detail = entry.message.as_str();
        match entry.level {
            LogLevel::Info => info!(target = "infra::console", op = "log", title, detail, "batch log"),
            LogLevel::Warning => {
                warn!(target = "infra::console", op = "log", title, detail, "batch warning")
            }
            LogLevel::Error | LogLevel::Fatal => error!(
                target = "infra::console",
                op = "log",
                level = entry.level.as_str(),
                title,
                detail,
                "batch error"
            ),
        }
    }

    fn set_file_list(&self, items: &[String], options: &FileListOptions) {
        let mut state = mutex_lock(&self.state, LOCK_OWNER, "set_file_list");
        state.files = items.to_vec();
        state.active_file = options.active;
        debug!(
            target = "infra::console",
            op = "file_list",
            files = items.len(),
            active = ?options.active,
            title = options.title.as_deref().unwrap_or_default(),
            "file list updated"
        );
    }

    fn finish(&self, outcome: BatchOutcome) {
        {
            let mut state = mutex_lock(&self.state, LOCK_OWNER, "finish");
            state.open = false;
            state.outcome = Some(outcome);
        }
        match outcome {
            BatchOutcome::Completed => {
                info!(target = "infra::console", op = "finish", result = "completed", "render batch finished")
            }
            BatchOutcome::CompletedWithErrors => warn!(
                target = "infra::console",
                op = "finish",
                result = "completed_with_errors",
                "render batch finished with errors"
            ),
            BatchOutcome::Cancelled => {
                warn!(target = "infra::console", op = "finish", result = "cancelled", "render batch cancelled")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_the_latest_batch_state() {
        let host = ConsoleHost::new();
        host.open();
        host.update(0.5, "Rendering", "notes/a.md");
        host.append(&LogEntry::new(LogLevel::Warning, "Slow", "section timed out"));
        host.set_file_list(
            &["a.md".to_string(), "b.md".to_string()],
            &FileListOptions {
                title: None,
                active: Some(1),
            },
        );
        host.finish(BatchOutcome::CompletedWithErrors);

        let snapshot = host.snapshot();
        assert!(!snapshot.open);
        assert_eq!(snapshot.fraction, 0.5);
        assert_eq!(snapshot.message, "Rendering");
        assert_eq!(snapshot.entries, 1);
        assert_eq!(snapshot.files.len(), 2);
        assert_eq!(snapshot.active_file, Some(1));
        assert_eq!(snapshot.outcome, Some(BatchOutcome::CompletedWithErrors));
    }

    #[test]
    fn reopening_clears_previous_state() {
        let host = ConsoleHost::new();
        host.open();
        host.update(1.0, "Done", "");
        host.finish(BatchOutcome::Completed);
        host.open();

        let snapshot = host.snapshot();
        assert!(snapshot.open);
        assert_eq!(snapshot.fraction, 0.0);
        assert_eq!(snapshot.outcome, None);
    }
}
