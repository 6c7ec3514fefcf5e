//! Leveled log and progress channel for a batch.
//!
//! Every entry lands in the cumulative text log. Console and progress-UI
//! emission is gated by the configured [`Verbosity`].

use std::{
    fmt,
    str::FromStr,
    sync::{Arc, Mutex},
};

use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tracing::{error, info, warn};

use crate::util::lock::mutex_lock;

use super::surface::{FileListOptions, ProgressDisplay};

const LOCK_OWNER: &str = "application::render::progress";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Fatal,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Fatal => "fatal",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Minimum level shown on the console and in the progress UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verbosity {
    All,
    #[default]
    Warning,
    Error,
    Fatal,
    None,
}

impl Verbosity {
    pub fn permits(self, level: LogLevel) -> bool {
        match self {
            Verbosity::All => true,
            Verbosity::Warning => level >= LogLevel::Warning,
            Verbosity::Error => level >= LogLevel::Error,
            Verbosity::Fatal => level >= LogLevel::Fatal,
            Verbosity::None => false,
        }
    }
}

impl FromStr for Verbosity {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "all" | "info" => Ok(Verbosity::All),
            "warning" | "warn" => Ok(Verbosity::Warning),
            "error" => Ok(Verbosity::Error),
            "fatal" => Ok(Verbosity::Fatal),
            "none" | "off" => Ok(Verbosity::None),
            other => Err(format!(
                "unknown verbosity `{other}`; expected all, warning, error, fatal or none"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub level: LogLevel,
    pub title: String,
    pub message: String,
    pub timestamp: OffsetDateTime,
}

impl LogEntry {
    pub fn new(level: LogLevel, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            title: title.into(),
            message: message.into(),
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    /// Single line used in the cumulative text log.
    pub fn to_line(&self) -> String {
        let stamp = self
            .timestamp
            .format(&Rfc3339)
            .unwrap_or_else(|_| self.timestamp.unix_timestamp().to_string());
        if self.message.is_empty() {
            format!("[{stamp}] {}: {}", self.level, self.title)
        } else {
            format!("[{stamp}] {}: {}: {}", self.level, self.title, self.message)
        }
    }
}

#[derive(Default)]
struct LogBook {
    entries: Vec<LogEntry>,
    text: String,
}

/// Append-only log shared by every batch of a session.
pub struct ProgressLog {
    verbosity: Verbosity,
    book: Mutex<LogBook>,
    display: Mutex<Option<Arc<dyn ProgressDisplay>>>,
}

impl ProgressLog {
    pub fn new(verbosity: Verbosity) -> Self {
        Self {
            verbosity,
            book: Mutex::new(LogBook::default()),
            display: Mutex::new(None),
        }
    }

    /// Routes emission to a batch's progress UI until [`Self::detach_display`].
    pub fn attach_display(&self, display: Arc<dyn ProgressDisplay>) {
        *mutex_lock(&self.display, LOCK_OWNER, "attach_display") = Some(display);
    }

    pub fn detach_display(&self) -> Option<Arc<dyn ProgressDisplay>> {
        mutex_lock(&self.display, LOCK_OWNER, "detach_display").take()
    }

    fn display(&self) -> Option<Arc<dyn ProgressDisplay>> {
        mutex_lock(&self.display, LOCK_OWNER, "display").clone()
    }

    fn append_line(&self, line: &str) {
        let mut book = mutex_lock(&self.book, LOCK_OWNER, "append_line");
        book.text.push_str(line);
        book.text.push('\n');
    }

    pub fn log(&self, level: LogLevel, title: &str, message: &str) -> LogEntry {
        let entry = LogEntry::new(level, title, message);
        {
            let mut book = mutex_lock(&self.book, LOCK_OWNER, "log");
            book.text.push_str(&entry.to_line());
            book.text.push('\n');
            book.entries.push(entry.clone());
        }

        if self.verbosity.permits(level) {
            match level {
                LogLevel::Info => info!(
                    target = "application::render::progress",
                    title,
                    detail = message,
                    "log entry"
                ),
                LogLevel::Warning => warn!(
                    target = "application::render::progress",
                    title,
                    detail = message,
                    "log entry"
                ),
                LogLevel::Error => error!(
                    target = "application::render::progress",
                    title,
                    detail = message,
                    "log entry"
                ),
                LogLevel::Fatal => error!(
                    target = "application::render::progress",
                    title,
                    detail = message,
                    fatal = true,
                    "log entry"
                ),
            }
            if let Some(display) = self.display() {
                display.append(&entry);
            }
        }

        entry
    }

    /// Updates the progress indicator. Recorded in the text log only.
    pub fn progress(&self, fraction: f64, message: &str, sub_message: &str) {
        let fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.append_line(&format!(
            "progress {:>3}%: {message} {sub_message}",
            (fraction * 100.0).round() as u32
        ));
        if let Some(display) = self.display() {
            display.update(fraction, message, sub_message);
            display.set_taskbar_progress(Some(fraction));
        }
    }

    /// Replaces the "currently processing" list shown in the progress UI.
    pub fn set_file_list(&self, items: &[String], options: &FileListOptions) {
        if let Some(display) = self.display() {
            display.set_file_list(items, options);
        }
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        mutex_lock(&self.book, LOCK_OWNER, "entries").entries.clone()
    }

    pub fn text(&self) -> String {
        mutex_lock(&self.book, LOCK_OWNER, "text").text.clone()
    }
}

impl fmt::Debug for ProgressLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressLog")
            .field("verbosity", &self.verbosity)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::render::surface::BatchOutcome;

    #[derive(Default)]
    struct RecordingDisplay {
        appended: Mutex<Vec<LogLevel>>,
        updates: Mutex<Vec<(f64, String)>>,
        lists: Mutex<Vec<Vec<String>>>,
    }

    impl ProgressDisplay for RecordingDisplay {
        fn open(&self) {}

        fn update(&self, fraction: f64, message: &str, _sub_message: &str) {
            self.updates
                .lock()
                .unwrap()
                .push((fraction, message.to_string()));
        }

        fn set_taskbar_progress(&self, _fraction: Option<f64>) {}

        fn append(&self, entry: &LogEntry) {
            self.appended.lock().unwrap().push(entry.level);
        }

        fn set_file_list(&self, items: &[String], _options: &FileListOptions) {
            self.lists.lock().unwrap().push(items.to_vec());
        }

        fn finish(&self, _outcome: BatchOutcome) {}
    }

    #[test]
    fn verbosity_thresholds() {
        assert!(Verbosity::All.permits(LogLevel::Info));
        assert!(!Verbosity::Warning.permits(LogLevel::Info));
        assert!(Verbosity::Warning.permits(LogLevel::Error));
        assert!(!Verbosity::Error.permits(LogLevel::Warning));
        assert!(Verbosity::Fatal.permits(LogLevel::Fatal));
        assert!(!Verbosity::None.permits(LogLevel::Fatal));
        assert_eq!("warn".parse::<Verbosity>(), Ok(Verbosity::Warning));
        assert!("loud".parse::<Verbosity>().is_err());
    }

    #[test]
    fn every_entry_reaches_the_text_log_but_only_permitted_ones_the_display() {
        let log = ProgressLog::new(Verbosity::Error);
        let display = Arc::new(RecordingDisplay::default());
        log.attach_display(display.clone());

        log.log(LogLevel::Info, "Starting", "");
        log.log(LogLevel::Warning, "Slow embed", "notes/a.md");
        log.log(LogLevel::Error, "Failed", "notes/b.md");

        let text = log.text();
        assert!(text.contains("info: Starting"));
        assert!(text.contains("warning: Slow embed: notes/a.md"));
        assert!(text.contains("error: Failed: notes/b.md"));
        assert_eq!(log.entries().len(), 3);
        assert_eq!(*display.appended.lock().unwrap(), vec![LogLevel::Error]);
    }

    #[test]
    fn progress_is_clamped_and_kept_out_of_entries() {
        let log = ProgressLog::new(Verbosity::All);
        let display = Arc::new(RecordingDisplay::default());
        log.attach_display(display.clone());

        log.progress(1.7, "Rendering", "b.md");
        log.set_file_list(&["a.md".to_string()], &FileListOptions::default());

        assert!(log.entries().is_empty());
        assert!(log.text().contains("progress 100%: Rendering b.md"));
        assert_eq!(
            *display.updates.lock().unwrap(),
            vec![(1.0, "Rendering".to_string())]
        );
        assert_eq!(display.lists.lock().unwrap().len(), 1);

        assert!(log.detach_display().is_some());
        log.progress(0.5, "Detached", "");
        assert_eq!(display.updates.lock().unwrap().len(), 1);
    }
}
