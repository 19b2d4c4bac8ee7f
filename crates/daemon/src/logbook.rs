//! In-memory log book fed by the event channel
//!
//! Keeps the most recent lines of both log channels for the status API and
//! for export to a file.

use crate::events::SupervisorEvent;
use chrono::Local;
use serde::Deserialize;
use std::collections::VecDeque;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;

/// Lines kept per channel before the oldest are dropped.
pub const MAX_BUFFERED_LOGS: usize = 2000;

/// The two log channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogChannel {
    /// General application events.
    App,
    /// Output of the capture tool and transcoder.
    Process,
}

impl LogChannel {
    fn header(self) -> &'static str {
        match self {
            LogChannel::App => "=== Application Log ===",
            LogChannel::Process => "=== Process Log ===",
        }
    }
}

#[derive(Debug)]
pub struct LogBook {
    capacity: usize,
    app: Mutex<VecDeque<String>>,
    process: Mutex<VecDeque<String>>,
}

impl Default for LogBook {
    fn default() -> Self {
        Self::with_capacity(MAX_BUFFERED_LOGS)
    }
}

impl LogBook {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            app: Mutex::new(VecDeque::with_capacity(capacity.min(MAX_BUFFERED_LOGS))),
            process: Mutex::new(VecDeque::with_capacity(capacity.min(MAX_BUFFERED_LOGS))),
        }
    }

    fn buffer(&self, channel: LogChannel) -> &Mutex<VecDeque<String>> {
        match channel {
            LogChannel::App => &self.app,
            LogChannel::Process => &self.process,
        }
    }

    /// Append a line, stamped with the local time.
    pub fn push(&self, channel: LogChannel, message: &str) {
        let entry = format!("[{}] {}", Local::now().format("%H:%M:%S"), message);
        if let Ok(mut guard) = self.buffer(channel).lock() {
            guard.push_back(entry);
            while guard.len() > self.capacity {
                guard.pop_front();
            }
        }
    }

    /// File an event on its channel. Job changes are not log lines.
    pub fn record(&self, event: &SupervisorEvent) {
        match event {
            SupervisorEvent::JobChanged { .. } => {}
            SupervisorEvent::AppLog { .. } => self.push(LogChannel::App, &event.render()),
            SupervisorEvent::ProcessOutput { .. } => self.push(LogChannel::Process, &event.render()),
        }
    }

    pub fn recent(&self, channel: LogChannel) -> Vec<String> {
        self.buffer(channel)
            .lock()
            .map(|guard| guard.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear(&self, channel: LogChannel) {
        if let Ok(mut guard) = self.buffer(channel).lock() {
            guard.clear();
        }
    }

    /// Write a channel to `path` under its header line.
    pub fn export(&self, channel: LogChannel, path: &Path) -> io::Result<()> {
        let lines = self.recent(channel);
        let mut file = io::BufWriter::new(std::fs::File::create(path)?);
        writeln!(file, "{}", channel.header())?;
        file.write_all(lines.join("\n").as_bytes())?;
        file.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{LogLevel, OutputStage};
    use tempfile::TempDir;

    fn strip_stamp(line: &str) -> &str {
        // "[HH:MM:SS] " is eleven bytes.
        &line[11..]
    }

    #[test]
    fn test_events_are_routed_by_channel() {
        let book = LogBook::default();
        book.record(&SupervisorEvent::AppLog {
            level: LogLevel::Info,
            message: "Added stream: a".to_string(),
        });
        book.record(&SupervisorEvent::JobChanged { name: "a".to_string() });
        book.record(&SupervisorEvent::ProcessOutput {
            job: "a".to_string(),
            stage: OutputStage::Capture,
            line: "[cli][info] Opening stream".to_string(),
        });

        let app = book.recent(LogChannel::App);
        let process = book.recent(LogChannel::Process);
        assert_eq!(app.len(), 1);
        assert_eq!(strip_stamp(&app[0]), "Added stream: a");
        assert_eq!(process.len(), 1);
        assert_eq!(strip_stamp(&process[0]), "[a] [cli][info] Opening stream");
        assert!(app[0].starts_with('[') && app[0].as_bytes()[9] == b']');
    }

    #[test]
    fn test_oldest_entries_are_dropped() {
        let book = LogBook::with_capacity(3);
        for i in 0..5 {
            book.push(LogChannel::App, &format!("line {}", i));
        }
        let lines: Vec<String> = book
            .recent(LogChannel::App)
            .iter()
            .map(|l| strip_stamp(l).to_string())
            .collect();
        assert_eq!(lines, vec!["line 2", "line 3", "line 4"]);
    }

    #[test]
    fn test_clear_only_touches_one_channel() {
        let book = LogBook::default();
        book.push(LogChannel::App, "keep");
        book.push(LogChannel::Process, "drop");
        book.clear(LogChannel::Process);
        assert_eq!(book.recent(LogChannel::App).len(), 1);
        assert!(book.recent(LogChannel::Process).is_empty());
    }

    #[test]
    fn test_export_writes_header_and_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("process.log");
        let book = LogBook::default();
        book.push(LogChannel::Process, "[a] one");
        book.push(LogChannel::Process, "[a] two");
        book.export(LogChannel::Process, &path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "=== Process Log ===");
        assert_eq!(strip_stamp(lines[1]), "[a] one");
        assert_eq!(strip_stamp(lines[2]), "[a] two");
    }

    #[test]
    fn test_channel_query_values() {
        #[derive(Deserialize)]
        struct Query {
            channel: LogChannel,
        }
        let q: Query = serde_json::from_str(r#"{"channel":"process"}"#).unwrap();
        assert_eq!(q.channel, LogChannel::Process);
    }
}
