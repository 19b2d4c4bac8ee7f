//! Supervisor event channel
//!
//! Every supervisory task reports through an [`EventSink`]: job changes for
//! whoever renders job state, application log lines, and raw output lines
//! from child processes. Events flow over an unbounded channel to a single
//! consumer owned by the caller, and are mirrored to `tracing`.

use serde::Serialize;
use tokio::sync::mpsc;

/// Target used for raw child-process output in `tracing`.
pub const OUTPUT_TARGET: &str = "stream_warden::output";

/// Severity of an application log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

/// Which process of a job produced an output line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStage {
    /// The only process of a simple pipeline; stdout and stderr share one pipe.
    Capture,
    /// Error stream of the capture process feeding a transcoder.
    CaptureUpstream,
    /// The transcoder of a chained pipeline.
    Transcoder,
}

/// One event emitted by the core.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SupervisorEvent {
    /// A job's state or one of its fields changed.
    JobChanged { name: String },
    /// General application event.
    AppLog { level: LogLevel, message: String },
    /// One line of child-process output.
    ProcessOutput {
        job: String,
        stage: OutputStage,
        line: String,
    },
}

impl SupervisorEvent {
    /// Line as shown in a log view: output lines carry the `[job]` tag,
    /// and upstream capture lines in a chained pipeline an extra `[capture]`.
    pub fn render(&self) -> String {
        match self {
            SupervisorEvent::JobChanged { name } => format!("[{}] changed", name),
            SupervisorEvent::AppLog { message, .. } => message.clone(),
            SupervisorEvent::ProcessOutput { job, stage, line } => match stage {
                OutputStage::CaptureUpstream => format!("[{}] [capture] {}", job, line),
                OutputStage::Capture | OutputStage::Transcoder => format!("[{}] {}", job, line),
            },
        }
    }
}

/// Receiving half handed to the caller.
pub type EventReceiver = mpsc::UnboundedReceiver<SupervisorEvent>;

/// Cloneable sending half used by the registry and every supervisory task.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<SupervisorEvent>,
}

/// Create a connected sink/receiver pair.
pub fn event_channel() -> (EventSink, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSink { tx }, rx)
}

impl EventSink {
    // A dropped receiver only means nobody is watching; supervision goes on.
    fn send(&self, event: SupervisorEvent) {
        let _ = self.tx.send(event);
    }

    pub fn job_changed(&self, name: &str) {
        self.send(SupervisorEvent::JobChanged {
            name: name.to_string(),
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("{}", message);
        self.send(SupervisorEvent::AppLog {
            level: LogLevel::Info,
            message,
        });
    }

    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{}", message);
        self.send(SupervisorEvent::AppLog {
            level: LogLevel::Warning,
            message,
        });
    }

    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!("{}", message);
        self.send(SupervisorEvent::AppLog {
            level: LogLevel::Error,
            message,
        });
    }

    /// Forward one line of child output.
    pub fn output(&self, job: &str, stage: OutputStage, line: impl Into<String>) {
        let line = line.into();
        tracing::debug!(target: OUTPUT_TARGET, job, ?stage, "{}", line);
        self.send(SupervisorEvent::ProcessOutput {
            job: job.to_string(),
            stage,
            line,
        });
    }

    /// Supervisor-authored line on the process channel (not child output).
    pub fn process_note(&self, job: &str, line: impl Into<String>) {
        self.output(job, OutputStage::Capture, line);
    }
}
