//! Job records and output naming.
//!
//! A job is one supervised capture task keyed by a unique name. The record
//! holds everything the supervisor mutates; the snapshot is the read view
//! handed to callers.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// No process and no pending restart.
    Stopped,
    /// A capture process is alive and owned by the job.
    Running,
    /// Waiting for the countdown to reach zero before launching again.
    Restarting,
}

impl Default for JobState {
    fn default() -> Self {
        Self::Stopped
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Stopped => write!(f, "Stopped"),
            JobState::Running => write!(f, "Running"),
            JobState::Restarting => write!(f, "Restarting"),
        }
    }
}

/// Mutable per-job fields, guarded by the job's record lock.
#[derive(Debug, Clone)]
pub struct JobRecord {
    /// Quality label handed to the capture tool at the next launch.
    pub quality: String,
    /// Minutes to wait after a clean finish; 0 disables auto-restart.
    pub delay_minutes: u32,
    pub state: JobState,
    /// Consecutive failure-triggered restarts since the last clean run.
    pub retry_count: u32,
    pub restart_seconds_remaining: u64,
    /// Pids of live children; non-empty exactly while Running.
    pub pids: Vec<u32>,
    /// File being written by the current run.
    pub current_output: Option<PathBuf>,
    /// Human-readable description of how the last run ended.
    pub last_exit: Option<String>,
}

impl JobRecord {
    pub fn new(quality: String, delay_minutes: u32) -> Self {
        Self {
            quality,
            delay_minutes,
            state: JobState::Stopped,
            retry_count: 0,
            restart_seconds_remaining: 0,
            pids: Vec::new(),
            current_output: None,
            last_exit: None,
        }
    }

    /// Enter Running with the given live children.
    pub fn mark_running(&mut self, pids: Vec<u32>, output: PathBuf) {
        self.state = JobState::Running;
        self.pids = pids;
        self.current_output = Some(output);
        self.restart_seconds_remaining = 0;
    }

    /// Drop process ownership after the children have been reaped.
    pub fn release_processes(&mut self) {
        self.pids.clear();
        self.current_output = None;
    }

    /// Enter Restarting with a fresh countdown.
    pub fn mark_restarting(&mut self, seconds: u64) {
        self.release_processes();
        self.state = JobState::Restarting;
        self.restart_seconds_remaining = seconds;
    }

    /// Enter Stopped. Retry count is left alone: stopping is not a completion.
    pub fn mark_stopped(&mut self) {
        self.release_processes();
        self.state = JobState::Stopped;
        self.restart_seconds_remaining = 0;
    }
}

/// Read-only view of a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobSnapshot {
    pub name: String,
    pub url: String,
    pub quality: String,
    pub delay_minutes: u32,
    pub state: JobState,
    pub retry_count: u32,
    pub restart_seconds_remaining: u64,
    pub pids: Vec<u32>,
    pub current_output: Option<PathBuf>,
    pub last_exit: Option<String>,
}

impl JobSnapshot {
    pub fn from_record(name: &str, url: &str, record: &JobRecord) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            quality: record.quality.clone(),
            delay_minutes: record.delay_minutes,
            state: record.state,
            retry_count: record.retry_count,
            restart_seconds_remaining: record.restart_seconds_remaining,
            pids: record.pids.clone(),
            current_output: record.current_output.clone(),
            last_exit: record.last_exit.clone(),
        }
    }
}

/// Reduce a job name to characters that are safe in a file name.
///
/// Keeps alphanumerics, spaces, hyphens and underscores, then trims
/// trailing whitespace.
pub fn sanitize_name(name: &str) -> String {
    let kept: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect();
    kept.trim_end().to_string()
}

/// Timestamp component of a recording file name.
pub fn output_timestamp(at: DateTime<Local>) -> String {
    at.format("%Y%m%d_%H%M%S").to_string()
}

/// Build `<root>/<safe>/<safe>_<timestamp>.<ext>` for a job.
pub fn output_path(root: &Path, job_name: &str, extension: &str, at: DateTime<Local>) -> PathBuf {
    let safe = sanitize_name(job_name);
    root.join(&safe)
        .join(format!("{}_{}.{}", safe, output_timestamp(at), extension))
}
