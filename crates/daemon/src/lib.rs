//! stream-warden
//!
//! Supervises long-running stream capture jobs: spawns the capture tool
//! (optionally piped into a transcoder), drains its output, and restarts it
//! on a fixed delay after a clean finish or with jittered backoff after a
//! failure.

pub mod backoff;
pub mod daemon;
pub mod drain;
pub mod events;
pub mod job;
pub mod logbook;
pub mod pipeline;
pub mod probe;
pub mod recordings;
pub mod registry;
pub mod status_server;
pub mod supervisor;

#[cfg(test)]
mod test_support;

pub use stream_warden_config as config;
pub use stream_warden_config::Config;
pub use backoff::{countdown, CountdownOutcome, ExitClass, NextStep, Plan, RestartKind, RetryScheduler};
pub use daemon::{Daemon, DaemonError};
pub use drain::OutputDrain;
pub use events::{event_channel, EventReceiver, EventSink, LogLevel, OutputStage, SupervisorEvent};
pub use job::{output_path, sanitize_name, JobRecord, JobSnapshot, JobState};
pub use logbook::{LogBook, LogChannel};
pub use pipeline::{is_process_alive, LaunchPlan, RunningPipeline, SpawnError};
pub use probe::{run_preflight, ProbeError, ToolRequirements};
pub use recordings::{format_size, list_recordings, Recording};
pub use registry::{JobRegistry, RegistryError};
pub use status_server::{create_status_router, run_status_server, ApiState, ServerError};
pub use supervisor::RunOutcome;
