//! Process pipeline: command construction, spawning, teardown and liveness.

pub mod command;
pub mod liveness;
pub mod process;

pub use command::{build_capture_command, build_transcoder_command, describe, CaptureTarget, LaunchPlan};
pub use liveness::{is_process_alive, surviving};
pub use process::{spawn_pipeline, terminate_child, MergedOutput, RunningPipeline, SpawnError, Termination};
