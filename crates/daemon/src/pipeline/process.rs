//! Spawning and tearing down a job's child processes.

use super::command::{build_capture_command, build_transcoder_command, describe, CaptureTarget, LaunchPlan};
use crate::config::{CaptureConfig, TranscoderConfig};
use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::process::{Child, Command};

/// Error type for pipeline spawning
#[derive(Debug, Error)]
pub enum SpawnError {
    /// The executable could not be launched (missing, not executable, ...)
    #[error("failed to launch {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },

    /// A stdio pipe requested at spawn time was not handed back
    #[error("{0} pipe missing after spawn")]
    MissingPipe(&'static str),

    /// Could not create the job's output directory
    #[error("failed to create output directory: {0}")]
    OutputDir(#[source] io::Error),

    /// Could not create the pipe shared by the capture tool's stdout and stderr
    #[error("failed to set up output pipe: {0}")]
    OutputPipe(#[source] io::Error),
}

/// Read end of the pipe a simple pipeline's capture tool writes both of its
/// output streams to.
#[cfg(unix)]
pub type MergedOutput = tokio::net::unix::pipe::Receiver;

/// Merged output is only wired up on unix; elsewhere both streams stay on
/// the child's own pipes.
#[cfg(not(unix))]
pub type MergedOutput = tokio::io::Empty;

/// Live children of one run.
///
/// `primary` is the outermost process whose exit code classifies the run:
/// the capture tool in a simple pipeline, the transcoder in a chained one.
/// `upstream` is the capture tool feeding the transcoder.
#[derive(Debug)]
pub struct RunningPipeline {
    pub primary: Child,
    pub upstream: Option<Child>,
    /// Combined stdout and stderr of the capture tool in a simple pipeline.
    pub merged_output: Option<MergedOutput>,
}

/// How a child ended during teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Had already exited before teardown began.
    AlreadyExited(ExitStatus),
    /// Exited within the grace period after the terminate signal.
    Graceful(ExitStatus),
    /// Needed a force-kill.
    Killed,
}

fn spawn_child(mut cmd: Command, program: &str) -> Result<Child, SpawnError> {
    tracing::debug!("launching: {}", describe(&cmd));
    cmd.kill_on_drop(true).spawn().map_err(|source| SpawnError::Io {
        program: program.to_string(),
        source,
    })
}

/// Pipe with both ends close-on-exec, so only the child it is handed to
/// inherits the write end.
#[cfg(unix)]
fn merged_output_pipe() -> io::Result<(std::os::fd::OwnedFd, std::os::fd::OwnedFd)> {
    let (read, write) = nix::unistd::pipe()?;
    // try_clone duplicates with close-on-exec set; the originals close on drop.
    Ok((read.try_clone()?, write.try_clone()?))
}

/// Point the child's stdout and stderr at one shared pipe and return its
/// read end.
#[cfg(unix)]
fn merge_output(cmd: &mut Command) -> Result<Option<MergedOutput>, SpawnError> {
    let (read, write) = merged_output_pipe().map_err(SpawnError::OutputPipe)?;
    let stderr = write.try_clone().map_err(SpawnError::OutputPipe)?;
    let reader = MergedOutput::from_file(std::fs::File::from(read)).map_err(SpawnError::OutputPipe)?;
    cmd.stdout(Stdio::from(write)).stderr(Stdio::from(stderr));
    Ok(Some(reader))
}

#[cfg(not(unix))]
fn merge_output(cmd: &mut Command) -> Result<Option<MergedOutput>, SpawnError> {
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    Ok(None)
}

/// Spawn the processes for a run
///
/// Simple pipeline: the capture tool writes the recording itself. Its
/// stdout and stderr share one pipe so their lines stay in the order written.
///
/// Chained pipeline: the capture tool writes to stdout, which becomes the
/// transcoder's stdin. Our copy of that pipe is released as soon as the
/// transcoder is spawned so it sees end-of-stream when the capture exits.
///
/// # Errors
/// Any spawn failure is returned after already-started children are killed
/// and reaped.
pub async fn spawn_pipeline(
    plan: &LaunchPlan,
    capture: &CaptureConfig,
    transcoder: &TranscoderConfig,
) -> Result<RunningPipeline, SpawnError> {
    if let Some(dir) = plan.output_path.parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(SpawnError::OutputDir)?;
    }

    let Some(profile) = &plan.compression else {
        let mut cmd = build_capture_command(
            capture,
            &plan.url,
            &plan.quality,
            CaptureTarget::File(&plan.output_path),
        );
        cmd.stdin(Stdio::null());
        let merged_output = merge_output(&mut cmd)?;
        // spawn_child consumes the command, closing our copies of the write end.
        let primary = spawn_child(cmd, &capture.program)?;
        return Ok(RunningPipeline {
            primary,
            upstream: None,
            merged_output,
        });
    };

    let mut capture_cmd = build_capture_command(capture, &plan.url, &plan.quality, CaptureTarget::Stdout);
    capture_cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut upstream = spawn_child(capture_cmd, &capture.program)?;

    let handoff: Result<Stdio, SpawnError> = match upstream.stdout.take() {
        Some(stdout) => stdout.try_into().map_err(|source: io::Error| SpawnError::Io {
            program: transcoder.program.clone(),
            source,
        }),
        None => Err(SpawnError::MissingPipe("capture stdout")),
    };
    let stdin: Stdio = match handoff {
        Ok(stdin) => stdin,
        Err(e) => {
            let _ = upstream.kill().await;
            return Err(e);
        }
    };

    let mut transcoder_cmd = build_transcoder_command(transcoder, profile, &plan.output_path);
    transcoder_cmd
        .stdin(stdin)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let spawned = spawn_child(transcoder_cmd, &transcoder.program);
    // spawn_child consumed the command, closing our end of the intermediate pipe.

    match spawned {
        Ok(primary) => Ok(RunningPipeline {
            primary,
            upstream: Some(upstream),
            merged_output: None,
        }),
        Err(e) => {
            let _ = upstream.kill().await;
            Err(e)
        }
    }
}

impl RunningPipeline {
    /// Pids of children that have not been reaped yet, primary first.
    pub fn pids(&self) -> Vec<u32> {
        std::iter::once(&self.primary)
            .chain(self.upstream.as_ref())
            .filter_map(Child::id)
            .collect()
    }

    /// Stop every child: upstream first so the transcoder can finish the file.
    pub async fn terminate(&mut self, primary_grace: Duration, upstream_grace: Duration) -> Vec<(Termination, &'static str)> {
        let mut report = Vec::with_capacity(2);
        if let Some(upstream) = self.upstream.as_mut() {
            report.push((terminate_child(upstream, upstream_grace).await, "capture"));
        }
        let label = if self.upstream.is_some() { "transcoder" } else { "capture" };
        report.push((terminate_child(&mut self.primary, primary_grace).await, label));
        report
    }

    /// After the primary exits, give the upstream capture a bounded time to
    /// finish on its own before killing it.
    pub async fn reap_upstream(&mut self, grace: Duration) -> Option<Termination> {
        let upstream = self.upstream.as_mut()?;
        match tokio::time::timeout(grace, upstream.wait()).await {
            Ok(Ok(status)) => Some(Termination::AlreadyExited(status)),
            Ok(Err(e)) => {
                tracing::warn!("waiting on capture process failed: {}", e);
                Some(force_kill(upstream).await)
            }
            Err(_) => Some(force_kill(upstream).await),
        }
    }
}

/// Ask a child to exit, wait up to `grace`, then force-kill
///
/// Never fails: errors along the way escalate to a kill.
pub async fn terminate_child(child: &mut Child, grace: Duration) -> Termination {
    match child.try_wait() {
        Ok(Some(status)) => return Termination::AlreadyExited(status),
        Ok(None) => {}
        Err(e) => tracing::warn!("could not poll child before terminate: {}", e),
    }

    if let Err(e) = send_terminate(child) {
        tracing::warn!("terminate signal failed, escalating to kill: {}", e);
        return force_kill(child).await;
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => Termination::Graceful(status),
        Ok(Err(e)) => {
            tracing::warn!("wait after terminate failed: {}", e);
            force_kill(child).await
        }
        Err(_) => force_kill(child).await,
    }
}

async fn force_kill(child: &mut Child) -> Termination {
    // kill() also reaps; an error here means the child is already gone.
    if let Err(e) = child.kill().await {
        tracing::debug!("kill reported: {}", e);
    }
    Termination::Killed
}

#[cfg(unix)]
fn send_terminate(child: &mut Child) -> io::Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    match child.id() {
        Some(pid) => kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(io::Error::from),
        None => Ok(()),
    }
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child) -> io::Result<()> {
    child.start_kill()
}
