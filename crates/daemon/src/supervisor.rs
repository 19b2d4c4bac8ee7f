//! Per-job supervisory task
//!
//! One task per activation of a job. It launches the pipeline, drains its
//! output, waits for the primary process, classifies the exit, and either
//! settles the job or counts down to the next launch. The task owns the
//! child processes; cancelling its token makes it tear them down before it
//! returns, so awaiting the task is awaiting a complete teardown.

use crate::backoff::{countdown, CountdownOutcome, ExitClass, NextStep, RestartKind, RetryScheduler};
use crate::config::{CaptureConfig, CompressionProfile, Config, OutputConfig, SupervisorConfig, TranscoderConfig};
use crate::drain::OutputDrain;
use crate::events::EventSink;
use crate::job::{output_path, JobRecord, JobSnapshot};
use crate::pipeline::{spawn_pipeline, LaunchPlan, RunningPipeline, SpawnError, Termination};
use crate::recordings::format_size;
use chrono::Local;
use std::io;
use std::process::ExitStatus;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How one run of a job ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// Primary process exited with this code.
    Exited(i32),
    /// Primary process was killed by a signal it did not ask for.
    Signalled,
    /// The pipeline could not be built or spawned.
    SpawnFailed(SpawnError),
    /// Waiting on the primary process failed; the run was torn down.
    WaitFailed(io::Error),
    /// The run was stopped by the operator.
    Cancelled,
}

impl RunOutcome {
    pub fn from_status(status: ExitStatus) -> Self {
        match status.code() {
            Some(code) => RunOutcome::Exited(code),
            None => RunOutcome::Signalled,
        }
    }

    /// Scheduling class; `None` for a cancelled run, which schedules nothing.
    pub fn class(&self) -> Option<ExitClass> {
        match self {
            RunOutcome::Exited(0) => Some(ExitClass::Success),
            RunOutcome::Cancelled => None,
            _ => Some(ExitClass::Failure),
        }
    }

    /// Short text stored as the job's last exit.
    pub fn summary(&self) -> String {
        match self {
            RunOutcome::Exited(0) => "completed".to_string(),
            RunOutcome::Exited(code) => format!("failed with code {}", code),
            RunOutcome::Signalled => "terminated by signal".to_string(),
            RunOutcome::SpawnFailed(e) => format!("failed to start: {}", e),
            RunOutcome::WaitFailed(e) => format!("lost track of process: {}", e),
            RunOutcome::Cancelled => "stopped".to_string(),
        }
    }
}

/// Settings and collaborators shared by every supervisory task.
#[derive(Debug)]
pub struct SupervisorContext {
    pub output: OutputConfig,
    pub capture: CaptureConfig,
    pub transcoder: TranscoderConfig,
    pub timeouts: SupervisorConfig,
    pub scheduler: RetryScheduler,
    /// Process-wide profile, read once per launch.
    pub compression: RwLock<CompressionProfile>,
    pub events: EventSink,
}

impl SupervisorContext {
    pub fn new(config: &Config, events: EventSink) -> Self {
        Self {
            output: config.output.clone(),
            capture: config.capture.clone(),
            transcoder: config.transcoder.clone(),
            timeouts: config.supervisor.clone(),
            scheduler: RetryScheduler::new(config.retry.clone()),
            compression: RwLock::new(config.compression.clone()),
            events,
        }
    }
}

/// A registered job: immutable identity, its record, and its control slot.
#[derive(Debug)]
pub struct JobSlot {
    pub name: String,
    pub url: String,
    record: Mutex<JobRecord>,
    /// Serializes start/stop/restart for this job.
    pub(crate) control: tokio::sync::Mutex<Control>,
}

/// State behind a job's control lock.
#[derive(Debug, Default)]
pub(crate) struct Control {
    pub activation: Option<Activation>,
    /// Set once the job has been removed; no further activations are allowed.
    pub removed: bool,
}

impl JobSlot {
    pub fn new(name: String, url: String, record: JobRecord) -> Self {
        Self {
            name,
            url,
            record: Mutex::new(record),
            control: tokio::sync::Mutex::new(Control::default()),
        }
    }

    /// Lock the record. Never held across an await.
    pub fn record(&self) -> MutexGuard<'_, JobRecord> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot::from_record(&self.name, &self.url, &self.record())
    }
}

/// How a new activation begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry {
    /// Launch straight away.
    Immediate,
    /// Count down this many seconds in Restarting first.
    AfterDelay(u64),
}

/// The single live supervisory task of a job.
#[derive(Debug)]
pub(crate) struct Activation {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Activation {
    pub fn launch(ctx: &Arc<SupervisorContext>, job: &Arc<JobSlot>, entry: Entry) -> Self {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(supervise(ctx.clone(), job.clone(), cancel.clone(), entry));
        Self { cancel, task }
    }

    pub fn is_live(&self) -> bool {
        !self.task.is_finished()
    }

    /// Cancel and wait until the task has torn everything down.
    pub async fn cancel_and_wait(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            if e.is_panic() {
                tracing::error!("supervisory task panicked: {}", e);
            }
        }
    }
}

async fn supervise(ctx: Arc<SupervisorContext>, job: Arc<JobSlot>, cancel: CancellationToken, entry: Entry) {
    let mut pending = match entry {
        Entry::Immediate => None,
        Entry::AfterDelay(secs) => Some(secs),
    };

    loop {
        if let Some(secs) = pending.take() {
            if wait_for_restart(&ctx, &job, &cancel, secs).await == CountdownOutcome::Cancelled {
                return;
            }
        }

        let outcome = run_once(&ctx, &job, &cancel).await;
        let Some(class) = outcome.class() else {
            return;
        };
        match schedule_next(&ctx, &job, &outcome, class) {
            Some(secs) => pending = Some(secs),
            None => return,
        }
    }
}

/// Enter Restarting and tick the countdown down to zero.
async fn wait_for_restart(
    ctx: &SupervisorContext,
    job: &JobSlot,
    cancel: &CancellationToken,
    seconds: u64,
) -> CountdownOutcome {
    job.record().mark_restarting(seconds);
    ctx.events.job_changed(&job.name);

    countdown(seconds, cancel, |remaining| {
        job.record().restart_seconds_remaining = remaining;
        ctx.events.job_changed(&job.name);
    })
    .await
}

/// Launch the pipeline once and wait for it to end or be cancelled.
async fn run_once(ctx: &SupervisorContext, job: &JobSlot, cancel: &CancellationToken) -> RunOutcome {
    let name = job.name.as_str();
    let quality = job.record().quality.clone();
    let profile = ctx.compression.read().await.clone();
    let output = output_path(&ctx.output.root, name, &ctx.output.extension, Local::now());

    let plan = LaunchPlan {
        job_name: name.to_string(),
        url: job.url.clone(),
        quality,
        output_path: output.clone(),
        compression: profile.enabled.then_some(profile),
    };

    ctx.events.info(format!("Starting stream: {} -> {}", name, output.display()));
    ctx.events
        .process_note(name, format!("Starting download with quality: {}", plan.quality));
    if let Some(profile) = &plan.compression {
        ctx.events.process_note(
            name,
            format!(
                "Compression enabled: preset={}, crf={}, audio={}",
                profile.preset, profile.crf, profile.audio_bitrate
            ),
        );
    }

    let mut running = match spawn_pipeline(&plan, &ctx.capture, &ctx.transcoder).await {
        Ok(running) => running,
        Err(e) => return RunOutcome::SpawnFailed(e),
    };

    job.record().mark_running(running.pids(), output.clone());
    ctx.events.job_changed(name);
    let drain = OutputDrain::attach(name, &mut running, &ctx.events);

    let waited = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        status = running.primary.wait() => Some(status),
    };

    let outcome = match waited {
        None => {
            teardown(ctx, name, &mut running).await;
            RunOutcome::Cancelled
        }
        Some(Ok(status)) => {
            // The primary is reaped; only a lingering capture process is still owned.
            job.record().pids = running.pids();
            ctx.events.job_changed(name);
            reap_upstream(ctx, name, &mut running).await;
            RunOutcome::from_status(status)
        }
        Some(Err(e)) => {
            teardown(ctx, name, &mut running).await;
            RunOutcome::WaitFailed(e)
        }
    };
    job.record().release_processes();
    ctx.events.job_changed(name);

    let aborted = drain.finish(ctx.timeouts.drain_flush_timeout()).await;
    if aborted > 0 {
        tracing::debug!(job = name, aborted, "output readers still open after exit were aborted");
    }

    if matches!(outcome, RunOutcome::Exited(0)) {
        match tokio::fs::metadata(&output).await {
            Ok(meta) => ctx
                .events
                .process_note(name, format!("Final file size: {}", format_size(meta.len()))),
            Err(e) => tracing::debug!(job = name, "no output file to measure: {}", e),
        }
    }

    outcome
}

/// Stop every child of a run, logging escalations.
async fn teardown(ctx: &SupervisorContext, name: &str, running: &mut RunningPipeline) {
    ctx.events.process_note(name, "Terminating process...");
    let report = running
        .terminate(
            ctx.timeouts.terminate_timeout(),
            ctx.timeouts.upstream_terminate_timeout(),
        )
        .await;
    for (result, stage) in report {
        if result == Termination::Killed {
            ctx.events
                .process_note(name, format!("Force killed {} process after timeout", stage));
        }
    }
    ctx.events.process_note(name, "Process stopped");
}

/// The capture tool of a chained run should end on its own once the
/// transcoder is gone; kill it if it lingers.
async fn reap_upstream(ctx: &SupervisorContext, name: &str, running: &mut RunningPipeline) {
    match running
        .reap_upstream(ctx.timeouts.upstream_terminate_timeout())
        .await
    {
        Some(Termination::AlreadyExited(status)) | Some(Termination::Graceful(status)) => {
            tracing::debug!(job = name, "capture process exited with {}", status);
        }
        Some(Termination::Killed) => {
            ctx.events
                .process_note(name, "Capture process outlived the transcoder and was killed");
        }
        None => {}
    }
}

/// Log the outcome, update the retry count and decide what comes next.
///
/// Returns the countdown length when a restart is scheduled. The job is
/// settled to Stopped otherwise.
fn schedule_next(ctx: &SupervisorContext, job: &JobSlot, outcome: &RunOutcome, class: ExitClass) -> Option<u64> {
    let name = job.name.as_str();
    let events = &ctx.events;

    match outcome {
        RunOutcome::Exited(0) => {
            events.process_note(name, "Download completed successfully");
            events.info(format!("Download completed: {}", name));
        }
        RunOutcome::Exited(code) => {
            events.process_note(name, format!("Download failed - code: {}", code));
            events.warn(format!("Download failed: {} (code: {})", name, code));
        }
        RunOutcome::Signalled => {
            events.process_note(name, "Download failed - terminated by signal");
            events.warn(format!("Download failed: {} (terminated by signal)", name));
        }
        RunOutcome::SpawnFailed(e) => {
            events.process_note(name, format!("Error starting process: {}", e));
            events.error(format!("Error starting {}: {}", name, e));
        }
        RunOutcome::WaitFailed(e) => {
            events.error(format!("Error waiting on {}: {}", name, e));
        }
        RunOutcome::Cancelled => {}
    }

    let (plan, previous_retries) = {
        let mut record = job.record();
        let previous = record.retry_count;
        let plan = ctx
            .scheduler
            .plan(class, record.delay_minutes, previous, &mut rand::thread_rng());
        record.retry_count = plan.retry_count;
        record.last_exit = Some(outcome.summary());
        if plan.next == NextStep::Stop {
            record.mark_stopped();
        }
        (plan, previous)
    };

    if class == ExitClass::Success && previous_retries > 0 {
        events.info(format!("Reset retry count for {}", name));
    }

    match plan.next {
        NextStep::Stop => {
            events.info(format!("{} stopped; auto-restart is off (delay 0)", name));
            events.job_changed(name);
            None
        }
        NextStep::Restart {
            delay_secs,
            kind: RestartKind::Scheduled,
        } => {
            events.info(format!("Scheduling normal restart for {} in {}s", name, delay_secs));
            Some(delay_secs)
        }
        NextStep::Restart {
            delay_secs,
            kind: RestartKind::ErrorRetry { attempt },
        } => {
            events.info(format!(
                "Scheduling error retry for {} in {}s (attempt {})",
                name, delay_secs, attempt
            ));
            Some(delay_secs)
        }
    }
}
