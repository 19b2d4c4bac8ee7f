//! Job registry
//!
//! Authoritative map of job name to job slot, and the operator-facing
//! operations on it. The map lock is only held to look a job up; everything
//! that changes a job's lifecycle goes through that job's own control lock,
//! so jobs never wait on each other.

use crate::config::{CompressionProfile, Config, ConfigError};
use crate::events::EventSink;
use crate::job::{JobRecord, JobSnapshot, JobState};
use crate::pipeline::surviving;
use crate::probe::{check_url_supported, run_preflight, ProbeError, ToolRequirements};
use crate::supervisor::{Activation, Control, Entry, JobSlot, SupervisorContext};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinSet;

/// Errors reported synchronously by registry operations
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Stream already exists: {0}")]
    DuplicateJob(String),

    #[error("Unknown stream: {0}")]
    UnknownJob(String),

    /// A required external tool did not answer; nothing was spawned.
    #[error("Pre-flight check failed: {0}")]
    Preflight(#[from] ProbeError),

    #[error("Invalid compression profile: {0}")]
    InvalidCompression(#[source] ConfigError),
}

/// Registry of supervised jobs
#[derive(Debug)]
pub struct JobRegistry {
    ctx: Arc<SupervisorContext>,
    default_quality: String,
    jobs: RwLock<HashMap<String, Arc<JobSlot>>>,
}

impl JobRegistry {
    pub fn new(config: &Config, events: EventSink) -> Self {
        Self {
            ctx: Arc::new(SupervisorContext::new(config, events)),
            default_quality: config.capture.default_quality.clone(),
            jobs: RwLock::new(HashMap::new()),
        }
    }

    pub fn events(&self) -> &EventSink {
        &self.ctx.events
    }

    async fn slot(&self, name: &str) -> Result<Arc<JobSlot>, RegistryError> {
        self.jobs
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownJob(name.to_string()))
    }

    /// Register a new Stopped job with the default quality.
    ///
    /// # Errors
    /// `DuplicateJob` if the name is taken; the existing job is untouched.
    pub async fn add(&self, name: &str, url: &str, delay_minutes: u32) -> Result<(), RegistryError> {
        self.add_with_quality(name, url, delay_minutes, None).await
    }

    /// Register a new Stopped job, optionally overriding the quality label.
    pub async fn add_with_quality(
        &self,
        name: &str,
        url: &str,
        delay_minutes: u32,
        quality: Option<String>,
    ) -> Result<(), RegistryError> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(name) {
            self.ctx.events.warn(format!("Stream already exists: {}", name));
            return Err(RegistryError::DuplicateJob(name.to_string()));
        }

        let record = JobRecord::new(
            quality.unwrap_or_else(|| self.default_quality.clone()),
            delay_minutes,
        );
        jobs.insert(
            name.to_string(),
            Arc::new(JobSlot::new(name.to_string(), url.to_string(), record)),
        );
        drop(jobs);

        self.ctx.events.info(format!("Added stream: {}", name));
        self.ctx.events.job_changed(name);
        Ok(())
    }

    /// Stop a job and delete it. Absent names are fine.
    pub async fn remove(&self, name: &str) {
        let Ok(slot) = self.slot(name).await else {
            return;
        };

        let mut control = slot.control.lock().await;
        if control.removed {
            return;
        }
        stop_locked(&self.ctx, &slot, &mut control).await;
        control.removed = true;

        let mut jobs = self.jobs.write().await;
        if jobs.get(name).is_some_and(|current| Arc::ptr_eq(current, &slot)) {
            jobs.remove(name);
        }
        drop(jobs);

        self.ctx.events.info(format!("Removed stream: {}", name));
        self.ctx.events.job_changed(name);
    }

    /// Set the delay used by the next scheduling decision.
    ///
    /// Negative values clamp to 0 (auto-restart off).
    pub async fn set_delay(&self, name: &str, minutes: i64) -> Result<(), RegistryError> {
        let slot = self.slot(name).await?;
        let minutes = minutes.clamp(0, i64::from(u32::MAX)) as u32;
        slot.record().delay_minutes = minutes;
        self.ctx
            .events
            .info(format!("Delay for {} set to {} minute(s)", name, minutes));
        self.ctx.events.job_changed(name);
        Ok(())
    }

    /// Replace the quality label used at the next launch.
    pub async fn set_quality(&self, name: &str, quality: &str) -> Result<(), RegistryError> {
        let slot = self.slot(name).await?;
        slot.record().quality = quality.to_string();
        self.ctx.events.job_changed(name);
        Ok(())
    }

    /// Start a job
    ///
    /// No-op when already Running. A pending restart countdown is cancelled
    /// and the job launches immediately.
    ///
    /// # Errors
    /// * `UnknownJob` - no such job
    /// * `Preflight` - a required tool is unavailable; the job is left as it was
    pub async fn start(&self, name: &str) -> Result<(), RegistryError> {
        let slot = self.slot(name).await?;
        let mut control = slot.control.lock().await;
        if control.removed {
            return Err(RegistryError::UnknownJob(name.to_string()));
        }

        let running = slot.record().state == JobState::Running;
        if running && control.activation.as_ref().is_some_and(Activation::is_live) {
            return Ok(());
        }

        self.preflight(name).await?;

        if let Some(previous) = control.activation.take() {
            previous.cancel_and_wait().await;
        }
        control.activation = Some(Activation::launch(&self.ctx, &slot, Entry::Immediate));
        Ok(())
    }

    /// Stop a job and wait for its processes to be gone.
    ///
    /// Safe in every state; always ends in Stopped.
    pub async fn stop(&self, name: &str) -> Result<(), RegistryError> {
        let slot = self.slot(name).await?;
        let mut control = slot.control.lock().await;
        stop_locked(&self.ctx, &slot, &mut control).await;
        Ok(())
    }

    /// Operator restart: stop, then launch again after the restart grace.
    ///
    /// The grace period is an ordinary cancellable countdown in Restarting.
    pub async fn restart(&self, name: &str) -> Result<(), RegistryError> {
        let slot = self.slot(name).await?;
        let mut control = slot.control.lock().await;
        if control.removed {
            return Err(RegistryError::UnknownJob(name.to_string()));
        }

        stop_locked(&self.ctx, &slot, &mut control).await;
        self.preflight(name).await?;

        self.ctx.events.info(format!("Restarting stream: {}", name));
        let entry = match self.ctx.timeouts.restart_grace_secs {
            0 => Entry::Immediate,
            secs => Entry::AfterDelay(secs),
        };
        control.activation = Some(Activation::launch(&self.ctx, &slot, entry));
        Ok(())
    }

    pub async fn snapshot(&self, name: &str) -> Option<JobSnapshot> {
        self.slot(name).await.ok().map(|slot| slot.snapshot())
    }

    /// Snapshots of every job, sorted by name.
    pub async fn snapshots(&self) -> Vec<JobSnapshot> {
        let mut all: Vec<JobSnapshot> = self
            .jobs
            .read()
            .await
            .values()
            .map(|slot| slot.snapshot())
            .collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.jobs.read().await.contains_key(name)
    }

    pub async fn compression_profile(&self) -> CompressionProfile {
        self.ctx.compression.read().await.clone()
    }

    /// Replace the process-wide compression profile.
    ///
    /// Running jobs keep the profile they started with.
    pub async fn set_compression_profile(&self, profile: CompressionProfile) -> Result<(), RegistryError> {
        profile.validate().map_err(RegistryError::InvalidCompression)?;
        self.ctx.events.info(format!(
            "Compression settings updated: enabled={}, preset={}, crf={}, audio={}",
            profile.enabled, profile.preset, profile.crf, profile.audio_bitrate
        ));
        *self.ctx.compression.write().await = profile;
        Ok(())
    }

    /// Ask the capture tool whether it recognizes `url`. Advisory only.
    pub async fn check_url(&self, url: &str) -> bool {
        check_url_supported(&self.ctx.capture.program, url, self.ctx.timeouts.probe_timeout()).await
    }

    /// Stop every job concurrently and wait for all teardowns.
    pub async fn shutdown(&self) {
        let slots: Vec<Arc<JobSlot>> = self.jobs.read().await.values().cloned().collect();
        let mut stops = JoinSet::new();
        for slot in slots {
            let ctx = self.ctx.clone();
            stops.spawn(async move {
                let mut control = slot.control.lock().await;
                stop_locked(&ctx, &slot, &mut control).await;
            });
        }
        while let Some(result) = stops.join_next().await {
            if let Err(e) = result {
                tracing::error!("job teardown failed during shutdown: {}", e);
            }
        }
        tracing::info!("all jobs stopped");
    }

    async fn preflight(&self, name: &str) -> Result<(), RegistryError> {
        let compression_enabled = self.ctx.compression.read().await.enabled;
        let reqs = ToolRequirements {
            capture_program: self.ctx.capture.program.clone(),
            transcoder_program: compression_enabled.then(|| self.ctx.transcoder.program.clone()),
        };

        match run_preflight(&reqs, self.ctx.timeouts.probe_timeout()).await {
            Ok(versions) => {
                tracing::debug!(job = name, ?versions, "pre-flight passed");
                Ok(())
            }
            Err(e) => {
                if compression_enabled && reqs.transcoder_program.as_deref() == Some(tool_of(&e)) {
                    self.ctx.events.error(format!(
                        "Cannot start {}: compression enabled but {}",
                        name, e
                    ));
                } else {
                    self.ctx.events.error(format!("Cannot start {}: {}", name, e));
                }
                Err(RegistryError::Preflight(e))
            }
        }
    }
}

fn tool_of(e: &ProbeError) -> &str {
    match e {
        ProbeError::Unavailable { tool, .. } | ProbeError::TimedOut { tool, .. } => tool,
    }
}

/// Stop with the control lock already held.
async fn stop_locked(ctx: &SupervisorContext, slot: &JobSlot, control: &mut Control) {
    let (was, pids) = {
        let record = slot.record();
        (record.state, record.pids.clone())
    };
    if was != JobState::Stopped {
        ctx.events.info(format!("Stopping stream: {}", slot.name));
    }

    if let Some(activation) = control.activation.take() {
        activation.cancel_and_wait().await;
    }

    {
        let mut record = slot.record();
        if was == JobState::Running {
            record.last_exit = Some("stopped".to_string());
        }
        record.mark_stopped();
    }
    ctx.events.job_changed(&slot.name);

    let survivors = surviving(&pids);
    if !survivors.is_empty() {
        ctx.events.warn(format!(
            "Processes of {} still alive after stop: {:?}",
            slot.name, survivors
        ));
    }
    if was != JobState::Stopped {
        ctx.events.info(format!("Stream stopped: {}", slot.name));
    }
}
