//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Speed/quality presets accepted by the transcoder, fastest first.
pub const COMPRESSION_PRESETS: &[&str] = &[
    "ultrafast",
    "superfast",
    "veryfast",
    "faster",
    "fast",
    "medium",
    "slow",
    "slower",
    "veryslow",
];

/// Highest constant rate factor the transcoder accepts.
pub const MAX_CRF: u8 = 51;

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// A value parsed but is not usable
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Where finished recordings are written
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputConfig {
    /// Root directory; each job writes into its own subdirectory
    #[serde(default = "default_output_root")]
    pub root: PathBuf,
    /// File extension of recordings, without the dot
    #[serde(default = "default_extension")]
    pub extension: String,
}

fn default_output_root() -> PathBuf {
    PathBuf::from("recordings")
}

fn default_extension() -> String {
    "mp4".to_string()
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            root: default_output_root(),
            extension: default_extension(),
        }
    }
}

/// Capture tool settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaptureConfig {
    /// Executable name or path of the capture tool
    #[serde(default = "default_capture_program")]
    pub program: String,
    /// Quality label used for jobs that don't set their own
    #[serde(default = "default_quality")]
    pub default_quality: String,
    /// Passed through as `--retry-streams`
    #[serde(default = "default_tool_retries")]
    pub retry_streams: u32,
    /// Passed through as `--retry-max`
    #[serde(default = "default_tool_retries")]
    pub retry_max: u32,
}

fn default_capture_program() -> String {
    "streamlink".to_string()
}

fn default_quality() -> String {
    "best".to_string()
}

fn default_tool_retries() -> u32 {
    3
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            program: default_capture_program(),
            default_quality: default_quality(),
            retry_streams: default_tool_retries(),
            retry_max: default_tool_retries(),
        }
    }
}

/// Transcoder tool settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscoderConfig {
    #[serde(default = "default_transcoder_program")]
    pub program: String,
    #[serde(default = "default_video_codec")]
    pub video_codec: String,
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,
}

fn default_transcoder_program() -> String {
    "ffmpeg".to_string()
}

fn default_video_codec() -> String {
    "libx264".to_string()
}

fn default_audio_codec() -> String {
    "aac".to_string()
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            program: default_transcoder_program(),
            video_codec: default_video_codec(),
            audio_codec: default_audio_codec(),
        }
    }
}

/// Process-wide compression settings
///
/// When enabled, captured data is piped through the transcoder before it
/// reaches disk. Read once when a job launches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompressionProfile {
    #[serde(default)]
    pub enabled: bool,
    /// Speed/quality trade-off, one of [`COMPRESSION_PRESETS`]
    #[serde(default = "default_preset")]
    pub preset: String,
    /// Constant rate factor (0-51, lower = better quality, larger file)
    #[serde(default = "default_crf")]
    pub crf: u8,
    /// Audio bitrate label such as `128k`
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,
}

fn default_preset() -> String {
    "medium".to_string()
}

fn default_crf() -> u8 {
    23
}

fn default_audio_bitrate() -> String {
    "128k".to_string()
}

impl Default for CompressionProfile {
    fn default() -> Self {
        Self {
            enabled: false,
            preset: default_preset(),
            crf: default_crf(),
            audio_bitrate: default_audio_bitrate(),
        }
    }
}

impl CompressionProfile {
    /// Check preset and rate factor against what the transcoder accepts
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !COMPRESSION_PRESETS.contains(&self.preset.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "unknown compression preset '{}', expected one of {}",
                self.preset,
                COMPRESSION_PRESETS.join(", ")
            )));
        }
        if self.crf > MAX_CRF {
            return Err(ConfigError::Invalid(format!(
                "compression crf {} out of range 0-{}",
                self.crf, MAX_CRF
            )));
        }
        if self.audio_bitrate.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "compression audio_bitrate must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Backoff table and jitter used after failed runs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Base delays in seconds indexed by consecutive failure count; the last
    /// entry repeats once the table is exhausted
    #[serde(default = "default_schedule_secs")]
    pub schedule_secs: Vec<u64>,
    /// Fraction of the base delay used as the +/- jitter window
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,
    /// Floor applied after jitter
    #[serde(default = "default_min_delay_secs")]
    pub min_delay_secs: u64,
}

fn default_schedule_secs() -> Vec<u64> {
    vec![30, 60, 120, 300, 600, 1800]
}

fn default_jitter_ratio() -> f64 {
    0.1
}

fn default_min_delay_secs() -> u64 {
    5
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            schedule_secs: default_schedule_secs(),
            jitter_ratio: default_jitter_ratio(),
            min_delay_secs: default_min_delay_secs(),
        }
    }
}

/// Timeouts used by the per-job supervisor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SupervisorConfig {
    /// Grace period between terminate and kill for the primary process
    #[serde(default = "default_terminate_timeout_secs")]
    pub terminate_timeout_secs: u64,
    /// Same, for the capture process feeding a transcoder
    #[serde(default = "default_upstream_terminate_timeout_secs")]
    pub upstream_terminate_timeout_secs: u64,
    /// Pause between stop and start on an operator restart
    #[serde(default = "default_restart_grace_secs")]
    pub restart_grace_secs: u64,
    /// Upper bound for a tool version query
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    /// How long to wait for output readers after a process exits
    #[serde(default = "default_drain_flush_timeout_ms")]
    pub drain_flush_timeout_ms: u64,
}

fn default_terminate_timeout_secs() -> u64 {
    5
}

fn default_upstream_terminate_timeout_secs() -> u64 {
    3
}

fn default_restart_grace_secs() -> u64 {
    2
}

fn default_probe_timeout_secs() -> u64 {
    10
}

fn default_drain_flush_timeout_ms() -> u64 {
    2000
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            terminate_timeout_secs: default_terminate_timeout_secs(),
            upstream_terminate_timeout_secs: default_upstream_terminate_timeout_secs(),
            restart_grace_secs: default_restart_grace_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
            drain_flush_timeout_ms: default_drain_flush_timeout_ms(),
        }
    }
}

impl SupervisorConfig {
    pub fn terminate_timeout(&self) -> Duration {
        Duration::from_secs(self.terminate_timeout_secs)
    }

    pub fn upstream_terminate_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_terminate_timeout_secs)
    }

    pub fn restart_grace(&self) -> Duration {
        Duration::from_secs(self.restart_grace_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn drain_flush_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_flush_timeout_ms)
    }
}

/// Status/control HTTP server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_server_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_server_enabled() -> bool {
    true
}

fn default_bind() -> String {
    "127.0.0.1:7879".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: default_server_enabled(),
            bind: default_bind(),
        }
    }
}

/// A job registered when the daemon starts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobEntry {
    pub name: String,
    pub url: String,
    /// Minutes between a clean finish and the next run (0 = no auto-restart)
    #[serde(default = "default_delay_minutes")]
    pub delay_minutes: u32,
    /// Overrides `capture.default_quality`
    #[serde(default)]
    pub quality: Option<String>,
    #[serde(default)]
    pub autostart: bool,
}

fn default_delay_minutes() -> u32 {
    1
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub transcoder: TranscoderConfig,
    #[serde(default)]
    pub compression: CompressionProfile,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub jobs: Vec<JobEntry>,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - STREAM_WARDEN_OUTPUT_ROOT -> output.root
    /// - STREAM_WARDEN_CAPTURE_PROGRAM -> capture.program
    /// - STREAM_WARDEN_TRANSCODER_PROGRAM -> transcoder.program
    /// - STREAM_WARDEN_DEFAULT_QUALITY -> capture.default_quality
    /// - STREAM_WARDEN_COMPRESSION_ENABLED -> compression.enabled
    /// - STREAM_WARDEN_COMPRESSION_PRESET -> compression.preset
    /// - STREAM_WARDEN_COMPRESSION_CRF -> compression.crf
    /// - STREAM_WARDEN_COMPRESSION_AUDIO_BITRATE -> compression.audio_bitrate
    pub fn apply_env_overrides(&mut self) {
        if let Some(val) = non_empty_var("STREAM_WARDEN_OUTPUT_ROOT") {
            self.output.root = PathBuf::from(val);
        }

        if let Some(val) = non_empty_var("STREAM_WARDEN_CAPTURE_PROGRAM") {
            self.capture.program = val;
        }

        if let Some(val) = non_empty_var("STREAM_WARDEN_TRANSCODER_PROGRAM") {
            self.transcoder.program = val;
        }

        if let Some(val) = non_empty_var("STREAM_WARDEN_DEFAULT_QUALITY") {
            self.capture.default_quality = val;
        }

        if let Ok(val) = env::var("STREAM_WARDEN_COMPRESSION_ENABLED") {
            // Accept "true", "1", "yes" as true; "false", "0", "no" as false
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" => self.compression.enabled = true,
                "false" | "0" | "no" => self.compression.enabled = false,
                _ => {} // Invalid value, keep existing
            }
        }

        if let Some(val) = non_empty_var("STREAM_WARDEN_COMPRESSION_PRESET") {
            self.compression.preset = val;
        }

        if let Ok(val) = env::var("STREAM_WARDEN_COMPRESSION_CRF") {
            if let Ok(crf) = val.parse::<u8>() {
                self.compression.crf = crf;
            }
        }

        if let Some(val) = non_empty_var("STREAM_WARDEN_COMPRESSION_AUDIO_BITRATE") {
            self.compression.audio_bitrate = val;
        }
    }

    /// Reject values the supervisor cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.compression.validate()?;

        if self.retry.schedule_secs.is_empty() {
            return Err(ConfigError::Invalid(
                "retry.schedule_secs must contain at least one delay".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.retry.jitter_ratio) {
            return Err(ConfigError::Invalid(format!(
                "retry.jitter_ratio {} must be in [0, 1)",
                self.retry.jitter_ratio
            )));
        }
        if self.retry.min_delay_secs == 0 {
            return Err(ConfigError::Invalid(
                "retry.min_delay_secs must be at least 1".to_string(),
            ));
        }
        if self.capture.program.trim().is_empty() || self.transcoder.program.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "tool program names must not be empty".to_string(),
            ));
        }
        if self.output.extension.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "output.extension must not be empty".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for job in &self.jobs {
            if !seen.insert(job.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "job '{}' is declared more than once",
                    job.name
                )));
            }
        }

        Ok(())
    }

    /// Load configuration from file, apply environment overrides and validate
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}
