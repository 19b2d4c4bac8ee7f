//! Command construction for the capture tool and transcoder.

use crate::config::{CaptureConfig, CompressionProfile, TranscoderConfig};
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Where the capture tool sends the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureTarget<'a> {
    /// Write straight to the recording file.
    File(&'a Path),
    /// Write to standard output for a downstream transcoder.
    Stdout,
}

/// Everything needed to launch one run of a job.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchPlan {
    pub job_name: String,
    pub url: String,
    pub quality: String,
    pub output_path: PathBuf,
    /// Present when the run goes through the transcoder.
    pub compression: Option<CompressionProfile>,
}

impl LaunchPlan {
    pub fn is_chained(&self) -> bool {
        self.compression.is_some()
    }
}

/// Build the capture tool command
///
/// Creates a Command configured with:
/// - Info log level and `--force` so an existing file is overwritten
/// - The tool's own stream retry settings
/// - Either `-o <file>` or `--stdout`, followed by URL and quality
pub fn build_capture_command(
    capture: &CaptureConfig,
    url: &str,
    quality: &str,
    target: CaptureTarget<'_>,
) -> Command {
    let mut cmd = Command::new(&capture.program);

    cmd.arg("--loglevel").arg("info");
    cmd.arg("--force");
    cmd.arg("--retry-streams")
        .arg(capture.retry_streams.to_string());
    cmd.arg("--retry-max").arg(capture.retry_max.to_string());

    match target {
        CaptureTarget::File(output) => {
            cmd.arg(url).arg(quality);
            cmd.arg("-o").arg(output);
        }
        CaptureTarget::Stdout => {
            cmd.arg("--stdout");
            cmd.arg(url).arg(quality);
        }
    }

    cmd
}

/// Build the transcoder command reading the stream from standard input
///
/// Video is re-encoded with the profile's preset and rate factor, audio
/// with the profile's bitrate; the output file is overwritten if present.
pub fn build_transcoder_command(
    transcoder: &TranscoderConfig,
    profile: &CompressionProfile,
    output: &Path,
) -> Command {
    let mut cmd = Command::new(&transcoder.program);

    cmd.arg("-i").arg("pipe:0");
    cmd.arg("-c:v").arg(&transcoder.video_codec);
    cmd.arg("-preset").arg(&profile.preset);
    cmd.arg("-crf").arg(profile.crf.to_string());
    cmd.arg("-c:a").arg(&transcoder.audio_codec);
    cmd.arg("-b:a").arg(&profile.audio_bitrate);
    cmd.arg("-y").arg(output);

    cmd
}

/// Render a command for logging.
pub fn describe(cmd: &Command) -> String {
    let std_cmd = cmd.as_std();
    std::iter::once(std_cmd.get_program())
        .chain(std_cmd.get_args())
        .map(|part| part.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}
