//! Availability probes for the external tools
//!
//! Before a job is started the capture tool, and the transcoder when
//! compression is on, must answer a version query within a bounded time.
//! A failed probe rejects the start attempt; it never counts as a job failure.

use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

/// Error types for availability probes
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("{tool} not available: {reason}")]
    Unavailable { tool: String, reason: String },

    #[error("{tool} did not answer a version query within {after:?}")]
    TimedOut { tool: String, after: Duration },
}

/// Which external tools a start attempt needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolRequirements {
    pub capture_program: String,
    /// Set when compression is enabled.
    pub transcoder_program: Option<String>,
}

/// Run `<program> <version_arg>` and return its stdout.
///
/// The child is killed if it outlives `timeout`.
async fn query_version(program: &str, version_arg: &str, timeout: Duration) -> Result<String, ProbeError> {
    let mut cmd = Command::new(program);
    cmd.arg(version_arg)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(result) => result.map_err(|e| ProbeError::Unavailable {
            tool: program.to_string(),
            reason: format!("{} {} failed; is it installed and in PATH? Error: {}", program, version_arg, e),
        })?,
        Err(_) => {
            return Err(ProbeError::TimedOut {
                tool: program.to_string(),
                after: timeout,
            })
        }
    };

    if !output.status.success() {
        return Err(ProbeError::Unavailable {
            tool: program.to_string(),
            reason: format!("{} {} exited with {}", program, version_arg, output.status),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// First non-empty line of the capture tool's `--version` output.
pub fn parse_capture_version(output: &str) -> Option<String> {
    output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

/// Extract the version token from transcoder `-version` output
///
/// Handles the usual `ffmpeg version <token> Copyright ...` first line,
/// including `n`-prefixed git builds.
pub fn parse_transcoder_version(output: &str) -> Option<String> {
    let version_line = output
        .lines()
        .find(|line| line.to_lowercase().contains(" version "))?;

    let lower = version_line.to_lowercase();
    let (_, rest) = lower.split_once(" version ")?;
    rest.split_whitespace().next().map(str::to_string)
}

/// Check the capture tool responds to `--version`.
///
/// Returns the reported version line.
pub async fn check_capture_available(program: &str, timeout: Duration) -> Result<String, ProbeError> {
    let stdout = query_version(program, "--version", timeout).await?;
    Ok(parse_capture_version(&stdout).unwrap_or_else(|| "unknown version".to_string()))
}

/// Check the transcoder responds to `-version`.
pub async fn check_transcoder_available(program: &str, timeout: Duration) -> Result<String, ProbeError> {
    let stdout = query_version(program, "-version", timeout).await?;
    Ok(parse_transcoder_version(&stdout).unwrap_or_else(|| "unknown version".to_string()))
}

/// Run every probe a start attempt needs, capture tool first.
///
/// Returns the version strings reported by each tool that was probed.
pub async fn run_preflight(reqs: &ToolRequirements, timeout: Duration) -> Result<Vec<String>, ProbeError> {
    let mut versions = vec![check_capture_available(&reqs.capture_program, timeout).await?];
    if let Some(transcoder) = &reqs.transcoder_program {
        versions.push(check_transcoder_available(transcoder, timeout).await?);
    }
    Ok(versions)
}

/// Ask the capture tool whether it recognizes a URL.
///
/// Advisory only: any error or timeout reads as "not supported".
pub async fn check_url_supported(program: &str, url: &str, timeout: Duration) -> bool {
    let mut cmd = Command::new(program);
    cmd.arg("--can-handle-url")
        .arg(url)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    match tokio::time::timeout(timeout, cmd.status()).await {
        Ok(Ok(status)) => status.success(),
        Ok(Err(e)) => {
            tracing::debug!("URL check for {} failed to run: {}", url, e);
            false
        }
        Err(_) => false,
    }
}
