//! Listing of finished and in-progress recordings for a job.

use crate::job::sanitize_name;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use walkdir::WalkDir;

/// Media extensions produced by the capture tool or transcoder (case-insensitive).
pub const MEDIA_EXTENSIONS: &[&str] = &["mp4", "ts", "mkv", "flv"];

/// One file in a job's output directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recording {
    pub path: PathBuf,
    pub file_name: String,
    pub size_bytes: u64,
    /// Human-readable size, e.g. `"1.5 MB"`.
    pub size: String,
    /// Last modification as seconds since the Unix epoch.
    pub modified_unix_secs: u64,
}

/// Checks if a file has a media extension (case-insensitive).
pub fn is_media_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| MEDIA_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Format a byte count with one decimal in B, KB, MB, GB or TB.
pub fn format_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if size < 1024.0 {
            return format!("{:.1} {}", size, unit);
        }
        size /= 1024.0;
    }
    format!("{:.1} TB", size)
}

/// List the recordings of `job_name` under `output_root`, sorted by file name.
///
/// Only the job's own directory is read; a missing directory yields an
/// empty list.
pub fn list_recordings(output_root: &Path, job_name: &str) -> Vec<Recording> {
    let dir = output_root.join(sanitize_name(job_name));
    if !dir.is_dir() {
        return Vec::new();
    }

    let mut recordings: Vec<Recording> = WalkDir::new(&dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|entry| entry.file_type().is_file() && is_media_file(entry.path()))
        .filter_map(|entry| {
            let metadata = entry.metadata().ok()?;
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            Some(Recording {
                path: entry.path().to_path_buf(),
                file_name: entry.file_name().to_string_lossy().into_owned(),
                size_bytes: metadata.len(),
                size: format_size(metadata.len()),
                modified_unix_secs: modified
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0),
            })
        })
        .collect();

    recordings.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    recordings
}
