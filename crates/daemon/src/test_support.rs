//! Fake external tools for process-level tests.

use crate::config::{CaptureConfig, TranscoderConfig};
use std::path::{Path, PathBuf};

/// Write an executable `/bin/sh` script into `dir`.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(format!("#!/bin/sh\n{}", body).as_bytes()).unwrap();
    file.sync_all().unwrap();
    drop(file);
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

const CAPTURE_PROBES: &str = "case \"$1\" in\n  --version) echo 'streamlink 6.0.0-fake'; exit 0 ;;\n  --can-handle-url) exit 0 ;;\nesac\n";
const TRANSCODER_PROBES: &str = "if [ \"$1\" = \"-version\" ]; then echo 'ffmpeg version 6.1-fake Copyright (c) the FFmpeg developers'; exit 0; fi\n";

/// A capture tool and transcoder made of shell scripts.
///
/// Both answer their version queries; `capture`/`transcoder` replace what
/// happens on a real run.
#[cfg(unix)]
pub struct FakeTools {
    dir: PathBuf,
    capture: PathBuf,
    transcoder: PathBuf,
}

#[cfg(unix)]
impl FakeTools {
    pub fn new(dir: &Path) -> Self {
        let tools = Self {
            dir: dir.to_path_buf(),
            capture: dir.join("fake-capture"),
            transcoder: dir.join("fake-transcoder"),
        };
        tools.capture("exit 0\n").transcoder("cat > /dev/null\nexit 0\n")
    }

    pub fn capture(self, run: &str) -> Self {
        write_script(&self.dir, "fake-capture", &format!("{}{}", CAPTURE_PROBES, run));
        self
    }

    pub fn transcoder(self, run: &str) -> Self {
        write_script(&self.dir, "fake-transcoder", &format!("{}{}", TRANSCODER_PROBES, run));
        self
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            program: self.capture.to_string_lossy().into_owned(),
            ..CaptureConfig::default()
        }
    }

    pub fn transcoder_config(&self) -> TranscoderConfig {
        TranscoderConfig {
            program: self.transcoder.to_string_lossy().into_owned(),
            ..TranscoderConfig::default()
        }
    }
}
