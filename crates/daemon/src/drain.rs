//! Output drain for child processes
//!
//! Every output pipe of a run gets its own reader task. Lines are forwarded
//! to the event sink in the order the child wrote them. Progress output that
//! redraws itself with carriage returns is split into separate lines.

use crate::events::{EventSink, OutputStage};
use crate::pipeline::RunningPipeline;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;

/// Split one raw chunk into the lines worth logging.
///
/// Bytes are decoded lossily, carriage returns act as line breaks and
/// blank fragments are dropped.
pub fn clean_lines(chunk: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(chunk)
        .split(['\r', '\n'])
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn spawn_reader<R>(reader: R, job: String, stage: OutputStage, sink: EventSink) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::with_capacity(256);
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                // EOF; a trailing partial line was already returned by the previous read.
                Ok(0) => break,
                Ok(_) => {
                    for line in clean_lines(&buf) {
                        sink.output(&job, stage, line);
                    }
                }
                Err(e) => {
                    sink.process_note(&job, format!("Logging error: {}", e));
                    break;
                }
            }
        }
    })
}

/// Reader tasks attached to one run.
#[derive(Debug)]
pub struct OutputDrain {
    readers: Vec<JoinHandle<()>>,
}

impl OutputDrain {
    /// Take every output pipe of `pipeline` and start draining it.
    ///
    /// Simple pipeline: the capture tool's merged stdout and stderr, tagged
    /// `Capture`, read by a single reader so the two stay interleaved.
    /// Chained pipeline: the transcoder's streams tagged `Transcoder`, and the
    /// capture tool's error stream tagged `CaptureUpstream` (its stdout feeds
    /// the transcoder).
    pub fn attach(job: &str, pipeline: &mut RunningPipeline, sink: &EventSink) -> Self {
        let mut readers = Vec::with_capacity(3);
        let primary_stage = if pipeline.upstream.is_some() {
            OutputStage::Transcoder
        } else {
            OutputStage::Capture
        };

        if let Some(merged) = pipeline.merged_output.take() {
            readers.push(spawn_reader(merged, job.to_string(), primary_stage, sink.clone()));
        }
        if let Some(stdout) = pipeline.primary.stdout.take() {
            readers.push(spawn_reader(stdout, job.to_string(), primary_stage, sink.clone()));
        }
        if let Some(stderr) = pipeline.primary.stderr.take() {
            readers.push(spawn_reader(stderr, job.to_string(), primary_stage, sink.clone()));
        }
        if let Some(stderr) = pipeline.upstream.as_mut().and_then(|child| child.stderr.take()) {
            readers.push(spawn_reader(
                stderr,
                job.to_string(),
                OutputStage::CaptureUpstream,
                sink.clone(),
            ));
        }

        Self { readers }
    }

    /// Wait for every reader to reach end-of-stream, up to `timeout` in total.
    ///
    /// Readers still pending afterwards (a grandchild holding the pipe open)
    /// are aborted. Returns how many had to be aborted.
    pub async fn finish(self, timeout: Duration) -> usize {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut aborted = 0;
        for mut reader in self.readers {
            if tokio::time::timeout_at(deadline, &mut reader).await.is_err() {
                reader.abort();
                aborted += 1;
            }
        }
        aborted
    }
}
