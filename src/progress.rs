//! Upload progress reporting for the CLI.
//!
//! Renders [`UploadProgress`] changes observed from an
//! [`UploadOrchestrator`](crate::upload::UploadOrchestrator) so users see how
//! many chunks have been stashed and how the upload ended.
//! Progress is emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;

use crate::upload::UploadProgress;

/// A progress change together with what is being uploaded.
#[derive(Clone, Debug)]
pub struct ProgressEvent<'a> {
    pub filename: &'a str,
    pub total_bytes: u64,
    pub chunk_size: u64,
    pub progress: &'a UploadProgress,
}

impl ProgressEvent<'_> {
    /// Bytes acknowledged by the server so far.
    pub fn bytes_sent(&self) -> u64 {
        match self.progress {
            UploadProgress::Uploading { chunk_index, .. } => {
                (*chunk_index as u64 * self.chunk_size).min(self.total_bytes)
            }
            UploadProgress::Succeeded { .. } => self.total_bytes,
            _ => 0,
        }
    }
}

/// Reports upload progress. Implementations write to stderr (human or JSON).
pub trait UploadProgressReporter: Send + Sync {
    fn report(&self, event: &ProgressEvent<'_>);
}

/// Human-friendly progress on stderr:
/// "upload Sunset.jpg  chunk 2 / 3  100,000 / 120,000 bytes".
pub struct StderrProgress;

impl StderrProgress {
    fn render(event: &ProgressEvent<'_>) -> Option<String> {
        let line = match event.progress {
            UploadProgress::Idle => return None,
            UploadProgress::AcquiringToken => {
                format!("upload {}  acquiring token...", event.filename)
            }
            UploadProgress::Uploading {
                chunk_index,
                total_chunks,
            } => format!(
                "upload {}  chunk {} / {}  {} / {} bytes",
                event.filename,
                chunk_index,
                total_chunks,
                format_number(event.bytes_sent()),
                format_number(event.total_bytes)
            ),
            UploadProgress::Succeeded { filename } => format!("upload {}  done", filename),
            UploadProgress::Failed { reason } => {
                format!("upload {}  failed: {}", event.filename, reason)
            }
        };
        Some(line)
    }
}

impl UploadProgressReporter for StderrProgress {
    fn report(&self, event: &ProgressEvent<'_>) {
        if let Some(line) = Self::render(event) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl JsonProgress {
    fn render(event: &ProgressEvent<'_>) -> serde_json::Value {
        let mut obj = serde_json::json!({
            "event": "progress",
            "file": event.filename,
            "bytes_sent": event.bytes_sent(),
            "total_bytes": event.total_bytes,
        });
        let phase = match event.progress {
            UploadProgress::Idle => "idle",
            UploadProgress::AcquiringToken => "acquiring_token",
            UploadProgress::Uploading {
                chunk_index,
                total_chunks,
            } => {
                obj["chunk"] = (*chunk_index).into();
                obj["total_chunks"] = (*total_chunks).into();
                "uploading"
            }
            UploadProgress::Succeeded { filename } => {
                obj["published_as"] = filename.as_str().into();
                "succeeded"
            }
            UploadProgress::Failed { reason } => {
                obj["reason"] = reason.as_str().into();
                "failed"
            }
        };
        obj["phase"] = phase.into();
        obj
    }
}

impl UploadProgressReporter for JsonProgress {
    fn report(&self, event: &ProgressEvent<'_>) {
        if let Ok(line) = serde_json::to_string(&Self::render(event)) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl UploadProgressReporter for NoProgress {
    fn report(&self, _event: &ProgressEvent<'_>) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn UploadProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
