//! Ingestion progress events and reporters.
//!
//! The pipeline emits [`IngestEvent`]s through a [`ProgressSender`]. The HTTP
//! layer forwards them as server-sent events; the CLI prints them with a
//! [`ProgressReporter`] on **stderr** so stdout stays parseable.
//!
//! Wire shapes (one JSON object per event):
//!
//! ```text
//! {"progress":25,"label":"Parsing PDF..."}
//! {"progress":100,"label":"Done","result":{"success":true,"documentId":"…","chunksCreated":3,"fileUrl":"…"}}
//! {"error":"No text content found in document"}
//! ```

use std::io::Write;

use serde::Serialize;
use tokio::sync::mpsc;

/// Final payload of a successful ingestion.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResult {
    pub success: bool,
    pub document_id: String,
    pub chunks_created: usize,
    pub file_url: String,
}

/// One event in an upload's progress stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum IngestEvent {
    Progress { progress: u8, label: String },
    Done {
        progress: u8,
        label: String,
        result: IngestResult,
    },
    Failed { error: String },
}

impl IngestEvent {
    pub fn done(result: IngestResult) -> Self {
        IngestEvent::Done {
            progress: 100,
            label: "Done".to_string(),
            result,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, IngestEvent::Progress { .. })
    }

    pub fn progress(&self) -> Option<u8> {
        match self {
            IngestEvent::Progress { progress, .. } | IngestEvent::Done { progress, .. } => {
                Some(*progress)
            }
            IngestEvent::Failed { .. } => None,
        }
    }
}

/// Sending half of a progress stream.
///
/// Enforces strictly increasing progress values and at most one terminal
/// event. Send failures (receiver gone) are ignored: a disconnected client
/// must not stop the pipeline.
pub struct ProgressSender {
    tx: Option<mpsc::Sender<IngestEvent>>,
    last: Option<u8>,
    finished: bool,
}

impl ProgressSender {
    pub fn new(tx: mpsc::Sender<IngestEvent>) -> Self {
        Self {
            tx: Some(tx),
            last: None,
            finished: false,
        }
    }

    /// A sender that discards every event.
    pub fn discard() -> Self {
        Self {
            tx: None,
            last: None,
            finished: false,
        }
    }

    /// Emit a progress step. Steps that do not increase progress are dropped.
    pub async fn progress(&mut self, progress: u8, label: impl Into<String>) {
        if self.finished || self.last.is_some_and(|last| progress <= last) || progress >= 100 {
            return;
        }
        self.last = Some(progress);
        self.send(IngestEvent::Progress {
            progress,
            label: label.into(),
        })
        .await;
    }

    pub async fn done(&mut self, result: IngestResult) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.last = Some(100);
        self.send(IngestEvent::done(result)).await;
    }

    pub async fn failed(&mut self, error: impl Into<String>) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.send(IngestEvent::Failed {
            error: error.into(),
        })
        .await;
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    async fn send(&mut self, event: IngestEvent) {
        if let Some(tx) = &self.tx {
            if tx.send(event).await.is_err() {
                // Receiver dropped; keep working without a listener.
                self.tx = None;
            }
        }
    }
}

/// Prints ingestion events for the CLI.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, file: &str, event: &IngestEvent);
}

/// Human-friendly progress on stderr: `ingest report.pdf   25%  Parsing PDF...`.
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, file: &str, event: &IngestEvent) {
        let line = match event {
            IngestEvent::Progress { progress, label } => {
                format!("ingest {}  {:>3}%  {}\n", file, progress, label)
            }
            IngestEvent::Done { result, .. } => format!(
                "ingest {}  100%  done ({} chunks)\n",
                file, result.chunks_created
            ),
            IngestEvent::Failed { error } => format!("ingest {}  failed: {}\n", file, error),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, file: &str, event: &IngestEvent) {
        let obj = serde_json::json!({ "file": file, "event": event });
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _file: &str, _event: &IngestEvent) {}
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
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

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "off" => Some(ProgressMode::Off),
            "human" => Some(ProgressMode::Human),
            "json" => Some(ProgressMode::Json),
            _ => None,
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
