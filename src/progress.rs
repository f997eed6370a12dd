//! Feature-extraction progress reporting.
//!
//! Chunked extraction can take a while on large document sets. Reporters
//! receive an event after the document-frequency pass and after every chunk
//! artifact is on disk, so a reporter that calls `status` from inside
//! `report` sees the persisted count.
//!
//! Progress goes to **stderr** so stdout stays parseable for scripts.

use std::io::Write;
use std::sync::Arc;

use fdx_core::DatasetId;

#[derive(Clone, Debug, PartialEq)]
pub enum ExtractionEvent {
    /// Vocabulary / document-frequency pass: `n` of `total` documents read.
    Fitting {
        dsid: DatasetId,
        n: u64,
        total: u64,
    },
    /// Chunk `chunk` (0-based) written; `processed` documents vectorized.
    Chunk {
        dsid: DatasetId,
        chunk: u64,
        processed: u64,
        total: u64,
    },
    Finished {
        dsid: DatasetId,
        total: u64,
    },
}

pub trait ExtractionProgressReporter: Send + Sync {
    fn report(&self, event: ExtractionEvent);
}

/// Human-friendly progress: "features 3fa2…  vectorizing  1,200 / 5,000 documents".
pub struct StderrProgress;

impl ExtractionProgressReporter for StderrProgress {
    fn report(&self, event: ExtractionEvent) {
        let line = match &event {
            ExtractionEvent::Fitting { dsid, n, total } => format!(
                "features {}  fitting  {} / {} documents\n",
                dsid,
                format_number(*n),
                format_number(*total)
            ),
            ExtractionEvent::Chunk {
                dsid,
                chunk,
                processed,
                total,
            } => format!(
                "features {}  chunk {}  {} / {} documents\n",
                dsid,
                chunk,
                format_number(*processed),
                format_number(*total)
            ),
            ExtractionEvent::Finished { dsid, total } => format!(
                "features {}  finished  {} documents\n",
                dsid,
                format_number(*total)
            ),
        };
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
        let _ = err.flush();
    }
}

/// One JSON object per line on stderr.
pub struct JsonProgress;

impl ExtractionProgressReporter for JsonProgress {
    fn report(&self, event: ExtractionEvent) {
        let obj = match &event {
            ExtractionEvent::Fitting { dsid, n, total } => serde_json::json!({
                "event": "progress",
                "dsid": dsid,
                "phase": "fitting",
                "n": n,
                "total": total
            }),
            ExtractionEvent::Chunk {
                dsid,
                chunk,
                processed,
                total,
            } => serde_json::json!({
                "event": "progress",
                "dsid": dsid,
                "phase": "vectorizing",
                "chunk": chunk,
                "n": processed,
                "total": total
            }),
            ExtractionEvent::Finished { dsid, total } => serde_json::json!({
                "event": "progress",
                "dsid": dsid,
                "phase": "finished",
                "n": total,
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

pub struct NoProgress;

impl ExtractionProgressReporter for NoProgress {
    fn report(&self, _event: ExtractionEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Arc<dyn ExtractionProgressReporter> {
        match self {
            ProgressMode::Off => Arc::new(NoProgress),
            ProgressMode::Human => Arc::new(StderrProgress),
            ProgressMode::Json => Arc::new(JsonProgress),
        }
    }
}

impl std::str::FromStr for ProgressMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" | "none" => Ok(ProgressMode::Off),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            other => Err(format!("unknown progress mode '{}'", other)),
        }
    }
}
