//! Ingestion progress reporting.
//!
//! The orchestrator emits [`IngestEvent`]s; reporters turn them into
//! something observable. Progress goes to **stderr** so stdout stays
//! parseable for scripts. The run-status tracker in [`crate::ingestor`] is
//! itself a reporter.

use std::io::Write;

use serde::Serialize;

/// A single progress event for an ingestion run.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum IngestEvent {
    /// Resolving a dataset id through the catalog.
    Discovering { dataset_id: String },
    /// Dataset resolved; `resources` is the number of listed resources.
    DatasetResolved {
        dataset_id: String,
        title: Option<String>,
        resources: usize,
    },
    /// Network download of a resource started.
    Downloading { resource: String, url: String },
    /// Resource served from the local cache.
    Cached { resource: String },
    /// A file (flat resource or archive member) is being parsed.
    Parsing { resource: String, file: String },
    /// Rows of one file were written.
    Persisted {
        resource: String,
        file: String,
        kind: String,
        saved: u64,
        skipped: u64,
    },
    /// Resource not processed in this run.
    Skipped { resource: String, reason: String },
    /// Resource (or archive member) failed; the run continues.
    Failed {
        resource: String,
        category: String,
        message: String,
    },
    /// Run finished.
    Finished { records_ingested: u64 },
}

impl IngestEvent {
    /// One-line human description, also used as the status progress string.
    pub fn describe(&self) -> String {
        match self {
            IngestEvent::Discovering { dataset_id } => {
                format!("discovering dataset {}", dataset_id)
            }
            IngestEvent::DatasetResolved {
                dataset_id,
                title,
                resources,
            } => format!(
                "dataset {} ({})  {} resources",
                dataset_id,
                title.as_deref().unwrap_or("untitled"),
                format_number(*resources as u64)
            ),
            IngestEvent::Downloading { resource, .. } => format!("downloading {}", resource),
            IngestEvent::Cached { resource } => format!("using cached {}", resource),
            IngestEvent::Parsing { resource, file } if resource == file => {
                format!("parsing {}", file)
            }
            IngestEvent::Parsing { resource, file } => format!("parsing {} in {}", file, resource),
            IngestEvent::Persisted {
                file,
                kind,
                saved,
                skipped,
                ..
            } => {
                if *skipped > 0 {
                    format!(
                        "saved {} {} rows from {} ({} skipped)",
                        format_number(*saved),
                        kind,
                        file,
                        format_number(*skipped)
                    )
                } else {
                    format!("saved {} {} rows from {}", format_number(*saved), kind, file)
                }
            }
            IngestEvent::Skipped { resource, reason } => format!("skipped {}: {}", resource, reason),
            IngestEvent::Failed {
                resource,
                category,
                message,
            } => format!("failed {} ({}): {}", resource, category, message),
            IngestEvent::Finished { records_ingested } => format!(
                "finished  {} records ingested",
                format_number(*records_ingested)
            ),
        }
    }
}

/// Receives progress events. Called from the ingestion task.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: &IngestEvent);
}

/// Human-friendly progress on stderr: "ingest  saved 1,234 claim rows from PT_claim.csv".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: &IngestEvent) {
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(stderr, "ingest  {}", event.describe());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: &IngestEvent) {
        let mut obj = match serde_json::to_value(event) {
            Ok(v) => v,
            Err(_) => return,
        };
        if let Some(map) = obj.as_object_mut() {
            map.insert("event".into(), "progress".into());
        }
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
    fn report(&self, _event: &IngestEvent) {}
}

pub fn format_number(n: u64) -> String {
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

    pub fn reporter(&self) -> std::sync::Arc<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => std::sync::Arc::new(NoProgress),
            ProgressMode::Human => std::sync::Arc::new(StderrProgress),
            ProgressMode::Json => std::sync::Arc::new(JsonProgress),
        }
    }
}
