//! Run control for the ingestion pipeline.
//!
//! [`Ingestor`] owns the pipeline, guarantees that at most one run is in
//! flight, and keeps a status snapshot that readers can poll while a run
//! executes on a background task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Result};
use serde::Serialize;
use tracing::error;

use crate::ingest::{Pipeline, RunSummary};
use crate::progress::{IngestEvent, ProgressReporter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

/// Snapshot returned by [`Ingestor::status`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestionStatus {
    pub active: bool,
    /// Latest human-readable progress line.
    pub progress: String,
    /// Rows written by the current (or last) run.
    pub total_ingested: u64,
    pub elapsed_seconds: u64,
    /// Set when the last run aborted before completing discovery.
    pub error: Option<String>,
}

#[derive(Default)]
struct StatusState {
    active: bool,
    progress: String,
    total_ingested: u64,
    started_at: Option<Instant>,
    last_elapsed: Duration,
    error: Option<String>,
}

fn lock(state: &Mutex<StatusState>) -> MutexGuard<'_, StatusState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Held for the lifetime of a run; releases the exclusion flag on drop.
struct RunGuard(Arc<AtomicBool>);

impl RunGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard(flag.clone()))
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Reporter that records progress into the status snapshot and forwards
/// every event to an outer reporter.
#[derive(Clone)]
struct StatusTracker {
    state: Arc<Mutex<StatusState>>,
    inner: Arc<dyn ProgressReporter>,
}

impl ProgressReporter for StatusTracker {
    fn report(&self, event: &IngestEvent) {
        {
            let mut state = lock(&self.state);
            state.progress = event.describe();
            if let IngestEvent::Persisted { saved, .. } = event {
                state.total_ingested += saved;
            }
        }
        self.inner.report(event);
    }
}

impl StatusTracker {
    fn begin(&self) {
        let mut state = lock(&self.state);
        *state = StatusState {
            active: true,
            progress: "Starting ingestion".to_string(),
            started_at: Some(Instant::now()),
            ..Default::default()
        };
    }

    fn finish(&self, result: &Result<RunSummary>) {
        let mut state = lock(&self.state);
        state.active = false;
        state.last_elapsed = state
            .started_at
            .map(|t| t.elapsed())
            .unwrap_or_default();
        match result {
            Ok(summary) => {
                state.total_ingested = summary.records_ingested;
                state.progress = format!(
                    "Completed: {} records ingested from {} resources",
                    summary.records_ingested, summary.processed
                );
            }
            Err(e) => {
                let message = format!("{:#}", e);
                state.progress = format!("Failed: {}", message);
                state.error = Some(message);
            }
        }
    }
}

pub struct Ingestor {
    pipeline: Arc<Pipeline>,
    reporter: Arc<dyn ProgressReporter>,
    state: Arc<Mutex<StatusState>>,
    running: Arc<AtomicBool>,
}

impl Ingestor {
    pub fn new(pipeline: Pipeline, reporter: Arc<dyn ProgressReporter>) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            reporter,
            state: Arc::new(Mutex::new(StatusState::default())),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    fn tracker(&self) -> StatusTracker {
        StatusTracker {
            state: self.state.clone(),
            inner: self.reporter.clone(),
        }
    }

    /// Start a run on a background task. Must be called from within a
    /// tokio runtime.
    pub fn start(&self) -> StartOutcome {
        let Some(guard) = RunGuard::acquire(&self.running) else {
            return StartOutcome::AlreadyRunning;
        };

        let tracker = self.tracker();
        tracker.begin();
        let pipeline = self.pipeline.clone();

        tokio::spawn(async move {
            // Inner task so a panic surfaces as a JoinError and still
            // reaches `finish`.
            let run_tracker = tracker.clone();
            let run = tokio::spawn(async move { pipeline.run(&run_tracker).await });
            let result = match run.await {
                Ok(result) => result,
                Err(e) => Err(anyhow!("ingestion task aborted: {}", e)),
            };
            if let Err(e) = &result {
                error!(error = %format!("{:#}", e), "ingestion run failed");
            }
            tracker.finish(&result);
            drop(guard);
        });

        StartOutcome::Started
    }

    /// Run in the current task and wait for the summary.
    pub async fn run_to_completion(&self) -> Result<RunSummary> {
        let Some(_guard) = RunGuard::acquire(&self.running) else {
            bail!("an ingestion run is already in progress");
        };

        let tracker = self.tracker();
        tracker.begin();
        let result = self.pipeline.run(&tracker).await;
        tracker.finish(&result);
        result
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn status(&self) -> IngestionStatus {
        let state = lock(&self.state);
        let elapsed = match (state.active, state.started_at) {
            (true, Some(started)) => started.elapsed(),
            _ => state.last_elapsed,
        };
        IngestionStatus {
            active: state.active,
            progress: state.progress.clone(),
            total_ingested: state.total_ingested,
            elapsed_seconds: elapsed.as_secs(),
            error: state.error.clone(),
        }
    }

    pub async fn patent_count(&self) -> Result<i64> {
        self.pipeline.store().patent_count().await
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }
}
