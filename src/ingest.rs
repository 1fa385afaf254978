//! Ingestion pipeline orchestration.
//!
//! Coordinates one run: catalog → download (or cache) → detect → parse →
//! map → store. Resources are handled one at a time and every failure is
//! scoped to the resource (or archive member) that caused it; the run
//! itself only fails when no dataset can be resolved at all. Payloads of
//! an unrecognized shape (HTML error pages, binary blobs) are skipped, not
//! failed, and stay unprocessed.
//!
//! Blobs are always parsed from the cache directory, so an interrupted run
//! resumes without downloading again. ZIP members that were fully
//! persisted are remembered and skipped on resume.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use serde::Serialize;
use tokio::io::AsyncReadExt;
use tracing::{debug, error, info, warn};

use crate::cache::ContentCache;
use crate::catalog::{Catalog, CkanCatalog};
use crate::config::Config;
use crate::detect::{self, FormatHint, PayloadFormat, SAMPLE_LEN};
use crate::error::IngestError;
use crate::fetch::{Fetcher, HttpClients, HttpFetcher};
use crate::mapping::{self, MappedBatch, RecordKind};
use crate::models::ArchiveResource;
use crate::parse::{self, archive};
use crate::progress::{IngestEvent, ProgressReporter};
use crate::store::PatentStore;

#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineOptions {
    /// Pause before every network download after the first one.
    pub politeness: Duration,
    /// Ignore cached blobs and processed flags.
    pub refresh: bool,
}

impl PipelineOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            politeness: Duration::from_millis(config.ingest.politeness_delay_ms),
            refresh: false,
        }
    }
}

/// Counters for one run. `records_ingested` counts rows written in this run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub datasets: usize,
    pub resources_seen: usize,
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub records_ingested: u64,
}

enum ResourceOutcome {
    Processed,
    Skipped(String),
}

#[derive(Default)]
struct RunState {
    records: u64,
    downloaded: bool,
}

pub struct Pipeline {
    store: PatentStore,
    cache: ContentCache,
    catalog: Arc<dyn Catalog>,
    fetcher: Arc<dyn Fetcher>,
    dataset_ids: Vec<String>,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(
        store: PatentStore,
        cache: ContentCache,
        catalog: Arc<dyn Catalog>,
        fetcher: Arc<dyn Fetcher>,
        dataset_ids: Vec<String>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            store,
            cache,
            catalog,
            fetcher,
            dataset_ids,
            options,
        }
    }

    /// Wire the pipeline against the configured database, cache directory
    /// and CKAN endpoint.
    pub async fn from_config(config: &Config, refresh: bool) -> Result<Self> {
        let store = PatentStore::open(config).await?;
        let cache = ContentCache::new(store.pool().clone(), &config.cache.dir)?;
        let clients = HttpClients::new(&config.http)?;
        let catalog = Arc::new(CkanCatalog::new(clients.clone(), config));
        let fetcher = Arc::new(HttpFetcher::new(clients, &config.http));

        Ok(Self::new(
            store,
            cache,
            catalog,
            fetcher,
            config.catalog.dataset_ids.clone(),
            PipelineOptions {
                refresh,
                ..PipelineOptions::from_config(config)
            },
        ))
    }

    pub fn store(&self) -> &PatentStore {
        &self.store
    }

    pub fn cache(&self) -> &ContentCache {
        &self.cache
    }

    pub async fn run(&self, reporter: &dyn ProgressReporter) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        let mut state = RunState::default();

        for dataset_id in &self.dataset_ids {
            reporter.report(&IngestEvent::Discovering {
                dataset_id: dataset_id.clone(),
            });

            let dataset = match self.catalog.dataset(dataset_id).await {
                Ok(dataset) => dataset,
                Err(e) => {
                    error!(dataset_id = %dataset_id, error = %format!("{:#}", e), "dataset discovery failed");
                    reporter.report(&IngestEvent::Failed {
                        resource: dataset_id.clone(),
                        category: "network".into(),
                        message: format!("{:#}", e),
                    });
                    continue;
                }
            };

            summary.datasets += 1;
            info!(
                dataset_id = %dataset.id,
                resources = dataset.resources.len(),
                "dataset resolved"
            );
            reporter.report(&IngestEvent::DatasetResolved {
                dataset_id: dataset.id.clone(),
                title: dataset.title.clone(),
                resources: dataset.resources.len(),
            });

            for resource in &dataset.resources {
                summary.resources_seen += 1;
                let label = resource.file_name().to_string();

                match self.process_resource(resource, &mut state, reporter).await {
                    Ok(ResourceOutcome::Processed) => summary.processed += 1,
                    Ok(ResourceOutcome::Skipped(reason)) => {
                        debug!(resource = %label, reason = %reason, "resource skipped");
                        summary.skipped += 1;
                        reporter.report(&IngestEvent::Skipped {
                            resource: label,
                            reason,
                        });
                    }
                    Err(e @ IngestError::Unrecognized { .. }) => {
                        // Left unprocessed so the next run looks again.
                        log_failure(&label, &e);
                        summary.skipped += 1;
                        reporter.report(&IngestEvent::Skipped {
                            resource: label,
                            reason: e.to_string(),
                        });
                    }
                    Err(e) => {
                        summary.failed += 1;
                        log_failure(&label, &e);
                        reporter.report(&IngestEvent::Failed {
                            resource: label,
                            category: e.category().into(),
                            message: e.to_string(),
                        });
                    }
                }
            }

            if let Err(e) = self.store.record_dataset(&dataset).await {
                warn!(dataset_id = %dataset.id, error = %format!("{:#}", e), "failed to record dataset");
            }
        }

        if summary.datasets == 0 {
            bail!("no dataset could be resolved from the catalog");
        }

        summary.records_ingested = state.records;
        reporter.report(&IngestEvent::Finished {
            records_ingested: state.records,
        });
        info!(
            datasets = summary.datasets,
            processed = summary.processed,
            skipped = summary.skipped,
            failed = summary.failed,
            records = summary.records_ingested,
            "ingestion run complete"
        );
        Ok(summary)
    }

    async fn process_resource(
        &self,
        resource: &ArchiveResource,
        state: &mut RunState,
        reporter: &dyn ProgressReporter,
    ) -> Result<ResourceOutcome, IngestError> {
        let url = resource.url.as_str();
        let label = resource.file_name().to_string();

        if !resource.is_supported() {
            return Ok(ResourceOutcome::Skipped(format!(
                "unsupported format '{}'",
                resource.format
            )));
        }

        if !self.options.refresh && self.cache.is_processed(url).await.map_err(cache_error)? {
            return Ok(ResourceOutcome::Skipped("already processed".into()));
        }

        let cached = if self.options.refresh {
            None
        } else {
            self.cache.get(url).await.map_err(cache_error)?
        };

        let (path, content_type) = match cached {
            Some(path) => {
                debug!(url, path = %path.display(), "using cached blob");
                reporter.report(&IngestEvent::Cached {
                    resource: label.clone(),
                });
                (path, None)
            }
            None => {
                if state.downloaded && !self.options.politeness.is_zero() {
                    tokio::time::sleep(self.options.politeness).await;
                }
                state.downloaded = true;

                reporter.report(&IngestEvent::Downloading {
                    resource: label.clone(),
                    url: url.to_string(),
                });
                let payload = self.fetcher.fetch(url).await?;
                let path = self
                    .cache
                    .store(url, &payload.bytes)
                    .await
                    .map_err(cache_error)?;
                (path, payload.content_type)
            }
        };

        let sample = read_sample(&path).await.map_err(cache_error)?;
        let detection = detect::detect(
            &sample,
            FormatHint {
                file_name: resource.file_name(),
                declared: &resource.format,
                content_type: content_type.as_deref(),
            },
        );

        match detection.format {
            PayloadFormat::Zip => {
                self.ingest_archive(resource, &path, state, reporter).await?;
            }
            PayloadFormat::TooSmall => {
                return Ok(ResourceOutcome::Skipped("payload too small".into()));
            }
            format if format.is_data() => {
                self.ingest_flat(resource, &path, content_type, state, reporter)
                    .await?;
            }
            other => {
                return Err(IngestError::Unrecognized {
                    source_name: label,
                    shape: other.to_string(),
                });
            }
        }

        self.cache.mark_processed(url).await.map_err(cache_error)?;
        Ok(ResourceOutcome::Processed)
    }

    /// Single-format resource: one file, one pass.
    async fn ingest_flat(
        &self,
        resource: &ArchiveResource,
        path: &Path,
        content_type: Option<String>,
        state: &mut RunState,
        reporter: &dyn ProgressReporter,
    ) -> Result<(), IngestError> {
        let label = resource.file_name().to_string();
        reporter.report(&IngestEvent::Parsing {
            resource: label.clone(),
            file: label.clone(),
        });

        let kind = RecordKind::from_filename(&label);
        let path = path.to_path_buf();
        let declared = resource.format.clone();
        let name = label.clone();
        let batch = blocking(move || {
            let bytes = std::fs::read(&path)
                .map_err(|e| IngestError::Cache(format!("{}: {}", path.display(), e)))?;
            let hint = FormatHint {
                file_name: &name,
                declared: &declared,
                content_type: content_type.as_deref(),
            };
            let (_, records) = parse::parse_bytes(&name, &bytes, hint)?;
            Ok(mapping::map_records(kind, &records))
        })
        .await?;

        self.persist(&label, &label, batch, state, reporter).await?;
        Ok(())
    }

    /// ZIP resource: every `.csv` member is parsed and persisted on its own.
    /// Member parse failures are logged and skipped; a persistence failure
    /// leaves the resource unprocessed so the member is retried next run.
    async fn ingest_archive(
        &self,
        resource: &ArchiveResource,
        path: &Path,
        state: &mut RunState,
        reporter: &dyn ProgressReporter,
    ) -> Result<(), IngestError> {
        let url = resource.url.as_str();
        let label = resource.file_name().to_string();

        let archive_path = path.to_path_buf();
        let source = label.clone();
        let entries = blocking(move || {
            archive::CsvArchive::open(&archive_path)
                .map(|a| a.csv_entries())
                .map_err(|e| IngestError::malformed(&source, e, &[]))
        })
        .await?;

        if entries.is_empty() {
            warn!(resource = %label, "archive contains no .csv members");
        }

        let mut persist_failures = 0usize;
        for entry in entries {
            if self
                .cache
                .is_entry_done(url, &entry)
                .await
                .map_err(cache_error)?
            {
                debug!(resource = %label, entry = %entry, "member already ingested");
                continue;
            }

            if archive::is_main_entry(&entry) {
                info!(resource = %label, entry = %entry, "processing main patent table");
            }
            reporter.report(&IngestEvent::Parsing {
                resource: label.clone(),
                file: entry.clone(),
            });

            let batch = match parse_member(path.to_path_buf(), entry.clone()).await {
                Ok(batch) => batch,
                Err(e) => {
                    log_failure(&entry, &e);
                    let event = match &e {
                        IngestError::Unrecognized { .. } => IngestEvent::Skipped {
                            resource: entry.clone(),
                            reason: e.to_string(),
                        },
                        _ => IngestEvent::Failed {
                            resource: entry.clone(),
                            category: e.category().into(),
                            message: e.to_string(),
                        },
                    };
                    reporter.report(&event);
                    continue;
                }
            };

            match self.persist(&label, &entry, batch, state, reporter).await {
                Ok(saved) => self
                    .cache
                    .mark_entry_done(url, &entry, saved)
                    .await
                    .map_err(cache_error)?,
                Err(e) => {
                    persist_failures += 1;
                    log_failure(&entry, &e);
                    reporter.report(&IngestEvent::Failed {
                        resource: entry.clone(),
                        category: e.category().into(),
                        message: e.to_string(),
                    });
                }
            }
        }

        if persist_failures > 0 {
            return Err(IngestError::Persistence {
                kind: "archive".into(),
                message: format!("{} member(s) of {} were not stored", persist_failures, label),
            });
        }
        Ok(())
    }

    async fn persist(
        &self,
        resource: &str,
        file: &str,
        batch: MappedBatch,
        state: &mut RunState,
        reporter: &dyn ProgressReporter,
    ) -> Result<u64, IngestError> {
        let kind = batch.kind();
        if batch.is_empty() {
            debug!(file, %kind, "no rows to store");
        }

        let report = self
            .store
            .save(&batch)
            .await
            .map_err(|e| IngestError::Persistence {
                kind: kind.to_string(),
                message: format!("{:#}", e),
            })?;

        state.records += report.saved;
        info!(file, %kind, saved = report.saved, skipped = report.skipped, "rows stored");
        reporter.report(&IngestEvent::Persisted {
            resource: resource.to_string(),
            file: file.to_string(),
            kind: kind.to_string(),
            saved: report.saved,
            skipped: report.skipped,
        });
        Ok(report.saved)
    }
}

/// Read, detect, parse and map one archive member on the blocking pool.
async fn parse_member(archive_path: PathBuf, entry: String) -> Result<MappedBatch, IngestError> {
    blocking(move || {
        let mut archive = archive::CsvArchive::open(&archive_path)
            .map_err(|e| IngestError::malformed(&entry, e, &[]))?;
        let bytes = archive
            .read_entry(&entry)
            .map_err(|e| IngestError::malformed(&entry, e, &[]))?;
        let (_, records) = parse::parse_bytes(&entry, &bytes, FormatHint::file(&entry))?;
        let kind = RecordKind::from_filename(&entry);
        Ok(mapping::map_records(kind, &records))
    })
    .await
}

async fn blocking<T, F>(f: F) -> Result<T, IngestError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, IngestError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| IngestError::Cache(format!("parser task failed: {}", e)))?
}

async fn read_sample(path: &Path) -> Result<Vec<u8>> {
    let file = tokio::fs::File::open(path).await?;
    let mut sample = Vec::with_capacity(SAMPLE_LEN);
    file.take(SAMPLE_LEN as u64).read_to_end(&mut sample).await?;
    Ok(sample)
}

fn cache_error(e: anyhow::Error) -> IngestError {
    IngestError::Cache(format!("{:#}", e))
}

fn log_failure(name: &str, e: &IngestError) {
    match e {
        IngestError::Malformed { preview, .. } => {
            warn!(resource = %name, error = %e, preview = %preview, "malformed payload")
        }
        IngestError::Unrecognized { .. } => {
            warn!(resource = %name, error = %e, "unrecognized payload")
        }
        IngestError::Network { .. } => warn!(resource = %name, error = %e, "download failed"),
        IngestError::Persistence { .. } | IngestError::Cache(_) => {
            error!(resource = %name, error = %e, "ingestion failed")
        }
    }
}
