//! End-to-end pipeline tests against a local CKAN stand-in.
//!
//! The mock serves `package_show` and the resource files from an axum
//! router on an ephemeral port and counts every file download.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Path as UrlPath, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::Notify;

use patent_ingest::cache::ContentCache;
use patent_ingest::catalog::Catalog;
use patent_ingest::config::Config;
use patent_ingest::fetch::{HttpClients, HttpFetcher};
use patent_ingest::ingest::{Pipeline, PipelineOptions};
use patent_ingest::ingestor::{Ingestor, StartOutcome};
use patent_ingest::models::DatasetInfo;
use patent_ingest::progress::NoProgress;
use patent_ingest::server;
use patent_ingest::store::PatentStore;

const MAIN_HEADER: &str = "Patent Number - Numéro du brevet|Filing Date - Date de dépôt|Application/Patent Title English - Demande/Titre anglais du brevet";
const CLAIM_HEADER: &str = "Patent Number - Numéro du brevet|Claims text sequence number - Texte des revendications numéro de séquence|Claims Text - Texte des revendications";

#[derive(Clone, Default)]
struct MockCkan {
    package: Arc<Mutex<Value>>,
    files: Arc<Mutex<HashMap<String, (u16, Vec<u8>)>>>,
    hits: Arc<Mutex<HashMap<String, usize>>>,
}

impl MockCkan {
    fn set_file(&self, name: &str, status: u16, body: Vec<u8>) {
        self.files
            .lock()
            .unwrap()
            .insert(name.to_string(), (status, body));
    }

    fn hits(&self, name: &str) -> usize {
        self.hits.lock().unwrap().get(name).copied().unwrap_or(0)
    }

    /// Publish a dataset whose resources are `(file name, declared format)`.
    fn set_resources(&self, base: &str, resources: &[(&str, &str)]) {
        let resources: Vec<Value> = resources
            .iter()
            .map(|(name, format)| {
                json!({
                    "url": format!("{}/files/{}", base, name),
                    "format": format,
                    "name": {"en": name, "fr": name},
                })
            })
            .collect();
        *self.package.lock().unwrap() = json!({
            "success": true,
            "result": {
                "id": "patents",
                "name": "patent-data",
                "title": {"en": "Patent Data", "fr": "Données sur les brevets"},
                "notes": "Bulk patent data",
                "metadata_modified": "2024-05-01T00:00:00",
                "resources": resources,
            }
        });
    }
}

async fn package_show(State(mock): State<MockCkan>) -> Json<Value> {
    Json(mock.package.lock().unwrap().clone())
}

async fn serve_file(State(mock): State<MockCkan>, UrlPath(name): UrlPath<String>) -> Response {
    *mock.hits.lock().unwrap().entry(name.clone()).or_default() += 1;
    let file = mock.files.lock().unwrap().get(&name).cloned();
    match file {
        Some((status, body)) => (StatusCode::from_u16(status).unwrap(), body).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Start the mock and return it with its base URL.
async fn start_mock() -> (MockCkan, String) {
    let mock = MockCkan::default();
    let app = Router::new()
        .route("/api/3/action/package_show", get(package_show))
        .route("/files/{name}", get(serve_file))
        .with_state(mock.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (mock, format!("http://{}", addr))
}

fn test_config(dir: &Path, base: &str) -> Config {
    let mut config = Config::with_db_path(dir.join("patents.db"));
    config.cache.dir = dir.join("cache");
    config.catalog.base_url = format!("{}/api/3", base);
    config.catalog.dataset_ids = vec!["patents".to_string()];
    config.ingest.politeness_delay_ms = 0;
    config
}

fn zip_bytes(members: &[(&str, String)]) -> Vec<u8> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut zip = zip::ZipWriter::new(&mut cursor);
        for (name, body) in members {
            zip.start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }
    cursor.into_inner()
}

fn patent_zip(title: &str) -> Vec<u8> {
    zip_bytes(&[
        (
            "PT_Main_2024.csv",
            format!("{}\nCA1234567|2020-01-01|{}\n", MAIN_HEADER, title),
        ),
        (
            "PT_Claim_2024.csv",
            format!("{}\nCA1234567|1|A widget comprising a lever.\n", CLAIM_HEADER),
        ),
    ])
}

async fn table_count(store: &PatentStore, table: &str) -> i64 {
    store
        .table_counts()
        .await
        .unwrap()
        .into_iter()
        .find(|(name, _)| *name == table)
        .map(|(_, count)| count)
        .unwrap()
}

#[tokio::test]
async fn archive_resource_lands_in_normalized_tables() {
    let tmp = TempDir::new().unwrap();
    let (mock, base) = start_mock().await;
    mock.set_file("PT_main_2024.zip", 200, patent_zip("Widget"));
    mock.set_resources(&base, &[("PT_main_2024.zip", "ZIP")]);

    let config = test_config(tmp.path(), &base);
    let pipeline = Pipeline::from_config(&config, false).await.unwrap();
    let summary = pipeline.run(&NoProgress).await.unwrap();

    assert_eq!(summary.datasets, 1);
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.records_ingested, 2);

    let main = pipeline.store().get_main("CA1234567").await.unwrap().unwrap();
    assert_eq!(main.filing_date.as_deref(), Some("2020-01-01"));
    assert_eq!(main.title_english.as_deref(), Some("Widget"));
    assert_eq!(table_count(pipeline.store(), "patent_claims").await, 1);
}

#[tokio::test]
async fn second_run_is_idempotent_and_downloads_once() {
    let tmp = TempDir::new().unwrap();
    let (mock, base) = start_mock().await;
    mock.set_file("PT_main_2024.zip", 200, patent_zip("Widget"));
    mock.set_resources(&base, &[("PT_main_2024.zip", "ZIP")]);
    let config = test_config(tmp.path(), &base);

    let first = Pipeline::from_config(&config, false).await.unwrap();
    first.run(&NoProgress).await.unwrap();

    let second = Pipeline::from_config(&config, false).await.unwrap();
    let summary = second.run(&NoProgress).await.unwrap();

    assert_eq!(summary.processed, 0);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.records_ingested, 0);
    assert_eq!(mock.hits("PT_main_2024.zip"), 1);
    assert_eq!(second.store().patent_count().await.unwrap(), 1);
    assert_eq!(table_count(second.store(), "patent_claims").await, 1);
}

#[tokio::test]
async fn refresh_downloads_again_without_duplicating_rows() {
    let tmp = TempDir::new().unwrap();
    let (mock, base) = start_mock().await;
    mock.set_file("PT_main_2024.zip", 200, patent_zip("Widget"));
    mock.set_resources(&base, &[("PT_main_2024.zip", "ZIP")]);
    let config = test_config(tmp.path(), &base);

    Pipeline::from_config(&config, false)
        .await
        .unwrap()
        .run(&NoProgress)
        .await
        .unwrap();

    let refreshed = Pipeline::from_config(&config, true).await.unwrap();
    let summary = refreshed.run(&NoProgress).await.unwrap();

    assert_eq!(summary.processed, 1);
    assert_eq!(mock.hits("PT_main_2024.zip"), 2);
    assert_eq!(refreshed.store().patent_count().await.unwrap(), 1);
    assert_eq!(table_count(refreshed.store(), "patent_claims").await, 1);
}

#[tokio::test]
async fn newer_resource_replaces_existing_rows() {
    let tmp = TempDir::new().unwrap();
    let (mock, base) = start_mock().await;
    mock.set_file("PT_main_2024.zip", 200, patent_zip("Widget"));
    mock.set_resources(&base, &[("PT_main_2024.zip", "ZIP")]);
    let config = test_config(tmp.path(), &base);

    Pipeline::from_config(&config, false)
        .await
        .unwrap()
        .run(&NoProgress)
        .await
        .unwrap();

    mock.set_file("PT_main_2025.zip", 200, patent_zip("Improved widget"));
    mock.set_resources(&base, &[("PT_main_2025.zip", "ZIP")]);

    let pipeline = Pipeline::from_config(&config, false).await.unwrap();
    pipeline.run(&NoProgress).await.unwrap();

    let main = pipeline.store().get_main("CA1234567").await.unwrap().unwrap();
    assert_eq!(main.title_english.as_deref(), Some("Improved widget"));
    assert_eq!(pipeline.store().patent_count().await.unwrap(), 1);
    assert_eq!(table_count(pipeline.store(), "patent_claims").await, 1);
}

#[tokio::test]
async fn flat_resources_are_parsed_and_flagged() {
    let tmp = TempDir::new().unwrap();
    let (mock, base) = start_mock().await;
    let main_csv = format!(
        "{}\nCA7654321|2019-06-30|Flat widget\nCA7654322|2019-07-01|Flat gadget\n",
        MAIN_HEADER
    );
    let legacy_json = json!({
        "records": [
            {"patent_number": "US1000001", "title": "Gizmo", "status": "granted"},
            {"title": "", "name": "Doohickey", "url": "https://example.org/doohickey"},
            {"colour": "blue"}
        ]
    })
    .to_string();
    mock.set_file("PT_main_2024.csv", 200, main_csv.into_bytes());
    mock.set_file("patents.json", 200, legacy_json.into_bytes());
    mock.set_resources(
        &base,
        &[("PT_main_2024.csv", "CSV"), ("patents.json", "JSON")],
    );

    let config = test_config(tmp.path(), &base);
    let pipeline = Pipeline::from_config(&config, false).await.unwrap();
    let summary = pipeline.run(&NoProgress).await.unwrap();

    assert_eq!(summary.processed, 2);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.records_ingested, 4);

    let main = pipeline.store().get_main("CA7654322").await.unwrap().unwrap();
    assert_eq!(main.filing_date.as_deref(), Some("2019-07-01"));
    assert_eq!(main.title_english.as_deref(), Some("Flat gadget"));
    assert_eq!(pipeline.store().patent_count().await.unwrap(), 2);
    assert_eq!(table_count(pipeline.store(), "legacy_patents").await, 2);

    let titles: Vec<String> =
        sqlx::query_scalar("SELECT title FROM legacy_patents ORDER BY title")
            .fetch_all(pipeline.store().pool())
            .await
            .unwrap();
    assert_eq!(titles, vec!["Doohickey", "Gizmo"]);

    for name in ["PT_main_2024.csv", "patents.json"] {
        let url = format!("{}/files/{}", base, name);
        assert!(pipeline.cache().is_processed(&url).await.unwrap());
    }
}

#[tokio::test]
async fn html_payload_is_skipped_and_stays_unprocessed() {
    let tmp = TempDir::new().unwrap();
    let (mock, base) = start_mock().await;
    let page = format!(
        "<!DOCTYPE html><html><head><title>Maintenance</title></head><body>{}</body></html>",
        "The data portal is temporarily unavailable. ".repeat(5)
    );
    mock.set_file("PT_abstract_2024.csv", 200, page.into_bytes());
    mock.set_file("PT_main_2024.zip", 200, patent_zip("Widget"));
    mock.set_resources(
        &base,
        &[("PT_abstract_2024.csv", "CSV"), ("PT_main_2024.zip", "ZIP")],
    );

    let config = test_config(tmp.path(), &base);
    let pipeline = Pipeline::from_config(&config, false).await.unwrap();
    let summary = pipeline.run(&NoProgress).await.unwrap();

    assert_eq!(summary.failed, 0);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.processed, 1);
    let html_url = format!("{}/files/PT_abstract_2024.csv", base);
    assert!(!pipeline.cache().is_processed(&html_url).await.unwrap());
    assert_eq!(pipeline.store().patent_count().await.unwrap(), 1);
}

#[tokio::test]
async fn server_error_is_scoped_to_its_resource() {
    let tmp = TempDir::new().unwrap();
    let (mock, base) = start_mock().await;
    mock.set_file("PT_claim_2024.zip", 500, b"internal error".to_vec());
    mock.set_file("PT_main_2024.zip", 200, patent_zip("Widget"));
    mock.set_resources(
        &base,
        &[("PT_claim_2024.zip", "ZIP"), ("PT_main_2024.zip", "ZIP")],
    );
    let config = test_config(tmp.path(), &base);

    let pipeline = Pipeline::from_config(&config, false).await.unwrap();
    let summary = pipeline.run(&NoProgress).await.unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.processed, 1);
    assert_eq!(pipeline.store().patent_count().await.unwrap(), 1);

    // The failed resource is retried on the next run; the good one is not.
    let again = Pipeline::from_config(&config, false).await.unwrap();
    again.run(&NoProgress).await.unwrap();
    assert_eq!(mock.hits("PT_claim_2024.zip"), 2);
    assert_eq!(mock.hits("PT_main_2024.zip"), 1);
}

#[tokio::test]
async fn finished_archive_members_are_skipped_on_resume() {
    let tmp = TempDir::new().unwrap();
    let (mock, base) = start_mock().await;
    mock.set_resources(&base, &[("PT_main_2024.zip", "ZIP")]);
    let config = test_config(tmp.path(), &base);

    let pipeline = Pipeline::from_config(&config, false).await.unwrap();
    let url = format!("{}/files/PT_main_2024.zip", base);
    pipeline
        .cache()
        .store(&url, &patent_zip("Widget"))
        .await
        .unwrap();
    pipeline
        .cache()
        .mark_entry_done(&url, "PT_Main_2024.csv", 1)
        .await
        .unwrap();

    let summary = pipeline.run(&NoProgress).await.unwrap();

    assert_eq!(summary.processed, 1);
    assert_eq!(mock.hits("PT_main_2024.zip"), 0);
    assert_eq!(pipeline.store().patent_count().await.unwrap(), 0);
    assert_eq!(table_count(pipeline.store(), "patent_claims").await, 1);
    assert!(pipeline.cache().is_processed(&url).await.unwrap());
}

/// Catalog that parks inside discovery until released.
struct ParkedCatalog {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl Catalog for ParkedCatalog {
    async fn dataset(&self, id: &str) -> anyhow::Result<DatasetInfo> {
        self.entered.notify_one();
        self.release.notified().await;
        anyhow::bail!("catalog unavailable for {}", id)
    }
}

#[tokio::test]
async fn only_one_run_at_a_time() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path(), "http://127.0.0.1:9");
    let store = PatentStore::open(&config).await.unwrap();
    let cache = ContentCache::new(store.pool().clone(), &config.cache.dir).unwrap();
    let clients = HttpClients::new(&config.http).unwrap();
    let fetcher = Arc::new(HttpFetcher::new(clients, &config.http));

    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let catalog = Arc::new(ParkedCatalog {
        entered: entered.clone(),
        release: release.clone(),
    });

    let pipeline = Pipeline::new(
        store,
        cache,
        catalog,
        fetcher,
        vec!["patents".to_string()],
        PipelineOptions::default(),
    );
    let ingestor = Ingestor::new(pipeline, Arc::new(NoProgress));

    assert_eq!(ingestor.start(), StartOutcome::Started);
    entered.notified().await;

    assert!(ingestor.is_running());
    assert!(ingestor.status().active);
    assert_eq!(ingestor.start(), StartOutcome::AlreadyRunning);
    assert!(ingestor.run_to_completion().await.is_err());

    release.notify_one();
    tokio::time::timeout(Duration::from_secs(5), async {
        while ingestor.is_running() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let status = ingestor.status();
    assert!(!status.active);
    assert!(status.error.unwrap().contains("no dataset"));
}

struct PanickingCatalog;

#[async_trait]
impl Catalog for PanickingCatalog {
    async fn dataset(&self, _id: &str) -> anyhow::Result<DatasetInfo> {
        panic!("catalog exploded");
    }
}

#[tokio::test]
async fn panicking_run_clears_active_and_reports_error() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path(), "http://127.0.0.1:9");
    let store = PatentStore::open(&config).await.unwrap();
    let cache = ContentCache::new(store.pool().clone(), &config.cache.dir).unwrap();
    let clients = HttpClients::new(&config.http).unwrap();
    let fetcher = Arc::new(HttpFetcher::new(clients, &config.http));

    let pipeline = Pipeline::new(
        store,
        cache,
        Arc::new(PanickingCatalog),
        fetcher,
        vec!["patents".to_string()],
        PipelineOptions::default(),
    );
    let ingestor = Ingestor::new(pipeline, Arc::new(NoProgress));

    assert_eq!(ingestor.start(), StartOutcome::Started);
    tokio::time::timeout(Duration::from_secs(5), async {
        while ingestor.is_running() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let status = ingestor.status();
    assert!(!status.active);
    assert!(status.error.unwrap().contains("panicked"));
    assert!(status.progress.starts_with("Failed"));

    // The guard was released, so a new run can start.
    assert_eq!(ingestor.start(), StartOutcome::Started);
}

#[tokio::test]
async fn control_server_runs_ingestion() {
    let tmp = TempDir::new().unwrap();
    let (mock, base) = start_mock().await;
    mock.set_file("PT_main_2024.zip", 200, patent_zip("Widget"));
    mock.set_resources(&base, &[("PT_main_2024.zip", "ZIP")]);
    let config = test_config(tmp.path(), &base);

    let pipeline = Pipeline::from_config(&config, false).await.unwrap();
    let ingestor = Arc::new(Ingestor::new(pipeline, Arc::new(NoProgress)));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let control = format!("http://{}", listener.local_addr().unwrap());
    let app = server::router(ingestor.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let client = reqwest::Client::new();
    let health: Value = client
        .get(format!("{}/health", control))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    let started = client
        .post(format!("{}/ingest", control))
        .send()
        .await
        .unwrap();
    assert_eq!(started.status().as_u16(), 202);

    let status = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let status: Value = client
                .get(format!("{}/ingest/status", control))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            if status["active"] == false && !ingestor.is_running() {
                break status;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();
    assert!(status["error"].is_null());
    assert_eq!(status["total_ingested"], 2);

    let count: Value = client
        .get(format!("{}/patents/count", control))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(count["count"], 1);
}
