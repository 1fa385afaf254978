use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("patent_cache")
}

/// CKAN catalog settings. Only the listed dataset ids are ever resolved.
#[derive(Debug, Deserialize, Clone)]
pub struct CatalogConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_dataset_ids")]
    pub dataset_ids: Vec<String>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            dataset_ids: default_dataset_ids(),
        }
    }
}

fn default_base_url() -> String {
    "https://open.canada.ca/data/api/3".to_string()
}

fn default_dataset_ids() -> Vec<String> {
    // CIPO patent data (main dataset)
    vec!["fe1dfbb9-0fc3-42ca-b2a9-6ca4c05dbac9".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_catalog_timeout_secs")]
    pub catalog_timeout_secs: u64,
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
    /// Hosts whose TLS certificate chain is known to be broken. Validation
    /// is disabled for these hosts only.
    #[serde(default = "default_insecure_hosts")]
    pub insecure_hosts: Vec<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            catalog_timeout_secs: default_catalog_timeout_secs(),
            download_timeout_secs: default_download_timeout_secs(),
            insecure_hosts: default_insecure_hosts(),
        }
    }
}

fn default_user_agent() -> String {
    format!("patent-ingest/{}", env!("CARGO_PKG_VERSION"))
}
fn default_catalog_timeout_secs() -> u64 {
    30
}
fn default_download_timeout_secs() -> u64 {
    120
}
fn default_insecure_hosts() -> Vec<String> {
    vec![
        "opic-cipo.ca".to_string(),
        "www.ic.gc.ca".to_string(),
        "ised-isde.canada.ca".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Pause between network downloads, in milliseconds.
    #[serde(default = "default_politeness_delay_ms")]
    pub politeness_delay_ms: u64,
    /// Rows per store transaction.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            politeness_delay_ms: default_politeness_delay_ms(),
            batch_size: default_batch_size(),
        }
    }
}

fn default_politeness_delay_ms() -> u64 {
    1000
}
fn default_batch_size() -> usize {
    5000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

impl Config {
    /// A config with every default and the given database path. Used by
    /// tests and embedders that do not read a TOML file.
    pub fn with_db_path(path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig { path: path.into() },
            cache: CacheConfig::default(),
            catalog: CatalogConfig::default(),
            http: HttpConfig::default(),
            ingest: IngestConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.ingest.batch_size == 0 {
        anyhow::bail!("ingest.batch_size must be > 0");
    }

    if config.http.download_timeout_secs == 0 || config.http.catalog_timeout_secs == 0 {
        anyhow::bail!("http timeouts must be > 0 seconds");
    }

    if config.catalog.dataset_ids.is_empty() {
        anyhow::bail!("catalog.dataset_ids must list at least one dataset id");
    }

    let base = config.catalog.base_url.as_str();
    if !(base.starts_with("http://") || base.starts_with("https://")) {
        anyhow::bail!(
            "catalog.base_url must be an http(s) URL, got '{}'",
            config.catalog.base_url
        );
    }

    Ok(())
}
