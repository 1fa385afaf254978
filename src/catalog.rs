//! CKAN dataset discovery.
//!
//! Only `package_show` is used: the set of datasets is configured, never
//! searched for.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use serde_json::Value;

use crate::config::Config;
use crate::fetch::HttpClients;
use crate::models::{ArchiveResource, DatasetInfo};

#[async_trait]
pub trait Catalog: Send + Sync {
    /// Resolve one dataset id to its metadata and resources.
    async fn dataset(&self, id: &str) -> Result<DatasetInfo>;
}

pub struct CkanCatalog {
    clients: HttpClients,
    base_url: String,
    timeout: Duration,
}

impl CkanCatalog {
    pub fn new(clients: HttpClients, config: &Config) -> Self {
        Self {
            clients,
            base_url: config.catalog.base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(config.http.catalog_timeout_secs),
        }
    }
}

#[async_trait]
impl Catalog for CkanCatalog {
    async fn dataset(&self, id: &str) -> Result<DatasetInfo> {
        let url = format!("{}/action/package_show", self.base_url);
        let response = self
            .clients
            .client_for(&url)
            .get(&url)
            .query(&[("id", id)])
            .header(ACCEPT, "application/json")
            .timeout(self.timeout)
            .send()
            .await
            .with_context(|| format!("package_show request failed for {}", id))?;

        let status = response.status();
        if !status.is_success() {
            bail!("package_show for {} returned HTTP {}", id, status);
        }

        let body: PackageShow = response
            .json()
            .await
            .with_context(|| format!("package_show for {} returned invalid JSON", id))?;

        into_dataset(id, body)
    }
}

#[derive(Debug, Deserialize)]
struct PackageShow {
    #[serde(default)]
    success: bool,
    result: Option<Package>,
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Package {
    id: Option<String>,
    name: Option<Value>,
    title: Option<Value>,
    notes: Option<Value>,
    metadata_modified: Option<String>,
    #[serde(default)]
    resources: Vec<Resource>,
}

#[derive(Debug, Deserialize)]
struct Resource {
    url: Option<String>,
    format: Option<String>,
    name: Option<Value>,
    description: Option<Value>,
    size: Option<Value>,
}

/// Plain string, or the English entry of a `{"en": .., "fr": ..}` object.
fn localized(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Object(map) => map
            .get("en")
            .or_else(|| map.values().next())
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string),
        _ => None,
    }
}

fn size(value: Option<&Value>) -> Option<u64> {
    match value? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn into_dataset(id: &str, body: PackageShow) -> Result<DatasetInfo> {
    let package = match (body.success, body.result) {
        (true, Some(package)) => package,
        (_, _) => bail!(
            "package_show for {} was not successful: {}",
            id,
            body.error.map(|e| e.to_string()).unwrap_or_default()
        ),
    };

    let discovered_at = Utc::now();
    let resources = package
        .resources
        .into_iter()
        .filter_map(|r| {
            let url = r.url.filter(|u| !u.trim().is_empty())?;
            Some(ArchiveResource {
                name: localized(r.name.as_ref()).unwrap_or_else(|| url.clone()),
                url,
                format: r.format.unwrap_or_default().trim().to_lowercase(),
                description: localized(r.description.as_ref()),
                size: size(r.size.as_ref()),
                discovered_at,
            })
        })
        .collect();

    Ok(DatasetInfo {
        id: package.id.unwrap_or_else(|| id.to_string()),
        name: localized(package.name.as_ref()),
        title: localized(package.title.as_ref()),
        notes: localized(package.notes.as_ref()),
        metadata_modified: package.metadata_modified,
        resources,
    })
}
