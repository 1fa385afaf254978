//! Resource downloads.
//!
//! [`HttpFetcher`] keeps two `reqwest` clients: a validating one for every
//! host, and one with certificate validation disabled that is only ever
//! used for hosts listed in `http.insecure_hosts`.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Url};
use tracing::{debug, warn};

use crate::config::HttpConfig;
use crate::error::IngestError;

pub const ACCEPT_DATA: &str = "text/csv,application/json,text/xml,application/xml,application/zip,*/*";

/// Raw body of a downloaded resource.
#[derive(Debug, Clone)]
pub struct Payload {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// Source of resource bytes. The orchestrator only sees this trait, so
/// tests can serve fixtures without a network.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Payload, IngestError>;
}

/// Pair of clients sharing one user agent.
#[derive(Clone)]
pub struct HttpClients {
    strict: Client,
    insecure: Client,
    insecure_hosts: Vec<String>,
}

impl HttpClients {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let strict = Client::builder().user_agent(&config.user_agent).build()?;
        let insecure = Client::builder()
            .user_agent(&config.user_agent)
            .danger_accept_invalid_certs(true)
            .build()?;

        if !config.insecure_hosts.is_empty() {
            warn!(
                hosts = ?config.insecure_hosts,
                "TLS certificate validation is DISABLED for these hosts"
            );
        }

        Ok(Self {
            strict,
            insecure,
            insecure_hosts: config
                .insecure_hosts
                .iter()
                .map(|h| h.to_ascii_lowercase())
                .collect(),
        })
    }

    /// Exact host or any subdomain of a listed host.
    pub fn is_insecure_host(&self, url: &str) -> bool {
        let Some(host) = Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
        else {
            return false;
        };
        self.insecure_hosts
            .iter()
            .any(|h| host == *h || host.ends_with(&format!(".{}", h)))
    }

    pub fn client_for(&self, url: &str) -> &Client {
        if self.is_insecure_host(url) {
            warn!(url, "fetching without TLS certificate validation");
            &self.insecure
        } else {
            &self.strict
        }
    }
}

pub struct HttpFetcher {
    clients: HttpClients,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(clients: HttpClients, config: &HttpConfig) -> Self {
        Self {
            clients,
            timeout: Duration::from_secs(config.download_timeout_secs),
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Payload, IngestError> {
        debug!(url, "downloading");
        let response = self
            .clients
            .client_for(url)
            .get(url)
            .header(ACCEPT, ACCEPT_DATA)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| IngestError::network(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::network(url, format!("HTTP {}", status)));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let bytes = response
            .bytes()
            .await
            .map_err(|e| IngestError::network(url, e))?;

        debug!(url, bytes = bytes.len(), "downloaded");
        Ok(Payload {
            bytes: bytes.to_vec(),
            content_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insecure_hosts_match_subdomains_only() {
        let clients = HttpClients::new(&HttpConfig::default()).unwrap();
        assert!(clients.is_insecure_host("https://opic-cipo.ca/x.zip"));
        assert!(clients.is_insecure_host("https://www.OPIC-CIPO.ca/x.zip"));
        assert!(!clients.is_insecure_host("https://notopic-cipo.ca/x.zip"));
        assert!(!clients.is_insecure_host("https://open.canada.ca/data/api/3"));
        assert!(!clients.is_insecure_host("not a url"));
    }
}
