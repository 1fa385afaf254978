//! Ingestion failure taxonomy.
//!
//! Nothing here is fatal to a run: the orchestrator matches on the kind,
//! logs it, records the outcome and moves on to the next resource.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    /// Timeout, connection reset, TLS, non-success HTTP status.
    #[error("network error fetching {url}: {message}")]
    Network { url: String, message: String },

    /// Undecodable bytes, broken ZIP, unparseable CSV/JSON/XML.
    #[error("malformed payload in {source_name}: {message}")]
    Malformed {
        source_name: String,
        message: String,
        preview: String,
    },

    /// HTML error page, binary blob, or content below the minimum size.
    #[error("unrecognized content in {source_name}: {shape}")]
    Unrecognized { source_name: String, shape: String },

    /// A store write was rejected.
    #[error("failed to persist {kind} rows: {message}")]
    Persistence { kind: String, message: String },

    #[error("cache error: {0}")]
    Cache(String),
}

impl IngestError {
    pub fn network(url: &str, err: impl std::fmt::Display) -> Self {
        IngestError::Network {
            url: url.to_string(),
            message: err.to_string(),
        }
    }

    pub fn malformed(source_name: &str, err: impl std::fmt::Display, content: &[u8]) -> Self {
        IngestError::Malformed {
            source_name: source_name.to_string(),
            message: err.to_string(),
            preview: preview(content),
        }
    }

    /// Short machine-readable label used in progress events.
    pub fn category(&self) -> &'static str {
        match self {
            IngestError::Network { .. } => "network",
            IngestError::Malformed { .. } => "malformed",
            IngestError::Unrecognized { .. } => "unrecognized",
            IngestError::Persistence { .. } => "persistence",
            IngestError::Cache(_) => "cache",
        }
    }
}

/// First 200 characters of a payload, lossily decoded, for log lines.
pub fn preview(content: &[u8]) -> String {
    let head = &content[..content.len().min(800)];
    String::from_utf8_lossy(head).chars().take(200).collect()
}
