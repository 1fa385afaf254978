//! Core data models used throughout the ingestion pipeline.
//!
//! Catalog descriptors ([`DatasetInfo`], [`ArchiveResource`]) describe what
//! can be downloaded; the row types describe what ends up in the normalized
//! tables. Row types are produced only by [`crate::mapping`].

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A dataset resolved from the catalog.
#[derive(Debug, Clone)]
pub struct DatasetInfo {
    pub id: String,
    pub name: Option<String>,
    pub title: Option<String>,
    pub notes: Option<String>,
    pub metadata_modified: Option<String>,
    pub resources: Vec<ArchiveResource>,
}

/// A downloadable file listed by a dataset. Immutable after discovery.
#[derive(Debug, Clone)]
pub struct ArchiveResource {
    pub url: String,
    /// Declared format, lower-cased (e.g. `"zip"`, `"csv"`).
    pub format: String,
    pub name: String,
    pub description: Option<String>,
    pub size: Option<u64>,
    pub discovered_at: DateTime<Utc>,
}

impl ArchiveResource {
    pub fn is_zip(&self) -> bool {
        self.format == "zip" || url_basename(&self.url).to_lowercase().ends_with(".zip")
    }

    /// Whether the pipeline knows how to handle this resource at all.
    pub fn is_supported(&self) -> bool {
        self.is_zip() || matches!(self.format.as_str(), "json" | "csv" | "xml" | "rdf")
    }

    /// Filename used for record-kind classification: the URL basename,
    /// or the resource name when the URL has none.
    pub fn file_name(&self) -> &str {
        let base = url_basename(&self.url);
        if base.is_empty() {
            &self.name
        } else {
            base
        }
    }
}

/// Last path segment of a URL, without query string or fragment.
pub fn url_basename(url: &str) -> &str {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    let path = &url[..end];
    let path = path.trim_end_matches('/');
    match path.rfind('/') {
        Some(i) if !path[..i].ends_with('/') => &path[i + 1..],
        // "https://host" has no path segment
        Some(_) => "",
        None => path,
    }
}

/// Parent row (`patents_main`).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PatentMain {
    pub patent_number: Option<String>,
    pub filing_date: Option<String>,
    pub grant_date: Option<String>,
    pub application_status_code: Option<String>,
    pub application_type_code: Option<String>,
    pub title_english: Option<String>,
    pub title_french: Option<String>,
    pub bibliographic_extract_date: Option<String>,
    pub country_publication_code: Option<String>,
    pub document_kind_type: Option<String>,
    pub examination_request_date: Option<String>,
    pub filing_country_code: Option<String>,
    pub language_filing_code: Option<String>,
    pub license_sale_indicator: bool,
    pub pct_application_number: Option<String>,
    pub pct_publication_number: Option<String>,
    pub pct_publication_date: Option<String>,
    pub parent_application_number: Option<String>,
    pub pct_article_22_39_date: Option<String>,
    pub pct_section_371_date: Option<String>,
    pub pct_publication_country_code: Option<String>,
    pub publication_kind_type: Option<String>,
    pub printed_amended_country_code: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PatentAbstract {
    pub patent_number: Option<String>,
    pub sequence_number: i64,
    pub filing_language_code: Option<String>,
    pub abstract_language_code: Option<String>,
    pub abstract_text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PatentClaim {
    pub patent_number: Option<String>,
    pub sequence_number: i64,
    pub filing_language_code: Option<String>,
    pub claims_text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PatentDisclosure {
    pub patent_number: Option<String>,
    pub sequence_number: i64,
    pub filing_language_code: Option<String>,
    pub disclosure_text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InterestedParty {
    pub patent_number: Option<String>,
    pub agent_type_code: Option<String>,
    pub applicant_type_code: Option<String>,
    pub interested_party_type_code: Option<String>,
    pub interested_party_type: Option<String>,
    pub owner_enable_date: Option<String>,
    pub ownership_end_date: Option<String>,
    pub party_name: Option<String>,
    pub party_address_lines: [Option<String>; 5],
    pub party_city: Option<String>,
    pub party_province_code: Option<String>,
    pub party_province: Option<String>,
    pub party_postal_code: Option<String>,
    pub party_country_code: Option<String>,
    pub party_country: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IpcClassification {
    pub patent_number: Option<String>,
    pub sequence_number: i64,
    pub ipc_version_date: Option<String>,
    pub classification_level: Option<String>,
    pub classification_status_code: Option<String>,
    pub classification_status: Option<String>,
    pub ipc_section_code: Option<String>,
    pub ipc_section: Option<String>,
    pub ipc_class_code: Option<String>,
    pub ipc_class: Option<String>,
    pub ipc_subclass_code: Option<String>,
    pub ipc_subclass: Option<String>,
    pub ipc_main_group_code: Option<String>,
    pub ipc_group: Option<String>,
    pub ipc_subgroup_code: Option<String>,
    pub ipc_subgroup: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PriorityClaim {
    pub patent_number: Option<String>,
    pub foreign_application_number: Option<String>,
    pub priority_claim_kind_code: Option<String>,
    pub priority_claim_country_code: Option<String>,
    pub priority_claim_country: Option<String>,
    pub priority_claim_date: Option<String>,
}

/// Best-effort record from a file whose kind could not be classified.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LegacyPatent {
    pub id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub patent_number: Option<String>,
    pub inventor_name: Option<String>,
    pub assignee: Option<String>,
    pub filing_date: Option<String>,
    pub grant_date: Option<String>,
    pub classification: Option<String>,
    pub status: Option<String>,
    pub url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource(url: &str, format: &str) -> ArchiveResource {
        ArchiveResource {
            url: url.to_string(),
            format: format.to_string(),
            name: "Patent data".to_string(),
            description: None,
            size: None,
            discovered_at: Utc::now(),
        }
    }

    #[test]
    fn basename_strips_query_and_fragment() {
        assert_eq!(
            url_basename("https://example.org/files/PT_main.zip?x=1#top"),
            "PT_main.zip"
        );
        assert_eq!(url_basename("https://example.org/"), "");
        assert_eq!(url_basename("https://example.org"), "");
        assert_eq!(url_basename("PT_claim.csv"), "PT_claim.csv");
    }

    #[test]
    fn zip_detected_from_format_or_extension() {
        assert!(resource("https://e.org/a.ZIP", "").is_zip());
        assert!(resource("https://e.org/download", "zip").is_zip());
        assert!(!resource("https://e.org/a.csv", "csv").is_zip());
    }

    #[test]
    fn unsupported_formats_filtered() {
        assert!(resource("https://e.org/a.csv", "csv").is_supported());
        assert!(resource("https://e.org/a.rdf", "rdf").is_supported());
        assert!(!resource("https://e.org/a.pdf", "pdf").is_supported());
    }

    #[test]
    fn file_name_falls_back_to_resource_name() {
        assert_eq!(resource("https://e.org/", "csv").file_name(), "Patent data");
        assert_eq!(resource("https://e.org/PT_main.csv", "csv").file_name(), "PT_main.csv");
    }
}
