//! Record parsing.
//!
//! Turns decoded payloads into ordered label → value maps ([`RawRecord`]).
//! Labels are kept verbatim; interpreting them is the mapper's job.
//!
//! | Submodule | Input |
//! |-----------|-------|
//! | [`delimited`] | pipe-delimited text with a header row |
//! | [`json`] | array, wrapped array, or single object |
//! | [`xml`] | repeated record elements |
//! | [`archive`] | ZIP containing `.csv` members |

pub mod archive;
pub mod delimited;
pub mod json;
pub mod xml;

use thiserror::Error;

use crate::detect::{self, FormatHint, PayloadFormat, SAMPLE_LEN};
use crate::error::IngestError;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("delimited parse failed: {0}")]
    Delimited(String),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid XML: {0}")]
    Xml(String),
    #[error("archive error: {0}")]
    Archive(String),
}

/// One source row. Field order follows the source; a repeated label keeps
/// its first position and its last value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord {
    fields: Vec<(String, String)>,
}

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, label: impl Into<String>, value: impl Into<String>) {
        let label = label.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(l, _)| *l == label) {
            Some((_, v)) => *v = value,
            None => self.fields.push((label, value)),
        }
    }

    /// Exact label lookup.
    pub fn get(&self, label: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, v)| v.as_str())
    }

    /// Resolve the first alias carrying a non-blank value. Exact labels
    /// win; failing that the English half of each alias (text before
    /// `" - "`) is compared case-insensitively against the English half of
    /// each label. Blank values never shadow a later alias.
    pub fn lookup(&self, aliases: &[&str]) -> Option<&str> {
        for alias in aliases {
            if let Some(v) = self.get(alias).filter(|v| !is_blank(v)) {
                return Some(v);
            }
        }
        for alias in aliases {
            let wanted = english_half(alias);
            if wanted.is_empty() {
                continue;
            }
            if let Some((_, v)) = self.fields.iter().find(|(l, v)| {
                !is_blank(v) && english_half(l).eq_ignore_ascii_case(wanted)
            }) {
                return Some(v);
            }
        }
        None
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(l, v)| (l.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<L: Into<String>, V: Into<String>> FromIterator<(L, V)> for RawRecord {
    fn from_iter<I: IntoIterator<Item = (L, V)>>(iter: I) -> Self {
        let mut record = RawRecord::new();
        for (l, v) in iter {
            record.insert(l, v);
        }
        record
    }
}

fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

/// `"Filing Date - Date de dépôt"` → `"Filing Date"`.
pub fn english_half(label: &str) -> &str {
    label
        .split_once(" - ")
        .map(|(en, _)| en)
        .unwrap_or(label)
        .trim()
}

/// Parse already-decoded text in a detected data format.
pub fn parse_text(format: PayloadFormat, text: &str) -> Result<Vec<RawRecord>, ParseError> {
    match format {
        PayloadFormat::Csv => delimited::parse(text),
        PayloadFormat::Json => json::parse(text),
        PayloadFormat::Xml => xml::parse(text),
        other => Err(ParseError::Delimited(format!(
            "{} payloads are not parsed as text",
            other
        ))),
    }
}

/// Detect, decode and parse a single-format payload held in memory.
///
/// ZIP payloads are rejected here; archives go through [`archive`].
pub fn parse_bytes(
    source_name: &str,
    bytes: &[u8],
    hint: FormatHint<'_>,
) -> Result<(PayloadFormat, Vec<RawRecord>), IngestError> {
    let sample = &bytes[..bytes.len().min(SAMPLE_LEN)];
    let detection = detect::detect(sample, hint);

    if !detection.format.is_data() || detection.format == PayloadFormat::Zip {
        return Err(IngestError::Unrecognized {
            source_name: source_name.to_string(),
            shape: detection.format.to_string(),
        });
    }

    let text = detect::decode_with(bytes, detection.encoding).ok_or_else(|| {
        IngestError::malformed(source_name, "no supported text encoding", bytes)
    })?;

    let records = parse_text(detection.format, &text)
        .map_err(|e| IngestError::malformed(source_name, e, bytes))?;

    Ok((detection.format, records))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_label_keeps_last_value() {
        let mut r = RawRecord::new();
        r.insert("a", "1");
        r.insert("b", "2");
        r.insert("a", "3");
        assert_eq!(r.len(), 2);
        assert_eq!(r.get("a"), Some("3"));
        assert_eq!(r.iter().next(), Some(("a", "3")));
    }

    #[test]
    fn lookup_prefers_exact_then_english_half() {
        let r: RawRecord = [
            ("Filing Date - Date de dépôt (révisé)", "2020-01-01"),
            ("Patent Number - Numéro du brevet", "CA1"),
        ]
        .into_iter()
        .collect();

        assert_eq!(r.lookup(&["Patent Number - Numéro du brevet"]), Some("CA1"));
        assert_eq!(
            r.lookup(&["Filing Date - Date de dépôt"]),
            Some("2020-01-01")
        );
        assert_eq!(r.lookup(&["filing date - autre"]), Some("2020-01-01"));
        assert_eq!(r.lookup(&["Grant Date - Date de l'octroi"]), None);
    }

    #[test]
    fn lookup_skips_blank_values() {
        let r: RawRecord = [
            ("title", ""),
            ("Title - Titre", "  "),
            ("name", "Widget"),
        ]
        .into_iter()
        .collect();

        assert_eq!(r.lookup(&["title", "name"]), Some("Widget"));
        assert_eq!(r.lookup(&["Title - Autre", "name"]), Some("Widget"));
        assert_eq!(r.lookup(&["title"]), None);
    }

    #[test]
    fn english_half_without_separator_is_whole_label() {
        assert_eq!(english_half("title"), "title");
        assert_eq!(english_half("Title - Titre"), "Title");
    }

    #[test]
    fn html_payload_is_unrecognized() {
        let page = format!(
            "<!DOCTYPE html><html><body>{}</body></html>",
            "Service unavailable. ".repeat(10)
        );
        let err = parse_bytes("PT_main.csv", page.as_bytes(), FormatHint::file("PT_main.csv"))
            .unwrap_err();
        assert_eq!(err.category(), "unrecognized");
    }

    #[test]
    fn csv_payload_parses() {
        let mut text = String::from("Patent Number - Numéro du brevet|Title\n");
        for i in 0..10 {
            text.push_str(&format!("CA{}|Widget number {}\n", i, i));
        }
        let (format, records) =
            parse_bytes("PT_main.csv", text.as_bytes(), FormatHint::file("PT_main.csv")).unwrap();
        assert_eq!(format, PayloadFormat::Csv);
        assert_eq!(records.len(), 10);
        assert_eq!(records[3].get("Title"), Some("Widget number 3"));
    }
}
