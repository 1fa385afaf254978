//! Payload classification.
//!
//! Looks at a byte sample plus whatever the catalog or filename claims and
//! decides how (and whether) the payload should be parsed. Pure: no I/O,
//! no logging. Callers skip anything that is not a data format.

use encoding_rs::{DecoderResult, Encoding, ISO_8859_15, ISO_8859_2, UTF_8, WINDOWS_1252};

/// Payloads shorter than this are never real data.
pub const MIN_PAYLOAD_LEN: usize = 100;

/// How many leading bytes callers should hand to [`detect`].
pub const SAMPLE_LEN: usize = 64 * 1024;

/// More control characters than this in the leading 200 decoded
/// characters marks the payload as binary.
const MAX_CONTROL_CHARS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    Csv,
    Json,
    Xml,
    Zip,
    Binary,
    Html,
    TooSmall,
    Unknown,
}

impl PayloadFormat {
    pub fn is_data(self) -> bool {
        matches!(
            self,
            PayloadFormat::Csv | PayloadFormat::Json | PayloadFormat::Xml | PayloadFormat::Zip
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PayloadFormat::Csv => "csv",
            PayloadFormat::Json => "json",
            PayloadFormat::Xml => "xml",
            PayloadFormat::Zip => "zip",
            PayloadFormat::Binary => "binary",
            PayloadFormat::Html => "html",
            PayloadFormat::TooSmall => "too-small",
            PayloadFormat::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for PayloadFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the outside world claims about a payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormatHint<'a> {
    /// Filename or URL basename.
    pub file_name: &'a str,
    /// Declared catalog format, e.g. `"csv"`.
    pub declared: &'a str,
    /// HTTP content-type, when known.
    pub content_type: Option<&'a str>,
}

impl<'a> FormatHint<'a> {
    pub fn file(file_name: &'a str) -> Self {
        Self {
            file_name,
            ..Default::default()
        }
    }

    fn extension(&self) -> String {
        self.file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default()
    }

    fn claims(&self, format: &str) -> bool {
        let declared = self.declared.to_ascii_lowercase();
        declared == format
            || self.extension() == format
            || self
                .content_type
                .map(|ct| ct.to_ascii_lowercase().contains(format))
                .unwrap_or(false)
    }

    fn declares_unsupported(&self) -> bool {
        let declared = self.declared.to_ascii_lowercase();
        !declared.is_empty()
            && !matches!(declared.as_str(), "csv" | "json" | "xml" | "rdf" | "zip")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    pub format: PayloadFormat,
    /// Encoding that decoded the sample; `None` for ZIP and rejected shapes.
    pub encoding: Option<&'static Encoding>,
}

impl Detection {
    fn shape(format: PayloadFormat) -> Self {
        Self {
            format,
            encoding: None,
        }
    }
}

/// Fixed decode priority: UTF-8 first, then three legacy single-byte sets.
pub fn encoding_priority() -> [&'static Encoding; 4] {
    [UTF_8, WINDOWS_1252, ISO_8859_15, ISO_8859_2]
}

/// Classify a payload sample.
pub fn detect(sample: &[u8], hint: FormatHint<'_>) -> Detection {
    if sample.len() < MIN_PAYLOAD_LEN {
        return Detection::shape(PayloadFormat::TooSmall);
    }

    if sample.starts_with(b"PK\x03\x04") || sample.starts_with(b"PK\x05\x06") || hint.claims("zip")
    {
        return Detection::shape(PayloadFormat::Zip);
    }

    let body = strip_utf8_bom(sample);
    let decoded = encoding_priority().into_iter().find_map(|encoding| {
        let text = decode_prefix(body, encoding)?;
        (printable_count(&text) >= MIN_PAYLOAD_LEN && looks_textual(&text))
            .then_some((text, encoding))
    });

    let Some((text, encoding)) = decoded else {
        return Detection::shape(PayloadFormat::Binary);
    };

    let trimmed = text.trim_start_matches('\u{feff}').trim_start();
    if trimmed.trim_end().chars().count() < MIN_PAYLOAD_LEN {
        return Detection::shape(PayloadFormat::TooSmall);
    }

    let head: String = trimmed.chars().take(200).collect::<String>().to_lowercase();
    if head.starts_with("<!doctype html") || head.contains("<html") {
        return Detection::shape(PayloadFormat::Html);
    }

    let format = if hint.claims("json") {
        PayloadFormat::Json
    } else if hint.claims("csv") {
        PayloadFormat::Csv
    } else if hint.claims("xml") || hint.claims("rdf") {
        PayloadFormat::Xml
    } else {
        match trimmed.chars().next() {
            Some('<') => PayloadFormat::Xml,
            Some('{') | Some('[') => PayloadFormat::Json,
            _ if hint.declares_unsupported() => PayloadFormat::Unknown,
            _ => PayloadFormat::Csv,
        }
    };

    Detection {
        format,
        encoding: Some(encoding),
    }
}

/// Decode a whole payload with the first encoding in the priority list that
/// accepts it. A leading byte-order mark is dropped.
pub fn decode_text(bytes: &[u8]) -> Option<(String, &'static Encoding)> {
    let body = strip_utf8_bom(bytes);
    encoding_priority().into_iter().find_map(|encoding| {
        encoding
            .decode_without_bom_handling_and_without_replacement(body)
            .map(|text| (text.into_owned(), encoding))
    })
}

/// Decode with a specific encoding, falling back to the priority list when
/// the full payload turns out not to be valid in it.
pub fn decode_with(bytes: &[u8], preferred: Option<&'static Encoding>) -> Option<String> {
    let body = strip_utf8_bom(bytes);
    if let Some(encoding) = preferred {
        if let Some(text) = encoding.decode_without_bom_handling_and_without_replacement(body) {
            return Some(text.into_owned());
        }
    }
    decode_text(body).map(|(text, _)| text)
}

fn strip_utf8_bom(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes)
}

/// Decode a sample that may end mid-character. Returns `None` on any
/// malformed sequence.
fn decode_prefix(sample: &[u8], encoding: &'static Encoding) -> Option<String> {
    let mut decoder = encoding.new_decoder_without_bom_handling();
    let capacity = decoder.max_utf8_buffer_length_without_replacement(sample.len())?;
    let mut out = String::with_capacity(capacity);
    let (result, _read) = decoder.decode_to_string_without_replacement(sample, &mut out, false);
    match result {
        DecoderResult::Malformed(_, _) => None,
        DecoderResult::InputEmpty | DecoderResult::OutputFull => Some(out),
    }
}

fn is_printable(c: char) -> bool {
    !c.is_control() || matches!(c, '\t' | '\n' | '\r')
}

fn printable_count(text: &str) -> usize {
    text.chars().filter(|c| is_printable(*c)).count()
}

fn looks_textual(text: &str) -> bool {
    let head = text.chars().take(200);
    let mut controls = 0;
    for c in head {
        if c == '\0' {
            return false;
        }
        if !is_printable(c) {
            controls += 1;
        }
    }
    controls <= MAX_CONTROL_CHARS
}
