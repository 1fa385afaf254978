//! ZIP archives of delimited member files.
//!
//! Archives are opened from the cache directory, never held in memory as a
//! whole. Every member is read independently with a decompressed-size
//! bound, so a single bad or oversized member only costs its own records.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use zip::ZipArchive;

use super::ParseError;

/// Largest decompressed member accepted. The biggest bulk exports are a
/// few GB, so this is a zip-bomb guard rather than a size policy.
pub const MAX_ENTRY_BYTES: u64 = 8 * 1024 * 1024 * 1024;

/// Substrings that mark the parent-table member, used for log output.
const MAIN_MARKERS: [&str; 3] = ["pt_main", "patent_main", "main_patent"];

pub fn is_main_entry(name: &str) -> bool {
    let lower = name.to_lowercase();
    MAIN_MARKERS.iter().any(|m| lower.contains(m))
}

pub struct CsvArchive {
    archive: ZipArchive<File>,
}

impl CsvArchive {
    pub fn open(path: &Path) -> Result<Self, ParseError> {
        let file = File::open(path).map_err(|e| ParseError::Archive(e.to_string()))?;
        let archive = ZipArchive::new(file).map_err(|e| ParseError::Archive(e.to_string()))?;
        Ok(Self { archive })
    }

    /// Names of all non-directory `.csv` members, in archive order.
    pub fn csv_entries(&self) -> Vec<String> {
        self.archive
            .file_names()
            .filter(|n| !n.ends_with('/') && n.to_lowercase().ends_with(".csv"))
            .map(str::to_string)
            .collect()
    }

    pub fn read_entry(&mut self, name: &str) -> Result<Vec<u8>, ParseError> {
        self.read_entry_bounded(name, MAX_ENTRY_BYTES)
    }

    pub fn read_entry_bounded(&mut self, name: &str, max_bytes: u64) -> Result<Vec<u8>, ParseError> {
        let entry = self
            .archive
            .by_name(name)
            .map_err(|e| ParseError::Archive(e.to_string()))?;
        let mut out = Vec::new();
        entry
            .take(max_bytes.saturating_add(1))
            .read_to_end(&mut out)
            .map_err(|e| ParseError::Archive(e.to_string()))?;
        if out.len() as u64 > max_bytes {
            return Err(ParseError::Archive(format!(
                "ZIP entry {} exceeds size limit ({} bytes)",
                name, max_bytes
            )));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn write_zip(path: &Path, members: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        for (name, bytes) in members {
            if name.ends_with('/') {
                zip.add_directory(name.trim_end_matches('/'), SimpleFileOptions::default())
                    .unwrap();
            } else {
                zip.start_file(*name, SimpleFileOptions::default()).unwrap();
                zip.write_all(bytes).unwrap();
            }
        }
        zip.finish().unwrap();
    }

    #[test]
    fn lists_only_csv_members() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.zip");
        write_zip(
            &path,
            &[
                ("PT_Main_2024.csv", &b"a|b\n1|2\n"[..]),
                ("readme.txt", &b"hello"[..]),
                ("nested/", &b""[..]),
                ("nested/PT_CLAIM.CSV", &b"a\n1\n"[..]),
            ],
        );

        let archive = CsvArchive::open(&path).unwrap();
        let mut entries = archive.csv_entries();
        entries.sort();
        assert_eq!(entries, vec!["PT_Main_2024.csv", "nested/PT_CLAIM.CSV"]);
        assert!(is_main_entry(&entries[0]));
        assert!(!is_main_entry(&entries[1]));
    }

    #[test]
    fn oversized_member_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.zip");
        let big = vec![b'x'; 4096];
        write_zip(&path, &[("big.csv", &big[..])]);

        let mut archive = CsvArchive::open(&path).unwrap();
        assert!(archive.read_entry_bounded("big.csv", 1024).is_err());
        assert_eq!(archive.read_entry("big.csv").unwrap().len(), 4096);
    }

    #[test]
    fn corrupt_archive_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.zip");
        std::fs::write(&path, b"PK\x03\x04 definitely not a zip").unwrap();
        assert!(matches!(CsvArchive::open(&path), Err(ParseError::Archive(_))));
    }
}
