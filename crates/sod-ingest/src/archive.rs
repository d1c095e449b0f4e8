//! Bulk archive extraction
//!
//! Legacy years are published as a zip holding one CSV (sometimes next to a
//! readme or layout file). The first entry whose name ends in `.csv`,
//! case-insensitively and in central-directory order, is the data file.

use crate::error::ArchiveError;
use std::io::{Cursor, Read};
use tracing::debug;

/// Upper bound on the buffer reserved from an entry's declared size
const MAX_PREALLOCATION: u64 = 16 * 1024 * 1024;

fn capacity_hint(declared: u64) -> usize {
    declared.min(MAX_PREALLOCATION) as usize
}

/// Name and contents of the extracted CSV entry
#[derive(Debug, Clone)]
pub struct ExtractedCsv {
    pub entry_name: String,
    pub contents: Vec<u8>,
}

fn is_csv(name: &str) -> bool {
    name.to_ascii_lowercase().ends_with(".csv")
}

/// Pull the first CSV entry out of zip bytes
pub fn extract_first_csv(data: &[u8]) -> Result<ExtractedCsv, ArchiveError> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(data)).map_err(|e| ArchiveError::Corrupt(e.to_string()))?;

    let mut entries = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| ArchiveError::Corrupt(format!("entry {}: {}", i, e)))?;

        let name = file.name().to_string();
        if file.is_dir() || !is_csv(&name) {
            entries.push(name);
            continue;
        }

        let mut contents = Vec::with_capacity(capacity_hint(file.size()));
        file.read_to_end(&mut contents)?;
        debug!(entry = %name, bytes = contents.len(), "Extracted CSV from archive");
        return Ok(ExtractedCsv {
            entry_name: name,
            contents,
        });
    }

    Err(ArchiveError::MissingCsv { entries })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    /// Build an in-memory zip from `(name, contents)` pairs
    pub(crate) fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, contents) in entries {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(contents).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_first_csv_wins() {
        let data = build_zip(&[
            ("README.txt", b"layout"),
            ("SOD1990.CSV", b"CERT\n1\n"),
            ("extra.csv", b"CERT\n2\n"),
        ]);
        let extracted = extract_first_csv(&data).unwrap();
        assert_eq!(extracted.entry_name, "SOD1990.CSV");
        assert_eq!(extracted.contents, b"CERT\n1\n");
    }

    #[test]
    fn test_missing_csv_lists_entries() {
        let data = build_zip(&[("README.txt", b"nothing here")]);
        match extract_first_csv(&data) {
            Err(ArchiveError::MissingCsv { entries }) => {
                assert_eq!(entries, vec!["README.txt".to_string()]);
            },
            other => panic!("expected MissingCsv, got {:?}", other),
        }
    }

    #[test]
    fn test_capacity_hint_is_bounded() {
        assert_eq!(capacity_hint(1024), 1024);
        assert_eq!(capacity_hint(u64::MAX), MAX_PREALLOCATION as usize);
    }

    #[test]
    fn test_garbage_is_corrupt() {
        assert!(matches!(
            extract_first_csv(b"definitely not a zip"),
            Err(ArchiveError::Corrupt(_))
        ));
    }
}
