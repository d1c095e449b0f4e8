//! Parquet output for canonical batches

use crate::artifact::write_atomic;
use crate::error::ParseError;
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use parquet::format::KeyValue;
use std::path::Path;
use tracing::debug;

pub const META_YEAR: &str = "sod.year";
pub const META_SOURCE_ROWS: &str = "sod.source_rows";
pub const META_DROPPED_ROWS: &str = "sod.dropped_rows";
pub const META_ENCODING: &str = "sod.encoding";

/// Run facts stored in the file footer, in a fixed order
#[derive(Debug, Clone)]
pub struct ArtifactMetadata {
    pub year: i32,
    pub source_rows: usize,
    pub dropped_rows: usize,
    pub encoding: String,
}

impl ArtifactMetadata {
    fn key_values(&self) -> Vec<KeyValue> {
        vec![
            KeyValue::new(META_YEAR.to_string(), Some(self.year.to_string())),
            KeyValue::new(META_SOURCE_ROWS.to_string(), Some(self.source_rows.to_string())),
            KeyValue::new(META_DROPPED_ROWS.to_string(), Some(self.dropped_rows.to_string())),
            KeyValue::new(META_ENCODING.to_string(), Some(self.encoding.clone())),
        ]
    }
}

/// Write `batch` as Snappy-compressed Parquet at `path`
///
/// Field metadata travels in the embedded Arrow schema; run facts go into
/// the footer key-value list.
pub fn write_parquet(
    batch: &RecordBatch,
    metadata: &ArtifactMetadata,
    path: &Path,
) -> Result<(), ParseError> {
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .set_key_value_metadata(Some(metadata.key_values()))
        .build();

    write_atomic(path, |file| {
        let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
        writer.write(batch)?;
        writer.close()?;
        Ok::<(), ParseError>(())
    })?;

    debug!(
        path = %path.display(),
        year = metadata.year,
        rows = batch.num_rows(),
        columns = batch.num_columns(),
        "Wrote Parquet file"
    );
    Ok(())
}
