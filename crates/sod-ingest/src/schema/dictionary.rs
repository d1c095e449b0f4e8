//! Data dictionary export

use super::SchemaRegistry;
use crate::artifact::write_atomic;
use crate::error::SchemaError;
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use tracing::info;

#[derive(Debug, Serialize)]
struct DictionaryRow<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    field_type: &'a str,
    description: &'a str,
}

/// Write every registry field, sorted by name, to `path`
///
/// JSON when the path ends in `.json`, CSV (`name,type,description`)
/// otherwise. Returns the number of fields written.
pub fn export_dictionary(registry: &dyn SchemaRegistry, path: &Path) -> Result<usize, SchemaError> {
    let mut names = registry.field_names();
    names.sort();
    let descriptors: Vec<_> = names.iter().map(|n| registry.descriptor(n)).collect();
    let rows: Vec<DictionaryRow<'_>> = descriptors
        .iter()
        .map(|d| DictionaryRow {
            name: &d.name,
            field_type: d.field_type.as_ref().map(|t| t.as_str()).unwrap_or(""),
            description: &d.description,
        })
        .collect();

    let as_json = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    write_atomic(path, |w| {
        if as_json {
            serde_json::to_writer_pretty(&mut *w, &rows)?;
            w.write_all(b"\n")?;
        } else {
            let mut csv = csv::Writer::from_writer(&mut *w);
            for row in &rows {
                csv.serialize(row)?;
            }
            csv.flush()?;
        }
        Ok::<(), SchemaError>(())
    })?;

    info!(path = %path.display(), fields = rows.len(), "Exported data dictionary");
    Ok(rows.len())
}
