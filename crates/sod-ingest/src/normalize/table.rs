//! Raw CSV to canonical record batch

use super::decode::TextEncoding;
use crate::error::ParseError;
use crate::schema::SchemaRegistry;
use arrow::array::{ArrayRef, Date32Array, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use chrono::Datelike;
use sod_common::types::{reporting_period, FieldType, CERT_COLUMN, REPORTING_PERIOD_COLUMN};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Days from 0001-01-01 to 1970-01-01
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Metadata key carrying a column's description
pub const DESCRIPTION_KEY: &str = "description";

/// Why rows were discarded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DropCounts {
    /// Certificate missing, negative, fractional, or not a number
    pub invalid_certificate: usize,
    /// Field count differs from the header
    pub malformed: usize,
}

impl DropCounts {
    pub fn total(&self) -> usize {
        self.invalid_certificate + self.malformed
    }
}

/// Rows that survived coercion, stored column-major
#[derive(Debug)]
pub struct ParsedTable {
    pub year: i32,
    pub certificates: Vec<i64>,
    /// Remaining columns, canonical order
    pub columns: Vec<String>,
    pub values: Vec<Vec<String>>,
    pub source_rows: usize,
    pub dropped: DropCounts,
    pub encoding: TextEncoding,
}

impl ParsedTable {
    pub fn rows(&self) -> usize {
        self.certificates.len()
    }
}

/// Coerce a raw certificate cell to a non-negative integer
///
/// Integral decimals such as `"42.0"` are accepted.
pub fn parse_certificate(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(value) = raw.parse::<i64>() {
        return (value >= 0).then_some(value);
    }
    let value = raw.parse::<f64>().ok()?;
    if value.is_finite() && value >= 0.0 && value.fract() == 0.0 && value <= i64::MAX as f64 {
        Some(value as i64)
    } else {
        None
    }
}

/// Positions of `names` sorted case-insensitively
pub fn canonical_order(names: &[String]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..names.len()).collect();
    order.sort_by(|&a, &b| {
        names[a]
            .to_lowercase()
            .cmp(&names[b].to_lowercase())
            .then_with(|| names[a].cmp(&names[b]))
    });
    order
}

/// Normalized header plus the source positions that survive
struct Header {
    names: Vec<String>,
    positions: Vec<usize>,
    certificate: usize,
    width: usize,
}

fn normalize_header(year: i32, raw: &csv::StringRecord) -> Result<Header, ParseError> {
    let mut seen = HashSet::new();
    let mut names = Vec::new();
    let mut positions = Vec::new();

    for (i, name) in raw.iter().enumerate() {
        let mut name = name.trim().to_uppercase();
        if name.is_empty() {
            name = format!("UNNAMED_{}", i);
        }
        if name == REPORTING_PERIOD_COLUMN {
            debug!(year, "Replacing source REPORTING_PERIOD column");
            continue;
        }
        if !seen.insert(name.clone()) {
            warn!(year, column = %name, position = i, "Dropping duplicate column after case-folding");
            continue;
        }
        names.push(name);
        positions.push(i);
    }

    let certificate = names
        .iter()
        .position(|n| n == CERT_COLUMN)
        .ok_or(ParseError::MissingCertificate { year })?;

    Ok(Header {
        names,
        positions,
        certificate,
        width: raw.len(),
    })
}

/// Parse decoded CSV text into canonical rows
pub fn parse_rows(year: i32, text: &str, encoding: TextEncoding) -> Result<ParsedTable, ParseError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut records = reader.records();
    let header = match records.next() {
        Some(record) => normalize_header(year, &record?)?,
        None => return Err(ParseError::MissingCertificate { year }),
    };

    // Everything except CERT, in canonical order
    let others: Vec<usize> = (0..header.names.len())
        .filter(|&i| i != header.certificate)
        .collect();
    let other_names: Vec<String> = others.iter().map(|&i| header.names[i].clone()).collect();
    let order: Vec<usize> = canonical_order(&other_names)
        .into_iter()
        .map(|i| others[i])
        .collect();

    let mut certificates = Vec::new();
    let mut values: Vec<Vec<String>> = vec![Vec::new(); order.len()];
    let mut dropped = DropCounts::default();
    let mut source_rows = 0;
    let cert_position = header.positions[header.certificate];

    for record in records {
        let record = record?;
        source_rows += 1;

        if record.len() != header.width {
            dropped.malformed += 1;
            continue;
        }
        let Some(cert) = record.get(cert_position).and_then(parse_certificate) else {
            dropped.invalid_certificate += 1;
            continue;
        };

        certificates.push(cert);
        for (column, &idx) in values.iter_mut().zip(&order) {
            let raw = record.get(header.positions[idx]).unwrap_or("");
            column.push(raw.trim().to_string());
        }
    }

    if dropped.total() > 0 {
        warn!(
            year,
            invalid_certificate = dropped.invalid_certificate,
            malformed = dropped.malformed,
            "Dropped rows during normalization"
        );
    }

    if certificates.is_empty() {
        return Err(ParseError::NoValidRows {
            year,
            dropped: dropped.total(),
        });
    }

    Ok(ParsedTable {
        year,
        certificates,
        columns: order.iter().map(|&i| header.names[i].clone()).collect(),
        values,
        source_rows,
        dropped,
        encoding,
    })
}

/// Arrow type for a column given its cells and an optional declared type
pub fn infer_type(cells: &[String], declared: Option<FieldType>) -> DataType {
    if matches!(declared, Some(FieldType::String) | Some(FieldType::Date)) {
        return DataType::Utf8;
    }

    let mut non_empty = cells.iter().filter(|c| !c.is_empty()).peekable();
    if non_empty.peek().is_none() {
        return DataType::Utf8;
    }

    let mut all_int = true;
    for cell in non_empty {
        if all_int && cell.parse::<i64>().is_ok() {
            continue;
        }
        all_int = false;
        if cell.parse::<f64>().is_err() {
            return DataType::Utf8;
        }
    }

    if all_int && declared != Some(FieldType::Number) {
        DataType::Int64
    } else {
        DataType::Float64
    }
}

fn build_array(cells: &[String], data_type: &DataType) -> ArrayRef {
    fn present(c: &String) -> Option<&str> {
        (!c.is_empty()).then_some(c.as_str())
    }
    match data_type {
        DataType::Int64 => Arc::new(
            cells
                .iter()
                .map(|c| present(c).and_then(|v| v.parse::<i64>().ok()))
                .collect::<Int64Array>(),
        ),
        DataType::Float64 => Arc::new(
            cells
                .iter()
                .map(|c| present(c).and_then(|v| v.parse::<f64>().ok()))
                .collect::<Float64Array>(),
        ),
        _ => Arc::new(cells.iter().map(present).collect::<StringArray>()),
    }
}

fn described(field: Field, registry: &dyn SchemaRegistry) -> Field {
    let description = registry.describe(field.name()).unwrap_or_default();
    field.with_metadata(HashMap::from([(DESCRIPTION_KEY.to_string(), description)]))
}

/// Assemble the canonical batch: CERT, REPORTING_PERIOD, then the rest
pub fn build_batch(table: &ParsedTable, registry: &dyn SchemaRegistry) -> Result<RecordBatch, ParseError> {
    let period = reporting_period(table.year)
        .ok_or(ParseError::NoValidRows {
            year: table.year,
            dropped: table.dropped.total(),
        })?
        .num_days_from_ce()
        - UNIX_EPOCH_DAYS_FROM_CE;

    let mut fields = vec![
        described(Field::new(CERT_COLUMN, DataType::Int64, false), registry),
        described(
            Field::new(REPORTING_PERIOD_COLUMN, DataType::Date32, false),
            registry,
        ),
    ];
    let mut arrays: Vec<ArrayRef> = vec![
        Arc::new(Int64Array::from(table.certificates.clone())),
        Arc::new(Date32Array::from(vec![period; table.rows()])),
    ];

    for (name, cells) in table.columns.iter().zip(&table.values) {
        let data_type = infer_type(cells, registry.field_type(name));
        arrays.push(build_array(cells, &data_type));
        fields.push(described(Field::new(name, data_type, true), registry));
    }

    let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?;
    Ok(batch)
}
