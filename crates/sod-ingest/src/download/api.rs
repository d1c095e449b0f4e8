//! Paginated Banks API acquisition

use crate::config::ApiConfig;
use crate::error::DownloadError;
use crate::http::{FetchRequest, RetryingClient};
use indicatif::ProgressBar;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::io::Write;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct ApiPage {
    #[serde(default)]
    meta: Option<ApiMeta>,
    #[serde(default)]
    data: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct ApiMeta {
    #[serde(default)]
    total: Option<u64>,
}

/// Records of one year in first-seen column order
#[derive(Debug, Default)]
pub struct RecordTable {
    columns: Vec<String>,
    index: HashMap<String, usize>,
    rows: Vec<Vec<String>>,
}

impl RecordTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Append one flattened record; unseen keys extend the column set
    pub fn push(&mut self, record: &Map<String, Value>) {
        let mut row = vec![String::new(); self.columns.len()];
        for (key, value) in record {
            let name = key.trim().to_uppercase();
            let idx = match self.index.get(&name) {
                Some(&idx) => idx,
                None => {
                    let idx = self.columns.len();
                    self.columns.push(name.clone());
                    self.index.insert(name, idx);
                    row.push(String::new());
                    idx
                },
            };
            row[idx] = cell(value);
        }
        self.rows.push(row);
    }

    /// Serialize as CSV; rows recorded before a column appeared get an
    /// empty cell for it
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), DownloadError> {
        let mut csv = csv::Writer::from_writer(writer);
        csv.write_record(&self.columns)?;
        let width = self.columns.len();
        for row in &self.rows {
            if row.len() == width {
                csv.write_record(row)?;
            } else {
                let padded = row
                    .iter()
                    .map(String::as_str)
                    .chain(std::iter::repeat("").take(width - row.len()));
                csv.write_record(padded)?;
            }
        }
        csv.flush()?;
        Ok(())
    }
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

/// `{ "data": {...}, "score": n }` envelopes unwrap to the inner object
fn flatten(record: &Value) -> Option<&Map<String, Value>> {
    match record {
        Value::Object(outer) => match outer.get("data") {
            Some(Value::Object(inner)) => Some(inner),
            _ => Some(outer),
        },
        _ => None,
    }
}

pub(crate) fn page_request(api: &ApiConfig, year: i32, offset: usize) -> FetchRequest {
    let mut request = FetchRequest::get(&api.base_url)
        .query("filters", format!("YEAR:{}", year))
        .query("limit", api.effective_page_size())
        .query("offset", offset)
        .query("sort_by", "CERT")
        .query("sort_order", "ASC")
        .query("format", "json");

    if let Some(fields) = api.fields.as_ref().filter(|f| !f.is_empty()) {
        request = request.query("fields", fields.join(","));
    }
    if let Some(key) = &api.api_key {
        request = request.query("api_key", key);
    }
    request
}

/// Page through every record of `year`
///
/// Stops on an empty page or once the running offset reaches the reported
/// total. A short page only advances the offset. A total of zero ends the
/// loop immediately; an absent total means paging until an empty page.
pub async fn fetch_year(
    client: &RetryingClient,
    api: &ApiConfig,
    year: i32,
    progress: &ProgressBar,
) -> Result<RecordTable, DownloadError> {
    let mut table = RecordTable::default();
    let mut offset = 0usize;
    let mut total: Option<u64> = None;
    let mut pages = 0u32;

    loop {
        let response = client.fetch_page(&page_request(api, year, offset)).await?;
        pages += 1;

        let page: ApiPage = response.json().map_err(|e| DownloadError::InvalidResponse {
            year,
            reason: e.to_string(),
        })?;

        if let Some(reported) = page.meta.and_then(|m| m.total) {
            if total.is_none() {
                info!(year, total = reported, "Server reported record count");
                progress.set_length(reported);
            }
            total = Some(reported);
        }

        if total == Some(0) || page.data.is_empty() {
            break;
        }

        let received = page.data.len();
        for record in &page.data {
            let flat = flatten(record).ok_or_else(|| DownloadError::InvalidResponse {
                year,
                reason: format!("record at offset {} is not an object", offset),
            })?;
            table.push(flat);
        }
        offset += received;
        progress.set_position(offset as u64);
        debug!(year, offset, received, "Page received");

        if total.is_some_and(|t| offset as u64 >= t) {
            break;
        }
    }

    info!(year, pages, records = table.len(), "Pagination finished");
    Ok(table)
}
