//! Legacy bulk archive acquisition

use crate::archive::{extract_first_csv, ExtractedCsv};
use crate::config::BulkConfig;
use crate::error::DownloadError;
use crate::http::{FetchRequest, RetryingClient};
use tracing::info;

/// Fetch `sod-<year>.zip` and pull out its CSV
pub async fn fetch_year(
    client: &RetryingClient,
    bulk: &BulkConfig,
    year: i32,
) -> Result<ExtractedCsv, DownloadError> {
    let url = bulk.archive_url(year);
    info!(year, url = %url, "Downloading bulk archive");

    let response = client.fetch(&FetchRequest::get(url)).await?;
    if response.body.is_empty() {
        return Err(DownloadError::EmptyArchive { year });
    }

    let extracted = extract_first_csv(&response.body)
        .map_err(|source| DownloadError::ArchiveFormat { year, source })?;

    info!(
        year,
        archive_bytes = response.body.len(),
        entry = %extracted.entry_name,
        csv_bytes = extracted.contents.len(),
        "Extracted bulk archive"
    );
    Ok(extracted)
}
