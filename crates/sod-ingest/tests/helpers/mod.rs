//! Shared fixtures for sod-ingest integration tests
//!
//! - clients wired to a virtual clock so retries never sleep
//! - in-memory zip archives
//! - mock Banks API pages
#![allow(dead_code)]

use serde_json::{json, Value};
use sod_ingest::config::{ApiConfig, BulkConfig, PipelineConfig, SchemaConfig};
use sod_ingest::{ManualClock, RetryPolicy, RetryingClient};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub const API_PATH: &str = "/api/sod";
pub const SCHEMA_PATH: &str = "/api/sod/schema";

/// Client on a virtual clock with the given policy
pub fn client_with(policy: RetryPolicy) -> (Arc<RetryingClient>, ManualClock) {
    let clock = ManualClock::new();
    let client = RetryingClient::new(
        policy,
        Arc::new(clock.clone()),
        Duration::from_secs(5),
        "sod-tests",
    )
    .expect("client");
    (Arc::new(client), clock)
}

/// Client that retries up to `attempts` times without waiting
pub fn immediate_client(attempts: u32) -> Arc<RetryingClient> {
    client_with(RetryPolicy::immediate(attempts)).0
}

pub fn api_config(server_uri: &str, page_size: usize) -> ApiConfig {
    ApiConfig {
        base_url: format!("{}{}", server_uri, API_PATH),
        page_size,
        ..ApiConfig::default()
    }
}

pub fn bulk_config(server_uri: &str) -> BulkConfig {
    BulkConfig {
        base_url: format!("{}/bulk", server_uri),
    }
}

/// Configuration pointing every collaborator at `server_uri` and `root`
pub fn pipeline_config(server_uri: &str, root: &Path) -> PipelineConfig {
    PipelineConfig {
        api: api_config(server_uri, 10_000),
        bulk: bulk_config(server_uri),
        schema: SchemaConfig {
            url: format!("{}{}", server_uri, SCHEMA_PATH),
            cache_path: root.join(".sod_schema_cache.json"),
            refresh: false,
            enabled: true,
        },
        retry: RetryPolicy::immediate(2),
        raw_dir: root.join("raw"),
        output_dir: root.join("processed"),
        workers: 2,
        force: false,
        ..PipelineConfig::default()
    }
}

/// Zip `entries` in memory
pub fn zip_archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (name, contents) in entries {
        writer.start_file(*name, options).expect("start entry");
        writer.write_all(contents).expect("write entry");
    }
    writer.finish().expect("finish archive").into_inner()
}

/// One API page with `count` records starting at certificate `first_cert`
pub fn api_page(first_cert: u64, count: u64, total: u64) -> Value {
    let data: Vec<Value> = (first_cert..first_cert + count)
        .map(|cert| {
            json!({
                "data": {
                    "CERT": cert,
                    "NAMEFULL": format!("Bank {}", cert),
                    "DEPSUMBR": cert * 10,
                },
                "score": 0
            })
        })
        .collect();
    json!({ "meta": { "total": total }, "data": data })
}

pub const SCHEMA_DOCUMENT: &str = r#"
properties:
  data:
    type: object
    properties:
      CERT:
        type: integer
        title: "FDIC Certificate #"
      NAMEFULL:
        type: string
        title: Institution Name
      DEPSUMBR:
        type: number
        title: Branch Office Deposits
"#;
