//! End-to-end tests: registry, download, normalize, and summarize against
//! a mock FDIC server

mod helpers;

use arrow::datatypes::DataType;
use helpers::*;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use sod_ingest::config::SchemaConfig;
use sod_ingest::error::{FailureKind, Stage};
use sod_ingest::schema::RegistrySource;
use sod_ingest::{
    FdicSchemaRegistry, Normalizer, Pipeline, SchemaRegistry, StaticRegistry, YearEntry,
};
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_schema(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(SCHEMA_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(SCHEMA_DOCUMENT))
        .mount(server)
        .await;
}

fn schema_config(server: &MockServer, dir: &TempDir, refresh: bool) -> SchemaConfig {
    SchemaConfig {
        url: format!("{}{}", server.uri(), SCHEMA_PATH),
        cache_path: dir.path().join("cache/.sod_schema_cache.json"),
        refresh,
        enabled: true,
    }
}

// ============================================================================
// Field registry
// ============================================================================

#[tokio::test]
async fn test_registry_fetch_writes_cache() {
    let server = MockServer::start().await;
    mount_schema(&server).await;
    let dir = TempDir::new().unwrap();
    let config = schema_config(&server, &dir, false);

    let registry = FdicSchemaRegistry::load(&immediate_client(1), &config)
        .await
        .unwrap();
    assert_eq!(registry.source(), RegistrySource::Network);
    assert_eq!(registry.describe("CERT").as_deref(), Some("FDIC Certificate #"));
    assert!(registry.describe("REPORTING_PERIOD").is_some());
    assert!(config.cache_path.exists());
}

#[tokio::test]
async fn test_registry_prefers_cache() {
    let server = MockServer::start().await;
    mount_schema(&server).await;
    let dir = TempDir::new().unwrap();
    let config = schema_config(&server, &dir, false);
    FdicSchemaRegistry::load(&immediate_client(1), &config)
        .await
        .unwrap();

    let offline = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&offline)
        .await;
    let config = SchemaConfig {
        url: format!("{}{}", offline.uri(), SCHEMA_PATH),
        ..config
    };
    let registry = FdicSchemaRegistry::load(&immediate_client(1), &config)
        .await
        .unwrap();
    assert_eq!(registry.source(), RegistrySource::Cache);
    assert_eq!(registry.describe("NAMEFULL").as_deref(), Some("Institution Name"));
}

#[tokio::test]
async fn test_failed_refresh_falls_back_to_cache() {
    let dir = TempDir::new().unwrap();
    let online = MockServer::start().await;
    mount_schema(&online).await;
    FdicSchemaRegistry::load(&immediate_client(1), &schema_config(&online, &dir, false))
        .await
        .unwrap();

    let broken = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&broken)
        .await;
    let registry =
        FdicSchemaRegistry::load(&immediate_client(2), &schema_config(&broken, &dir, true))
            .await
            .unwrap();
    assert_eq!(registry.source(), RegistrySource::Cache);
    assert!(!registry.is_empty());
}

#[tokio::test]
async fn test_unreachable_registry_without_cache_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    let dir = TempDir::new().unwrap();

    let result =
        FdicSchemaRegistry::load(&immediate_client(2), &schema_config(&server, &dir, false)).await;
    assert!(result.is_err());

    let mut config = pipeline_config(&server.uri(), dir.path());
    config.schema.cache_path = dir.path().join("absent.json");
    assert!(Pipeline::connect(config).await.is_err());
}

// ============================================================================
// Full pipeline
// ============================================================================

#[tokio::test]
async fn test_run_reports_every_year() {
    let server = MockServer::start().await;
    mount_schema(&server).await;
    Mock::given(method("GET"))
        .and(path("/bulk/sod-1993.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(zip_archive(&[(
            "sod-1993.csv",
            b"CERT,NAMEFULL,DEPSUMBR\n10,Old Bank,500\n11,Older Bank,700\n",
        )])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(API_PATH))
        .and(query_param("filters", "YEAR:1994"))
        .and(query_param("fields", "CERT,DEPSUMBR,NAMEFULL"))
        .respond_with(ResponseTemplate::new(200).set_body_json(api_page(1, 4, 4)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(API_PATH))
        .and(query_param("filters", "YEAR:1995"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = pipeline_config(&server.uri(), dir.path());
    let output_dir = config.output_dir.clone();
    let pipeline = Pipeline::connect(config).await.unwrap();
    let report = pipeline.run(1993, 1995).await.unwrap();

    assert_eq!(report.years(), vec![1993, 1994, 1995]);
    assert_eq!(report.failed_years(), vec![1995]);
    assert!(!report.is_success());
    match report.get(1995) {
        Some(YearEntry::Failed(f)) => {
            assert_eq!(f.stage, Stage::Download);
            assert_eq!(f.kind, FailureKind::Permanent);
        },
        other => panic!("expected a download failure, got {:?}", other),
    }
    assert_eq!(report.row_counts().get(&1993), Some(&2));
    assert_eq!(report.row_counts().get(&1994), Some(&4));
    assert!(!output_dir.join("1995.parquet").exists());

    // Declared number columns are floating point and carry their description
    let file = std::fs::File::open(output_dir.join("1994.parquet")).unwrap();
    let schema = ParquetRecordBatchReaderBuilder::try_new(file)
        .unwrap()
        .schema()
        .clone();
    let deposits = schema.field_with_name("DEPSUMBR").unwrap();
    assert_eq!(deposits.data_type(), &DataType::Float64);
    assert_eq!(
        deposits.metadata().get("description").map(String::as_str),
        Some("Branch Office Deposits")
    );

    let rendered = report.render();
    assert!(rendered.contains("Failed years: [1995]"));
}

#[tokio::test]
async fn test_rerun_skips_completed_years() {
    let server = MockServer::start().await;
    mount_schema(&server).await;
    Mock::given(method("GET"))
        .and(path(API_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(api_page(1, 2, 2)))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = pipeline_config(&server.uri(), dir.path());
    let output = config.output_dir.join("2000.parquet");

    let first = Pipeline::connect(config.clone()).await.unwrap();
    assert!(first.run(2000, 2000).await.unwrap().is_success());
    let digest = std::fs::read(&output).unwrap();

    let second = Pipeline::connect(config).await.unwrap();
    assert!(second.run(2000, 2000).await.unwrap().is_success());
    assert_eq!(std::fs::read(&output).unwrap(), digest);
}

#[tokio::test]
async fn test_summarize_reports_gaps() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let config = pipeline_config(&server.uri(), dir.path());
    let registry: Arc<dyn SchemaRegistry> = Arc::new(StaticRegistry::new());

    let normalizer = Normalizer::new(registry.clone(), &config.output_dir);
    std::fs::create_dir_all(&config.raw_dir).unwrap();
    for year in [2000, 2002] {
        let raw = config.raw_dir.join(format!("ALL_{}.csv", year));
        std::fs::write(&raw, "CERT\n1\n2\n").unwrap();
        normalizer.normalize(&raw, year).unwrap();
    }

    let pipeline = Pipeline::new(config, immediate_client(1), registry);
    let report = pipeline.summarize(1987, 2025).await.unwrap();
    assert_eq!(report.years(), vec![2000, 2001, 2002]);
    assert_eq!(report.failed_years(), vec![2001]);

    let narrowed = pipeline.summarize(2002, 2025).await.unwrap();
    assert_eq!(narrowed.years(), vec![2002]);
    assert!(narrowed.is_success());

    assert!(pipeline.summarize(1987, 1999).await.is_err());
}
