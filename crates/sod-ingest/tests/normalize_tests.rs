//! Integration tests for the normalizer and summarizer on real files

mod helpers;

use arrow::array::{Array, Date32Array, Int64Array, StringArray};
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use helpers::zip_archive;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use sod_common::types::{YearStatus, YearUnit};
use sod_ingest::error::{FailureKind, Stage};
use sod_ingest::summarize::expected_artifacts;
use sod_ingest::{Normalizer, ParseError, StaticRegistry, Summarizer, YearEntry};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn registry() -> Arc<StaticRegistry> {
    Arc::new(
        StaticRegistry::new()
            .with("CERT", "FDIC Certificate #")
            .with("NAMEFULL", "Institution Name")
            .with("DEPSUMBR", "Branch Office Deposits"),
    )
}

fn read_batch(path: &Path) -> RecordBatch {
    let file = std::fs::File::open(path).unwrap();
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .unwrap()
        .build()
        .unwrap();
    let batches: Vec<RecordBatch> = reader.map(|b| b.unwrap()).collect();
    arrow::compute::concat_batches(&batches[0].schema(), &batches).unwrap()
}

fn column_names(batch: &RecordBatch) -> Vec<String> {
    batch
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect()
}

#[test]
fn test_canonical_layout() {
    let dir = TempDir::new().unwrap();
    let raw = dir.path().join("ALL_2010.csv");
    std::fs::write(
        &raw,
        "namefull,Zeta,cert,alpha,REPORTING_PERIOD,DEPSUMBR\n\
         Bank A,z1,12,a1,2009-06-30,100\n\
         Bank B,z2,7,a2,2009-06-30,250\n",
    )
    .unwrap();

    let normalizer = Normalizer::new(registry(), dir.path().join("out"));
    let artifact = normalizer.normalize(&raw, 2010).unwrap();
    assert_eq!(artifact.rows, 2);
    assert_eq!(artifact.dropped_rows, 0);
    assert_eq!(artifact.encoding.as_deref(), Some("utf-8"));

    let batch = read_batch(&artifact.path);
    assert_eq!(
        column_names(&batch),
        vec!["CERT", "REPORTING_PERIOD", "ALPHA", "DEPSUMBR", "NAMEFULL", "ZETA"]
    );

    let schema = batch.schema();
    assert_eq!(schema.field(0).data_type(), &DataType::Int64);
    assert_eq!(schema.field(1).data_type(), &DataType::Date32);
    assert_eq!(schema.field(3).data_type(), &DataType::Int64);
    assert_eq!(schema.field(4).data_type(), &DataType::Utf8);
    assert_eq!(
        schema.field(4).metadata().get("description").map(String::as_str),
        Some("Institution Name")
    );
    assert_eq!(
        schema.field(2).metadata().get("description").map(String::as_str),
        Some("")
    );

    let certs = batch
        .column(0)
        .as_any()
        .downcast_ref::<Int64Array>()
        .unwrap();
    assert_eq!(certs.values().to_vec(), vec![12, 7]);

    // 2010-06-30 in days since the Unix epoch
    let periods = batch
        .column(1)
        .as_any()
        .downcast_ref::<Date32Array>()
        .unwrap();
    assert!(periods.iter().all(|p| p == Some(14_790)));
}

#[test]
fn test_column_order_holds_across_differing_years() {
    let dir = TempDir::new().unwrap();
    let normalizer = Normalizer::new(registry(), dir.path().join("out"));

    let older = dir.path().join("sod-1990.csv");
    std::fs::write(&older, "brnum,Cert,zipbr,AddressBr,cityBR\n1,5,01234,1 Main St,Austin\n").unwrap();
    let newer = dir.path().join("ALL_2020.csv");
    std::fs::write(
        &newer,
        "NAMEFULL,STALPBR,cert,depsumbr,Asset,bkclass\nBank,TX,5,100,900,N\n",
    )
    .unwrap();

    let older = read_batch(&normalizer.normalize(&older, 1990).unwrap().path);
    let newer = read_batch(&normalizer.normalize(&newer, 2020).unwrap().path);

    assert_eq!(
        column_names(&older),
        vec!["CERT", "REPORTING_PERIOD", "ADDRESSBR", "BRNUM", "CITYBR", "ZIPBR"]
    );
    assert_eq!(
        column_names(&newer),
        vec!["CERT", "REPORTING_PERIOD", "ASSET", "BKCLASS", "DEPSUMBR", "NAMEFULL", "STALPBR"]
    );

    for batch in [&older, &newer] {
        let names = column_names(batch);
        let rest = &names[2..];
        let mut sorted = rest.to_vec();
        sorted.sort_by_key(|name| name.to_lowercase());
        assert_eq!(rest, sorted.as_slice());
    }
}

#[test]
fn test_latin1_file_is_decoded_without_loss() {
    let dir = TempDir::new().unwrap();
    let raw = dir.path().join("sod-1989.csv");
    std::fs::write(&raw, b"CERT,NAMEFULL\n1,Banco Espa\xf1ol\n2,Caf\xe9 Savings\n").unwrap();

    let artifact = Normalizer::new(registry(), dir.path())
        .normalize(&raw, 1989)
        .unwrap();
    assert_eq!(artifact.encoding.as_deref(), Some("latin-1"));
    assert_eq!(artifact.dropped_rows, 0);

    let batch = read_batch(&artifact.path);
    let names = batch
        .column_by_name("NAMEFULL")
        .unwrap()
        .as_any()
        .downcast_ref::<StringArray>()
        .unwrap();
    assert_eq!(names.value(0), "Banco Español");
    assert_eq!(names.value(1), "Café Savings");
}

#[test]
fn test_bad_certificates_are_dropped() {
    let dir = TempDir::new().unwrap();
    let raw = dir.path().join("ALL_2015.csv");
    std::fs::write(&raw, "CERT,NAMEFULL\n1,A\nn/a,B\n3,C\n-4,D\n5,E,extra\n").unwrap();

    let artifact = Normalizer::new(registry(), dir.path())
        .normalize(&raw, 2015)
        .unwrap();
    assert_eq!(artifact.rows, 2);
    assert_eq!(artifact.source_rows, 5);
    assert_eq!(artifact.dropped_rows, 3);
}

#[test]
fn test_only_invalid_certificates_fails_the_year() {
    let dir = TempDir::new().unwrap();
    let raw = dir.path().join("ALL_2016.csv");
    std::fs::write(&raw, "CERT,NAMEFULL\nabc,Only Bank\n").unwrap();

    let err = Normalizer::new(registry(), dir.path())
        .normalize(&raw, 2016)
        .unwrap_err();
    assert!(matches!(err, ParseError::NoValidRows { year: 2016, dropped: 1 }));
    assert!(!dir.path().join("2016.parquet").exists());
}

#[test]
fn test_missing_cert_column_fails() {
    let dir = TempDir::new().unwrap();
    let raw = dir.path().join("ALL_2017.csv");
    std::fs::write(&raw, "NAMEFULL\nA\n").unwrap();

    let err = Normalizer::new(registry(), dir.path())
        .normalize(&raw, 2017)
        .unwrap_err();
    assert!(matches!(err, ParseError::MissingCertificate { year: 2017 }));
}

#[test]
fn test_forced_rewrite_is_byte_identical() {
    let dir = TempDir::new().unwrap();
    let raw = dir.path().join("ALL_2018.csv");
    std::fs::write(&raw, "CERT,NAMEFULL,DEPSUMBR\n9,X,1.5\n3,Y,2\n").unwrap();

    let normalizer = Normalizer::new(registry(), dir.path()).with_force(true);
    let first = normalizer.normalize(&raw, 2018).unwrap();
    let second = normalizer.normalize(&raw, 2018).unwrap();
    assert!(!second.skipped);
    assert_eq!(first.sha256, second.sha256);
}

#[test]
fn test_existing_artifact_is_reused() {
    let dir = TempDir::new().unwrap();
    let raw = dir.path().join("ALL_2019.csv");
    std::fs::write(&raw, "CERT\n1\n2\nbad\n").unwrap();

    let normalizer = Normalizer::new(registry(), dir.path());
    let first = normalizer.normalize(&raw, 2019).unwrap();
    std::fs::remove_file(&raw).unwrap();

    let second = normalizer.normalize(&raw, 2019).unwrap();
    assert!(second.skipped);
    assert_eq!(second.rows, 2);
    assert_eq!(second.dropped_rows, 1);
    assert_eq!(second.sha256, first.sha256);
}

#[test]
fn test_zipped_raw_artifact() {
    let dir = TempDir::new().unwrap();
    let raw = dir.path().join("sod-1987.zip");
    std::fs::write(
        &raw,
        zip_archive(&[("notes.txt", b"ignore"), ("SOD_1987.CSV", b"CERT\n11\n12\n")]),
    )
    .unwrap();

    let artifact = Normalizer::new(registry(), dir.path())
        .normalize(&raw, 1987)
        .unwrap();
    assert_eq!(artifact.rows, 2);
}

#[test]
fn test_normalize_all_isolates_failures() {
    let dir = TempDir::new().unwrap();
    let raw_dir = dir.path().join("raw");
    let out_dir = dir.path().join("out");
    std::fs::create_dir_all(&raw_dir).unwrap();
    std::fs::write(raw_dir.join("ALL_2001.csv"), "CERT\n1\n").unwrap();
    std::fs::write(raw_dir.join("ALL_2003.csv"), "CERT\nx\n").unwrap();

    let mut units: Vec<YearUnit> = (2001..=2003)
        .map(|year| YearUnit::new(year, &raw_dir, &out_dir))
        .collect();
    let report = Normalizer::new(registry(), &out_dir)
        .with_workers(2)
        .normalize_all(&mut units);

    assert_eq!(report.succeeded(), 1);
    assert_eq!(units[0].status(), YearStatus::Parsed);
    assert!(units[1].is_failed());
    assert!(units[2].is_failed());

    let failed: Vec<(i32, FailureKind)> = report.failures.iter().map(|f| (f.year, f.kind)).collect();
    assert_eq!(
        failed,
        vec![(2002, FailureKind::MissingArtifact), (2003, FailureKind::Parse)]
    );
    assert!(report.failures.iter().all(|f| f.stage == Stage::Normalize));
}

#[test]
fn test_summary_reports_every_year_in_order() {
    let dir = TempDir::new().unwrap();
    let normalizer = Normalizer::new(registry(), dir.path());
    for (year, body) in [(2012, "CERT,A\n1,x\n2,y\n3,z\n"), (2010, "CERT\n5\n")] {
        let raw = dir.path().join(format!("ALL_{}.csv", year));
        std::fs::write(&raw, body).unwrap();
        normalizer.normalize(&raw, year).unwrap();
    }

    let report = Summarizer::new(2).summarize(&expected_artifacts(dir.path(), 2010, 2012));
    assert_eq!(report.years(), vec![2010, 2011, 2012]);
    assert_eq!(report.failed_years(), vec![2011]);
    assert_eq!(report.row_counts().into_iter().collect::<Vec<_>>(), vec![(2010, 1), (2012, 3)]);

    match report.get(2011) {
        Some(YearEntry::Failed(f)) => {
            assert_eq!(f.kind, FailureKind::MissingArtifact);
            assert_eq!(f.stage, Stage::Summarize);
        },
        other => panic!("expected a missing-artifact failure, got {:?}", other),
    }
    match report.get(2012) {
        Some(YearEntry::Verified(s)) => {
            assert_eq!(s.variables, 1);
            assert_eq!(s.dropped_rows, Some(0));
        },
        other => panic!("expected a verified year, got {:?}", other),
    }
    assert!(!report.is_success());
}

#[test]
fn test_summary_rejects_artifact_under_wrong_year() {
    let dir = TempDir::new().unwrap();
    let raw = dir.path().join("ALL_2000.csv");
    std::fs::write(&raw, "CERT\n1\n").unwrap();
    let artifact = Normalizer::new(registry(), dir.path())
        .normalize(&raw, 2000)
        .unwrap();
    std::fs::rename(&artifact.path, dir.path().join("2001.parquet")).unwrap();

    let report = Summarizer::default().summarize(&expected_artifacts(dir.path(), 2001, 2001));
    match report.get(2001) {
        Some(YearEntry::Failed(f)) => assert_eq!(f.kind, FailureKind::Corrupt),
        other => panic!("expected a corrupt artifact, got {:?}", other),
    }
}
