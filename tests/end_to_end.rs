//! End-to-end backup scenarios against the in-memory executor

use std::fs::File;
use std::io::Read;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use tempfile::TempDir;

use dumpvault::backup::{BackupClass, BackupMetadata, BackupService, OutputMode};
use dumpvault::clock::FixedClock;
use dumpvault::config::{BackupPaths, DatabaseEndpoint, DatabaseTarget, RetentionPolicy, Settings};
use dumpvault::dump::{BackupOptions, ColumnInfo, DatabaseDumpWriter};
use dumpvault::executor::{MemoryExecutor, MemoryTable, SqlValue};

fn small_table(name: &str) -> MemoryTable {
    MemoryTable::new("public", name)
        .column(ColumnInfo::new("id", "integer").not_null())
        .column(ColumnInfo::new("label", "text"))
        .primary_key(&["id"])
        .generated_rows(3, |i| vec![SqlValue::Int(i as i64), SqlValue::Text(format!("row {}", i))])
}

fn service_for(temp_dir: &TempDir, executor: MemoryExecutor) -> BackupService {
    let settings = Settings {
        primary: DatabaseEndpoint::named("alpha"),
        secondary: Some(DatabaseEndpoint::named("beta")),
        ..Settings::default()
    };
    let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 3, 3, 2, 0, 0).unwrap());

    BackupService::new(
        BackupPaths::with_base_dir(temp_dir.path().to_path_buf()),
        settings,
        Arc::new(executor),
    )
    .with_clock(Arc::new(clock))
}

#[tokio::test]
async fn archive_of_both_databases() {
    let temp_dir = TempDir::new().unwrap();
    let executor = MemoryExecutor::new()
        .with_table("alpha", small_table("accounts"))
        .with_table("alpha", small_table("orders"))
        .with_table("alpha", small_table("users"))
        .with_table("beta", small_table("events"));
    let service = service_for(&temp_dir, executor);

    let result = service
        .run_backup(&[DatabaseTarget::Both], &BackupOptions::default(), OutputMode::Archive)
        .await;
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.tables_backed_up, Some(4));

    let mut archive = zip::ZipArchive::new(File::open(result.file_path.unwrap()).unwrap()).unwrap();
    let names: Vec<String> = archive.file_names().map(str::to_string).collect();
    let sql_entries: Vec<&String> = names.iter().filter(|n| n.ends_with(".sql")).collect();
    assert_eq!(sql_entries.len(), 2);
    assert_eq!(names.len(), 3);
    assert!(names.iter().any(|n| n == "backup_metadata.json"));

    let mut manifest = String::new();
    archive
        .by_name("backup_metadata.json")
        .unwrap()
        .read_to_string(&mut manifest)
        .unwrap();
    let manifest: serde_json::Value = serde_json::from_str(&manifest).unwrap();
    assert_eq!(manifest["databases"], serde_json::json!(["alpha", "beta"]));
    assert_eq!(manifest["totalFiles"], 2);

    let mut alpha = String::new();
    archive
        .by_name("alpha_backup_2024-03-03_02-00-00.sql")
        .unwrap()
        .read_to_string(&mut alpha)
        .unwrap();
    assert_eq!(alpha.matches("CREATE TABLE").count(), 3);
    assert!(alpha.contains("(2, 'row 2')"));

    let entries = service.list_backups().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].databases, vec!["alpha".to_string(), "beta".to_string()]);
}

#[tokio::test]
async fn large_table_uses_smallest_batches() {
    const ROWS: u64 = 250_000;

    let executor = Arc::new(MemoryExecutor::new().with_table(
        "alpha",
        MemoryTable::new("public", "events")
            .column(ColumnInfo::new("id", "bigint").not_null())
            .primary_key(&["id"])
            .generated_rows(ROWS, |i| vec![SqlValue::Int(i as i64)]),
    ));
    let writer = DatabaseDumpWriter::new(executor.clone(), 1024);

    let mut out = Vec::new();
    let summary = writer
        .write_database("alpha", &mut out, &BackupOptions::default())
        .await
        .unwrap();

    let report = &summary.tables[0];
    assert_eq!(report.batch_size, Some(50));
    assert_eq!(report.rows_written, ROWS);

    let limits = executor.select_limits("alpha");
    assert_eq!(limits.len() as u64, ROWS / 50);
    assert!(limits.iter().all(|&l| l == 50));

    let dump = String::from_utf8(out).unwrap();
    let emitted = dump.lines().filter(|l| l.starts_with('(')).count() as u64;
    assert_eq!(emitted, ROWS);
    assert!(dump.contains("(0)"));
    assert!(dump.contains("(249999)"));
}

#[tokio::test]
async fn cleanup_keeps_two_newest_weeks() {
    let temp_dir = TempDir::new().unwrap();
    let service = service_for(&temp_dir, MemoryExecutor::new());
    service.paths().ensure_directories().unwrap();

    // Mondays of four consecutive ISO weeks, oldest first
    for (name, day) in [("w1.zip", 1), ("w2.zip", 8), ("w3.zip", 15), ("w4.zip", 22)] {
        let path = service.paths().backup_dir().join(name);
        std::fs::write(&path, b"archive").unwrap();
        let created = Utc.with_ymd_and_hms(2024, 1, day, 2, 0, 0).unwrap();
        service
            .catalog()
            .append(BackupMetadata::new(path, created, vec!["alpha".into()], BackupClass::Weekly, 7))
            .unwrap();
    }

    let report = service
        .cleanup_with(RetentionPolicy {
            keep_weekly: 2,
            keep_monthly: 3,
        })
        .await
        .unwrap();
    assert_eq!(report.deleted.len(), 2);

    let mut remaining: Vec<String> = service
        .list_backups()
        .unwrap()
        .into_iter()
        .map(|e| e.filename)
        .collect();
    remaining.sort();
    assert_eq!(remaining, vec!["w3.zip".to_string(), "w4.zip".to_string()]);
    assert!(!service.paths().backup_dir().join("w1.zip").exists());
    assert!(!service.paths().backup_dir().join("w2.zip").exists());
}
