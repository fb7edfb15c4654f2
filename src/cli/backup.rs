//! Backup CLI commands
//!
//! Implements `run`, `list` and `cleanup`.

use clap::Args;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::backup::{BackupMetadata, BackupService, OutputMode};
use crate::config::schedule::DatabaseTarget;
use crate::dump::BackupOptions;
use crate::error::{VaultError, VaultResult};

/// Arguments for `dumpvault run`
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Databases to back up: primary, secondary or both
    #[arg(short, long, value_delimiter = ',', default_value = "both")]
    pub databases: Vec<DatabaseTarget>,

    /// Output format: archive (zip) or combined (sql)
    #[arg(short, long, default_value = "archive")]
    pub mode: OutputMode,

    /// Write table definitions only
    #[arg(long)]
    pub schema_only: bool,

    /// Skip row data (same as --schema-only)
    #[arg(long)]
    pub no_data: bool,

    /// Only back up tables matching these patterns (substring or regex on schema.table)
    #[arg(long, value_delimiter = ',')]
    pub include: Vec<String>,

    /// Skip tables matching these patterns
    #[arg(long, value_delimiter = ',')]
    pub exclude: Vec<String>,

    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,
}

impl RunArgs {
    pub fn options(&self) -> BackupOptions {
        let patterns = |p: &Vec<String>| (!p.is_empty()).then(|| p.clone());
        BackupOptions {
            include_data: !self.no_data,
            schema_only: self.schema_only,
            tables_to_include: patterns(&self.include),
            tables_to_exclude: patterns(&self.exclude),
        }
    }
}

/// Handle `dumpvault run`
pub async fn handle_run(service: &BackupService, args: RunArgs) -> VaultResult<()> {
    if !args.json {
        println!("Starting backup...");
    }

    let result = service
        .run_backup(&args.databases, &args.options(), args.mode)
        .await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else if result.success {
        println!(
            "Backup created: {}",
            result.file_name.as_deref().unwrap_or_default()
        );
        if let Some(path) = &result.file_path {
            println!("Location: {}", path.display());
        }
        println!("Size: {}", format_size(result.size_bytes));
        println!(
            "Tables: {}",
            result.tables_backed_up.unwrap_or_default()
        );
        println!(
            "Duration: {}",
            format_duration(chrono::Duration::milliseconds(result.duration_ms as i64))
        );
    }

    if result.success {
        Ok(())
    } else {
        Err(VaultError::run_failed(
            result.failed_stage,
            result.error.unwrap_or_default(),
        ))
    }
}

#[derive(Tabled)]
struct BackupRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "File")]
    filename: String,
    #[tabled(rename = "Type")]
    class: String,
    #[tabled(rename = "Databases")]
    databases: String,
    #[tabled(rename = "Created")]
    created: String,
    #[tabled(rename = "Age")]
    age: String,
    #[tabled(rename = "Size")]
    size: String,
}

impl BackupRow {
    fn new(index: usize, entry: &BackupMetadata, now: chrono::DateTime<chrono::Utc>) -> Self {
        Self {
            index,
            filename: entry.filename.clone(),
            class: entry.class.to_string(),
            databases: entry.databases.join(", "),
            created: entry.created.format("%Y-%m-%d %H:%M UTC").to_string(),
            age: format_duration(now.signed_duration_since(entry.created)),
            size: format_size(entry.size),
        }
    }
}

/// Handle `dumpvault list`
pub fn handle_list(service: &BackupService, json: bool) -> VaultResult<()> {
    let backups = service.list_backups()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&backups)?);
        return Ok(());
    }

    if backups.is_empty() {
        println!("No backups found.");
        println!("Create one with: dumpvault run");
        return Ok(());
    }

    let now = service.now();
    let rows: Vec<BackupRow> = backups
        .iter()
        .enumerate()
        .map(|(i, entry)| BackupRow::new(i + 1, entry, now))
        .collect();

    println!("{}", Table::new(rows).with(Style::rounded()));
    println!();
    let total: u64 = backups.iter().map(|b| b.size).sum();
    println!("Total: {} backup(s), {}", backups.len(), format_size(total));
    Ok(())
}

/// Handle `dumpvault cleanup`
pub async fn handle_cleanup(service: &BackupService, dry_run: bool) -> VaultResult<()> {
    let config = service.schedule_config();
    println!(
        "Retention policy: {} weekly, {} monthly",
        config.retention.keep_weekly, config.retention.keep_monthly
    );

    if dry_run {
        let entries = service.list_backups()?;
        let plan = crate::backup::RetentionPolicyEngine::new(config.retention).plan(&entries);
        if plan.delete.is_empty() {
            println!("No backups to delete.");
        } else {
            println!("Would delete {} backup(s):", plan.delete.len());
            for entry in &plan.delete {
                println!("  {} [{}]", entry.filename, entry.class);
            }
        }
        return Ok(());
    }

    let report = service.cleanup_now().await?;
    if report.deleted.is_empty() && report.failed.is_empty() {
        println!("No backups to delete.");
    } else {
        for entry in &report.deleted {
            println!("  Deleted {} [{}]", entry.filename, entry.class);
        }
        for failure in &report.failed {
            println!("  Could not delete {}: {}", failure.filename, failure.error);
        }
        println!("Deleted {} backup(s).", report.deleted.len());
    }
    println!("Kept {} backup(s).", report.kept);
    Ok(())
}

/// Format a duration in human-readable form
pub(crate) fn format_duration(duration: chrono::Duration) -> String {
    let total_seconds = duration.num_seconds();

    if total_seconds < 60 {
        return format!("{}s", total_seconds.max(0));
    }

    let minutes = total_seconds / 60;
    if minutes < 60 {
        return format!("{}m", minutes);
    }

    let hours = minutes / 60;
    if hours < 24 {
        return format!("{}h", hours);
    }

    let days = hours / 24;
    if days < 30 {
        return format!("{}d", days);
    }

    let months = days / 30;
    format!("{}mo", months)
}

/// Format a file size in human-readable form
pub(crate) fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
