use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use dumpvault::backup::BackupService;
use dumpvault::cli::{
    handle_cleanup, handle_list, handle_run, handle_schedule_command, handle_scheduler_command,
    RunArgs, ScheduleCommands, SchedulerCommands,
};
use dumpvault::config::{BackupPaths, Settings};
use dumpvault::executor::PgExecutor;

#[derive(Parser)]
#[command(
    name = "dumpvault",
    author = "Kaylee Beyene",
    version,
    about = "Streaming SQL backups with weekly/monthly retention",
    long_about = "dumpvault backs up relational databases table by table into SQL \
                  scripts, packages them as a ZIP archive or a combined SQL file, \
                  and rotates old backups on a weekly/monthly schedule."
)]
struct Cli {
    /// Directory holding settings, schedule and backups
    #[arg(long, global = true, env = "DUMPVAULT_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Back up now
    Run(RunArgs),

    /// List backups in the catalog
    #[command(alias = "ls")]
    List {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete backups beyond the retention policy
    Cleanup {
        /// Only show what would be deleted
        #[arg(long)]
        dry_run: bool,
    },

    /// Show or change the backup schedule
    #[command(subcommand)]
    Schedule(ScheduleCommands),

    /// Inspect, trigger or run the scheduler
    #[command(subcommand)]
    Scheduler(SchedulerCommands),

    /// Show current configuration and paths
    Config,
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    // Initialize paths and settings
    let paths = match cli.data_dir {
        Some(dir) => BackupPaths::with_base_dir(dir),
        None => BackupPaths::new()?,
    };
    let settings = Settings::load_or_create(&paths)?;

    let executor = Arc::new(PgExecutor::from_settings(&settings)?);
    let service = Arc::new(BackupService::new(paths.clone(), settings.clone(), executor));

    match cli.command {
        Some(Commands::Run(args)) => handle_run(&service, args).await?,
        Some(Commands::List { json }) => handle_list(&service, json)?,
        Some(Commands::Cleanup { dry_run }) => handle_cleanup(&service, dry_run).await?,
        Some(Commands::Schedule(cmd)) => handle_schedule_command(&service, cmd)?,
        Some(Commands::Scheduler(cmd)) => handle_scheduler_command(Arc::clone(&service), cmd).await?,
        Some(Commands::Config) => {
            println!("dumpvault Configuration");
            println!("=======================");
            println!("Base directory:   {}", paths.base_dir().display());
            println!("Backup directory: {}", paths.backup_dir().display());
            println!("Catalog file:     {}", paths.catalog_file().display());
            println!("Schedule file:    {}", paths.schedule_file().display());
            println!();
            println!("Databases:");
            for endpoint in settings.endpoints() {
                let connection = if endpoint.url.is_some() {
                    "configured"
                } else {
                    "no connection URL"
                };
                println!("  {} ({})", endpoint.name, connection);
            }
            println!();
            println!("Settings:");
            println!("  Field size limit:  {} bytes", settings.field_size_limit);
            println!("  Operation timeout: {}s", settings.operation_timeout_secs);
            println!("  Check interval:    {}s", settings.check_interval_secs);
            println!("  Due window:        {} min", settings.due_window_minutes);
        }
        None => {
            println!("dumpvault - Streaming database backups");
            println!();
            println!("Run 'dumpvault --help' for usage information.");
            println!("Run 'dumpvault run' to take a backup now.");
        }
    }

    Ok(())
}
