//! Schedule and scheduler CLI commands

use std::sync::Arc;

use clap::Subcommand;

use crate::backup::{BackupClass, BackupScheduler, BackupService, CheckOutcome, SchedulerStatus};
use crate::config::schedule::{BackupScheduleConfig, DatabaseTarget, Frequency};
use crate::error::{VaultError, VaultResult};

/// Schedule configuration subcommands
#[derive(Subcommand, Debug)]
pub enum ScheduleCommands {
    /// Show the current backup schedule
    Show {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Change the backup schedule; unspecified fields keep their value
    Set {
        /// Enable or disable scheduled backups
        #[arg(long)]
        enabled: Option<bool>,
        /// daily, weekly or monthly
        #[arg(long)]
        frequency: Option<Frequency>,
        /// Day of week for weekly schedules (0 = Sunday)
        #[arg(long)]
        day_of_week: Option<u32>,
        /// Hour of day (0-23, UTC)
        #[arg(long)]
        hour: Option<u32>,
        /// Minute (0-59)
        #[arg(long)]
        minute: Option<u32>,
        /// Databases to back up: primary, secondary or both
        #[arg(long, value_delimiter = ',')]
        databases: Option<Vec<DatabaseTarget>>,
        /// Number of weekly backups to keep
        #[arg(long)]
        keep_weekly: Option<u32>,
        /// Number of monthly backups to keep
        #[arg(long)]
        keep_monthly: Option<u32>,
    },
}

/// Scheduler control subcommands
#[derive(Subcommand, Debug)]
pub enum SchedulerCommands {
    /// Show whether the scheduler would run and when it checks next
    Status,

    /// Run one due-check now
    Check,

    /// Run the scheduler in the foreground until interrupted
    Run,
}

/// Handle a schedule command
pub fn handle_schedule_command(service: &BackupService, cmd: ScheduleCommands) -> VaultResult<()> {
    match cmd {
        ScheduleCommands::Show { json } => {
            let config = service.schedule_config();
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                print_schedule(&config);
            }
        }

        ScheduleCommands::Set {
            enabled,
            frequency,
            day_of_week,
            hour,
            minute,
            databases,
            keep_weekly,
            keep_monthly,
        } => {
            let mut config = service.schedule_config();
            if let Some(enabled) = enabled {
                config.enabled = enabled;
            }
            if let Some(frequency) = frequency {
                config.frequency = frequency;
            }
            if let Some(day) = day_of_week {
                config.day_of_week = day;
            }
            if let Some(hour) = hour {
                config.hour = hour;
            }
            if let Some(minute) = minute {
                config.minute = minute;
            }
            if let Some(databases) = databases {
                config.databases = databases;
            }
            if let Some(keep) = keep_weekly {
                config.retention.keep_weekly = keep;
            }
            if let Some(keep) = keep_monthly {
                config.retention.keep_monthly = keep;
            }

            service.set_schedule_config(&config)?;
            println!("Backup schedule updated.");
            println!();
            print_schedule(&config);
        }
    }

    Ok(())
}

/// Handle a scheduler command
pub async fn handle_scheduler_command(service: Arc<BackupService>, cmd: SchedulerCommands) -> VaultResult<()> {
    let scheduler = BackupScheduler::new(Arc::clone(&service));

    match cmd {
        SchedulerCommands::Status => {
            let status = scheduler.status();
            let config = service.schedule_config();
            println!("Scheduler");
            println!("=========");
            println!("Running in this process: {}", if status.running { "yes" } else { "no" });
            println!("Check interval: {}s", status.check_interval_secs);
            println!("{}", next_check_line(&status));
            println!("Schedule enabled: {}", if config.enabled { "yes" } else { "no" });
            let last_scheduled = service
                .list_backups()?
                .into_iter()
                .find(|b| b.class != BackupClass::Manual);
            if let Some(latest) = last_scheduled {
                println!(
                    "Last scheduled backup: {} ({})",
                    latest.filename,
                    latest.created.format("%Y-%m-%d %H:%M UTC")
                );
            }
        }

        SchedulerCommands::Check => {
            let outcome = scheduler.trigger_check_now().await;
            print_outcome(&outcome);
            if let CheckOutcome::Failed { error, stage } = outcome {
                return Err(VaultError::run_failed(stage, error));
            }
        }

        SchedulerCommands::Run => {
            scheduler.start();
            let status = scheduler.status();
            println!(
                "Scheduler running, checking every {}s. Press Ctrl-C to stop.",
                status.check_interval_secs
            );

            tokio::signal::ctrl_c()
                .await
                .map_err(|e| VaultError::Io(format!("Failed to wait for Ctrl-C: {}", e)))?;

            scheduler.stop();
            println!("Scheduler stopped.");
        }
    }

    Ok(())
}

fn next_check_line(status: &SchedulerStatus) -> String {
    match status.next_check {
        Some(next) => format!("Next check: {}", next.format("%Y-%m-%d %H:%M:%S UTC")),
        None => "Next check: not scheduled".to_string(),
    }
}

fn print_schedule(config: &BackupScheduleConfig) {
    const DAYS: [&str; 7] = [
        "Sunday", "Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday",
    ];

    let frequency = match config.frequency {
        Frequency::Daily => "daily",
        Frequency::Weekly => "weekly",
        Frequency::Monthly => "monthly",
    };
    let databases: Vec<&str> = config
        .databases
        .iter()
        .map(|d| match d {
            DatabaseTarget::Primary => "primary",
            DatabaseTarget::Secondary => "secondary",
            DatabaseTarget::Both => "both",
        })
        .collect();

    println!("Backup Schedule");
    println!("===============");
    println!("Enabled:   {}", if config.enabled { "yes" } else { "no" });
    println!("Frequency: {}", frequency);
    if config.frequency == Frequency::Weekly {
        let day = DAYS.get(config.day_of_week as usize).copied().unwrap_or("?");
        println!("Day:       {}", day);
    }
    println!("Time:      {:02}:{:02} UTC", config.hour, config.minute);
    println!("Databases: {}", databases.join(", "));
    println!(
        "Retention: {} weekly, {} monthly",
        config.retention.keep_weekly, config.retention.keep_monthly
    );
}

fn print_outcome(outcome: &CheckOutcome) {
    match outcome {
        CheckOutcome::Disabled => println!("Scheduled backups are disabled."),
        CheckOutcome::AlreadyBackedUp { period } => {
            println!("A scheduled backup already exists for {}.", period)
        }
        CheckOutcome::NotDue => println!("No backup due right now."),
        CheckOutcome::Completed { result, cleanup } => {
            println!(
                "Backup created: {}",
                result.file_name.as_deref().unwrap_or_default()
            );
            if let Some(report) = cleanup {
                println!(
                    "Retention: {} deleted, {} kept",
                    report.deleted.len(),
                    report.kept
                );
            }
        }
        CheckOutcome::Failed { error, .. } => println!("Backup failed: {}", error),
    }
}
