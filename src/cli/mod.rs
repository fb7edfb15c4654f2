//! CLI command handlers
//!
//! This module contains the implementation of CLI commands,
//! bridging the clap argument parsing with the backup service.

pub mod backup;
pub mod schedule;

pub use backup::{handle_cleanup, handle_list, handle_run, RunArgs};
pub use schedule::{
    handle_schedule_command, handle_scheduler_command, ScheduleCommands, SchedulerCommands,
};
