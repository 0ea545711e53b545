// Output formatting and display for CLI

use crate::ipc::ResponseData;
use crate::process::{ProcessSpec, ProcessState, ShutdownReport};
use crate::report::{format_duration, format_status_colored, truncate, StatusReporter, TableReporter};
use chrono::{DateTime, Local};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::{Duration, SystemTime};
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

/// Print a success response to stdout
pub fn print_success(data: &ResponseData, detailed: bool) {
    match data {
        ResponseData::Status(states) => match states.as_slice() {
            [state] if detailed => print_detailed_status(state),
            _ => TableReporter.report(states),
        },

        ResponseData::Started { name } => {
            println!(
                "{}",
                format!("✓ Process {} started", name).green().bold()
            );
        }

        ResponseData::StartedAll { count } => {
            if *count == 0 {
                println!("{}", "All processes are already running".yellow());
            } else {
                println!(
                    "{}",
                    format!("✓ Started {} process(es)", count).green().bold()
                );
            }
        }

        ResponseData::Stopped { name } => {
            println!(
                "{}",
                format!("✓ Stop requested for process {}", name)
                    .green()
                    .bold()
            );
        }

        ResponseData::Restarted { name } => {
            println!(
                "{}",
                format!("✓ Process {} restarted", name).green().bold()
            );
        }

        ResponseData::ShutdownComplete(report) => print_shutdown_report(report),

        ResponseData::Success(message) => {
            println!("{} {}", "✓".green().bold(), message);
        }
    }
}

/// Print an error message to stderr
pub fn print_error(error: &str) {
    eprintln!("{} {}", "✗ Error:".red().bold(), error);
}

fn print_shutdown_report(report: &ShutdownReport) {
    println!(
        "  {}: {}",
        "Stopped".bold(),
        report.stopped.len().to_string().green()
    );

    if !report.is_clean() {
        println!(
            "  {}: {}",
            "Killed".bold(),
            report.forced.join(", ").red()
        );
        for warning in report.warnings() {
            println!("  {} {}", "⚠".yellow().bold(), warning);
        }
    }
}

/// Print the specs a configuration file resolves to
pub fn print_spec_table(specs: &[ProcessSpec]) {
    #[derive(Tabled)]
    struct SpecRow {
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Command")]
        command: String,
        #[tabled(rename = "Directory")]
        cwd: String,
        #[tabled(rename = "Restart Delay")]
        restart_delay: String,
        #[tabled(rename = "Stop")]
        stop: String,
    }

    let rows: Vec<SpecRow> = specs
        .iter()
        .map(|s| SpecRow {
            name: truncate(&s.name, 20),
            command: truncate(&s.command_line(), 48),
            cwd: s
                .cwd
                .as_ref()
                .map(|c| truncate(&c.display().to_string(), 32))
                .unwrap_or_else(|| "-".to_string()),
            restart_delay: format!("{}ms", s.restart_delay.as_millis()),
            stop: format!("{} / {}", s.stop_signal, format_duration(&s.stop_timeout)),
        })
        .collect();

    let mut table = Table::new(rows);
    table
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()));

    println!("\n{}\n", table);
}

/// Print detailed status view for a single process
pub fn print_detailed_status(state: &ProcessState) {
    println!("\n{}", "Process Details".bold().underline());
    println!();
    println!("  {:<15} {}", "Name:".bold(), state.name.cyan());
    println!(
        "  {:<15} {}",
        "Status:".bold(),
        format_status_colored(state.status)
    );

    if let Some(pid) = state.pid {
        println!("  {:<15} {}", "PID:".bold(), pid);
    }

    if let Some(uptime) = state.uptime() {
        println!("  {:<15} {}", "Uptime:".bold(), format_duration(&uptime));
    }

    println!("  {:<15} {}", "Restarts:".bold(), state.restart_count);

    if let Some(ref exit) = state.last_exit {
        println!("  {:<15} {}", "Last Exit:".bold(), exit);
    }

    if let Some(started) = state.last_started_at {
        println!("  {:<15} {}", "Started At:".bold(), format_timestamp(started));
    }

    if let Some(exited) = state.last_exited_at {
        println!("  {:<15} {}", "Exited At:".bold(), format_timestamp(exited));
    }

    println!();
}

fn format_timestamp(at: SystemTime) -> String {
    let datetime: DateTime<Local> = at.into();
    datetime.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Create a spinner for long operations
pub fn create_progress_bar(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .template("{spinner:.green} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
    pb.set_style(style);
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Finish a progress bar with success
pub fn finish_progress_success(pb: ProgressBar, message: &str) {
    pb.finish_with_message(format!("{} {}", "✓".green(), message));
}

/// Finish a progress bar with error
pub fn finish_progress_error(pb: ProgressBar, message: &str) {
    pb.finish_with_message(format!("{} {}", "✗".red(), message));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::UNIX_EPOCH;

    #[test]
    fn test_format_timestamp_is_local_time() {
        let at = UNIX_EPOCH + Duration::from_secs(86400 * 365);
        let formatted = format_timestamp(at);
        assert_eq!(formatted.len(), "1971-01-01 00:00:00".len());
        assert!(formatted.starts_with("197"));
    }
}
