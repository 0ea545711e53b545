// Status reporting - renders unit snapshots for people and for logs

use crate::process::{ProcessState, ProcessStatus};
use colored::*;
use std::time::Duration;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};
use tracing::{info, warn};

/// Something that presents a set of unit snapshots
pub trait StatusReporter {
    fn report(&self, states: &[ProcessState]);
}

/// Prints a table to stdout
#[derive(Debug, Clone, Copy, Default)]
pub struct TableReporter;

/// Emits one tracing line per unit
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "PID")]
    pid: String,
    #[tabled(rename = "Uptime")]
    uptime: String,
    #[tabled(rename = "Restarts")]
    restarts: String,
    #[tabled(rename = "Last Exit")]
    last_exit: String,
}

impl TableReporter {
    /// Render the table without printing it
    pub fn render(&self, states: &[ProcessState]) -> String {
        let rows: Vec<StatusRow> = states
            .iter()
            .map(|s| StatusRow {
                name: truncate(&s.name, 24),
                status: format_status_colored(s.status),
                pid: s
                    .pid
                    .map(|pid| pid.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                uptime: s
                    .uptime()
                    .map(|d| format_duration(&d))
                    .unwrap_or_else(|| "-".to_string()),
                restarts: s.restart_count.to_string(),
                last_exit: s
                    .last_exit
                    .as_ref()
                    .map(|e| truncate(&e.to_string(), 32))
                    .unwrap_or_else(|| "-".to_string()),
            })
            .collect();

        let mut table = Table::new(rows);
        table
            .with(Style::rounded())
            .with(Modify::new(Rows::first()).with(Alignment::center()));

        table.to_string()
    }
}

impl StatusReporter for TableReporter {
    fn report(&self, states: &[ProcessState]) {
        if states.is_empty() {
            println!("{}", "No processes are configured".yellow());
            return;
        }

        println!("\n{}\n", self.render(states));
        println!(
            "{}",
            format!("Total: {} process(es)", states.len())
                .dimmed()
                .italic()
        );
    }
}

impl StatusReporter for LogReporter {
    fn report(&self, states: &[ProcessState]) {
        for state in states {
            let uptime = state.uptime().map(|d| format_duration(&d));
            let last_exit = state.last_exit.as_ref().map(ToString::to_string);

            match state.status {
                ProcessStatus::Crashed | ProcessStatus::Restarting => warn!(
                    process = %state.name,
                    status = %state.status,
                    restarts = state.restart_count,
                    last_exit = ?last_exit,
                    "process status"
                ),
                _ => info!(
                    process = %state.name,
                    status = %state.status,
                    pid = ?state.pid,
                    uptime = ?uptime,
                    restarts = state.restart_count,
                    "process status"
                ),
            }
        }
    }
}

/// Format a unit status with color coding
pub fn format_status_colored(status: ProcessStatus) -> String {
    match status {
        ProcessStatus::Running => status.to_string().green().to_string(),
        ProcessStatus::Starting | ProcessStatus::Restarting => {
            status.to_string().yellow().to_string()
        }
        ProcessStatus::Stopped | ProcessStatus::Halted => {
            status.to_string().bright_black().to_string()
        }
        ProcessStatus::Crashed => status.to_string().red().bold().to_string(),
    }
}

/// Format a duration in human-readable format
pub fn format_duration(duration: &Duration) -> String {
    let secs = duration.as_secs();

    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        let mins = secs / 60;
        let secs = secs % 60;
        if secs > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}m", mins)
        }
    } else if secs < 86400 {
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        if mins > 0 {
            format!("{}h {}m", hours, mins)
        } else {
            format!("{}h", hours)
        }
    } else {
        let days = secs / 86400;
        let hours = (secs % 86400) / 3600;
        if hours > 0 {
            format!("{}d {}h", days, hours)
        } else {
            format!("{}d", days)
        }
    }
}

/// Truncate a string to at most `max_len` characters
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ExitResult;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(&Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(&Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(&Duration::from_secs(3700)), "1h 1m");
        assert_eq!(format_duration(&Duration::from_secs(90000)), "1d 1h");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("this is a very long string", 10), "this is...");
        assert_eq!(truncate("ünïcödé-näme", 8), "ünïcö...");
    }

    #[test]
    fn test_table_lists_every_unit() {
        colored::control::set_override(false);

        let running = ProcessState {
            pid: Some(4242),
            status: ProcessStatus::Running,
            last_started_at: Some(std::time::SystemTime::now()),
            ..ProcessState::new("api")
        };
        let crashed = ProcessState {
            status: ProcessStatus::Crashed,
            last_exit: Some(ExitResult::Exited(3)),
            restart_count: 7,
            ..ProcessState::new("worker")
        };

        let table = TableReporter.render(&[running, crashed]);
        assert!(table.contains("api"));
        assert!(table.contains("4242"));
        assert!(table.contains("running"));
        assert!(table.contains("worker"));
        assert!(table.contains("crashed"));
        assert!(table.contains("exit code 3"));
        assert!(table.contains('7'));
    }
}
