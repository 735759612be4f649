// Output formatting for the final slot summary

use crate::error::{Result, WardenError};
use crate::manager::SlotReport;
use chrono::{DateTime, Local, Utc};
use colored::*;
use std::time::Duration;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

#[derive(Tabled)]
struct SlotRow {
    #[tabled(rename = "Slot")]
    index: usize,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Last PID")]
    pid: String,
    #[tabled(rename = "Spawns")]
    spawns: u64,
    #[tabled(rename = "Last Spawn")]
    last_spawn: String,
    #[tabled(rename = "Uptime")]
    uptime: String,
}

/// Print the slot summary as a table
pub fn print_summary(reports: &[SlotReport]) {
    if reports.is_empty() {
        println!("{}", "No worker slots were supervised".yellow());
        return;
    }

    println!("\n{}\n", render_table(reports, Utc::now()));

    let spawns: u64 = reports.iter().map(|r| r.spawn_count).sum();
    println!(
        "{}",
        format!("Total: {} slot(s), {} spawn(s)", reports.len(), spawns)
            .dimmed()
            .italic()
    );
}

/// Print the slot summary as pretty JSON
pub fn print_json(reports: &[SlotReport]) -> Result<()> {
    let json = serde_json::to_string_pretty(reports)
        .map_err(|e| WardenError::Internal(format!("Failed to serialize summary: {}", e)))?;
    println!("{}", json);
    Ok(())
}

fn render_table(reports: &[SlotReport], now: DateTime<Utc>) -> String {
    let rows: Vec<SlotRow> = reports
        .iter()
        .map(|r| SlotRow {
            index: r.index,
            name: r.name.clone(),
            pid: r
                .pid
                .map(|pid| pid.to_string())
                .unwrap_or_else(|| "-".to_string()),
            spawns: r.spawn_count,
            last_spawn: r
                .last_spawned_at
                .map(format_timestamp)
                .unwrap_or_else(|| "never".to_string()),
            uptime: format_duration(&(now - r.created_at).to_std().unwrap_or_default()),
        })
        .collect();

    let mut table = Table::new(rows);
    table
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()));
    table.to_string()
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    let local: DateTime<Local> = at.into();
    local.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Format a duration in human-readable format
fn format_duration(duration: &Duration) -> String {
    let secs = duration.as_secs();

    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}
