use colored::*;

use crate::executor::{ActionOutcome, RunState};
use crate::scanner::targets::CandidateKind;

/// Format bytes into human-readable size string
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.2} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Format size with color based on magnitude
pub fn format_size_colored(bytes: u64) -> ColoredString {
    let s = format_size(bytes);
    const GB: u64 = 1024 * 1024 * 1024;
    const MB100: u64 = 100 * 1024 * 1024;

    if bytes >= GB {
        s.red().bold()
    } else if bytes >= MB100 {
        s.yellow()
    } else {
        s.white()
    }
}

/// Format an action count with appropriate plural
pub fn format_count(count: usize) -> String {
    if count == 1 {
        "1 action".to_string()
    } else {
        format!("{} actions", count)
    }
}

/// Format a path for display, replacing home directory with ~
pub fn format_path(path: &std::path::Path) -> String {
    if let Some(home) = dirs::home_dir() {
        if let Ok(stripped) = path.strip_prefix(&home) {
            return format!("~/{}", stripped.display());
        }
    }
    path.display().to_string()
}

/// Format duration in human-readable form
pub fn format_duration(secs: f64) -> String {
    if secs < 1.0 {
        format!("{:.0}ms", secs * 1000.0)
    } else if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        let mins = (secs / 60.0).floor() as u64;
        let remaining = secs - (mins as f64 * 60.0);
        format!("{}m {:.0}s", mins, remaining)
    }
}

/// Colorize a candidate kind label
pub fn format_kind(kind: CandidateKind) -> ColoredString {
    match kind {
        CandidateKind::Locale => "Language".cyan(),
        CandidateKind::Layout => "Layout".magenta(),
        CandidateKind::ArchitectureSlice => "Architecture".blue(),
    }
}

/// Colorize an action outcome
pub fn format_outcome(outcome: &ActionOutcome) -> ColoredString {
    match outcome {
        ActionOutcome::Succeeded { .. } => "ok".green(),
        ActionOutcome::Skipped { .. } => "skipped".yellow(),
        ActionOutcome::Failed { .. } => "failed".red().bold(),
    }
}

/// Colorize the final run state
pub fn format_state(state: RunState) -> ColoredString {
    match state {
        RunState::Completed => "Completed".green().bold(),
        RunState::Cancelled => "Cancelled".yellow().bold(),
        RunState::Failed => "Failed".red().bold(),
        RunState::Idle | RunState::Running => format!("{:?}", state).normal(),
    }
}

/// Print a section header
pub fn print_header(title: &str) {
    println!();
    println!("{}", title.bold().underline());
    println!();
}

/// Print a key-value pair
pub fn print_kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// Truncate a string to max length with ellipsis
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        ".".repeat(max_len)
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}
