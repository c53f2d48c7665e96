use colored::*;
use std::path::Path;

use crate::common::format::{self, format_path, format_size, format_size_colored};
use crate::executor::{ActionOutcome, ExecutionSummary};
use crate::planner::{RemovalAction, RemovalPlan};
use crate::scanner::macho::FatHeader;
use crate::scanner::targets::{CandidateKind, ScanResults};

const KINDS: [CandidateKind; 3] = [
    CandidateKind::Locale,
    CandidateKind::Layout,
    CandidateKind::ArchitectureSlice,
];

/// Actions listed per kind when not running with --detailed
const PREVIEW_LIMIT: usize = 10;

/// Print the removal plan in human-readable format
pub fn print_plan(results: &ScanResults, plan: &RemovalPlan, detailed: bool) {
    println!();
    println!("{}  slimmac Removal Plan", "🪶");
    println!("{}", "─".repeat(60).dimmed());
    println!(
        "  Scanned in {}  •  {} reclaimable  •  {}",
        format::format_duration(results.duration_secs).cyan(),
        format_size_colored(plan.reclaimable_bytes),
        format::format_count(plan.len()).dimmed()
    );
    println!("{}", "─".repeat(60).dimmed());
    println!();

    if plan.is_empty() {
        println!("  {} Nothing to remove!", "✨");
    }

    for kind in KINDS {
        let actions: Vec<&RemovalAction> = plan.actions.iter().filter(|a| a.kind() == kind).collect();
        if actions.is_empty() {
            continue;
        }
        println!(
            "  {} {} ({})",
            "●".green(),
            format::format_kind(kind).bold(),
            format_size_colored(plan.bytes_for(kind))
        );
        println!();

        let shown = if detailed { actions.len() } else { PREVIEW_LIMIT };
        for action in actions.iter().take(shown) {
            print_action(action);
        }
        if actions.len() > shown {
            println!(
                "    {} ... and {} more (use {} to list all)",
                "•".dimmed(),
                (actions.len() - shown).to_string().dimmed(),
                "--detailed".cyan()
            );
        }
        println!();
    }

    if !plan.vetoes.is_empty() {
        println!(
            "  {} {}",
            "🛡".to_string(),
            format!("{} kept for safety:", plan.vetoes.len()).yellow()
        );
        for veto in plan.vetoes.iter().take(if detailed { usize::MAX } else { PREVIEW_LIMIT }) {
            println!(
                "    {} {} {} ({})",
                "→".dimmed(),
                veto.tag.yellow(),
                format::truncate(&format_path(&veto.path), 60).dimmed(),
                veto.reason.to_string().dimmed()
            );
        }
        println!();
    }

    if !results.warnings.is_empty() {
        println!(
            "  {} {}",
            "⚠".yellow(),
            format!("{} warnings:", results.warnings.len()).yellow()
        );
        for warning in results.warnings.iter().take(if detailed { usize::MAX } else { PREVIEW_LIMIT }) {
            println!("    {} {}", "→".dimmed(), warning.to_string().dimmed());
        }
        println!();
    }

    println!("{}", "─".repeat(60).dimmed());
    println!(
        "  {} Total reclaimable: {}",
        "💾".to_string(),
        format_size_colored(plan.reclaimable_bytes)
    );
    if !plan.is_empty() {
        println!("  {} Run {} to apply", "💡".to_string(), "slimmac clean".cyan());
    }
    println!();
}

fn print_action(action: &RemovalAction) {
    let tags = action.tags();
    println!(
        "    {:<20} {:>10}  {}",
        format::truncate(&tags, 20),
        format_size(action.reclaimable_bytes()),
        format::truncate(&format_path(action.path()), 70).dimmed()
    );
    if let RemovalAction::ThinBinary { keep, .. } = action {
        let kept: Vec<&str> = keep.iter().map(|c| c.tag.as_str()).collect();
        println!("      {} keeps {}", "↳".dimmed(), kept.join(", ").dimmed());
    }
}

/// Print scan results and plan as one JSON document
pub fn print_plan_json(results: &ScanResults, plan: &RemovalPlan) {
    let json = serde_json::json!({
        "duration_secs": results.duration_secs,
        "candidates": results.candidates.len(),
        "warnings": results.warnings,
        "plan": plan,
    });
    match serde_json::to_string_pretty(&json) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing plan: {}", e),
    }
}

/// Print a minimal summary
pub fn print_plan_quiet(plan: &RemovalPlan) {
    println!(
        "{}  {}  {}",
        format_size(plan.reclaimable_bytes),
        plan.len(),
        plan.vetoes.len()
    );
}

/// Print the outcome of an execution
pub fn print_summary(summary: &ExecutionSummary) {
    println!();
    println!(
        "  {} {} — {} removed, {}",
        "✓".green(),
        format::format_state(summary.state),
        summary.succeeded.to_string().cyan(),
        format_size_colored(summary.bytes_reclaimed),
    );
    println!(
        "    {} skipped  •  {} failed{}",
        summary.skipped.to_string().yellow(),
        summary.failed.to_string().red(),
        if summary.not_started > 0 {
            format!("  •  {} not started", summary.not_started)
        } else {
            String::new()
        }
    );
    println!("  {} Run: {}", "💾", summary.run_id.to_string().dimmed());

    if !summary.details.is_empty() {
        println!();
        for (i, detail) in summary.details.iter().enumerate() {
            let reason = match &detail.outcome {
                ActionOutcome::Skipped { reason } | ActionOutcome::Failed { reason } => reason.as_str(),
                ActionOutcome::Succeeded { .. } => "",
            };
            println!(
                "    {} {:<8} {} {}",
                format!("{}.", i + 1).dimmed(),
                format::format_outcome(&detail.outcome),
                format::truncate(&format_path(&detail.path), 60),
                format!("({}: {})", detail.tags, reason).dimmed()
            );
        }
    }
    println!();
}

/// Print the outcome of an execution as JSON
pub fn print_summary_json(summary: &ExecutionSummary) {
    match serde_json::to_string_pretty(summary) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing summary: {}", e),
    }
}

/// Print a minimal summary
pub fn print_summary_quiet(summary: &ExecutionSummary) {
    println!(
        "{}  {}  {}  {}",
        format_size(summary.bytes_reclaimed),
        summary.succeeded,
        summary.skipped,
        summary.failed
    );
}

/// Print the architecture table of a binary
pub fn print_archs(path: &Path, header: Option<&FatHeader>) {
    format::print_header(&format_path(path));
    match header {
        None => println!("  {} not a universal binary", "ℹ️"),
        Some(header) => {
            format::print_kv("Fat header", if header.is_64 { "64-bit" } else { "32-bit" });
            format::print_kv("Architectures", &header.arches.len().to_string());
            println!();
            for slice in &header.arches {
                println!(
                    "    {:<10} {:>10}  offset {:<10} align 2^{}",
                    slice.arch_name().cyan(),
                    format_size(slice.size),
                    slice.offset,
                    slice.align
                );
            }
        }
    }
    println!();
}
