use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::process::ExitCode;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use slimmac::cli::args::{Cli, Commands, CompletionShell, ConfigAction, OutputFormat, Selection};
use slimmac::cli::output;
use slimmac::cli::run::RunConfig;
use slimmac::common::config::Config;
use slimmac::common::errors::SlimError;
use slimmac::common::format;
use slimmac::executor::{self, helper, Executor, RunLog, RunState};
use slimmac::planner::{self, RemovalPlan};
use slimmac::scanner::macho::{self, ClassifyError};
use slimmac::scanner::targets::ScanResults;
use slimmac::scanner::Scanner;

/// Exit status when the run was cancelled, as for SIGINT
const EXIT_CANCELLED: u8 = 130;
/// Exit status when some actions failed
const EXIT_PARTIAL: u8 = 2;

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    // The helper's stdout is the protocol channel, so it logs to a file
    let _guard = match cli.command {
        Commands::Helper => init_helper_logging(),
        _ => {
            init_logging(cli.verbose);
            None
        }
    };

    match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("  {} {:#}", "✗".red(), e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("slimmac=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn init_helper_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_dir = Config::logs_dir();
    if std::fs::create_dir_all(&log_dir).is_err() {
        return None;
    }
    let appender = tracing_appender::rolling::daily(&log_dir, "helper.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("slimmac=info")),
        )
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Some(guard)
}

fn run(cli: &Cli) -> Result<ExitCode> {
    match &cli.command {
        Commands::Scan {
            selection,
            detailed,
        } => cmd_scan(cli, selection, *detailed),

        Commands::Clean {
            selection,
            yes,
            trash,
            elevate,
            strip,
            dry_run,
            no_log,
        } => cmd_clean(
            cli, selection, *yes, *trash, *elevate, *strip, *dry_run, *no_log,
        ),

        Commands::Archs { file } => cmd_archs(cli, file),

        Commands::Helper => {
            let stdin = std::io::stdin().lock();
            let stdout = std::io::stdout().lock();
            helper::serve(stdin, stdout)?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Config { action } => cmd_config(cli, action),

        Commands::Completions { shell } => {
            use clap::CommandFactory;
            let mut cmd = Cli::command();
            let shell = match shell {
                CompletionShell::Bash => clap_complete::Shell::Bash,
                CompletionShell::Zsh => clap_complete::Shell::Zsh,
                CompletionShell::Fish => clap_complete::Shell::Fish,
            };
            clap_complete::generate(shell, &mut cmd, "slimmac", &mut std::io::stdout());
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}

fn human(cli: &Cli) -> bool {
    cli.format == OutputFormat::Human && !cli.quiet
}

// ─── Scan ─────────────────────────────────────────────────────────────────────

fn cmd_scan(cli: &Cli, selection: &Selection, detailed: bool) -> Result<ExitCode> {
    let config = load_config(cli)?;
    let run = RunConfig::new(&config, selection);
    let (results, plan) = scan_and_plan(&run, human(cli))?;

    match cli.format {
        OutputFormat::Human if !cli.quiet => output::print_plan(&results, &plan, detailed),
        OutputFormat::Json => output::print_plan_json(&results, &plan),
        _ => output::print_plan_quiet(&plan),
    }

    Ok(ExitCode::SUCCESS)
}

fn scan_and_plan(run: &RunConfig, show_progress: bool) -> Result<(ScanResults, RemovalPlan)> {
    let spinner = if show_progress {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} Scanning {msg}")
                .unwrap(),
        );
        pb.set_message(format!("{} roots...", run.roots.len()));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        Some(pb)
    } else {
        None
    };

    let scanner = Scanner::new(run.scan.clone());
    let results = scanner.scan_all(&run.roots);

    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }
    let results = results?;

    let plan = planner::plan(results.candidates.iter().cloned(), &run.keep, &run.plan);
    debug!(
        actions = plan.len(),
        vetoes = plan.vetoes.len(),
        bytes = plan.reclaimable_bytes,
        "plan built"
    );
    Ok((results, plan))
}

// ─── Clean ────────────────────────────────────────────────────────────────────

#[allow(clippy::too_many_arguments)]
fn cmd_clean(
    cli: &Cli,
    selection: &Selection,
    yes: bool,
    trash: bool,
    elevate: bool,
    strip: bool,
    dry_run: bool,
    no_log: bool,
) -> Result<ExitCode> {
    let config = load_config(cli)?;
    let run = RunConfig::new(&config, selection).for_clean(&config, trash, elevate, strip, no_log);
    let (results, plan) = scan_and_plan(&run, human(cli))?;

    if human(cli) {
        output::print_plan(&results, &plan, false);
    }

    if plan.is_empty() {
        if cli.format == OutputFormat::Json {
            output::print_plan_json(&results, &plan);
        }
        return Ok(ExitCode::SUCCESS);
    }

    if dry_run {
        match cli.format {
            OutputFormat::Json => output::print_plan_json(&results, &plan),
            OutputFormat::Quiet => output::print_plan_quiet(&plan),
            OutputFormat::Human => println!(
                "  {} Dry run — would remove {} ({}). No files modified.",
                "ℹ️",
                format::format_count(plan.len()),
                format::format_size(plan.reclaimable_bytes)
            ),
        }
        return Ok(ExitCode::SUCCESS);
    }

    // Confirm unless --yes
    if !yes {
        print!(
            "\n  {} {} {} ({})? [y/N] ",
            "❓",
            run.executor.delete_mode.to_string().to_uppercase(),
            format::format_count(plan.len()),
            format::format_size(plan.reclaimable_bytes)
        );
        use std::io::Write;
        std::io::stdout().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        if !input.trim().eq_ignore_ascii_case("y") {
            println!("  {} Cancelled", "✗".red());
            return Ok(ExitCode::SUCCESS);
        }
    }

    let total = plan.len();
    let executor = Executor::new(run.executor.clone());
    let handle = executor::spawn(executor, plan);

    let pb = if human(cli) {
        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.red} [{bar:40.red/blue}] {pos}/{len} Removing... {msg}")
                .unwrap()
                .progress_chars("━━░"),
        );
        Some(pb)
    } else {
        None
    };

    for event in handle.events.iter() {
        if let Some(ref pb) = pb {
            pb.set_message(format::truncate(&format::format_path(&event.path), 40));
            pb.inc(1);
        }
    }
    if let Some(ref pb) = pb {
        pb.finish_and_clear();
    }

    let summary = handle.wait()?;

    if run.log_runs {
        let log = RunLog::new(
            summary.clone(),
            run.executor.delete_mode,
            run.roots.iter().map(|r| r.path.clone()).collect(),
            run.keep.clone(),
        );
        match log.save() {
            Ok(path) => debug!(path = %path.display(), "run logged"),
            Err(e) => warn!(error = %e, "failed to write run log"),
        }
    }

    match cli.format {
        OutputFormat::Human if !cli.quiet => output::print_summary(&summary),
        OutputFormat::Json => output::print_summary_json(&summary),
        _ => output::print_summary_quiet(&summary),
    }

    Ok(match summary.state {
        RunState::Cancelled => ExitCode::from(EXIT_CANCELLED),
        _ if summary.has_failures() => ExitCode::from(EXIT_PARTIAL),
        _ => ExitCode::SUCCESS,
    })
}

// ─── Archs ────────────────────────────────────────────────────────────────────

fn cmd_archs(cli: &Cli, file: &std::path::Path) -> Result<ExitCode> {
    let header = macho::read_fat_header(file).map_err(|e| match e {
        ClassifyError::Io(source) => SlimError::io(file, source),
        ClassifyError::Malformed(message) => SlimError::InvalidBinary {
            path: file.to_path_buf(),
            message,
        },
    })?;

    match cli.format {
        OutputFormat::Human if !cli.quiet => output::print_archs(file, header.as_ref()),
        OutputFormat::Json => {
            let arches: Vec<_> = header
                .iter()
                .flat_map(|h| h.arches.iter())
                .map(|s| {
                    serde_json::json!({
                        "name": s.arch_name(),
                        "cputype": s.cputype,
                        "cpusubtype": s.cpusubtype,
                        "offset": s.offset,
                        "size": s.size,
                        "align": s.align,
                    })
                })
                .collect();
            let json = serde_json::json!({
                "path": file,
                "universal": header.is_some(),
                "fat64": header.as_ref().map(|h| h.is_64),
                "architectures": arches,
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        _ => {
            let names: Vec<String> = header
                .iter()
                .flat_map(|h| h.arches.iter())
                .map(|s| s.arch_name())
                .collect();
            println!("{}", names.join(" "));
        }
    }

    Ok(ExitCode::SUCCESS)
}

// ─── Config ───────────────────────────────────────────────────────────────────

fn cmd_config(cli: &Cli, action: &ConfigAction) -> Result<ExitCode> {
    match action {
        ConfigAction::Show => {
            let config = load_config(cli)?;
            println!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigAction::Path => {
            let path = cli.config.clone().unwrap_or_else(Config::config_path);
            println!("{}", path.display());
        }
    }
    Ok(ExitCode::SUCCESS)
}
