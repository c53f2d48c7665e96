use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// slimmac — Strip unused localizations, keyboard layouts and architectures
#[derive(Parser, Debug)]
#[command(
    name = "slimmac",
    version,
    about = "Reclaim disk space from unused localizations, keyboard layouts and architectures",
    long_about = "slimmac finds language resources, keyboard layouts and CPU architecture\n\
                   slices you do not use and removes them. Scanning never modifies anything;\n\
                   cleaning shows the plan and asks before touching a file.",
    after_help = "EXAMPLES:\n  \
        slimmac scan                                   Preview with configured roots\n  \
        slimmac scan /Applications --keep-lang en,fr   Keep English and French\n  \
        slimmac scan --no-architectures --format json  Languages and layouts only, as JSON\n  \
        slimmac clean --trash                          Move removed bundles to the Trash\n  \
        slimmac clean --elevate -y                     Use sudo for unwritable targets\n  \
        slimmac archs /Applications/Foo.app/Contents/MacOS/Foo\n  \
        slimmac config show                            Show effective configuration"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output format
    #[arg(long, global = true, default_value = "human")]
    pub format: OutputFormat,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Verbose output (debug logging on stderr)
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Quiet mode — minimal output
    #[arg(long, short, global = true)]
    pub quiet: bool,

    /// Use this config file instead of ~/.slimmac/config.toml
    #[arg(long, global = true, value_name = "FILE", env = "SLIMMAC_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scan and show what would be removed (never modifies anything)
    Scan {
        #[command(flatten)]
        selection: Selection,

        /// List every action instead of per-bundle totals
        #[arg(long)]
        detailed: bool,
    },

    /// Remove everything the plan lists
    Clean {
        #[command(flatten)]
        selection: Selection,

        /// Skip confirmation prompt
        #[arg(long, short = 'y')]
        yes: bool,

        /// Move removed directories to the Trash instead of deleting them
        #[arg(long)]
        trash: bool,

        /// Hand targets this user cannot modify to the privileged helper
        #[arg(long)]
        elevate: bool,

        /// Strip debug symbols from binaries after thinning them
        #[arg(long)]
        strip: bool,

        /// Simulate — show the plan and exit
        #[arg(long)]
        dry_run: bool,

        /// Do not append this run to the run log
        #[arg(long)]
        no_log: bool,
    },

    /// Show the architecture table of a universal binary
    Archs {
        /// Binary to inspect
        file: PathBuf,
    },

    /// Run the privileged worker on stdin/stdout
    #[command(hide = true)]
    Helper,

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: CompletionShell,
    },
}

/// What to scan and what to keep, shared by `scan` and `clean`
#[derive(Args, Debug, Clone, Default)]
pub struct Selection {
    /// Directories to scan (defaults to the configured roots)
    #[arg(value_name = "ROOT")]
    pub roots: Vec<String>,

    /// Languages to keep, e.g. en,fr,Base
    #[arg(long, value_delimiter = ',', value_name = "TAGS")]
    pub keep_lang: Option<Vec<String>>,

    /// Keyboard layouts to keep
    #[arg(long, value_delimiter = ',', value_name = "NAMES")]
    pub keep_layout: Option<Vec<String>>,

    /// Architectures to keep, e.g. arm64,x86_64
    #[arg(long, value_delimiter = ',', value_name = "ARCHS")]
    pub keep_arch: Option<Vec<String>>,

    /// Do not look for localizations
    #[arg(long)]
    pub no_languages: bool,

    /// Do not look for keyboard layouts
    #[arg(long)]
    pub no_layouts: bool,

    /// Do not look for removable architectures
    #[arg(long)]
    pub no_architectures: bool,

    /// Treat regional variants (pt_BR, en-GB) as their base language
    #[arg(long)]
    pub collapse_regions: bool,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show,

    /// Print the config file location
    Path,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Human,
    Json,
    Quiet,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_keep_lists_split_on_commas() {
        let cli = Cli::parse_from(["slimmac", "scan", "/Applications", "--keep-lang", "en,fr"]);
        match cli.command {
            Commands::Scan { selection, .. } => {
                assert_eq!(selection.roots, vec!["/Applications"]);
                assert_eq!(selection.keep_lang, Some(vec!["en".to_string(), "fr".to_string()]));
                assert!(selection.keep_arch.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["slimmac", "clean", "-y", "--format", "json", "--trash"]);
        assert_eq!(cli.format, OutputFormat::Json);
        assert!(matches!(cli.command, Commands::Clean { yes: true, trash: true, .. }));
    }

    #[test]
    fn test_clean_strip_flag() {
        let cli = Cli::parse_from(["slimmac", "clean", "--strip"]);
        assert!(matches!(cli.command, Commands::Clean { strip: true, trash: false, .. }));
    }
}
