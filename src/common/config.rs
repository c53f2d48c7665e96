use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::planner::KeepSet;
use crate::scanner::classifier::canonical_locale;
use crate::scanner::targets::RootTarget;

/// Global slimmac configuration, read from `~/.slimmac/config.toml`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directories to scan when none are given on the command line
    #[serde(default = "default_roots")]
    pub roots: Vec<RootTarget>,

    /// Localizations to keep (lproj tags)
    #[serde(default = "default_keep_languages")]
    pub keep_languages: Vec<String>,

    /// Keyboard layouts to keep
    #[serde(default)]
    pub keep_layouts: Vec<String>,

    /// Architectures to keep in universal binaries
    #[serde(default = "default_keep_architectures")]
    pub keep_architectures: Vec<String>,

    /// Locales preserved, in order of preference, when a bundle would
    /// otherwise lose every localization
    #[serde(default = "default_fallback_languages")]
    pub fallback_languages: Vec<String>,

    /// Treat `pt_BR` and `en-GB` as `pt` and `en`
    #[serde(default)]
    pub collapse_regions: bool,

    /// Paths to exclude from scanning (substring match)
    #[serde(default)]
    pub exclude_paths: Vec<String>,

    /// Bundle identifiers that are never touched
    #[serde(default)]
    pub bundle_blacklist: Vec<String>,

    /// How removed directories are disposed of
    #[serde(default)]
    pub delete_mode: DeleteMode,

    /// Command used to launch the privileged helper, e.g. `["sudo", "-n", "/usr/local/bin/slimmac", "helper"]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helper_command: Option<Vec<String>>,

    /// Append a JSON line per executed run to the logs directory
    #[serde(default = "default_true")]
    pub log_runs: bool,

    /// Run `strip -S` over every binary after thinning it
    #[serde(default)]
    pub strip_debug_symbols: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeleteMode {
    /// Remove directories permanently
    #[default]
    Delete,
    /// Move directories into the user's Trash
    Trash,
}

impl std::fmt::Display for DeleteMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeleteMode::Delete => write!(f, "delete"),
            DeleteMode::Trash => write!(f, "trash"),
        }
    }
}

fn default_roots() -> Vec<RootTarget> {
    vec![
        RootTarget::new("/Applications"),
        RootTarget::new("/Library"),
        RootTarget {
            path: PathBuf::from("/System/Library/Keyboard Layouts"),
            languages: false,
            layouts: true,
            architectures: false,
        },
    ]
}
fn default_keep_languages() -> Vec<String> {
    vec!["en".to_string(), "Base".to_string()]
}
fn default_keep_architectures() -> Vec<String> {
    vec![host_architecture().to_string()]
}
fn default_fallback_languages() -> Vec<String> {
    vec!["en".to_string(), "English".to_string(), "Base".to_string()]
}
fn default_true() -> bool {
    true
}

/// Mach-O name of the architecture this process runs on
pub fn host_architecture() -> &'static str {
    match std::env::consts::ARCH {
        "aarch64" => "arm64",
        "x86" => "i386",
        "powerpc" => "ppc",
        "powerpc64" => "ppc64",
        other => other,
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            roots: default_roots(),
            keep_languages: default_keep_languages(),
            keep_layouts: Vec::new(),
            keep_architectures: default_keep_architectures(),
            fallback_languages: default_fallback_languages(),
            collapse_regions: false,
            exclude_paths: Vec::new(),
            bundle_blacklist: Vec::new(),
            delete_mode: DeleteMode::Delete,
            helper_command: None,
            log_runs: true,
            strip_debug_symbols: false,
        }
    }
}

impl Config {
    /// Get the slimmac data directory (~/.slimmac)
    pub fn data_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".slimmac")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        Self::data_dir().join("config.toml")
    }

    /// Get the logs directory
    pub fn logs_dir() -> PathBuf {
        Self::data_dir().join("logs")
    }

    /// Get the user's Trash directory
    pub fn trash_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".Trash")
    }

    /// Load config from the default location, or defaults if it does not exist
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load config from a specific file, or defaults if it does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config: {}", path.display()))?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Build the keep-set from the configured tag lists.
    /// Language tags go through the same canonicalization as scanned lproj names.
    pub fn keep_set(&self) -> KeepSet {
        KeepSet::new(
            self.keep_languages
                .iter()
                .map(|l| canonical_locale(l, self.collapse_regions)),
            self.keep_layouts.iter().cloned(),
            self.keep_architectures.iter().cloned(),
        )
    }
}
