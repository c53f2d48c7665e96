pub mod classifier;
pub mod macho;
pub mod targets;
pub mod walker;

use rayon::prelude::*;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

use crate::common::config::Config;
use crate::common::errors::FatalSetupError;
use crate::common::permissions;
use classifier::ClassifyOptions;
use targets::{RootTarget, ScanResults};
pub use walker::Scan;

/// Where to look and what to skip
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    pub classify: ClassifyOptions,
    /// Substrings of paths that are never entered
    pub exclude_paths: Vec<String>,
    /// `CFBundleIdentifier`s of bundles that are never entered
    pub bundle_blacklist: HashSet<String>,
}

impl ScanOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            classify: ClassifyOptions {
                collapse_regions: config.collapse_regions,
            },
            exclude_paths: config.exclude_paths.clone(),
            bundle_blacklist: config.bundle_blacklist.iter().cloned().collect(),
        }
    }

    pub fn is_excluded(&self, path: &Path) -> bool {
        if self.exclude_paths.is_empty() {
            return false;
        }
        let path_str = path.to_string_lossy();
        self.exclude_paths.iter().any(|p| path_str.contains(p.as_str()))
    }

    /// Whether `path` is a bundle whose identifier is blacklisted
    pub fn is_blacklisted_bundle(&self, path: &Path) -> bool {
        if self.bundle_blacklist.is_empty() || !classifier::is_bundle_dir(path) {
            return false;
        }
        bundle_identifier(path)
            .map(|id| self.bundle_blacklist.contains(&id))
            .unwrap_or(false)
    }
}

/// Read `CFBundleIdentifier` from a bundle's Info.plist
pub fn bundle_identifier(bundle: &Path) -> Option<String> {
    const INFO_PLISTS: &[&str] = &["Contents/Info.plist", "Resources/Info.plist", "Info.plist"];

    INFO_PLISTS.iter().find_map(|rel| {
        let plist_path = bundle.join(rel);
        if !plist_path.is_file() {
            return None;
        }
        let value = plist::Value::from_file(&plist_path)
            .map_err(|e| debug!(path = %plist_path.display(), error = %e, "unreadable Info.plist"))
            .ok()?;
        value
            .as_dictionary()?
            .get("CFBundleIdentifier")?
            .as_string()
            .map(str::to_string)
    })
}

/// Walks roots and classifies what it finds
#[derive(Debug, Clone, Default)]
pub struct Scanner {
    options: ScanOptions,
}

impl Scanner {
    pub fn new(options: ScanOptions) -> Self {
        Self { options }
    }

    /// Start a lazy scan over `roots`. Each call starts from the beginning.
    pub fn scan<'a>(&'a self, roots: &'a [RootTarget]) -> Scan<'a> {
        Scan::new(roots, 0, &self.options)
    }

    /// Scan every root to completion.
    ///
    /// Roots are walked in parallel but results are concatenated in root
    /// order, so the outcome is identical to a sequential [`Scanner::scan`].
    pub fn scan_all(&self, roots: &[RootTarget]) -> Result<ScanResults, FatalSetupError> {
        check_roots(roots)?;
        let start = Instant::now();

        let per_root: Vec<_> = roots
            .par_iter()
            .enumerate()
            .map(|(index, root)| {
                let mut scan = Scan::new(std::slice::from_ref(root), index, &self.options);
                let candidates: Vec<_> = scan.by_ref().collect();
                (candidates, scan.into_warnings())
            })
            .collect();

        let mut results = ScanResults::default();
        for (candidates, warnings) in per_root {
            results.candidates.extend(candidates);
            results.warnings.extend(warnings);
        }
        results.duration_secs = start.elapsed().as_secs_f64();

        info!(
            roots = roots.len(),
            candidates = results.candidates.len(),
            warnings = results.warnings.len(),
            "scan finished"
        );
        Ok(results)
    }
}

/// Fail unless at least one root can be read
pub fn check_roots(roots: &[RootTarget]) -> Result<(), FatalSetupError> {
    if roots.iter().any(|r| permissions::can_read(&r.path)) {
        Ok(())
    } else {
        Err(FatalSetupError::NoReadableRoots {
            roots: roots.iter().map(|r| r.path.clone()).collect(),
        })
    }
}

/// Expand `~` and glob patterns in root paths
pub fn expand_paths(paths: &[String]) -> Vec<PathBuf> {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"));
    let mut expanded = Vec::new();

    for path_str in paths {
        let resolved = if let Some(rest) = path_str.strip_prefix("~/") {
            home.join(rest).to_string_lossy().to_string()
        } else if path_str == "~" {
            home.to_string_lossy().to_string()
        } else {
            path_str.clone()
        };

        if resolved.contains(['*', '?', '[']) {
            if let Ok(entries) = glob::glob(&resolved) {
                let mut matches: Vec<PathBuf> = entries.filter_map(|e| e.ok()).collect();
                matches.sort();
                expanded.extend(matches);
            }
        } else {
            expanded.push(PathBuf::from(resolved));
        }
    }

    expanded
}
