use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::macho::SliceRange;

// ─── Core types ───────────────────────────────────────────────────────────────

/// A directory tree to scan, with the kinds of resources to look for in it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootTarget {
    pub path: PathBuf,
    #[serde(default = "default_true")]
    pub languages: bool,
    #[serde(default = "default_true")]
    pub layouts: bool,
    #[serde(default = "default_true")]
    pub architectures: bool,
}

fn default_true() -> bool {
    true
}

impl RootTarget {
    /// A root with every candidate kind enabled
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            languages: true,
            layouts: true,
            architectures: true,
        }
    }

    pub fn enables(&self, kind: CandidateKind) -> bool {
        match kind {
            CandidateKind::Locale => self.languages,
            CandidateKind::Layout => self.layouts,
            CandidateKind::ArchitectureSlice => self.architectures,
        }
    }
}

/// What kind of prunable item a candidate is
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum CandidateKind {
    /// A `*.lproj` localization directory
    Locale,
    /// A keyboard layout bundle
    Layout,
    /// One architecture inside a universal binary
    ArchitectureSlice,
}

impl std::fmt::Display for CandidateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CandidateKind::Locale => write!(f, "Language"),
            CandidateKind::Layout => write!(f, "Keyboard Layout"),
            CandidateKind::ArchitectureSlice => write!(f, "Architecture"),
        }
    }
}

/// A discovered prunable item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    /// Index of the root this was found under
    pub root: usize,
    /// The directory, or the containing binary for architecture slices
    pub path: PathBuf,
    pub kind: CandidateKind,
    /// Language code, layout name or architecture name
    pub tag: String,
    pub size_bytes: u64,
    /// Position of the slice in its binary (architecture slices only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slice: Option<SliceRange>,
}

impl Candidate {
    /// The unit the planner reasons about as a whole: the `Resources`
    /// directory for locales, the binary for slices, the bundle itself for
    /// layouts.
    pub fn group(&self) -> &Path {
        match self.kind {
            CandidateKind::Locale => self.path.parent().unwrap_or(&self.path),
            CandidateKind::Layout | CandidateKind::ArchitectureSlice => &self.path,
        }
    }
}

/// A non-fatal problem found while scanning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanWarning {
    pub path: PathBuf,
    pub message: String,
}

impl std::fmt::Display for ScanWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.message)
    }
}

/// Everything a complete scan produced
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanResults {
    pub candidates: Vec<Candidate>,
    pub warnings: Vec<ScanWarning>,
    pub duration_secs: f64,
}

impl ScanResults {
    pub fn count(&self, kind: CandidateKind) -> usize {
        self.candidates.iter().filter(|c| c.kind == kind).count()
    }
}
