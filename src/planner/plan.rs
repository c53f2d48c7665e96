use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::scanner::targets::{Candidate, CandidateKind};

/// One destructive step of a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RemovalAction {
    /// Remove a localization or keyboard layout directory
    DeleteDirectory { candidate: Candidate },
    /// Rewrite a universal binary without the `remove` slices
    ThinBinary {
        root: usize,
        binary: PathBuf,
        remove: Vec<Candidate>,
        keep: Vec<Candidate>,
    },
}

impl RemovalAction {
    pub fn path(&self) -> &Path {
        match self {
            RemovalAction::DeleteDirectory { candidate } => &candidate.path,
            RemovalAction::ThinBinary { binary, .. } => binary,
        }
    }

    pub fn root(&self) -> usize {
        match self {
            RemovalAction::DeleteDirectory { candidate } => candidate.root,
            RemovalAction::ThinBinary { root, .. } => *root,
        }
    }

    pub fn kind(&self) -> CandidateKind {
        match self {
            RemovalAction::DeleteDirectory { candidate } => candidate.kind,
            RemovalAction::ThinBinary { .. } => CandidateKind::ArchitectureSlice,
        }
    }

    /// Bytes this action is expected to free: the directory size, or the
    /// sum of the stripped slices (never the whole binary)
    pub fn reclaimable_bytes(&self) -> u64 {
        match self {
            RemovalAction::DeleteDirectory { candidate } => candidate.size_bytes,
            RemovalAction::ThinBinary { remove, .. } => remove.iter().map(|c| c.size_bytes).sum(),
        }
    }

    /// Tags removed by this action, comma-separated
    pub fn tags(&self) -> String {
        match self {
            RemovalAction::DeleteDirectory { candidate } => candidate.tag.clone(),
            RemovalAction::ThinBinary { remove, .. } => join_tags(remove),
        }
    }
}

/// Why the planner refused to remove something
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VetoReason {
    /// Removing it would leave the bundle with no localization at all
    LastLocalization,
    /// Thinning would leave the binary with no architecture at all
    AllArchitectures,
}

impl std::fmt::Display for VetoReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VetoReason::LastLocalization => write!(f, "last remaining localization of bundle"),
            VetoReason::AllArchitectures => write!(f, "would remove all architectures"),
        }
    }
}

/// A candidate kept despite not being in the keep-set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanVeto {
    pub root: usize,
    pub path: PathBuf,
    pub kind: CandidateKind,
    pub tag: String,
    pub reason: VetoReason,
}

/// The reviewed, ordered list of what an execution will do
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovalPlan {
    pub actions: Vec<RemovalAction>,
    pub vetoes: Vec<PlanVeto>,
    pub reclaimable_bytes: u64,
}

impl RemovalPlan {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub(super) fn push(&mut self, action: RemovalAction) {
        self.reclaimable_bytes += action.reclaimable_bytes();
        self.actions.push(action);
    }

    pub fn count(&self, kind: CandidateKind) -> usize {
        self.actions.iter().filter(|a| a.kind() == kind).count()
    }

    pub fn bytes_for(&self, kind: CandidateKind) -> u64 {
        self.actions
            .iter()
            .filter(|a| a.kind() == kind)
            .map(RemovalAction::reclaimable_bytes)
            .sum()
    }
}

pub(super) fn join_tags(candidates: &[Candidate]) -> String {
    candidates
        .iter()
        .map(|c| c.tag.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
