//! Turns scanned candidates and a keep-set into a removal plan.
//!
//! Two invariants are enforced here and never relaxed:
//! - a bundle keeps at least one localization
//! - a universal binary keeps at least one architecture

pub mod keep;
pub mod plan;

pub use keep::KeepSet;
pub use plan::{PlanVeto, RemovalAction, RemovalPlan, VetoReason};

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::common::config::Config;
use crate::scanner::classifier::canonical_locale;
use crate::scanner::targets::{Candidate, CandidateKind};

/// Planner settings that are not part of the keep-set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanOptions {
    /// Locale tags, in order of preference, force-kept when a bundle would
    /// otherwise lose every localization
    pub fallback_languages: Vec<String>,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            fallback_languages: vec!["en".to_string(), "Base".to_string()],
        }
    }
}

impl PlanOptions {
    pub fn from_config(config: &Config) -> Self {
        let mut fallback: Vec<String> = Vec::new();
        for lang in &config.fallback_languages {
            let tag = canonical_locale(lang, config.collapse_regions);
            if !fallback.contains(&tag) {
                fallback.push(tag);
            }
        }
        Self {
            fallback_languages: fallback,
        }
    }
}

#[derive(Default)]
struct RootBucket {
    locales: Vec<Candidate>,
    layouts: Vec<Candidate>,
    slices: Vec<Candidate>,
}

/// Build a removal plan.
///
/// The candidate list must be complete for every bundle it mentions; the
/// fallback rule cannot be decided on a partial view of a bundle.
/// Actions are ordered by root, then kind, then scan order. A path (or
/// slice) reached through several overlapping roots is planned once,
/// under the first of them.
pub fn plan<I>(candidates: I, keep: &KeepSet, options: &PlanOptions) -> RemovalPlan
where
    I: IntoIterator<Item = Candidate>,
{
    let mut candidates: Vec<Candidate> = candidates.into_iter().collect();
    candidates.sort_by_key(|c| c.root);

    let mut seen = HashSet::new();
    let mut buckets: BTreeMap<usize, RootBucket> = BTreeMap::new();
    for candidate in candidates {
        if !seen.insert((candidate.path.clone(), candidate.slice)) {
            debug!(path = %candidate.path.display(), root = candidate.root, "duplicate from overlapping root");
            continue;
        }
        let bucket = buckets.entry(candidate.root).or_default();
        match candidate.kind {
            CandidateKind::Locale => bucket.locales.push(candidate),
            CandidateKind::Layout => bucket.layouts.push(candidate),
            CandidateKind::ArchitectureSlice => bucket.slices.push(candidate),
        }
    }

    let mut removal = RemovalPlan::default();
    for bucket in buckets.into_values() {
        plan_locales(bucket.locales, keep, options, &mut removal);
        plan_layouts(bucket.layouts, keep, &mut removal);
        plan_slices(bucket.slices, keep, &mut removal);
    }

    debug!(
        actions = removal.actions.len(),
        vetoes = removal.vetoes.len(),
        bytes = removal.reclaimable_bytes,
        "plan built"
    );
    removal
}

fn plan_locales(
    locales: Vec<Candidate>,
    keep: &KeepSet,
    options: &PlanOptions,
    removal: &mut RemovalPlan,
) {
    // Locales of one bundle, in scan order
    let mut order: Vec<PathBuf> = Vec::new();
    let mut bundles: HashMap<PathBuf, Vec<&Candidate>> = HashMap::new();
    for locale in &locales {
        let group = locale.group().to_path_buf();
        if !bundles.contains_key(&group) {
            order.push(group.clone());
        }
        bundles.entry(group).or_default().push(locale);
    }

    let mut forced: HashSet<&Path> = HashSet::new();
    for group in &order {
        let members = &bundles[group];
        if members.iter().any(|c| keep.keeps_language(&c.tag)) {
            continue;
        }
        let fallback = options
            .fallback_languages
            .iter()
            .find_map(|tag| members.iter().find(|c| &c.tag == tag))
            .unwrap_or(&members[0]);
        debug!(bundle = %group.display(), tag = %fallback.tag, "force-keeping fallback locale");
        forced.insert(fallback.path.as_path());
    }

    for locale in &locales {
        if keep.keeps_language(&locale.tag) {
            continue;
        }
        if forced.contains(locale.path.as_path()) {
            removal.vetoes.push(PlanVeto {
                root: locale.root,
                path: locale.path.clone(),
                kind: CandidateKind::Locale,
                tag: locale.tag.clone(),
                reason: VetoReason::LastLocalization,
            });
            continue;
        }
        removal.push(RemovalAction::DeleteDirectory {
            candidate: locale.clone(),
        });
    }
}

fn plan_layouts(layouts: Vec<Candidate>, keep: &KeepSet, removal: &mut RemovalPlan) {
    for layout in layouts {
        if !keep.keeps_layout(&layout.tag) {
            removal.push(RemovalAction::DeleteDirectory { candidate: layout });
        }
    }
}

fn plan_slices(slices: Vec<Candidate>, keep: &KeepSet, removal: &mut RemovalPlan) {
    let mut binaries: Vec<(PathBuf, Vec<Candidate>)> = Vec::new();
    for slice in slices {
        match binaries.last_mut() {
            Some((path, members)) if *path == slice.path => members.push(slice),
            _ => binaries.push((slice.path.clone(), vec![slice])),
        }
    }

    for (binary, members) in binaries {
        let root = members[0].root;
        let (remove, kept): (Vec<Candidate>, Vec<Candidate>) = members
            .into_iter()
            .partition(|c| !keep.keeps_architecture(&c.tag));

        if remove.is_empty() {
            continue;
        }
        if kept.is_empty() {
            debug!(binary = %binary.display(), "refusing to strip every architecture");
            removal.vetoes.push(PlanVeto {
                root,
                path: binary,
                kind: CandidateKind::ArchitectureSlice,
                tag: plan::join_tags(&remove),
                reason: VetoReason::AllArchitectures,
            });
            continue;
        }
        removal.push(RemovalAction::ThinBinary {
            root,
            binary,
            remove,
            keep: kept,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::macho::SliceRange;

    fn locale(root: usize, bundle: &str, tag: &str, size: u64) -> Candidate {
        Candidate {
            root,
            path: PathBuf::from(format!("{}/Contents/Resources/{}.lproj", bundle, tag)),
            kind: CandidateKind::Locale,
            tag: tag.to_string(),
            size_bytes: size,
            slice: None,
        }
    }

    fn slice(binary: &str, tag: &str, offset: u64, size: u64) -> Candidate {
        Candidate {
            root: 0,
            path: PathBuf::from(binary),
            kind: CandidateKind::ArchitectureSlice,
            tag: tag.to_string(),
            size_bytes: size,
            slice: Some(SliceRange {
                cputype: 0,
                cpusubtype: 0,
                offset,
                size,
                align: 12,
            }),
        }
    }

    fn keep(langs: &[&str], archs: &[&str]) -> KeepSet {
        KeepSet::new(
            langs.iter().map(|s| s.to_string()),
            std::iter::empty(),
            archs.iter().map(|s| s.to_string()),
        )
    }

    #[test]
    fn test_removes_unkept_locales() {
        let candidates = vec![
            locale(0, "/A.app", "de", 30),
            locale(0, "/A.app", "en", 10),
            locale(0, "/A.app", "fr", 20),
        ];
        let plan = plan(candidates, &keep(&["en"], &[]), &PlanOptions::default());
        let tags: Vec<String> = plan.actions.iter().map(|a| a.tags()).collect();
        assert_eq!(tags, vec!["de", "fr"]);
        assert_eq!(plan.reclaimable_bytes, 50);
        assert!(plan.vetoes.is_empty());
    }

    #[test]
    fn test_fallback_locale_force_kept() {
        let candidates = vec![
            locale(0, "/A.app", "de", 30),
            locale(0, "/A.app", "en", 10),
            locale(0, "/A.app", "fr", 20),
        ];
        let plan = plan(candidates, &keep(&["ja"], &[]), &PlanOptions::default());
        assert_eq!(plan.len(), 2);
        assert!(plan.actions.iter().all(|a| a.tags() != "en"));
        assert_eq!(plan.vetoes.len(), 1);
        assert_eq!(plan.vetoes[0].tag, "en");
        assert_eq!(plan.vetoes[0].reason, VetoReason::LastLocalization);
        assert_eq!(plan.reclaimable_bytes, 50);
    }

    #[test]
    fn test_fallback_uses_first_locale_when_none_preferred() {
        let candidates = vec![
            locale(0, "/A.app", "de", 30),
            locale(0, "/A.app", "fr", 20),
        ];
        let plan = plan(candidates, &keep(&["ja"], &[]), &PlanOptions::default());
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.actions[0].tags(), "fr");
        assert_eq!(plan.vetoes[0].tag, "de");
    }

    #[test]
    fn test_fallback_is_per_bundle() {
        let candidates = vec![
            locale(0, "/A.app", "en", 1),
            locale(0, "/A.app", "fr", 1),
            locale(0, "/B.app", "fr", 1),
            locale(0, "/B.app", "ja", 1),
        ];
        let plan = plan(candidates, &keep(&["ja"], &[]), &PlanOptions::default());
        // A keeps en as fallback; B already keeps ja
        assert_eq!(plan.vetoes.len(), 1);
        assert_eq!(plan.vetoes[0].path, PathBuf::from("/A.app/Contents/Resources/en.lproj"));
        let paths: Vec<_> = plan.actions.iter().map(|a| a.path().to_path_buf()).collect();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/A.app/Contents/Resources/fr.lproj"),
                PathBuf::from("/B.app/Contents/Resources/fr.lproj"),
            ]
        );
    }

    #[test]
    fn test_thin_binary_strips_unkept() {
        let candidates = vec![
            slice("/A.app/Contents/MacOS/A", "x86_64", 4096, 1000),
            slice("/A.app/Contents/MacOS/A", "arm64", 8192, 900),
        ];
        let plan = plan(candidates, &keep(&[], &["arm64"]), &PlanOptions::default());
        assert_eq!(plan.len(), 1);
        match &plan.actions[0] {
            RemovalAction::ThinBinary { remove, keep, .. } => {
                assert_eq!(remove.len(), 1);
                assert_eq!(remove[0].tag, "x86_64");
                assert_eq!(keep[0].tag, "arm64");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(plan.reclaimable_bytes, 1000);
    }

    #[test]
    fn test_never_strips_every_architecture() {
        let candidates = vec![
            slice("/A.app/Contents/MacOS/A", "x86_64", 4096, 1000),
            slice("/A.app/Contents/MacOS/A", "arm64", 8192, 900),
        ];
        let plan = plan(candidates, &keep(&[], &[]), &PlanOptions::default());
        assert!(plan.is_empty());
        assert_eq!(plan.vetoes.len(), 1);
        assert_eq!(plan.vetoes[0].reason, VetoReason::AllArchitectures);
        assert_eq!(
            plan.vetoes[0].reason.to_string(),
            "would remove all architectures"
        );
        assert_eq!(plan.reclaimable_bytes, 0);
    }

    #[test]
    fn test_fully_kept_binary_has_no_action() {
        let candidates = vec![slice("/bin/tool", "arm64", 4096, 10)];
        let plan = plan(candidates, &keep(&[], &["arm64"]), &PlanOptions::default());
        assert!(plan.is_empty());
        assert!(plan.vetoes.is_empty());
    }

    #[test]
    fn test_ordering_root_then_kind() {
        let mut layout = locale(0, "/x", "Russian", 5);
        layout.kind = CandidateKind::Layout;
        layout.path = PathBuf::from("/K/Keyboard Layouts/Russian.bundle");
        let candidates = vec![
            locale(1, "/Z.app", "en", 1),
            locale(1, "/Z.app", "fr", 1),
            slice("/A.app/Contents/MacOS/A", "x86_64", 4096, 1000),
            slice("/A.app/Contents/MacOS/A", "arm64", 8192, 900),
            layout,
            locale(0, "/B.app", "fr", 1),
            locale(0, "/B.app", "en", 1),
        ];
        let plan = plan(candidates, &keep(&["en"], &["arm64"]), &PlanOptions::default());
        let summary: Vec<(usize, CandidateKind)> =
            plan.actions.iter().map(|a| (a.root(), a.kind())).collect();
        assert_eq!(
            summary,
            vec![
                (0, CandidateKind::Locale),
                (0, CandidateKind::Layout),
                (0, CandidateKind::ArchitectureSlice),
                (1, CandidateKind::Locale),
            ]
        );
    }

    #[test]
    fn test_overlapping_roots_counted_once() {
        let mut nested = slice("/A.app/Contents/MacOS/A", "x86_64", 4096, 1000);
        nested.root = 1;
        let mut nested_arm = slice("/A.app/Contents/MacOS/A", "arm64", 8192, 900);
        nested_arm.root = 1;
        let candidates = vec![
            // The nested root comes back first from a parallel scan
            locale(1, "/A.app", "en", 10),
            locale(1, "/A.app", "fr", 20),
            nested,
            nested_arm,
            locale(0, "/A.app", "en", 10),
            locale(0, "/A.app", "fr", 20),
            slice("/A.app/Contents/MacOS/A", "x86_64", 4096, 1000),
            slice("/A.app/Contents/MacOS/A", "arm64", 8192, 900),
        ];
        let plan = plan(candidates, &keep(&["en"], &["arm64"]), &PlanOptions::default());
        assert_eq!(plan.len(), 2);
        assert!(plan.actions.iter().all(|a| a.root() == 0));
        assert_eq!(plan.reclaimable_bytes, 1020);
        match &plan.actions[1] {
            RemovalAction::ThinBinary { remove, keep, .. } => {
                assert_eq!(remove.len(), 1);
                assert_eq!(keep.len(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_options_from_config_canonicalize() {
        let config = Config {
            fallback_languages: vec!["English".into(), "en".into(), "Base".into()],
            ..Config::default()
        };
        let options = PlanOptions::from_config(&config);
        assert_eq!(options.fallback_languages, vec!["en", "Base"]);
    }
}
