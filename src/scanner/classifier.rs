//! Decides what a single filesystem entry is: a localization, a keyboard
//! layout, a universal binary, or nothing of interest.

use std::fs::Metadata;
use std::path::Path;
use tracing::debug;

use super::macho;
use super::targets::{Candidate, CandidateKind, RootTarget};
use super::walker::dir_size;

/// Extensions of directories that are bundles (and so may own `Resources`)
pub const BUNDLE_EXTENSIONS: &[&str] = &[
    "app",
    "framework",
    "bundle",
    "plugin",
    "appex",
    "kext",
    "prefPane",
    "component",
    "qlgenerator",
    "mdimporter",
    "saver",
    "xpc",
];

const LOCALE_SUFFIX: &str = ".lproj";
const LAYOUT_SUFFIX: &str = ".bundle";
const LAYOUTS_DIR: &str = "Keyboard Layouts";
const RESOURCES_DIR: &str = "Resources";

/// Legacy long-form lproj names and the codes they stand for
const LANGUAGE_ALIASES: &[(&str, &str)] = &[
    ("English", "en"),
    ("French", "fr"),
    ("German", "de"),
    ("Japanese", "ja"),
    ("Spanish", "es"),
    ("Italian", "it"),
    ("Dutch", "nl"),
];

/// Options that change how tags are derived
#[derive(Debug, Clone, Default)]
pub struct ClassifyOptions {
    /// Fold regional variants (`pt_BR`, `en-GB`) into their base language
    pub collapse_regions: bool,
}

/// Result of classifying one entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified {
    /// A locale or layout directory; the scanner treats it as a leaf
    Bundle(Candidate),
    /// One candidate per architecture slice of a universal binary
    Slices(Vec<Candidate>),
}

/// Classify `path` (already known to live under `root`).
///
/// `metadata` must come from `symlink_metadata`, so symlinks are seen as
/// symlinks and never classified.
pub fn classify(
    path: &Path,
    metadata: &Metadata,
    root: &RootTarget,
    root_index: usize,
    options: &ClassifyOptions,
) -> Option<Classified> {
    let file_type = metadata.file_type();
    if file_type.is_symlink() {
        return None;
    }

    if file_type.is_dir() {
        if root.languages {
            if let Some(tag) = locale_tag_for(path, options) {
                return Some(Classified::Bundle(Candidate {
                    root: root_index,
                    path: path.to_path_buf(),
                    kind: CandidateKind::Locale,
                    tag,
                    size_bytes: dir_size(path),
                    slice: None,
                }));
            }
        }
        if root.layouts {
            if let Some(tag) = layout_tag_for(path) {
                return Some(Classified::Bundle(Candidate {
                    root: root_index,
                    path: path.to_path_buf(),
                    kind: CandidateKind::Layout,
                    tag,
                    size_bytes: dir_size(path),
                    slice: None,
                }));
            }
        }
        return None;
    }

    if file_type.is_file() && root.architectures {
        return classify_binary(path, root_index);
    }

    None
}

fn classify_binary(path: &Path, root_index: usize) -> Option<Classified> {
    let header = match macho::read_fat_header(path) {
        Ok(Some(header)) => header,
        Ok(None) => return None,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "not a usable universal binary");
            return None;
        }
    };

    let slices = header
        .arches
        .iter()
        .map(|arch| Candidate {
            root: root_index,
            path: path.to_path_buf(),
            kind: CandidateKind::ArchitectureSlice,
            tag: arch.arch_name(),
            size_bytes: arch.size,
            slice: Some(*arch),
        })
        .collect::<Vec<_>>();

    debug!(
        path = %path.display(),
        arches = ?slices.iter().map(|c| c.tag.as_str()).collect::<Vec<_>>(),
        "universal binary"
    );
    Some(Classified::Slices(slices))
}

/// Tag of a `*.lproj` directory inside a bundle's `Resources`, if it is one
pub(crate) fn locale_tag_for(path: &Path, options: &ClassifyOptions) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(LOCALE_SUFFIX)?;
    if stem.is_empty() {
        return None;
    }

    let parent = path.parent()?;
    if parent.file_name()?.to_str()? != RESOURCES_DIR {
        return None;
    }
    if !parent.ancestors().skip(1).any(is_bundle_dir) {
        return None;
    }

    Some(canonical_locale(stem, options.collapse_regions))
}

/// Tag of a keyboard layout bundle, if `path` is one
pub(crate) fn layout_tag_for(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(LAYOUT_SUFFIX)?;
    if stem.is_empty() {
        return None;
    }
    if path.parent()?.file_name()?.to_str()? != LAYOUTS_DIR {
        return None;
    }
    Some(stem.to_string())
}

/// Whether the last component of `path` has a bundle extension
pub fn is_bundle_dir(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| BUNDLE_EXTENSIONS.contains(&ext))
        .unwrap_or(false)
}

/// Map an lproj stem to the tag used for keep-set matching.
///
/// Case is preserved. Legacy long names map to their ISO code. Regional
/// variants only lose their region when `collapse_regions` is set.
pub fn canonical_locale(stem: &str, collapse_regions: bool) -> String {
    let code = LANGUAGE_ALIASES
        .iter()
        .find(|(alias, _)| *alias == stem)
        .map(|(_, code)| *code)
        .unwrap_or(stem);

    if collapse_regions {
        if let Some(base) = code.split(['_', '-']).next().filter(|b| !b.is_empty()) {
            return base.to_string();
        }
    }
    code.to_string()
}
