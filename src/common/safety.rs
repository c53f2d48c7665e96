use std::os::unix::fs::MetadataExt;
use std::path::{Component, Path};

use crate::scanner::classifier::{self, ClassifyOptions};

/// Paths that must NEVER be deleted or rewritten under any circumstances.
/// A last line of defence against bugs in classification.
const PROTECTED_PATHS: &[&str] = &[
    "/",
    "/System",
    "/System/Library",
    "/Applications",
    "/Users",
    "/Library",
    "/usr",
    "/bin",
    "/sbin",
    "/var",
    "/etc",
    "/opt",
    "/private",
    "/cores",
    "/Volumes",
];

/// Paths under home that must never be deleted entirely
const PROTECTED_HOME_DIRS: &[&str] = &[
    "", // home dir itself
    "Desktop",
    "Documents",
    "Downloads",
    "Library",
    "Applications",
];

/// Check if a path is protected and should NEVER be touched
pub fn is_protected(path: &Path) -> bool {
    let path_str = path.to_string_lossy();
    let trimmed = if path_str.len() > 1 {
        path_str.trim_end_matches('/')
    } else {
        &path_str
    };

    if PROTECTED_PATHS.iter().any(|p| trimmed == *p) {
        return true;
    }

    if let Some(home) = dirs::home_dir() {
        let home_str = home.to_string_lossy().to_string();
        for dir in PROTECTED_HOME_DIRS {
            let protected_path = if dir.is_empty() {
                home_str.clone()
            } else {
                format!("{}/{}", home_str, dir)
            };
            if trimmed == protected_path {
                return true;
            }
        }
    }

    false
}

/// Validate that `path` is something a delete action may remove:
/// an absolute, non-protected, non-symlink directory that the scanner
/// would classify as a localization or a keyboard layout.
pub fn validate_delete_target(path: &Path) -> Result<(), String> {
    validate_common(path)?;
    let is_locale = classifier::locale_tag_for(path, &ClassifyOptions::default()).is_some();
    if !is_locale && classifier::layout_tag_for(path).is_none() {
        return Err(format!(
            "'{}' is not a localization or keyboard layout bundle",
            path.display()
        ));
    }
    Ok(())
}

/// Validate that `path` is something a thin action may rewrite
pub fn validate_thin_target(path: &Path) -> Result<(), String> {
    validate_common(path)
}

/// Name every accepted trash directory must have
const TRASH_DIR_NAME: &str = ".Trash";

/// Validate that `dir` may receive trashed directories on behalf of `uid`:
/// an existing `.Trash` directory, not a symlink, owned by that user.
/// The directory is never created here.
pub fn validate_trash_dir(dir: &Path, uid: u32) -> Result<(), String> {
    if !dir.is_absolute()
        || dir
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::CurDir))
    {
        return Err(format!(
            "trash directory '{}' is not an absolute normalized path",
            dir.display()
        ));
    }
    if dir.file_name().and_then(|n| n.to_str()) != Some(TRASH_DIR_NAME) {
        return Err(format!("'{}' is not a {} directory", dir.display(), TRASH_DIR_NAME));
    }
    let meta = std::fs::symlink_metadata(dir)
        .map_err(|e| format!("trash directory '{}' is unusable: {}", dir.display(), e))?;
    if !meta.is_dir() {
        return Err(format!("trash directory '{}' is not a directory", dir.display()));
    }
    if meta.uid() != uid {
        return Err(format!(
            "trash directory '{}' does not belong to uid {}",
            dir.display(),
            uid
        ));
    }
    Ok(())
}

fn validate_common(path: &Path) -> Result<(), String> {
    if !path.is_absolute() {
        return Err(format!("'{}' is not an absolute path", path.display()));
    }
    if path
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::CurDir))
    {
        return Err(format!("'{}' is not a normalized path", path.display()));
    }
    if is_protected(path) {
        return Err(format!(
            "SAFETY: refusing to touch protected path: {}",
            path.display()
        ));
    }
    if let Ok(meta) = std::fs::symlink_metadata(path) {
        if meta.file_type().is_symlink() {
            return Err(format!("'{}' is a symbolic link", path.display()));
        }
    }
    Ok(())
}
