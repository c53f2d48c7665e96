//! The unit that performs one destructive operation.
//!
//! The same request type crosses the privilege boundary to the helper
//! process, so it carries only what the operation needs: a path, and for
//! thinning the byte ranges to drop.

use serde::{Deserialize, Serialize};
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::thin;
use crate::common::{permissions, safety};
use crate::scanner::macho::SliceRange;
use crate::scanner::walker::dir_size;

/// An operation requested of a worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WorkerOp {
    /// Protocol handshake
    Hello { protocol: u32 },
    /// Remove a localization or layout directory, or move it into `trash`
    Delete {
        path: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        trash: Option<TrashTarget>,
    },
    /// Rewrite a universal binary without `slices`, then optionally strip
    /// its debug symbols
    Thin {
        path: PathBuf,
        slices: Vec<SliceRange>,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        strip: bool,
    },
}

/// A user's Trash and the user trashed items are handed back to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrashTarget {
    pub dir: PathBuf,
    pub uid: u32,
}

impl TrashTarget {
    /// `dir`, on behalf of the user running this process
    pub fn for_current_user(dir: PathBuf) -> Self {
        Self {
            dir,
            uid: permissions::current_uid(),
        }
    }
}

/// Machine-readable failure class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerErrorCode {
    NotFound,
    PermissionDenied,
    Busy,
    /// The target no longer matches what was planned
    Changed,
    InvalidBinary,
    /// The request falls outside what a worker is allowed to do
    Refused,
    Io,
    /// The elevated helper could not be reached
    Unreachable,
}

impl WorkerErrorCode {
    /// Codes that mean "nothing to do any more" rather than "it went wrong"
    pub fn is_skip(self) -> bool {
        matches!(self, WorkerErrorCode::NotFound | WorkerErrorCode::Changed)
    }

    pub fn from_io(error: &io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::NotFound => WorkerErrorCode::NotFound,
            io::ErrorKind::PermissionDenied => WorkerErrorCode::PermissionDenied,
            _ => match error.raw_os_error() {
                Some(libc::EBUSY) | Some(libc::ETXTBSY) => WorkerErrorCode::Busy,
                Some(libc::EPERM) | Some(libc::EROFS) => WorkerErrorCode::PermissionDenied,
                _ => WorkerErrorCode::Io,
            },
        }
    }
}

impl std::fmt::Display for WorkerErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkerErrorCode::NotFound => "not found",
            WorkerErrorCode::PermissionDenied => "permission denied",
            WorkerErrorCode::Busy => "in use",
            WorkerErrorCode::Changed => "changed since scan",
            WorkerErrorCode::InvalidBinary => "invalid binary",
            WorkerErrorCode::Refused => "refused",
            WorkerErrorCode::Io => "I/O error",
            WorkerErrorCode::Unreachable => "helper unreachable",
        };
        write!(f, "{}", s)
    }
}

/// A failed operation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {detail}")]
pub struct WorkerError {
    pub code: WorkerErrorCode,
    pub detail: String,
}

impl WorkerError {
    pub fn new(code: WorkerErrorCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
        }
    }

    pub fn io(path: &Path, error: &io::Error) -> Self {
        Self::new(
            WorkerErrorCode::from_io(error),
            format!("{}: {}", path.display(), error),
        )
    }
}

/// Something that can carry out a [`WorkerOp`] and report bytes reclaimed
pub trait Worker: Send {
    fn perform(&mut self, op: &WorkerOp) -> Result<u64, WorkerError>;
}

/// Performs operations in this process with this process' privileges.
/// The elevated helper runs exactly this worker on its side of the pipe.
#[derive(Debug, Clone)]
pub struct LocalWorker {
    strip_command: Vec<String>,
}

impl Default for LocalWorker {
    fn default() -> Self {
        Self {
            strip_command: thin::default_strip_command(),
        }
    }
}

impl LocalWorker {
    /// A worker that strips with `command` (followed by `-o <out> <in>`)
    pub fn with_strip_command(command: Vec<String>) -> Self {
        Self {
            strip_command: command,
        }
    }
}

impl Worker for LocalWorker {
    fn perform(&mut self, op: &WorkerOp) -> Result<u64, WorkerError> {
        match op {
            WorkerOp::Hello { .. } => Ok(0),
            WorkerOp::Delete { path, trash } => delete(path, trash.as_ref()),
            WorkerOp::Thin { path, slices, strip } => {
                safety::validate_thin_target(path)
                    .map_err(|e| WorkerError::new(WorkerErrorCode::Refused, e))?;
                let thinned = thin::thin_binary(path, slices)?;
                if !*strip {
                    return Ok(thinned);
                }
                match thin::strip_binary(path, &self.strip_command) {
                    Ok(stripped) => Ok(thinned + stripped),
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "could not strip debug symbols");
                        Ok(thinned)
                    }
                }
            }
        }
    }
}

fn delete(path: &Path, trash: Option<&TrashTarget>) -> Result<u64, WorkerError> {
    safety::validate_delete_target(path)
        .map_err(|e| WorkerError::new(WorkerErrorCode::Refused, e))?;

    let meta = std::fs::symlink_metadata(path).map_err(|e| WorkerError::io(path, &e))?;
    if !meta.is_dir() {
        return Err(WorkerError::new(
            WorkerErrorCode::Refused,
            format!("'{}' is not a directory", path.display()),
        ));
    }

    let size = dir_size(path);
    match trash {
        Some(trash) => {
            let dest = move_to_trash(path, trash)?;
            info!(from = %path.display(), to = %dest.display(), "moved to trash");
        }
        None => {
            std::fs::remove_dir_all(path).map_err(|e| WorkerError::io(path, &e))?;
            debug!(path = %path.display(), bytes = size, "removed");
        }
    }
    Ok(size)
}

/// Move a directory into the trash, picking a free name, and hand it to
/// the trash's owner
fn move_to_trash(path: &Path, trash: &TrashTarget) -> Result<PathBuf, WorkerError> {
    safety::validate_trash_dir(&trash.dir, trash.uid)
        .map_err(|e| WorkerError::new(WorkerErrorCode::Refused, e))?;
    let dir = trash.dir.as_path();

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "item".to_string());
    let mut dest = dir.join(&name);
    if dest.exists() {
        let stamp = chrono::Local::now().format("%H.%M.%S");
        dest = dir.join(format!("{} {}", name, stamp));
        let mut n = 2;
        while dest.exists() {
            dest = dir.join(format!("{} {} {}", name, stamp, n));
            n += 1;
        }
    }

    // Try rename first (fast, same filesystem)
    if std::fs::rename(path, &dest).is_err() {
        // Fallback: copy then delete (cross-filesystem)
        copy_dir_recursive(path, &dest).map_err(|e| WorkerError::io(path, &e))?;
        std::fs::remove_dir_all(path).map_err(|e| WorkerError::io(path, &e))?;
    }

    if let Err(e) = chown_tree(&dest, trash.uid) {
        warn!(path = %dest.display(), uid = trash.uid, error = %e, "could not hand trashed item to its owner");
    }
    Ok(dest)
}

/// Give every entry under `path` to `uid`, without following links
fn chown_tree(path: &Path, uid: u32) -> io::Result<()> {
    for entry in WalkDir::new(path).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        if entry.metadata().map_err(io::Error::from)?.uid() != uid {
            std::os::unix::fs::lchown(entry.path(), Some(uid), None)?;
        }
    }
    Ok(())
}

/// Recursively copy a directory, recreating symlinks rather than following them
fn copy_dir_recursive(src: &Path, dst: &Path) -> io::Result<()> {
    std::fs::create_dir_all(dst)?;

    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        let file_type = entry.file_type()?;

        if file_type.is_symlink() {
            std::os::unix::fs::symlink(std::fs::read_link(&src_path)?, &dst_path)?;
        } else if file_type.is_dir() {
            copy_dir_recursive(&src_path, &dst_path)?;
        } else {
            std::fs::copy(&src_path, &dst_path)?;
        }
    }

    Ok(())
}
