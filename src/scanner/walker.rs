use std::collections::VecDeque;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::classifier::{self, Classified};
use super::targets::{Candidate, RootTarget, ScanWarning};
use super::ScanOptions;

/// A lazy, depth-first walk over a list of roots yielding candidates.
///
/// Entries are visited in lexicographic order, so an unchanged tree always
/// produces the same sequence. Warnings are collected as the walk advances
/// and can be taken once iteration is done.
pub struct Scan<'a> {
    roots: &'a [RootTarget],
    first_index: usize,
    options: &'a ScanOptions,
    next_root: usize,
    current: Option<(usize, walkdir::IntoIter)>,
    pending: VecDeque<Candidate>,
    warnings: Vec<ScanWarning>,
}

impl<'a> Scan<'a> {
    pub(super) fn new(roots: &'a [RootTarget], first_index: usize, options: &'a ScanOptions) -> Self {
        Self {
            roots,
            first_index,
            options,
            next_root: 0,
            current: None,
            pending: VecDeque::new(),
            warnings: Vec::new(),
        }
    }

    pub fn into_warnings(self) -> Vec<ScanWarning> {
        self.warnings
    }

    fn open_next_root(&mut self) -> bool {
        while self.next_root < self.roots.len() {
            let local = self.next_root;
            self.next_root += 1;
            let root = &self.roots[local];

            if std::fs::symlink_metadata(&root.path).is_err() {
                self.warn(&root.path, "root does not exist or cannot be accessed");
                continue;
            }

            let iter = WalkDir::new(&root.path)
                .follow_links(false)
                .sort_by_file_name()
                .into_iter();
            self.current = Some((local, iter));
            return true;
        }
        false
    }

    fn warn(&mut self, path: &Path, message: impl Into<String>) {
        let warning = ScanWarning {
            path: path.to_path_buf(),
            message: message.into(),
        };
        warn!(path = %warning.path.display(), "{}", warning.message);
        self.warnings.push(warning);
    }
}

impl Iterator for Scan<'_> {
    type Item = Candidate;

    fn next(&mut self) -> Option<Candidate> {
        loop {
            if let Some(candidate) = self.pending.pop_front() {
                return Some(candidate);
            }

            if self.current.is_none() && !self.open_next_root() {
                return None;
            }
            let Some((local, iter)) = self.current.as_mut() else {
                continue;
            };
            let local = *local;

            let entry = match iter.next() {
                None => {
                    self.current = None;
                    continue;
                }
                Some(Ok(entry)) => entry,
                Some(Err(e)) => {
                    let vanished = e
                        .io_error()
                        .map(|io| io.kind() == ErrorKind::NotFound)
                        .unwrap_or(false);
                    if !vanished {
                        let path = e
                            .path()
                            .map(Path::to_path_buf)
                            .unwrap_or_else(|| self.roots[local].path.clone());
                        self.warn(&path, e.to_string());
                    }
                    continue;
                }
            };

            let path = entry.path();
            let is_dir = entry.file_type().is_dir();

            if self.options.is_excluded(path) {
                debug!(path = %path.display(), "excluded");
                if is_dir {
                    iter.skip_current_dir();
                }
                continue;
            }

            if is_dir && self.options.is_blacklisted_bundle(path) {
                debug!(path = %path.display(), "blacklisted bundle");
                iter.skip_current_dir();
                continue;
            }

            // The root directory itself is never a candidate
            if entry.depth() == 0 && is_dir {
                continue;
            }

            // walkdir reports symlink metadata when not following links
            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(e) => {
                    let vanished = e
                        .io_error()
                        .map(|io| io.kind() == ErrorKind::NotFound)
                        .unwrap_or(false);
                    if !vanished {
                        let path = path.to_path_buf();
                        self.warn(&path, e.to_string());
                    }
                    continue;
                }
            };

            let root = &self.roots[local];
            match classifier::classify(
                path,
                &metadata,
                root,
                self.first_index + local,
                &self.options.classify,
            ) {
                Some(Classified::Bundle(candidate)) => {
                    if is_dir {
                        iter.skip_current_dir();
                    }
                    return Some(candidate);
                }
                Some(Classified::Slices(slices)) => self.pending.extend(slices),
                None => {}
            }
        }
    }
}

/// Total logical size of a directory tree, without following links
pub fn dir_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.metadata().map(|m| m.len()).unwrap_or(0))
        .sum()
}
