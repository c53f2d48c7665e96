use std::fs::{File, Metadata};
use std::io::{self, BufWriter, Write};
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::process::{Command, Stdio};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use super::worker::{WorkerError, WorkerErrorCode};
use crate::scanner::macho::{self, ClassifyError, SliceRange};

/// Rewrite the universal binary at `path` without the `remove` slices.
///
/// The header is read again first: every slice to remove must still be
/// present with the same CPU and byte range, otherwise the binary changed
/// since it was scanned and nothing is written. Returns the number of
/// bytes the file shrank by.
pub fn thin_binary(path: &Path, remove: &[SliceRange]) -> Result<u64, WorkerError> {
    let header = match macho::read_fat_header(path) {
        Ok(Some(header)) => header,
        Ok(None) => {
            return Err(WorkerError::new(
                WorkerErrorCode::Changed,
                format!("'{}' is no longer a universal binary", path.display()),
            ))
        }
        Err(ClassifyError::Io(e)) => return Err(WorkerError::io(path, &e)),
        Err(ClassifyError::Malformed(message)) => {
            return Err(WorkerError::new(WorkerErrorCode::InvalidBinary, message))
        }
    };

    if remove.is_empty() {
        return Err(WorkerError::new(
            WorkerErrorCode::Refused,
            "no architectures requested for removal",
        ));
    }
    if let Some(missing) = remove
        .iter()
        .find(|r| !header.arches.iter().any(|a| a.same_slice(r)))
    {
        return Err(WorkerError::new(
            WorkerErrorCode::Changed,
            format!(
                "slice {} of '{}' no longer matches the scanned layout",
                missing.arch_name(),
                path.display()
            ),
        ));
    }

    let keep: Vec<SliceRange> = header
        .arches
        .iter()
        .filter(|a| !remove.iter().any(|r| r.same_slice(a)))
        .copied()
        .collect();
    if keep.is_empty() {
        return Err(WorkerError::new(
            WorkerErrorCode::Refused,
            "would remove all architectures",
        ));
    }

    let before = std::fs::metadata(path)
        .map_err(|e| WorkerError::io(path, &e))?
        .len();
    let after = replace_atomically(path, |src, out| {
        macho::write_thinned(src, &header, &keep, out)
    })
    .map_err(|e| WorkerError::io(path, &e))?;

    debug!(
        path = %path.display(),
        before,
        after,
        kept = keep.len(),
        "thinned universal binary"
    );
    Ok(before.saturating_sub(after))
}

/// `strip -S`: debug symbols only
pub fn default_strip_command() -> Vec<String> {
    vec!["/usr/bin/strip".to_string(), "-S".to_string()]
}

/// Strip the binary at `path` with `command`, run as
/// `command.. -o <temporary file> <path>`.
///
/// The output replaces `path` exactly like a thinned binary does; if the
/// tool fails the original is untouched. Returns the bytes saved.
pub fn strip_binary(path: &Path, command: &[String]) -> Result<u64, WorkerError> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| WorkerError::new(WorkerErrorCode::Refused, "no strip command configured"))?;

    let meta = std::fs::symlink_metadata(path).map_err(|e| WorkerError::io(path, &e))?;
    let tmp = temp_beside(path).map_err(|e| WorkerError::io(path, &e))?;

    let output = Command::new(program)
        .args(args)
        .arg("-o")
        .arg(tmp.path())
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| WorkerError::io(Path::new(program), &e))?;
    if !output.status.success() {
        return Err(WorkerError::new(
            WorkerErrorCode::Io,
            format!(
                "{} failed on '{}' ({}): {}",
                program,
                path.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        ));
    }

    let after = std::fs::metadata(tmp.path())
        .map_err(|e| WorkerError::io(tmp.path(), &e))?
        .len();
    install(tmp, path, &meta).map_err(|e| WorkerError::io(path, &e))?;

    debug!(path = %path.display(), before = meta.len(), after, "stripped debug symbols");
    Ok(meta.len().saturating_sub(after))
}

/// Replace the file at `path` with what `write` produces from it.
///
/// The new contents go to a temporary file in the same directory, which
/// takes over the original's owner (where allowed) and permission bits,
/// is synced, then renamed over the original. If `write` fails the
/// original is untouched and the temporary file is removed.
pub fn replace_atomically<F>(path: &Path, write: F) -> io::Result<u64>
where
    F: FnOnce(&mut File, &mut dyn Write) -> io::Result<u64>,
{
    let mut src = File::open(path)?;
    let meta = src.metadata()?;
    let mut tmp = temp_beside(path)?;

    let written = {
        let mut out = BufWriter::new(tmp.as_file_mut());
        let written = write(&mut src, &mut out)?;
        out.flush()?;
        written
    };

    install(tmp, path, &meta)?;
    Ok(written)
}

/// An empty temporary file in the directory of `path`
fn temp_beside(path: &Path) -> io::Result<NamedTempFile> {
    let dir = path.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("'{}' has no parent directory", path.display()),
        )
    })?;
    tempfile::Builder::new()
        .prefix(".slimmac-")
        .suffix(".tmp")
        .tempfile_in(dir)
}

/// Give `tmp` the owner and mode recorded in `meta`, sync it and rename it
/// over `path`.
///
/// The owner is set first: a change of owner clears the set-user-ID and
/// set-group-ID bits, which the mode then restores.
fn install(tmp: NamedTempFile, path: &Path, meta: &Metadata) -> io::Result<()> {
    if let Err(e) = std::os::unix::fs::chown(tmp.path(), Some(meta.uid()), Some(meta.gid())) {
        warn!(path = %path.display(), error = %e, "could not preserve owner");
    }
    std::fs::set_permissions(tmp.path(), meta.permissions())?;
    File::open(tmp.path())?.sync_all()?;

    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    const X86_64: i32 = 0x0100_0007;
    const ARM64: i32 = 0x0100_000c;

    fn slice(cputype: i32, offset: u64, size: u64) -> SliceRange {
        SliceRange {
            cputype,
            cpusubtype: 3,
            offset,
            size,
            align: 12,
        }
    }

    /// A fat file with an x86_64 slice of 'X' bytes and an arm64 slice of 'A' bytes
    fn fat_file(dir: &TempDir) -> (std::path::PathBuf, Vec<SliceRange>) {
        let arches = macho::layout(
            false,
            &[slice(X86_64, 0, 5000), SliceRange { cpusubtype: 0, ..slice(ARM64, 0, 3000) }],
        );
        let mut bytes = macho::encode_header(false, &arches);
        bytes.resize(arches[0].offset as usize, 0);
        bytes.extend(std::iter::repeat(b'X').take(5000));
        bytes.resize(arches[1].offset as usize, 0);
        bytes.extend(std::iter::repeat(b'A').take(3000));

        let path = dir.path().join("Tool");
        std::fs::write(&path, &bytes).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        (path, arches)
    }

    #[test]
    fn test_thin_keeps_remaining_slice_bytes() {
        let dir = TempDir::new().unwrap();
        let (path, arches) = fat_file(&dir);
        let before = std::fs::metadata(&path).unwrap().len();

        let saved = thin_binary(&path, &arches[..1]).unwrap();
        let after = std::fs::metadata(&path).unwrap();
        assert_eq!(saved, before - after.len());
        assert_eq!(after.permissions().mode() & 0o777, 0o755);

        let header = macho::read_fat_header(&path).unwrap().unwrap();
        assert_eq!(header.arches.len(), 1);
        assert_eq!(header.arches[0].arch_name(), "arm64");

        let bytes = std::fs::read(&path).unwrap();
        let kept = header.arches[0];
        let body = &bytes[kept.offset as usize..kept.end() as usize];
        assert!(body.iter().all(|b| *b == b'A'));
        assert_eq!(body.len(), 3000);
    }

    #[test]
    fn test_thin_keeps_setuid_bit() {
        let dir = TempDir::new().unwrap();
        let (path, arches) = fat_file(&dir);
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o4755)).unwrap();

        thin_binary(&path, &arches[..1]).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o7777, 0o4755);
    }

    fn leftovers(dir: &TempDir) -> Vec<std::ffi::OsString> {
        let mut names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_strip_replaces_binary() {
        let dir = TempDir::new().unwrap();
        let (path, _) = fat_file(&dir);
        let before = std::fs::metadata(&path).unwrap().len();

        let command = ["/bin/sh", "-c", "head -c 64 \"$3\" > \"$2\"", "strip"];
        let command: Vec<String> = command.iter().map(|s| s.to_string()).collect();
        let saved = strip_binary(&path, &command).unwrap();

        let after = std::fs::metadata(&path).unwrap();
        assert_eq!(after.len(), 64);
        assert_eq!(saved, before - 64);
        assert_eq!(after.permissions().mode() & 0o777, 0o755);
        assert_eq!(leftovers(&dir), vec![std::ffi::OsString::from("Tool")]);
    }

    #[test]
    fn test_failed_strip_leaves_original() {
        let dir = TempDir::new().unwrap();
        let (path, _) = fat_file(&dir);
        let original = std::fs::read(&path).unwrap();

        let command = ["/bin/sh", "-c", "echo unsupported file >&2; exit 1", "strip"];
        let command: Vec<String> = command.iter().map(|s| s.to_string()).collect();
        let err = strip_binary(&path, &command).unwrap_err();
        assert_eq!(err.code, WorkerErrorCode::Io);
        assert!(err.detail.contains("unsupported file"));
        assert_eq!(std::fs::read(&path).unwrap(), original);
        assert_eq!(leftovers(&dir), vec![std::ffi::OsString::from("Tool")]);
    }

    #[test]
    fn test_changed_layout_is_not_written() {
        let dir = TempDir::new().unwrap();
        let (path, arches) = fat_file(&dir);
        let original = std::fs::read(&path).unwrap();

        let stale = SliceRange {
            size: arches[0].size + 1,
            ..arches[0]
        };
        let err = thin_binary(&path, &[stale]).unwrap_err();
        assert_eq!(err.code, WorkerErrorCode::Changed);
        assert_eq!(std::fs::read(&path).unwrap(), original);
    }

    #[test]
    fn test_refuses_to_remove_every_slice() {
        let dir = TempDir::new().unwrap();
        let (path, arches) = fat_file(&dir);
        let err = thin_binary(&path, &arches).unwrap_err();
        assert_eq!(err.code, WorkerErrorCode::Refused);
    }

    #[test]
    fn test_plain_file_reports_changed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("script.sh");
        std::fs::write(&path, "#!/bin/sh\n").unwrap();
        let err = thin_binary(&path, &[slice(X86_64, 4096, 10)]).unwrap_err();
        assert_eq!(err.code, WorkerErrorCode::Changed);
    }

    #[test]
    fn test_failed_write_leaves_original() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data");
        std::fs::write(&path, "original").unwrap();

        let result = replace_atomically(&path, |_, out| {
            out.write_all(b"partial")?;
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        });
        assert!(result.is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "original");

        assert_eq!(leftovers(&dir), vec![std::ffi::OsString::from("data")]);
    }

    #[test]
    fn test_replace_writes_new_contents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data");
        std::fs::write(&path, "old").unwrap();

        let written = replace_atomically(&path, |src, out| {
            let mut buf = String::new();
            io::Read::read_to_string(src, &mut buf)?;
            let upper = buf.to_uppercase();
            out.write_all(upper.as_bytes())?;
            Ok(upper.len() as u64)
        })
        .unwrap();
        assert_eq!(written, 3);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "OLD");
    }
}
