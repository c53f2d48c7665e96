use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

/// Known SIP-protected paths that cannot be modified even as root
const SIP_PATHS: &[&str] = &["/System", "/usr", "/bin", "/sbin"];

/// SIP exempts these locations
const SIP_EXCEPTIONS: &[&str] = &["/System/Library/Keyboard Layouts", "/usr/local"];

/// Check if a path is SIP-protected
pub fn is_sip_protected(path: &Path) -> bool {
    let path_str = path.to_string_lossy();
    if SIP_EXCEPTIONS.iter().any(|p| path_str.starts_with(p)) {
        return false;
    }
    SIP_PATHS
        .iter()
        .any(|p| path_str == *p || path_str.starts_with(&format!("{}/", p)))
}

/// Check if we can read a path
pub fn can_read(path: &Path) -> bool {
    access(path, libc::R_OK)
}

/// Check if this process can remove or replace `path`.
///
/// Both operations need write and search permission on the parent directory.
/// Directory removal also needs them on the directory itself so its children
/// can be unlinked.
pub fn can_write(path: &Path) -> bool {
    let Some(parent) = path.parent() else {
        return false;
    };
    if !access(parent, libc::W_OK | libc::X_OK) {
        return false;
    }
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => access(path, libc::W_OK | libc::X_OK),
        Ok(_) => true,
        Err(_) => false,
    }
}

/// Effective uid of this process
pub fn current_uid() -> u32 {
    unsafe { libc::geteuid() }
}

fn access(path: &Path, mode: libc::c_int) -> bool {
    let Ok(c_path) = CString::new(path.as_os_str().as_bytes()) else {
        return false;
    };
    unsafe { libc::access(c_path.as_ptr(), mode) == 0 }
}

/// Get a helpful message for permission issues
pub fn permission_hint(path: &Path) -> String {
    if is_sip_protected(path) {
        "This path is protected by System Integrity Protection (SIP) and cannot be modified."
            .to_string()
    } else {
        format!(
            "Check file permissions for '{}'. Use --elevate to let the privileged helper handle it.",
            path.display()
        )
    }
}
