use std::path::PathBuf;

use thiserror::Error;

/// Typed errors for slimmac operations.
/// The CLI uses `anyhow` at the top level, but these let the engine be
/// precise about what went wrong and where.
#[derive(Debug, Error)]
pub enum SlimError {
    /// File system operation failed
    #[error("I/O error at '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Binary header could not be parsed as a fat Mach-O
    #[error("Not a valid universal binary: '{}': {message}", path.display())]
    InvalidBinary { path: PathBuf, message: String },

    /// The elevated helper sent something we did not expect
    #[error("Helper protocol error: {message}")]
    Protocol { message: String },
}

impl SlimError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SlimError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors that stop a run before any destructive action is attempted.
#[derive(Debug, Error)]
pub enum FatalSetupError {
    /// Not a single root could be opened for reading
    #[error("None of the scan roots are readable: {}", display_paths(.roots))]
    NoReadableRoots { roots: Vec<PathBuf> },

    /// The privileged helper could not be started or did not answer the handshake
    #[error("Privileged helper unavailable: {reason}")]
    HelperUnavailable { reason: String },
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
