// taillight - util/error.rs
//
// Typed error hierarchy with context-preserving error chains.
// All errors preserve the causal chain for diagnostic logging.

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Top-level error type for taillight operations.
#[derive(Debug)]
pub enum TaillightError {
    /// A log file could not be opened.
    Open(OpenError),

    /// The merged export failed.
    Export(ExportError),
}

impl fmt::Display for TaillightError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open(e) => write!(f, "Open error: {e}"),
            Self::Export(e) => write!(f, "Export error: {e}"),
        }
    }
}

impl std::error::Error for TaillightError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Open(e) => Some(e),
            Self::Export(e) => Some(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Open errors
// ---------------------------------------------------------------------------

/// Errors raised while opening a log file for viewing.
///
/// Missing-file, permission-denied, and decompression failures are distinct
/// kinds so callers can phrase notifications precisely.
#[derive(Debug)]
pub enum OpenError {
    /// The path does not exist.
    NotFound { path: PathBuf },

    /// The path exists but cannot be read.
    PermissionDenied { path: PathBuf, source: io::Error },

    /// The path is a directory or other non-regular file.
    NotAFile { path: PathBuf },

    /// The compressed stream could not be decoded.
    Decompress { path: PathBuf, source: io::Error },

    /// Any other I/O failure while opening.
    Io { path: PathBuf, source: io::Error },
}

impl OpenError {
    /// Classify an open-time I/O error by its kind, keeping the path context.
    pub fn from_io(path: PathBuf, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::NotFound => Self::NotFound { path },
            io::ErrorKind::PermissionDenied => Self::PermissionDenied { path, source },
            _ => Self::Io { path, source },
        }
    }

    /// The path this error concerns.
    pub fn path(&self) -> &PathBuf {
        match self {
            Self::NotFound { path }
            | Self::PermissionDenied { path, .. }
            | Self::NotAFile { path }
            | Self::Decompress { path, .. }
            | Self::Io { path, .. } => path,
        }
    }
}

impl fmt::Display for OpenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { path } => {
                write!(f, "File '{}' not found", path.display())
            }
            Self::PermissionDenied { path, source } => {
                write!(f, "Permission denied opening '{}': {source}", path.display())
            }
            Self::NotAFile { path } => {
                write!(f, "'{}' is not a regular file", path.display())
            }
            Self::Decompress { path, source } => {
                write!(f, "Failed to decompress '{}': {source}", path.display())
            }
            Self::Io { path, source } => {
                write!(f, "Failed to open '{}': {source}", path.display())
            }
        }
    }
}

impl std::error::Error for OpenError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::PermissionDenied { source, .. }
            | Self::Decompress { source, .. }
            | Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<OpenError> for TaillightError {
    fn from(e: OpenError) -> Self {
        Self::Open(e)
    }
}

// ---------------------------------------------------------------------------
// Export errors
// ---------------------------------------------------------------------------

/// Errors raised by the merged-stream export.
#[derive(Debug)]
pub enum ExportError {
    /// I/O error writing the export file. The target path is never left
    /// holding a partial file; the temporary beside it is discarded.
    Io { path: PathBuf, source: io::Error },
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "Failed to save '{}': {source}", path.display())
            }
        }
    }
}

impl std::error::Error for ExportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
        }
    }
}

impl From<ExportError> for TaillightError {
    fn from(e: ExportError) -> Self {
        Self::Export(e)
    }
}

/// Convenience type alias for taillight results.
pub type Result<T> = std::result::Result<T, TaillightError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_io_classifies_not_found() {
        let err = OpenError::from_io(
            PathBuf::from("missing.log"),
            io::Error::new(io::ErrorKind::NotFound, "gone"),
        );
        assert!(matches!(err, OpenError::NotFound { .. }));
        assert!(err.to_string().contains("missing.log"));
    }

    #[test]
    fn test_from_io_classifies_permission_denied() {
        let err = OpenError::from_io(
            PathBuf::from("locked.log"),
            io::Error::new(io::ErrorKind::PermissionDenied, "nope"),
        );
        assert!(matches!(err, OpenError::PermissionDenied { .. }));
    }

    #[test]
    fn test_source_chain_preserved() {
        use std::error::Error;
        let err = OpenError::Decompress {
            path: PathBuf::from("a.gz"),
            source: io::Error::new(io::ErrorKind::InvalidData, "bad magic"),
        };
        assert!(err.source().is_some());
    }
}
