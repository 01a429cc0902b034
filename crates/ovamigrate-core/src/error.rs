//! Error types for the ovamigrate core library.

use std::path::{Path, PathBuf};

/// The main error type for migration operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error with optional path context.
    #[error("I/O error{}: {source}", path.as_ref().map(|p| format!(" at '{}'", p.display())).unwrap_or_default())]
    Io {
        source: std::io::Error,
        path: Option<PathBuf>,
    },

    /// Configuration file could not be read or parsed.
    #[error("config error: {message}")]
    Config { message: String },

    /// No migration candidates, or the export root could not be scanned.
    #[error("discovery error: {message}")]
    Discovery { message: String },

    /// Malformed operator selection.
    #[error("selection error: {message}")]
    Selection { message: String },

    /// Malformed OVF or destination descriptor.
    #[error("parse error in '{}': {message}", path.display())]
    Parse { path: PathBuf, message: String },

    /// Destination descriptor is not of the expected shape.
    #[error("structure error in '{}': {message}", path.display())]
    Structure { path: PathBuf, message: String },

    /// Disk copy failed. Any partial destination file has been removed.
    #[error("copy '{}' -> '{}' failed: {error}", source_path.display(), destination.display())]
    Copy {
        source_path: PathBuf,
        destination: PathBuf,
        #[source]
        error: std::io::Error,
    },

    /// The patched descriptor could not be persisted. The original is untouched.
    #[error("failed to write patched descriptor '{}': {error}", path.display())]
    Patch {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },

    /// Import call failed or returned a non-200 status.
    #[error("import error: {message}")]
    Network { message: String },
}

/// A specialized Result type for migration operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an I/O error with path context.
    pub fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        Self::Io {
            source,
            path: Some(path.into()),
        }
    }

    /// Create an I/O error without path context.
    pub fn io_simple(source: std::io::Error) -> Self {
        Self::Io { source, path: None }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn discovery(message: impl Into<String>) -> Self {
        Self::Discovery {
            message: message.into(),
        }
    }

    pub fn selection(message: impl Into<String>) -> Self {
        Self::Selection {
            message: message.into(),
        }
    }

    /// Create a parse error for the descriptor at `path`.
    pub fn parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn structure(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Structure {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a copy error for the pair `source -> destination`.
    pub fn copy(source: &Path, destination: &Path, error: std::io::Error) -> Self {
        Self::Copy {
            source_path: source.to_path_buf(),
            destination: destination.to_path_buf(),
            error,
        }
    }

    pub fn patch(path: impl Into<PathBuf>, error: std::io::Error) -> Self {
        Self::Patch {
            path: path.into(),
            error,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Whether this error terminates the whole run rather than a single VM.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config { .. } | Self::Discovery { .. } | Self::Selection { .. }
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Self::io_simple(source)
    }
}
