//! Structured error kinds for the snapshot engine.
//!
//! Library entry points return [`Error`] so callers can match on kind
//! without downcasting an opaque `anyhow::Error`. The CLI layer still
//! uses `anyhow` internally to stitch steps together with `.context(...)`,
//! the way the rest of this codebase does.

use camino::Utf8PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Invalid input: missing file, overlapping roots, unknown destination
    /// scheme, pending-snapshot conflict. Fatal; no side effects.
    #[error("usage error: {0}")]
    Usage(String),

    /// Read/write/rename/walk failure against a store. Surfaced; partial
    /// state is reversible via cleanup.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Index hash mismatch, pool file hash mismatch, unrecognized offsite
    /// directory name, missing primary directory, multiple primaries.
    /// Fatal; restore aborts before any local write commits.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// Size precheck failed (required > 0.85 x available). Fatal; no
    /// mutation performed.
    #[error("capacity error: need {required} bytes but only {available} available")]
    Capacity { required: u64, available: u64 },

    /// Archiver missing or reported non-zero during creation, verification,
    /// or extraction. Fatal; working directory is preserved for diagnosis.
    #[error("external tool error: {0}")]
    ExternalTool(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn usage(msg: impl Into<String>) -> Error {
        Error::Usage(msg.into())
    }

    pub fn integrity(msg: impl Into<String>) -> Error {
        Error::Integrity(msg.into())
    }

    pub fn external_tool(msg: impl Into<String>) -> Error {
        Error::ExternalTool(msg.into())
    }

    pub fn io(path: impl Into<Utf8PathBuf>, source: std::io::Error) -> Error {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

/// Extension trait for turning a bare `std::io::Result` into our `Result`
/// while attaching the path that was being operated on.
pub trait IoContext<T> {
    fn path_context(self, path: impl Into<Utf8PathBuf>) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn path_context(self, path: impl Into<Utf8PathBuf>) -> Result<T> {
        self.map_err(|source| Error::io(path, source))
    }
}
