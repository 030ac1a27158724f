//! Error taxonomy for root realization and class resolution.
//!
//! "Not found" never appears here: absent names are plain `None` / empty
//! results. Errors are reserved for I/O that actually failed, unreadable
//! persisted indexes and payloads the host runtime refused.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = LoaderError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum LoaderError {
    /// Filesystem access under a root failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The archive could not be opened or its central directory is unreadable.
    #[error("Failed to open archive {path}: {source}")]
    ArchiveOpen {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    /// A persisted directory index is truncated or carries another version.
    #[error("Corrupt index {path}: {reason}")]
    CorruptIndex { path: PathBuf, reason: String },

    /// The host runtime refused the bytes read for a class.
    #[error("Host runtime rejected {name}: {source}")]
    Rejected {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

impl LoaderError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::CorruptIndex {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
