use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by snapshot loaders and tree queries.
#[derive(Debug, Error)]
pub enum Error {
    /// The queried path does not exist in the snapshot tree.
    #[error("path `{path}` not found in snapshot")]
    NotFound { path: String },

    /// Reading the snapshot file failed.
    #[error("failed to read snapshot `{path}`: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The snapshot file could not be decoded.
    #[error("corrupt snapshot `{path}`: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}
