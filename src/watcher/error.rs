use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The configured snapshot directory does not exist. Fatal at startup.
    #[error("snapshot directory `{path}` does not exist")]
    DirectoryMissing { path: PathBuf },

    /// No file in the directory matches the `fsimage_<txid>` convention.
    /// Recoverable; the next scheduled cycle retries.
    #[error("no snapshot files matching `fsimage_<txid>` in `{path}`")]
    NoSnapshots { path: PathBuf },

    #[error("failed to list snapshot directory `{path}`: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
