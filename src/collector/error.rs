use thiserror::Error;

/// Construction-time errors of the snapshot collector. All variants are fatal:
/// the embedder is expected to abort startup on them.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] crate::config::Error),

    #[error(transparent)]
    Watcher(#[from] crate::watcher::Error),
}
