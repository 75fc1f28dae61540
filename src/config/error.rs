use std::num::ParseIntError;

use thiserror::Error;

/// Errors raised while validating collector configuration.
///
/// All of these are fatal at construction time: a collector is never started
/// with a config that fails validation.
#[derive(Debug, Error)]
pub enum Error {
    #[error("snapshot directory is not configured (fsImagePath)")]
    MissingSnapshotDir,

    #[error("invalid size value `{value}`: {source}")]
    InvalidSize {
        value: String,
        #[source]
        source: ParseIntError,
    },

    #[error("size value `{value}` overflows the byte range")]
    SizeOverflow { value: String },

    #[error("bucket boundaries must be strictly ascending: `{previous}` is not below `{next}`")]
    NonAscendingBuckets { previous: String, next: String },
}
