//! Collector configuration.
//!
//! [`Config`] mirrors the YAML layout consumed by operators (camelCase keys,
//! e.g. `fsImagePath` or `skipFileDistributionForGroupStats`). Loading the
//! file itself is the embedder's concern; this crate only consumes the
//! deserialized struct.
//!
//! Size-like values such as the file size distribution bucket boundaries are
//! configured as IEC-suffixed strings (`1MiB`, `10GiB`, ...) and parsed into
//! byte counts via [`parse_size`].

mod error;

pub use error::Error;

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::Deserialize;

/// Default file size distribution bucket boundaries, ascending, in IEC
/// notation. An implicit `+Inf` bucket is appended at render time.
pub const DEFAULT_FILE_SIZE_BUCKETS: [&str; 7] =
    ["0", "1MiB", "32MiB", "64MiB", "128MiB", "1GiB", "10GiB"];

/// Config options for the snapshot collector.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Directory where the storage master places fsimage snapshot files.
    pub fs_image_path: PathBuf,
    /// Skip reloading when the latest snapshot name is unchanged.
    pub skip_previously_parsed: bool,
    /// Path specs tracked individually, one metric scope per expanded path.
    pub paths: BTreeSet<String>,
    /// Named unions of path specs, one metric scope per set.
    pub path_sets: BTreeMap<String, Vec<String>>,
    /// Use a count+sum summary instead of a histogram for per-group file sizes.
    pub skip_file_distribution_for_group_stats: bool,
    /// Use a count+sum summary instead of a histogram for per-user file sizes.
    pub skip_file_distribution_for_user_stats: bool,
    /// Use a count+sum summary instead of a histogram for per-path file sizes.
    pub skip_file_distribution_for_path_stats: bool,
    /// Use a count+sum summary instead of a histogram for per-path-set file sizes.
    pub skip_file_distribution_for_path_set_stats: bool,
    /// File size distribution bucket boundaries as IEC-suffixed size strings.
    pub file_size_distribution_buckets: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fs_image_path: PathBuf::new(),
            skip_previously_parsed: true,
            paths: BTreeSet::new(),
            path_sets: BTreeMap::new(),
            skip_file_distribution_for_group_stats: false,
            skip_file_distribution_for_user_stats: false,
            skip_file_distribution_for_path_stats: false,
            skip_file_distribution_for_path_set_stats: false,
            file_size_distribution_buckets: DEFAULT_FILE_SIZE_BUCKETS
                .iter()
                .map(|s| (*s).to_owned())
                .collect(),
        }
    }
}

impl Config {
    /// Parses the configured bucket boundary strings into byte counts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSize`] or [`Error::SizeOverflow`] for
    /// unparseable entries and [`Error::NonAscendingBuckets`] if the parsed
    /// boundaries are not strictly ascending.
    pub fn bucket_bounds(&self) -> Result<Vec<u64>, Error> {
        let mut bounds = Vec::with_capacity(self.file_size_distribution_buckets.len());
        for value in &self.file_size_distribution_buckets {
            bounds.push(parse_size(value)?);
        }
        for pair in self.file_size_distribution_buckets.windows(2).zip(bounds.windows(2)) {
            let ([previous, next], [low, high]) = pair else {
                continue;
            };
            if low >= high {
                return Err(Error::NonAscendingBuckets {
                    previous: previous.clone(),
                    next: next.clone(),
                });
            }
        }
        Ok(bounds)
    }

    pub fn has_paths(&self) -> bool {
        !self.paths.is_empty()
    }

    pub fn has_path_sets(&self) -> bool {
        !self.path_sets.is_empty()
    }
}

const IEC_UNITS: [(&str, u64); 5] = [
    ("KiB", 1 << 10),
    ("MiB", 1 << 20),
    ("GiB", 1 << 30),
    ("TiB", 1 << 40),
    ("PiB", 1 << 50),
];

/// Parses a size string into a byte count.
///
/// Accepts a plain byte count (`"1048576"`) or a number with one of the IEC
/// suffixes `KiB`, `MiB`, `GiB`, `TiB`, `PiB`.
pub fn parse_size(value: &str) -> Result<u64, Error> {
    let trimmed = value.trim();
    for (suffix, factor) in IEC_UNITS {
        if let Some(number) = trimmed.strip_suffix(suffix) {
            let count: u64 = number.trim().parse().map_err(|source| Error::InvalidSize {
                value: value.to_owned(),
                source,
            })?;
            return count
                .checked_mul(factor)
                .ok_or_else(|| Error::SizeOverflow {
                    value: value.to_owned(),
                });
        }
    }
    trimmed.parse().map_err(|source| Error::InvalidSize {
        value: value.to_owned(),
        source,
    })
}
