//! Size distribution accumulators.
//!
//! Observations are size-like `u64` values (file sizes, consumed sizes,
//! replication factors). Two interchangeable variants exist: a bucketed
//! histogram over fixed ascending boundaries and a cheap count+sum summary.
//! Which variant a scope category uses is decided once from config, never per
//! individual label value.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Accumulation strategy for a scope category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistributionKind {
    Bucketed,
    Summary,
}

/// A thread-safe accumulator for size observations.
///
/// `observe` takes `&self` and only performs relaxed atomic increments, so
/// concurrent walk callbacks can feed one distribution without locking.
#[derive(Debug)]
pub enum SizeDistribution {
    Bucketed {
        /// Ascending bucket boundaries, exclusive of the implicit `+Inf`.
        bounds: Arc<[u64]>,
        /// Per-bucket observation counts, `bounds.len() + 1` entries; the last
        /// entry holds observations above every boundary.
        buckets: Box<[AtomicU64]>,
        sum: AtomicU64,
        total: AtomicU64,
    },
    Summary {
        count: AtomicU64,
        sum: AtomicU64,
    },
}

impl SizeDistribution {
    pub fn bucketed(bounds: Arc<[u64]>) -> Self {
        let buckets = (0..=bounds.len()).map(|_| AtomicU64::new(0)).collect();
        Self::Bucketed {
            bounds,
            buckets,
            sum: AtomicU64::new(0),
            total: AtomicU64::new(0),
        }
    }

    pub fn summary() -> Self {
        Self::Summary {
            count: AtomicU64::new(0),
            sum: AtomicU64::new(0),
        }
    }

    pub fn new(kind: DistributionKind, bounds: &Arc<[u64]>) -> Self {
        match kind {
            DistributionKind::Bucketed => Self::bucketed(Arc::clone(bounds)),
            DistributionKind::Summary => Self::summary(),
        }
    }

    pub fn kind(&self) -> DistributionKind {
        match self {
            Self::Bucketed { .. } => DistributionKind::Bucketed,
            Self::Summary { .. } => DistributionKind::Summary,
        }
    }

    pub fn observe(&self, value: u64) {
        match self {
            Self::Bucketed {
                bounds,
                buckets,
                sum,
                total,
            } => {
                // Index of the first boundary >= value; past-the-end is the
                // +Inf bucket.
                let index = bounds.partition_point(|&bound| bound < value);
                buckets[index].fetch_add(1, Ordering::Relaxed);
                sum.fetch_add(value, Ordering::Relaxed);
                total.fetch_add(1, Ordering::Relaxed);
            }
            Self::Summary { count, sum } => {
                count.fetch_add(1, Ordering::Relaxed);
                sum.fetch_add(value, Ordering::Relaxed);
            }
        }
    }

    pub fn count(&self) -> u64 {
        match self {
            Self::Bucketed { total, .. } => total.load(Ordering::Relaxed),
            Self::Summary { count, .. } => count.load(Ordering::Relaxed),
        }
    }

    pub fn sum(&self) -> u64 {
        match self {
            Self::Bucketed { sum, .. } | Self::Summary { sum, .. } => sum.load(Ordering::Relaxed),
        }
    }

    /// Bucket boundaries of the bucketed variant.
    pub fn bounds(&self) -> Option<&[u64]> {
        match self {
            Self::Bucketed { bounds, .. } => Some(bounds),
            Self::Summary { .. } => None,
        }
    }

    /// Cumulative per-bucket counts of the bucketed variant, one entry per
    /// boundary plus the trailing `+Inf` bucket. Bucket `b` counts every
    /// observation `<= bounds[b]`; the final entry equals [`count`].
    ///
    /// [`count`]: Self::count
    pub fn cumulative_counts(&self) -> Option<Vec<u64>> {
        match self {
            Self::Bucketed { buckets, .. } => {
                let mut running = 0;
                Some(
                    buckets
                        .iter()
                        .map(|bucket| {
                            running += bucket.load(Ordering::Relaxed);
                            running
                        })
                        .collect(),
                )
            }
            Self::Summary { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds() -> Arc<[u64]> {
        Arc::from([0u64, 1 << 20, 32 << 20])
    }

    #[test]
    fn test_bucketed_cumulative_counts() {
        let dist = SizeDistribution::bucketed(bounds());
        dist.observe(0);
        dist.observe(1);
        dist.observe(1 << 20);
        dist.observe(2 << 20);
        dist.observe(64 << 20);

        // <=0: 1, <=1MiB: 3, <=32MiB: 4, +Inf: 5
        assert_eq!(dist.cumulative_counts().unwrap(), vec![1, 3, 4, 5]);
        assert_eq!(dist.count(), 5);
        assert_eq!(dist.sum(), 1 + (1 << 20) + (2 << 20) + (64 << 20));
    }

    #[test]
    fn test_top_bucket_tracks_count() {
        let dist = SizeDistribution::bucketed(bounds());
        let mut previous = vec![0u64; 4];
        for value in [5u64, 1 << 30, 0, 12, 33 << 20, 1 << 10] {
            dist.observe(value);
            let cumulative = dist.cumulative_counts().unwrap();
            assert_eq!(*cumulative.last().unwrap(), dist.count());
            for (now, before) in cumulative.iter().zip(&previous) {
                assert!(now >= before);
            }
            previous = cumulative;
        }
    }

    #[test]
    fn test_summary_count_and_sum() {
        let dist = SizeDistribution::summary();
        dist.observe(10);
        dist.observe(32);
        assert_eq!(dist.count(), 2);
        assert_eq!(dist.sum(), 42);
        assert!(dist.bounds().is_none());
        assert!(dist.cumulative_counts().is_none());
        assert_eq!(dist.kind(), DistributionKind::Summary);
    }
}
