//! Per-generation usage statistics.
//!
//! [`build_report`] walks one loaded snapshot tree and produces an immutable
//! [`Report`]: overall stats plus per-user, per-group, per-path and
//! per-path-set partitions. Reports are built once per snapshot generation and
//! never mutated after publication, apart from the sticky error flag.

mod distribution;
mod expand;

pub use distribution::{DistributionKind, SizeDistribution};
pub use expand::{ExpandError, expand_spec, expand_specs};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use dashmap::DashMap;
use dashmap::mapref::one::Ref;

use crate::config::{self, Config};
use crate::snapshot::{DirEntry, FileEntry, SnapshotTree, SymlinkEntry, TreeVisitor};

/// Aggregation settings derived from [`Config`] once at startup.
///
/// Bucket boundaries are parsed and validated here so that malformed config is
/// rejected before the first cycle, and the per-scope-category distribution
/// variants are fixed up front.
#[derive(Debug, Clone)]
pub struct ReportSettings {
    bounds: Arc<[u64]>,
    user_distribution: DistributionKind,
    group_distribution: DistributionKind,
    path_distribution: DistributionKind,
    path_set_distribution: DistributionKind,
    paths: BTreeSet<String>,
    path_sets: BTreeMap<String, Vec<String>>,
}

impl ReportSettings {
    pub fn from_config(config: &Config) -> Result<Self, config::Error> {
        fn kind(skip: bool) -> DistributionKind {
            if skip {
                DistributionKind::Summary
            } else {
                DistributionKind::Bucketed
            }
        }

        Ok(Self {
            bounds: config.bucket_bounds()?.into(),
            user_distribution: kind(config.skip_file_distribution_for_user_stats),
            group_distribution: kind(config.skip_file_distribution_for_group_stats),
            path_distribution: kind(config.skip_file_distribution_for_path_stats),
            path_set_distribution: kind(config.skip_file_distribution_for_path_set_stats),
            paths: config.paths.clone(),
            path_sets: config.path_sets.clone(),
        })
    }

    pub fn bounds(&self) -> &Arc<[u64]> {
        &self.bounds
    }
}

/// Usage counters for one scope (overall, one user, one group, one path or
/// one path set).
#[derive(Debug)]
pub struct Stats {
    pub directories: AtomicU64,
    pub blocks: AtomicU64,
    pub symlinks: AtomicU64,
    pub file_size: SizeDistribution,
    pub consumed_size: SizeDistribution,
    /// Replication factor distribution; present for the overall and per-user
    /// scopes only, always summary-backed.
    pub replication: Option<SizeDistribution>,
}

impl Stats {
    fn new(kind: DistributionKind, bounds: &Arc<[u64]>, with_replication: bool) -> Self {
        Self {
            directories: AtomicU64::new(0),
            blocks: AtomicU64::new(0),
            symlinks: AtomicU64::new(0),
            file_size: SizeDistribution::new(kind, bounds),
            consumed_size: SizeDistribution::new(kind, bounds),
            replication: with_replication.then(SizeDistribution::summary),
        }
    }

    fn record_file(&self, file: &FileEntry<'_>) {
        self.blocks.fetch_add(file.blocks, Ordering::Relaxed);
        self.file_size.observe(file.size);
        self.consumed_size.observe(file.consumed_size());
        if let Some(replication) = &self.replication {
            replication.observe(u64::from(file.replication));
        }
    }
}

/// One immutable statistics aggregate per snapshot generation.
#[derive(Debug)]
pub struct Report {
    pub overall: Stats,
    pub by_user: DashMap<String, Stats>,
    pub by_group: DashMap<String, Stats>,
    pub by_path: DashMap<String, Stats>,
    pub by_path_set: DashMap<String, Stats>,
    error: AtomicBool,
}

impl Report {
    pub(crate) fn new(settings: &ReportSettings) -> Self {
        Self {
            overall: Stats::new(DistributionKind::Bucketed, &settings.bounds, true),
            by_user: DashMap::new(),
            by_group: DashMap::new(),
            by_path: DashMap::new(),
            by_path_set: DashMap::new(),
            error: AtomicBool::new(false),
        }
    }

    /// Whether any load, expansion or walk failure was recorded for this
    /// generation. The flag is sticky; the data itself stays served.
    pub fn has_error(&self) -> bool {
        self.error.load(Ordering::Acquire)
    }

    pub(crate) fn mark_error(&self) {
        self.error.store(true, Ordering::Release);
    }

    pub fn has_path_stats(&self) -> bool {
        !self.by_path.is_empty()
    }

    pub fn has_path_set_stats(&self) -> bool {
        !self.by_path_set.is_empty()
    }
}

/// Atomic get-or-create on a scope map. The common hit path takes a shared
/// reference; the insert path relies on the map's insert-if-absent entry API.
fn scope_stats<'map>(
    map: &'map DashMap<String, Stats>,
    key: &str,
    create: impl FnOnce() -> Stats,
) -> Ref<'map, String, Stats> {
    if let Some(stats) = map.get(key) {
        return stats;
    }
    map.entry(key.to_owned()).or_insert_with(create).downgrade()
}

/// Whole-tree visitor feeding overall, per-user and per-group stats.
struct TreeStatsVisitor<'a> {
    report: &'a Report,
    settings: &'a ReportSettings,
}

impl TreeStatsVisitor<'_> {
    fn user_stats(&self, user: &str) -> Ref<'_, String, Stats> {
        scope_stats(&self.report.by_user, user, || {
            Stats::new(self.settings.user_distribution, &self.settings.bounds, true)
        })
    }

    fn group_stats(&self, group: &str) -> Ref<'_, String, Stats> {
        scope_stats(&self.report.by_group, group, || {
            Stats::new(
                self.settings.group_distribution,
                &self.settings.bounds,
                false,
            )
        })
    }
}

impl TreeVisitor for TreeStatsVisitor<'_> {
    fn on_file(&self, file: &FileEntry<'_>) {
        self.report.overall.record_file(file);
        self.group_stats(file.group).record_file(file);
        self.user_stats(file.user).record_file(file);
    }

    fn on_directory(&self, dir: &DirEntry<'_>) {
        log::trace!("visiting directory {}", dir.path);
        self.report
            .overall
            .directories
            .fetch_add(1, Ordering::Relaxed);
        self.group_stats(dir.group)
            .directories
            .fetch_add(1, Ordering::Relaxed);
        self.user_stats(dir.user)
            .directories
            .fetch_add(1, Ordering::Relaxed);
    }

    fn on_symlink(&self, link: &SymlinkEntry<'_>) {
        self.report.overall.symlinks.fetch_add(1, Ordering::Relaxed);
        self.group_stats(link.group)
            .symlinks
            .fetch_add(1, Ordering::Relaxed);
        self.user_stats(link.user)
            .symlinks
            .fetch_add(1, Ordering::Relaxed);
    }
}

/// Scoped-walk visitor feeding one path or path-set [`Stats`]. Ownership and
/// replication are not tracked per path scope.
struct PathStatsVisitor<'a> {
    stats: &'a Stats,
}

impl TreeVisitor for PathStatsVisitor<'_> {
    fn on_file(&self, file: &FileEntry<'_>) {
        self.stats.record_file(file);
    }

    fn on_directory(&self, _dir: &DirEntry<'_>) {
        self.stats.directories.fetch_add(1, Ordering::Relaxed);
    }

    fn on_symlink(&self, _link: &SymlinkEntry<'_>) {
        self.stats.symlinks.fetch_add(1, Ordering::Relaxed);
    }
}

/// Builds the statistics report for one loaded snapshot generation.
///
/// Performs one whole-tree walk for the overall/user/group partitions, then
/// scoped walks for configured paths and path sets. Failures of individual
/// path or path-set entries are confined: they are logged and set the report's
/// sticky error flag without aborting the remaining entries.
pub fn build_report<T: SnapshotTree>(tree: &T, settings: &ReportSettings) -> Report {
    let report = Report::new(settings);

    let start = Instant::now();
    let visitor = TreeStatsVisitor {
        report: &report,
        settings,
    };
    if let Err(err) = tree.visit(&visitor) {
        log::error!("snapshot tree walk failed: {err}");
        report.mark_error();
    }
    log::info!(
        "finished computing overall/group/user stats in {}ms",
        start.elapsed().as_millis()
    );

    if !settings.paths.is_empty() {
        compute_path_stats(tree, settings, &report);
    }
    if !settings.path_sets.is_empty() {
        compute_path_set_stats(tree, settings, &report);
    }

    report
}

fn compute_path_stats<T: SnapshotTree>(tree: &T, settings: &ReportSettings, report: &Report) {
    let start = Instant::now();

    // Expand each spec on its own so one bad spec cannot take down the rest.
    let mut expanded = BTreeSet::new();
    for spec in &settings.paths {
        match expand_spec(tree, spec) {
            Ok(paths) => expanded.extend(paths),
            Err(err) => {
                log::error!("cannot expand path spec `{spec}`: {err}");
                report.mark_error();
            }
        }
    }
    log::info!(
        "expanded paths {:?} for path specs {:?}",
        expanded,
        settings.paths
    );

    std::thread::scope(|scope| {
        for path in &expanded {
            scope.spawn(move || {
                let walk_start = Instant::now();
                let stats = Stats::new(settings.path_distribution, &settings.bounds, false);
                let visitor = PathStatsVisitor { stats: &stats };
                match tree.visit_from(path, &visitor) {
                    Ok(()) => {
                        // Only child directories count, not the root itself.
                        stats.directories.fetch_sub(1, Ordering::Relaxed);
                        log::debug!(
                            "finished path stat for {path} with {} files in {}ms",
                            stats.file_size.count(),
                            walk_start.elapsed().as_millis()
                        );
                        report.by_path.insert(path.clone(), stats);
                    }
                    Err(err) => {
                        log::error!("cannot traverse `{path}`: {err}");
                        report.mark_error();
                    }
                }
            });
        }
    });

    log::info!(
        "finished {} path stats in {}ms",
        report.by_path.len(),
        start.elapsed().as_millis()
    );
}

fn compute_path_set_stats<T: SnapshotTree>(tree: &T, settings: &ReportSettings, report: &Report) {
    let start = Instant::now();

    std::thread::scope(|scope| {
        for (name, specs) in &settings.path_sets {
            scope.spawn(move || {
                let expanded = match expand_specs(tree, specs) {
                    Ok(expanded) => expanded,
                    Err(err) => {
                        log::error!(
                            "cannot expand path set `{name}` using specs {specs:?}: {err}"
                        );
                        report.mark_error();
                        return;
                    }
                };
                log::info!("expanded paths {expanded:?} for path set `{name}`");

                let stats = Stats::new(settings.path_set_distribution, &settings.bounds, false);
                let visitor = PathStatsVisitor { stats: &stats };
                for path in &expanded {
                    if let Err(err) = tree.visit_from(path, &visitor) {
                        log::error!("cannot traverse `{path}` for path set `{name}`: {err}");
                        report.mark_error();
                        return;
                    }
                }
                // Only child directories count, not the expanded roots.
                stats
                    .directories
                    .fetch_sub(expanded.len() as u64, Ordering::Relaxed);
                report.by_path_set.insert(name.clone(), stats);
            });
        }
    });

    log::info!(
        "finished {} path set stats in {}ms",
        report.by_path_set.len(),
        start.elapsed().as_millis()
    );
}
