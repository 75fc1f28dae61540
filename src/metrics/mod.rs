//! Metric sample model and generation-swap bookkeeping.
//!
//! The wire-format encoding and HTTP serving of metrics live outside this
//! crate; here a scrape produces plain [`MetricFamily`] values. What this
//! module does own is the lifecycle of dynamically-labeled series across
//! report generations: when a new [`Report`] supersedes the previous one, the
//! outgoing generation's per-user/group/path series must be unregistered from
//! the embedder's [`MetricSink`] before the incoming ones are registered, so
//! stale label values never linger.

mod render;

pub use render::report_families;

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::report::Report;

/// Common prefix of every exported metric name.
pub const METRIC_PREFIX: &str = "fsimage_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Gauge,
    Counter,
    Histogram,
    Summary,
}

/// One sample value with its label pairs.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub name: String,
    pub labels: Vec<(&'static str, String)>,
    pub value: f64,
}

/// One metric family: a name, help text and its samples.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricFamily {
    pub name: String,
    pub help: &'static str,
    pub kind: MetricKind,
    pub samples: Vec<Sample>,
}

/// Registration target for a report's dynamically-labeled series.
///
/// Passed in by the embedder instead of a process-wide registry so tests and
/// multi-collector setups can use isolated sinks.
pub trait MetricSink: Send + Sync {
    fn register(&self, report: &Report);
    fn unregister(&self, report: &Report);
}

/// The dynamically-labeled series a report contributes, as stable keys of the
/// form `family{label="value"}`. Used by sinks to track registrations.
pub fn labeled_series(report: &Report) -> Vec<String> {
    fn scope_series(
        out: &mut Vec<String>,
        scope: &str,
        label: &str,
        keys: impl Iterator<Item = String>,
        with_replication: bool,
    ) {
        let mut suffixes = vec!["dirs", "blocks", "links", "fsize", "csize"];
        if with_replication {
            suffixes.push("replication");
        }
        for key in keys {
            for suffix in &suffixes {
                out.push(format!(
                    "{METRIC_PREFIX}{scope}{suffix}{{{label}=\"{key}\"}}"
                ));
            }
        }
    }

    let mut series = Vec::new();
    scope_series(
        &mut series,
        "user_",
        "user_name",
        report.by_user.iter().map(|entry| entry.key().clone()),
        true,
    );
    scope_series(
        &mut series,
        "group_",
        "group_name",
        report.by_group.iter().map(|entry| entry.key().clone()),
        false,
    );
    scope_series(
        &mut series,
        "path_",
        "path",
        report.by_path.iter().map(|entry| entry.key().clone()),
        false,
    );
    scope_series(
        &mut series,
        "path_set_",
        "path_set",
        report.by_path_set.iter().map(|entry| entry.key().clone()),
        false,
    );
    series
}

/// A [`MetricSink`] keeping the currently-registered series in memory.
#[derive(Debug, Default)]
pub struct InMemorySink {
    series: Mutex<BTreeSet<String>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the currently-registered series keys.
    pub fn registered(&self) -> BTreeSet<String> {
        self.series.lock().expect("sink lock poisoned").clone()
    }
}

impl MetricSink for InMemorySink {
    fn register(&self, report: &Report) {
        self.series
            .lock()
            .expect("sink lock poisoned")
            .extend(labeled_series(report));
    }

    fn unregister(&self, report: &Report) {
        let mut series = self.series.lock().expect("sink lock poisoned");
        for key in labeled_series(report) {
            series.remove(&key);
        }
    }
}

/// Swaps sink registrations between report generations.
///
/// `sync` runs on every scrape. The whole swap happens under one mutex so
/// concurrent scrapes never observe a half-swapped sink.
#[derive(Debug)]
pub struct MetricLifecycle<S: MetricSink> {
    sink: S,
    rendered: Mutex<Option<Arc<Report>>>,
    error_count: AtomicU64,
}

impl<S: MetricSink> MetricLifecycle<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            rendered: Mutex::new(None),
            error_count: AtomicU64::new(0),
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Number of scrapes that served an error-flagged report.
    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    /// Aligns the sink with `latest` before it is rendered.
    ///
    /// Reports are compared by identity: a new generation unregisters the
    /// outgoing report's series and registers the incoming ones. An
    /// error-flagged report still gets rendered (stale-but-valid data beats no
    /// data) but bumps the error counter.
    pub fn sync(&self, latest: &Arc<Report>) {
        let mut rendered = self.rendered.lock().expect("metric lifecycle lock poisoned");
        let changed = rendered
            .as_ref()
            .is_none_or(|current| !Arc::ptr_eq(current, latest));
        if changed {
            if let Some(outgoing) = rendered.as_ref() {
                self.sink.unregister(outgoing);
            }
            self.sink.register(latest);
            *rendered = Some(Arc::clone(latest));
        }
        if latest.has_error() {
            self.error_count.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::report::{ReportSettings, build_report};
    use crate::snapshot::memory::MemoryTree;

    fn report_for(users: &[&str]) -> Arc<Report> {
        let mut tree = MemoryTree::new();
        for user in users {
            tree.add_file(&format!("/{user}.bin"), user, "staff", 1024, 2);
        }
        let settings = ReportSettings::from_config(&Config::default()).unwrap();
        Arc::new(build_report(&tree, &settings))
    }

    #[test]
    fn test_labeled_series_cover_all_scopes() {
        let report = report_for(&["alice"]);
        let series = labeled_series(&report);
        assert!(series.contains(&"fsimage_user_dirs{user_name=\"alice\"}".to_owned()));
        assert!(series.contains(&"fsimage_user_replication{user_name=\"alice\"}".to_owned()));
        assert!(series.contains(&"fsimage_group_fsize{group_name=\"staff\"}".to_owned()));
        assert!(!series.iter().any(|s| s.contains("group_replication")));
    }

    #[test]
    fn test_generation_swap_drops_outgoing_series() {
        let lifecycle = MetricLifecycle::new(InMemorySink::new());
        let first = report_for(&["alice", "bob"]);
        let second = report_for(&["alice", "carol"]);

        lifecycle.sync(&first);
        let registered = lifecycle.sink().registered();
        assert!(registered.iter().any(|s| s.contains("bob")));

        lifecycle.sync(&second);
        let registered = lifecycle.sink().registered();
        assert!(!registered.iter().any(|s| s.contains("bob")));
        assert!(registered.iter().any(|s| s.contains("alice")));
        assert!(registered.iter().any(|s| s.contains("carol")));
    }

    #[test]
    fn test_sync_is_idempotent_for_same_generation() {
        let lifecycle = MetricLifecycle::new(InMemorySink::new());
        let report = report_for(&["alice"]);
        lifecycle.sync(&report);
        let before = lifecycle.sink().registered();
        lifecycle.sync(&report);
        assert_eq!(before, lifecycle.sink().registered());
    }

    #[test]
    fn test_error_reports_bump_counter_but_render() {
        let lifecycle = MetricLifecycle::new(InMemorySink::new());
        let report = report_for(&["alice"]);
        report.mark_error();

        lifecycle.sync(&report);
        assert_eq!(lifecycle.error_count(), 1);
        assert!(!lifecycle.sink().registered().is_empty());

        lifecycle.sync(&report);
        assert_eq!(lifecycle.error_count(), 2);
    }
}
