//! Snapshot update coordination and the scrape-facing collector.
//!
//! A background scheduler periodically drives [`UpdateCoordinator::tick`]:
//! discover the latest snapshot generation, load it, aggregate a fresh
//! [`Report`] and publish it atomically. Scrapes never wait for a parse in
//! progress (which can take minutes for large snapshots); they read the last
//! published report. Only the very first scrape blocks, until the first cycle
//! completes one way or the other.

mod error;

pub use error::Error;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::{self, Config};
use crate::metrics::{
    self, METRIC_PREFIX, MetricFamily, MetricKind, MetricLifecycle, MetricSink, Sample,
};
use crate::report::{self, Report, ReportSettings};
use crate::snapshot::SnapshotLoader;
use crate::watcher::SnapshotWatcher;

/// Delay between update cycles.
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct TickState {
    last_loaded: Option<PathBuf>,
}

/// Single writer of the "current report" reference.
///
/// `tick` is mutually exclusive (one load in flight at a time); readers go
/// through [`current_report`] and a watch channel, so publication is atomic
/// and a published report is always fully built.
///
/// [`current_report`]: Self::current_report
#[derive(Debug)]
pub struct UpdateCoordinator<L: SnapshotLoader> {
    loader: L,
    watcher: SnapshotWatcher,
    settings: ReportSettings,
    skip_previously_parsed: bool,
    current: watch::Sender<Option<Arc<Report>>>,
    state: Mutex<TickState>,
    skips: AtomicU64,
    load_file_size: AtomicU64,
    load_millis: AtomicU64,
    build_millis: AtomicU64,
}

impl<L: SnapshotLoader> UpdateCoordinator<L> {
    /// Creates a coordinator over the configured snapshot directory.
    ///
    /// # Errors
    ///
    /// Fails fatally on a missing/unset snapshot directory or invalid bucket
    /// configuration.
    pub fn new(loader: L, config: &Config) -> Result<Self, Error> {
        if config.fs_image_path.as_os_str().is_empty() {
            return Err(config::Error::MissingSnapshotDir.into());
        }
        let watcher = SnapshotWatcher::new(&config.fs_image_path)?;
        let settings = ReportSettings::from_config(config)?;
        let (current, _) = watch::channel(None);
        Ok(Self {
            loader,
            watcher,
            settings,
            skip_previously_parsed: config.skip_previously_parsed,
            current,
            state: Mutex::new(TickState::default()),
            skips: AtomicU64::new(0),
            load_file_size: AtomicU64::new(0),
            load_millis: AtomicU64::new(0),
            build_millis: AtomicU64::new(0),
        })
    }

    /// Runs one update cycle: find the latest snapshot, reload if it changed,
    /// rebuild and publish the report.
    ///
    /// Failures never propagate out of a cycle: they are logged and recorded
    /// on the served report's sticky error flag, and the next scheduled cycle
    /// retries. Blocking; run on a blocking-capable thread.
    pub fn tick(&self) {
        let mut state = self.state.lock().expect("update coordinator lock poisoned");

        let latest = match self.watcher.find_latest() {
            Ok(path) => path,
            Err(err) => {
                log::warn!("no loadable snapshot: {err}");
                self.record_failure();
                return;
            }
        };

        if self.skip_previously_parsed && state.last_loaded.as_deref() == Some(latest.as_path()) {
            self.skips.fetch_add(1, Ordering::Relaxed);
            log::debug!("skipping previously parsed {}", latest.display());
            return;
        }

        match std::fs::metadata(&latest) {
            Ok(metadata) => self.load_file_size.store(metadata.len(), Ordering::Relaxed),
            Err(err) => {
                log::warn!("cannot stat snapshot {}: {err}", latest.display());
                // Reset rather than keep serving the previous generation's size.
                self.load_file_size.store(0, Ordering::Relaxed);
            }
        }

        let load_start = Instant::now();
        let tree = match self.loader.load(&latest) {
            Ok(tree) => tree,
            Err(err) => {
                log::error!("cannot load snapshot {}: {err}", latest.display());
                self.record_failure();
                return;
            }
        };
        let load_elapsed = load_start.elapsed();
        self.load_millis
            .store(load_elapsed.as_millis() as u64, Ordering::Relaxed);
        log::info!(
            "loaded {} in {}ms",
            latest.display(),
            load_elapsed.as_millis()
        );

        let build_start = Instant::now();
        let report = report::build_report(&tree, &self.settings);
        self.build_millis
            .store(build_start.elapsed().as_millis() as u64, Ordering::Relaxed);

        self.current.send_replace(Some(Arc::new(report)));
        state.last_loaded = Some(latest);
    }

    /// Records a failed cycle. An already-published report keeps being served
    /// with its error flag set; before the first success an empty
    /// error-flagged report is published so blocked readers wake up.
    fn record_failure(&self) {
        let published = self.current.borrow().clone();
        match published {
            Some(report) => report.mark_error(),
            None => {
                let report = Report::new(&self.settings);
                report.mark_error();
                self.current.send_replace(Some(Arc::new(report)));
            }
        }
    }

    /// Returns the current report, waiting for the first cycle if none has
    /// been published yet. The wait is unbounded; after the first cycle the
    /// fast path never blocks.
    pub async fn current_report(&self) -> Arc<Report> {
        let mut rx = self.current.subscribe();
        loop {
            if let Some(report) = rx.borrow_and_update().as_ref() {
                return Arc::clone(report);
            }
            rx.changed()
                .await
                .expect("coordinator owns the publication channel");
        }
    }

    /// Returns the current report if one has been published.
    pub fn try_current_report(&self) -> Option<Arc<Report>> {
        self.current.borrow().clone()
    }

    /// Number of polls skipped because the latest snapshot was unchanged.
    pub fn skip_count(&self) -> u64 {
        self.skips.load(Ordering::Relaxed)
    }

    pub fn last_load_file_size(&self) -> u64 {
        self.load_file_size.load(Ordering::Relaxed)
    }

    pub fn last_load_duration(&self) -> Duration {
        Duration::from_millis(self.load_millis.load(Ordering::Relaxed))
    }

    pub fn last_build_duration(&self) -> Duration {
        Duration::from_millis(self.build_millis.load(Ordering::Relaxed))
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }
}

/// Handle of the background update task.
///
/// Shutting down stops future cycles; a cycle already running finishes
/// undisturbed.
#[derive(Debug)]
pub struct Scheduler {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Scheduler {
    /// Spawns the periodic update task. The first cycle runs immediately,
    /// later ones after each `period` (fixed delay).
    pub fn start<L>(coordinator: Arc<UpdateCoordinator<L>>, period: Duration) -> Self
    where
        L: SnapshotLoader + 'static,
    {
        let (stop, mut stopped) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let coordinator = Arc::clone(&coordinator);
                        if tokio::task::spawn_blocking(move || coordinator.tick())
                            .await
                            .is_err()
                        {
                            log::error!("snapshot update cycle panicked");
                        }
                    }
                    _ = stopped.changed() => break,
                }
            }
        });
        Self { stop, handle }
    }

    /// Stops scheduling further cycles.
    pub fn shutdown(&self) {
        let _ = self.stop.send(true);
    }

    pub async fn join(self) {
        let _ = self.handle.await;
    }
}

/// Everything one scrape produces.
#[derive(Debug)]
pub struct Collection {
    pub families: Vec<MetricFamily>,
    /// Whether the served report carries the sticky error flag.
    pub error: bool,
}

/// Scrape-facing facade tying together coordinator, scheduler and metric
/// lifecycle.
#[derive(Debug)]
pub struct SnapshotCollector<L: SnapshotLoader + 'static, S: MetricSink> {
    coordinator: Arc<UpdateCoordinator<L>>,
    lifecycle: MetricLifecycle<S>,
    scheduler: Scheduler,
    scrape_requests: AtomicU64,
    scrape_micros: AtomicU64,
}

impl<L: SnapshotLoader + 'static, S: MetricSink> SnapshotCollector<L, S> {
    /// Validates the configuration and starts the background update task.
    ///
    /// # Errors
    ///
    /// Returns a fatal [`Error`] for a missing snapshot directory or invalid
    /// bucket configuration; no task is started in that case.
    pub fn start(loader: L, config: &Config, sink: S) -> Result<Self, Error> {
        Self::start_with_interval(loader, config, sink, DEFAULT_UPDATE_INTERVAL)
    }

    pub fn start_with_interval(
        loader: L,
        config: &Config,
        sink: S,
        period: Duration,
    ) -> Result<Self, Error> {
        let coordinator = Arc::new(UpdateCoordinator::new(loader, config)?);
        let scheduler = Scheduler::start(Arc::clone(&coordinator), period);
        Ok(Self {
            coordinator,
            lifecycle: MetricLifecycle::new(sink),
            scheduler,
            scrape_requests: AtomicU64::new(0),
            scrape_micros: AtomicU64::new(0),
        })
    }

    pub fn coordinator(&self) -> &UpdateCoordinator<L> {
        &self.coordinator
    }

    pub fn sink(&self) -> &S {
        self.lifecycle.sink()
    }

    /// Waits for the current report (first scrape may block until the first
    /// cycle completes).
    pub async fn current_report(&self) -> Arc<Report> {
        self.coordinator.current_report().await
    }

    /// Serves one scrape: swaps metric registrations if a new generation was
    /// published, renders all families and reports the error indicator.
    pub async fn collect(&self) -> Collection {
        let start = Instant::now();
        self.scrape_requests.fetch_add(1, Ordering::Relaxed);

        let report = self.coordinator.current_report().await;
        self.lifecycle.sync(&report);

        let mut families = metrics::report_families(&report);
        let error = report.has_error();

        self.scrape_micros
            .store(start.elapsed().as_micros() as u64, Ordering::Relaxed);
        self.operational_families(&mut families);

        Collection { families, error }
    }

    /// Stops the background update task.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }

    fn operational_families(&self, out: &mut Vec<MetricFamily>) {
        fn single(name: String, help: &'static str, kind: MetricKind, value: f64) -> MetricFamily {
            MetricFamily {
                samples: vec![Sample {
                    name: name.clone(),
                    labels: Vec::new(),
                    value,
                }],
                name,
                help,
                kind,
            }
        }

        out.push(single(
            format!("{METRIC_PREFIX}scrape_requests_total"),
            "Exporter requests made",
            MetricKind::Counter,
            self.scrape_requests.load(Ordering::Relaxed) as f64,
        ));
        out.push(single(
            format!("{METRIC_PREFIX}scrape_errors_total"),
            "Counts failed scrapes.",
            MetricKind::Counter,
            self.lifecycle.error_count() as f64,
        ));
        out.push(single(
            format!("{METRIC_PREFIX}scrape_skips_total"),
            "Counts the snapshot scrape skips (no snapshot change).",
            MetricKind::Counter,
            self.coordinator.skip_count() as f64,
        ));
        out.push(single(
            format!("{METRIC_PREFIX}scrape_duration_seconds"),
            "Scrape duration",
            MetricKind::Gauge,
            self.scrape_micros.load(Ordering::Relaxed) as f64 / 1e6,
        ));
        out.push(single(
            format!("{METRIC_PREFIX}load_file_size_bytes"),
            "Size of raw snapshot",
            MetricKind::Gauge,
            self.coordinator.last_load_file_size() as f64,
        ));
        out.push(single(
            format!("{METRIC_PREFIX}load_duration_seconds"),
            "Time for loading/parsing the snapshot",
            MetricKind::Gauge,
            self.coordinator.last_load_duration().as_secs_f64(),
        ));
        out.push(single(
            format!("{METRIC_PREFIX}compute_stats_duration_seconds"),
            "Time for computing stats for a loaded snapshot",
            MetricKind::Gauge,
            self.coordinator.last_build_duration().as_secs_f64(),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::InMemorySink;
    use crate::snapshot::{
        self,
        memory::{MemoryLoader, MemoryTree},
    };
    use std::fs::File;
    use std::path::Path;

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn sample_tree() -> MemoryTree {
        let mut tree = MemoryTree::new();
        tree.add_dir("/data", "alice", "staff")
            .add_file("/data/blob.bin", "alice", "staff", 1 << 20, 3);
        tree
    }

    fn snapshot_dir(names: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for name in names {
            File::create(dir.path().join(name)).unwrap();
        }
        dir
    }

    fn config_for(dir: &Path) -> Config {
        Config {
            fs_image_path: dir.to_path_buf(),
            ..Config::default()
        }
    }

    fn coordinator(dir: &Path) -> UpdateCoordinator<MemoryLoader> {
        UpdateCoordinator::new(MemoryLoader::new(sample_tree()), &config_for(dir)).unwrap()
    }

    struct FailingLoader;

    impl SnapshotLoader for FailingLoader {
        type Tree = MemoryTree;

        fn load(&self, path: &Path) -> Result<Self::Tree, snapshot::Error> {
            Err(snapshot::Error::Corrupt {
                path: path.to_path_buf(),
                reason: "broken for test".to_owned(),
            })
        }
    }

    #[test]
    fn test_missing_snapshot_dir_is_fatal() {
        let config = Config::default();
        let err = UpdateCoordinator::new(MemoryLoader::new(sample_tree()), &config).unwrap_err();
        assert!(matches!(
            err,
            Error::Config(config::Error::MissingSnapshotDir)
        ));

        let config = Config {
            fs_image_path: "/definitely/does/not/exist".into(),
            ..Config::default()
        };
        let err = UpdateCoordinator::new(MemoryLoader::new(sample_tree()), &config).unwrap_err();
        assert!(matches!(err, Error::Watcher(_)));
    }

    #[test]
    fn test_unchanged_snapshot_is_skipped_once_per_poll() {
        init_logging();
        let dir = snapshot_dir(&["fsimage_0000000000000000100"]);
        let coordinator = coordinator(dir.path());

        coordinator.tick();
        assert_eq!(coordinator.skip_count(), 0);
        let first = coordinator.try_current_report().unwrap();

        coordinator.tick();
        assert_eq!(coordinator.skip_count(), 1);
        // No reload happened, the published report is still the same instance.
        let second = coordinator.try_current_report().unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        coordinator.tick();
        assert_eq!(coordinator.skip_count(), 2);
    }

    #[test]
    fn test_new_generation_triggers_reload() {
        let dir = snapshot_dir(&["fsimage_0000000000000000100"]);
        let coordinator = coordinator(dir.path());

        coordinator.tick();
        let first = coordinator.try_current_report().unwrap();

        File::create(dir.path().join("fsimage_0000000000000000200")).unwrap();
        coordinator.tick();
        let second = coordinator.try_current_report().unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(coordinator.skip_count(), 0);
    }

    #[test]
    fn test_skip_disabled_reloads_every_poll() {
        let dir = snapshot_dir(&["fsimage_0000000000000000100"]);
        let config = Config {
            fs_image_path: dir.path().to_path_buf(),
            skip_previously_parsed: false,
            ..Config::default()
        };
        let loader = MemoryLoader::new(sample_tree());
        let coordinator = UpdateCoordinator::new(loader, &config).unwrap();

        coordinator.tick();
        coordinator.tick();
        assert_eq!(coordinator.skip_count(), 0);
        assert_eq!(coordinator.loader().load_count(), 2);
    }

    #[test]
    fn test_unreadable_snapshot_resets_size_gauge() {
        let dir = snapshot_dir(&[]);
        std::fs::write(dir.path().join("fsimage_0000000000000000100"), b"abcdef").unwrap();
        let coordinator = coordinator(dir.path());

        coordinator.tick();
        assert_eq!(coordinator.last_load_file_size(), 6);

        // A dangling symlink makes the metadata read fail while the name still
        // sorts as the latest generation.
        std::os::unix::fs::symlink(
            dir.path().join("gone"),
            dir.path().join("fsimage_0000000000000000200"),
        )
        .unwrap();
        coordinator.tick();
        assert_eq!(coordinator.last_load_file_size(), 0);
    }

    #[test]
    fn test_empty_directory_publishes_error_report() {
        let dir = snapshot_dir(&[]);
        let coordinator = coordinator(dir.path());

        coordinator.tick();
        let report = coordinator.try_current_report().unwrap();
        assert!(report.has_error());
        assert_eq!(report.overall.file_size.count(), 0);
    }

    #[test]
    fn test_load_failure_keeps_previous_report_with_error_flag() {
        let dir = snapshot_dir(&["fsimage_0000000000000000100"]);
        let good = coordinator(dir.path());
        good.tick();
        let report = good.try_current_report().unwrap();
        assert!(!report.has_error());

        // Same directory, failing loader without skip so it reloads.
        let config = Config {
            fs_image_path: dir.path().to_path_buf(),
            skip_previously_parsed: false,
            ..Config::default()
        };
        let failing = UpdateCoordinator::new(FailingLoader, &config).unwrap();
        failing.tick();
        let first = failing.try_current_report().unwrap();
        assert!(first.has_error());

        failing.tick();
        let second = failing.try_current_report().unwrap();
        // The retained report is re-marked, not replaced.
        assert!(Arc::ptr_eq(&first, &second));
        assert!(second.has_error());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_waiters_get_the_same_report() {
        init_logging();
        let dir = snapshot_dir(&["fsimage_0000000000000000100"]);
        let coordinator = Arc::new(coordinator(dir.path()));

        let mut waiters = Vec::new();
        for _ in 0..8 {
            let coordinator = Arc::clone(&coordinator);
            waiters.push(tokio::spawn(
                async move { coordinator.current_report().await },
            ));
        }
        assert!(coordinator.try_current_report().is_none());

        {
            let coordinator = Arc::clone(&coordinator);
            tokio::task::spawn_blocking(move || coordinator.tick())
                .await
                .unwrap();
        }

        let expected = coordinator.try_current_report().unwrap();
        for waiter in waiters {
            let report = waiter.await.unwrap();
            assert!(Arc::ptr_eq(&report, &expected));
        }
        assert_eq!(coordinator.loader().load_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_collector_end_to_end() {
        init_logging();
        let dir = snapshot_dir(&["fsimage_0000000000000000100"]);
        let collector = SnapshotCollector::start_with_interval(
            MemoryLoader::new(sample_tree()),
            &config_for(dir.path()),
            InMemorySink::new(),
            Duration::from_millis(10),
        )
        .unwrap();

        let collection = collector.collect().await;
        assert!(!collection.error);
        assert!(
            collection
                .families
                .iter()
                .any(|f| f.name == "fsimage_dirs")
        );
        let requests = collection
            .families
            .iter()
            .find(|f| f.name == "fsimage_scrape_requests_total")
            .unwrap();
        assert_eq!(requests.samples[0].value, 1.0);

        // The sink saw the report's dynamic series.
        assert!(
            collector
                .sink()
                .registered()
                .iter()
                .any(|s| s.contains("alice"))
        );

        collector.shutdown();
    }
}
