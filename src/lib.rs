//! fsimage-monitor: live usage statistics over HDFS fsimage snapshots.
//!
//! The storage master periodically drops a versioned fsimage snapshot file
//! into a directory. This crate watches that directory, loads new generations
//! through an embedder-supplied [`snapshot::SnapshotLoader`], aggregates one
//! immutable [`report::Report`] per generation (overall, per-user, per-group
//! and per configured path/path-set scopes) and serves it to scrapes without
//! ever blocking on a parse in progress.
//!
//! Out of scope, supplied by the embedder: binary snapshot decoding, the
//! metrics wire format and HTTP endpoint, config-file loading, and process
//! bootstrap.
//!
//! ```no_run
//! use fsimage_monitor::collector::SnapshotCollector;
//! use fsimage_monitor::config::Config;
//! use fsimage_monitor::metrics::InMemorySink;
//! use fsimage_monitor::snapshot::memory::{MemoryLoader, MemoryTree};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config {
//!     fs_image_path: "/var/lib/namenode/current".into(),
//!     ..Config::default()
//! };
//! let loader = MemoryLoader::new(MemoryTree::new()); // a real loader in production
//! let collector = SnapshotCollector::start(loader, &config, InMemorySink::new())?;
//!
//! let collection = collector.collect().await;
//! for family in &collection.families {
//!     println!("{} ({} samples)", family.name, family.samples.len());
//! }
//! collector.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod collector;
pub mod config;
pub mod metrics;
pub mod report;
pub mod snapshot;
pub mod watcher;
