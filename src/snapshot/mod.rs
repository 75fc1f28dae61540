//! Snapshot loader and tree-walk interface.
//!
//! Binary fsimage decoding lives outside this crate. Embedders supply a
//! [`SnapshotLoader`] that turns a snapshot file into a [`SnapshotTree`], a
//! queryable, walkable view of the directory hierarchy at one point in time.
//! The aggregation engine only depends on these traits, which also makes the
//! whole pipeline testable against the in-memory [`memory::MemoryTree`].
//!
//! Walk callbacks take `&self` and must be safe to invoke from multiple
//! threads: [`SnapshotTree::visit`] is free to parallelize internally.

mod error;
pub mod memory;

pub use error::Error;

use std::path::Path;

/// A regular file inode visited during a tree walk.
#[derive(Debug, Clone, Copy)]
pub struct FileEntry<'a> {
    pub path: &'a str,
    pub user: &'a str,
    pub group: &'a str,
    /// Logical file size in bytes.
    pub size: u64,
    /// Replication factor of the file.
    pub replication: u32,
    /// Number of blocks backing the file.
    pub blocks: u64,
}

impl FileEntry<'_> {
    /// Raw storage consumed across all replicas.
    pub fn consumed_size(&self) -> u64 {
        self.size.saturating_mul(u64::from(self.replication))
    }
}

/// A directory inode visited during a tree walk.
#[derive(Debug, Clone, Copy)]
pub struct DirEntry<'a> {
    pub path: &'a str,
    pub user: &'a str,
    pub group: &'a str,
}

/// A symbolic link inode visited during a tree walk.
#[derive(Debug, Clone, Copy)]
pub struct SymlinkEntry<'a> {
    pub path: &'a str,
    pub user: &'a str,
    pub group: &'a str,
}

/// Callbacks invoked for every inode of a walk.
///
/// Implementations must be thread-safe; trees may drive them from multiple
/// worker threads concurrently.
pub trait TreeVisitor: Sync {
    fn on_file(&self, file: &FileEntry<'_>);
    fn on_directory(&self, dir: &DirEntry<'_>);
    fn on_symlink(&self, link: &SymlinkEntry<'_>);
}

/// Read-only view of one loaded snapshot generation.
pub trait SnapshotTree: Send + Sync {
    /// Whether `path` exists as a directory. The root `/` always exists.
    fn exists(&self, path: &str) -> bool;

    /// Lists the direct child *directories* of `parent` whose final name
    /// segment satisfies `matches`, as absolute paths.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if `parent` does not exist.
    fn list_matching_children(
        &self,
        parent: &str,
        matches: &dyn Fn(&str) -> bool,
    ) -> Result<Vec<String>, Error>;

    /// Walks the whole tree, root included. Implementations may parallelize.
    fn visit(&self, visitor: &dyn TreeVisitor) -> Result<(), Error>;

    /// Walks the subtree under `root`, including `root` itself.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if `root` does not exist.
    fn visit_from(&self, root: &str, visitor: &dyn TreeVisitor) -> Result<(), Error>;
}

/// Turns a snapshot file into a [`SnapshotTree`].
pub trait SnapshotLoader: Send + Sync {
    type Tree: SnapshotTree;

    fn load(&self, path: &Path) -> Result<Self::Tree, Error>;
}
