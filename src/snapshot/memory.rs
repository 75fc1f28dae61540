//! In-memory [`SnapshotTree`] for tests and embedders without a real loader.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use super::{
    DirEntry, Error, FileEntry, SnapshotLoader, SnapshotTree, SymlinkEntry, TreeVisitor,
};

/// Default block size used to derive block counts for in-memory files.
const BLOCK_SIZE: u64 = 128 << 20;

#[derive(Debug, Clone)]
enum Node {
    Dir {
        user: String,
        group: String,
    },
    File {
        user: String,
        group: String,
        size: u64,
        replication: u32,
    },
    Symlink {
        user: String,
        group: String,
    },
}

/// An in-memory snapshot tree built from explicit `add_*` calls.
///
/// The root directory `/` is pre-created and owned by `hdfs:supergroup`;
/// re-adding it overrides the ownership. Parent directories are not created
/// implicitly.
#[derive(Debug, Clone)]
pub struct MemoryTree {
    nodes: BTreeMap<String, Node>,
}

impl Default for MemoryTree {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTree {
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            "/".to_owned(),
            Node::Dir {
                user: "hdfs".to_owned(),
                group: "supergroup".to_owned(),
            },
        );
        Self { nodes }
    }

    pub fn add_dir(&mut self, path: &str, user: &str, group: &str) -> &mut Self {
        self.nodes.insert(
            normalize(path),
            Node::Dir {
                user: user.to_owned(),
                group: group.to_owned(),
            },
        );
        self
    }

    pub fn add_file(
        &mut self,
        path: &str,
        user: &str,
        group: &str,
        size: u64,
        replication: u32,
    ) -> &mut Self {
        self.nodes.insert(
            normalize(path),
            Node::File {
                user: user.to_owned(),
                group: group.to_owned(),
                size,
                replication,
            },
        );
        self
    }

    pub fn add_symlink(&mut self, path: &str, user: &str, group: &str) -> &mut Self {
        self.nodes.insert(
            normalize(path),
            Node::Symlink {
                user: user.to_owned(),
                group: group.to_owned(),
            },
        );
        self
    }

    fn dispatch(&self, path: &str, node: &Node, visitor: &dyn TreeVisitor) {
        match node {
            Node::Dir { user, group } => visitor.on_directory(&DirEntry {
                path,
                user,
                group,
            }),
            Node::File {
                user,
                group,
                size,
                replication,
            } => visitor.on_file(&FileEntry {
                path,
                user,
                group,
                size: *size,
                replication: *replication,
                blocks: size.div_ceil(BLOCK_SIZE),
            }),
            Node::Symlink { user, group } => visitor.on_symlink(&SymlinkEntry {
                path,
                user,
                group,
            }),
        }
    }
}

fn normalize(path: &str) -> String {
    if path.len() > 1 {
        path.trim_end_matches('/').to_owned()
    } else {
        path.to_owned()
    }
}

impl SnapshotTree for MemoryTree {
    fn exists(&self, path: &str) -> bool {
        matches!(self.nodes.get(&normalize(path)), Some(Node::Dir { .. }))
    }

    fn list_matching_children(
        &self,
        parent: &str,
        matches: &dyn Fn(&str) -> bool,
    ) -> Result<Vec<String>, Error> {
        let parent = normalize(parent);
        if !self.exists(&parent) {
            return Err(Error::NotFound { path: parent });
        }
        let prefix = if parent == "/" {
            "/".to_owned()
        } else {
            format!("{parent}/")
        };
        let mut children = Vec::new();
        for (path, node) in &self.nodes {
            if !path.starts_with(&prefix) {
                continue;
            }
            let name = &path[prefix.len()..];
            if name.is_empty() || name.contains('/') {
                continue;
            }
            if matches!(node, Node::Dir { .. }) && matches(name) {
                children.push(path.clone());
            }
        }
        Ok(children)
    }

    fn visit(&self, visitor: &dyn TreeVisitor) -> Result<(), Error> {
        for (path, node) in &self.nodes {
            self.dispatch(path, node, visitor);
        }
        Ok(())
    }

    fn visit_from(&self, root: &str, visitor: &dyn TreeVisitor) -> Result<(), Error> {
        let root = normalize(root);
        if !self.nodes.contains_key(&root) {
            return Err(Error::NotFound { path: root });
        }
        let prefix = if root == "/" {
            "/".to_owned()
        } else {
            format!("{root}/")
        };
        for (path, node) in &self.nodes {
            if path == &root || path.starts_with(&prefix) {
                self.dispatch(path, node, visitor);
            }
        }
        Ok(())
    }
}

/// A [`SnapshotLoader`] handing out clones of one fixed [`MemoryTree`],
/// counting how often it was asked to load.
#[derive(Debug)]
pub struct MemoryLoader {
    tree: MemoryTree,
    loads: AtomicU64,
}

impl MemoryLoader {
    pub fn new(tree: MemoryTree) -> Self {
        Self {
            tree,
            loads: AtomicU64::new(0),
        }
    }

    /// Number of completed `load` calls.
    pub fn load_count(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }
}

impl SnapshotLoader for MemoryLoader {
    type Tree = MemoryTree;

    fn load(&self, _path: &Path) -> Result<Self::Tree, Error> {
        self.loads.fetch_add(1, Ordering::Relaxed);
        Ok(self.tree.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingVisitor {
        seen: Mutex<Vec<String>>,
    }

    impl TreeVisitor for RecordingVisitor {
        fn on_file(&self, file: &FileEntry<'_>) {
            self.seen.lock().unwrap().push(format!("f:{}", file.path));
        }

        fn on_directory(&self, dir: &DirEntry<'_>) {
            self.seen.lock().unwrap().push(format!("d:{}", dir.path));
        }

        fn on_symlink(&self, link: &SymlinkEntry<'_>) {
            self.seen.lock().unwrap().push(format!("l:{}", link.path));
        }
    }

    fn sample_tree() -> MemoryTree {
        let mut tree = MemoryTree::new();
        tree.add_dir("/datalake", "hdfs", "supergroup")
            .add_dir("/datalake/asset1", "alice", "analysts")
            .add_dir("/datalake/asset2", "alice", "analysts")
            .add_file("/datalake/asset1/a.bin", "alice", "analysts", 4096, 3)
            .add_symlink("/datalake/asset2/link", "bob", "analysts");
        tree
    }

    #[test]
    fn test_exists_only_for_directories() {
        let tree = sample_tree();
        assert!(tree.exists("/"));
        assert!(tree.exists("/datalake"));
        assert!(tree.exists("/datalake/asset1/"));
        assert!(!tree.exists("/datalake/asset1/a.bin"));
        assert!(!tree.exists("/missing"));
    }

    #[test]
    fn test_list_matching_children_filters_names() {
        let tree = sample_tree();
        let children = tree
            .list_matching_children("/datalake", &|name| name.ends_with('1'))
            .unwrap();
        assert_eq!(children, vec!["/datalake/asset1".to_owned()]);

        let all = tree.list_matching_children("/datalake", &|_| true).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_list_matching_children_missing_parent() {
        let tree = sample_tree();
        let err = tree.list_matching_children("/nope", &|_| true).unwrap_err();
        match err {
            Error::NotFound { path } => assert_eq!(path, "/nope"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_visit_covers_all_nodes() {
        let tree = sample_tree();
        let visitor = RecordingVisitor::default();
        tree.visit(&visitor).unwrap();
        let seen = visitor.seen.lock().unwrap();
        assert_eq!(seen.len(), 6);
        assert!(seen.contains(&"d:/".to_owned()));
        assert!(seen.contains(&"f:/datalake/asset1/a.bin".to_owned()));
        assert!(seen.contains(&"l:/datalake/asset2/link".to_owned()));
    }

    #[test]
    fn test_visit_from_scopes_to_subtree() {
        let tree = sample_tree();
        let visitor = RecordingVisitor::default();
        tree.visit_from("/datalake/asset1", &visitor).unwrap();
        let seen = visitor.seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                "d:/datalake/asset1".to_owned(),
                "f:/datalake/asset1/a.bin".to_owned()
            ]
        );
    }

    #[test]
    fn test_visit_from_missing_root() {
        let tree = sample_tree();
        let visitor = RecordingVisitor::default();
        assert!(matches!(
            tree.visit_from("/gone", &visitor),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn test_loader_counts_loads() {
        let loader = MemoryLoader::new(sample_tree());
        assert_eq!(loader.load_count(), 0);
        loader.load(Path::new("/tmp/fsimage_0001")).unwrap();
        loader.load(Path::new("/tmp/fsimage_0002")).unwrap();
        assert_eq!(loader.load_count(), 2);
    }
}
