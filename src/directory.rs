//! Directory roots.
//!
//! Two lookup strategies:
//!
//! - **eager**: the whole tree is walked once to build package hashes and a
//!   name filter, optionally persisted as `classpath.index` in the root so a
//!   later run skips the walk; lookups stat `<root>/<name>`.
//! - **lazy**: lookups walk a trie of `DirEntry` nodes. Each node lists its
//!   directory once and caches the hashes of the child names, so a missing
//!   segment is rejected without a syscall. Child nodes are published by
//!   swapping in a new immutable snapshot; readers never take a lock.

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, OnceLock};

use arc_swap::ArcSwap;
use ignore::WalkBuilder;
use tracing::debug;

use crate::config::LoaderOptions;
use crate::error::{LoaderError, Result};
use crate::index::{self, IndexBuilder, IndexData, INDEX_FILE_NAME};
use crate::loader::{Loader, LoaderKind};
use crate::names::{is_contained_entry_name, string_hash};
use crate::resource::{AccessControl, Resource};

#[derive(Debug)]
pub struct DirectoryLoader {
    root: PathBuf,
    access: Option<Arc<AccessControl>>,
    use_persisted_index: bool,
    filter_probability: f64,
    lazy: Option<Arc<DirEntry>>,
    index: OnceLock<Arc<IndexData>>,
}

impl DirectoryLoader {
    pub fn new(root: PathBuf, options: &LoaderOptions, access: Option<Arc<AccessControl>>) -> Self {
        let lazy = options
            .lazy_indexing
            .then(|| Arc::new(DirEntry::new(root.clone(), String::new(), 0)));
        Self {
            root,
            access,
            use_persisted_index: options.use_persisted_directory_index,
            filter_probability: options.filter_probability,
            lazy,
            index: OnceLock::new(),
        }
    }

    pub fn is_lazy(&self) -> bool {
        self.lazy.is_some()
    }

    fn stat_resource(&self, path: PathBuf, want_dir: bool) -> Option<Resource> {
        let metadata = std::fs::metadata(&path).ok()?;
        let found = if want_dir {
            metadata.is_dir()
        } else {
            metadata.is_file()
        };
        found.then(|| Resource::file(path, self.access.clone()))
    }

    fn find_lazily(&self, root: &Arc<DirEntry>, name: &str) -> Option<Resource> {
        let want_dir = name.ends_with('/');
        let trimmed = name.strip_suffix('/').unwrap_or(name);
        if trimmed.is_empty() {
            return None;
        }

        let segments: Vec<&str> = trimmed.split('/').collect();
        let last = segments.len() - 1;
        let mut node = Arc::clone(root);
        for (i, segment) in segments.iter().enumerate() {
            if segment.is_empty() {
                return None;
            }
            let hash = string_hash(segment);
            if node.child_name_hashes().binary_search(&hash).is_err() {
                return None;
            }
            if i == last {
                return self.stat_resource(node.path.join(segment), want_dir);
            }
            node = node.child(segment, hash);
        }
        None
    }

    fn load_or_scan(&self) -> Result<IndexData> {
        let index_path = index::index_file_for(&self.root);
        if self.use_persisted_index && index_path.exists() {
            match index::read_index(&index_path) {
                Ok(data) => {
                    debug!(root = %self.root.display(), "reusing persisted directory index");
                    return Ok(data);
                }
                Err(e) => {
                    debug!(error = %e, "discarding persisted directory index");
                    let _ = std::fs::remove_file(&index_path);
                }
            }
        }

        let data = scan_directory(&self.root)?.build(self.filter_probability);
        if self.use_persisted_index
            && let Err(e) = index::write_index(&index_path, &data)
        {
            debug!(error = %e, "could not persist directory index");
        }
        Ok(data)
    }
}

impl Loader for DirectoryLoader {
    fn root(&self) -> &Path {
        &self.root
    }

    fn kind(&self) -> LoaderKind {
        LoaderKind::Directory
    }

    fn get_resource(&self, name: &str) -> Option<Resource> {
        if !is_contained_entry_name(name) {
            return None;
        }
        if let Some(root) = self.lazy.as_ref() {
            return self.find_lazily(root, name);
        }
        let want_dir = name.ends_with('/');
        self.stat_resource(self.root.join(name), want_dir)
    }

    fn contains_name(&self, name: &str) -> bool {
        self.index.get().is_none_or(|data| data.might_contain(name))
    }

    fn build_index(&self) -> Result<Arc<IndexData>> {
        if let Some(data) = self.index.get() {
            return Ok(Arc::clone(data));
        }
        let data = Arc::new(self.load_or_scan()?);
        Ok(Arc::clone(self.index.get_or_init(|| data)))
    }
}

/// Walks `root` and records every file and directory below it, using `/`
/// separators and a trailing `/` for directories.
pub fn scan_directory(root: &Path) -> Result<IndexBuilder> {
    if !root.is_dir() {
        return Err(LoaderError::io(
            root,
            std::io::Error::new(std::io::ErrorKind::NotFound, "not a directory"),
        ));
    }

    let (tx, rx) = mpsc::channel();
    // Lookups stat through symlinks, so the scan has to see what they see.
    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .hidden(false)
        .follow_links(true)
        .build_parallel();

    walker.run(|| {
        let tx = tx.clone();
        Box::new(move |entry| {
            let Ok(entry) = entry else {
                return ignore::WalkState::Continue;
            };
            if entry.depth() == 0 {
                return ignore::WalkState::Continue;
            }
            let is_dir = entry.path().is_dir();
            if let Some(name) = relative_name(root, entry.path(), is_dir) {
                let _ = tx.send(name);
            }
            ignore::WalkState::Continue
        })
    });
    drop(tx);

    let mut builder = IndexBuilder::new();
    for name in rx.iter() {
        if name == INDEX_FILE_NAME || name.starts_with(&format!("{INDEX_FILE_NAME}.")) {
            continue;
        }
        builder.add_entry(&name);
    }
    debug!(root = %root.display(), entries = builder.entry_count(), "scanned directory root");
    Ok(builder)
}

fn relative_name(root: &Path, path: &Path, is_dir: bool) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let mut name = String::new();
    for component in rel.components() {
        if !name.is_empty() {
            name.push('/');
        }
        name.push_str(component.as_os_str().to_str()?);
    }
    if name.is_empty() {
        return None;
    }
    if is_dir {
        name.push('/');
    }
    Some(name)
}

/// One directory in the lazy trie.
#[derive(Debug)]
struct DirEntry {
    path: PathBuf,
    name: String,
    name_hash: i32,
    child_hashes: OnceLock<Box<[i32]>>,
    children: ArcSwap<Vec<Arc<DirEntry>>>,
}

impl DirEntry {
    fn new(path: PathBuf, name: String, name_hash: i32) -> Self {
        Self {
            path,
            name,
            name_hash,
            child_hashes: OnceLock::new(),
            children: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Sorted hashes of the names in this directory, listed on first use.
    fn child_name_hashes(&self) -> &[i32] {
        self.child_hashes.get_or_init(|| {
            let mut hashes: Vec<i32> = match std::fs::read_dir(&self.path) {
                Ok(entries) => entries
                    .filter_map(|e| e.ok())
                    .filter_map(|e| e.file_name().to_str().map(string_hash))
                    .collect(),
                Err(_) => Vec::new(),
            };
            hashes.sort_unstable();
            hashes.dedup();
            hashes.into_boxed_slice()
        })
    }

    fn find_child(&self, name: &str, hash: i32) -> Option<Arc<DirEntry>> {
        self.children
            .load()
            .iter()
            .find(|c| c.name_hash == hash && c.name == name)
            .cloned()
    }

    fn child(&self, name: &str, hash: i32) -> Arc<DirEntry> {
        if let Some(existing) = self.find_child(name, hash) {
            return existing;
        }

        let created = Arc::new(DirEntry::new(self.path.join(name), name.to_string(), hash));
        self.children.rcu(|current| {
            if current.iter().any(|c| c.name_hash == hash && c.name == name) {
                return Arc::clone(current);
            }
            let mut next = Vec::with_capacity(current.len() + 1);
            next.extend(current.iter().cloned());
            next.push(Arc::clone(&created));
            Arc::new(next)
        });
        self.find_child(name, hash).unwrap_or(created)
    }

    #[cfg(test)]
    fn published_children(&self) -> usize {
        self.children.load().len()
    }
}
