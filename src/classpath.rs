//! The ordered, lazily realized set of roots behind one loader.
//!
//! Declared roots sit on a pending stack (pushed in reverse, so pops come
//! out in declaration order) and are turned into loaders only when a lookup
//! runs past the loaders realized so far. A classpath archive's manifest
//! dependents are pushed on top of the stack, so they are searched right
//! after the archive that declared them.
//!
//! In indexed mode every realized loader is merged into the `RootIndex` and
//! lookups start there. Once every root is realized, an index miss is final.
//! Until then the lookup continues with the loaders the index does not cover
//! yet, realizing more roots as it goes. Either way the earliest root that
//! has the name wins.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::cache::{IndexStats, LoaderId, RootIndex};
use crate::config::{normalize_root, LoaderOptions};
use crate::loader::{open_loader, Loader};
use crate::pool::HandlePool;
use crate::resource::Resource;

#[derive(Debug, Default)]
struct Pending {
    stack: Vec<PathBuf>,
    seen: HashSet<PathBuf>,
}

pub struct ClassPath {
    options: LoaderOptions,
    pool: Arc<HandlePool>,
    pending: Mutex<Pending>,
    loaders: RwLock<Vec<Arc<dyn Loader>>>,
    all_realized: AtomicBool,
    index: RootIndex,
    enumerations: DashMap<String, Arc<[LoaderId]>>,
}

impl std::fmt::Debug for ClassPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassPath")
            .field("loaders", &self.loaders.read().len())
            .field("all_realized", &self.all_realized.load(Ordering::Relaxed))
            .field("indexed", &self.options.indexed())
            .finish()
    }
}

impl ClassPath {
    pub fn new(options: LoaderOptions, pool: Arc<HandlePool>) -> Self {
        let stack = options.urls.iter().rev().map(|u| normalize_root(u)).collect();
        Self {
            options,
            pool,
            pending: Mutex::new(Pending {
                stack,
                seen: HashSet::new(),
            }),
            loaders: RwLock::new(Vec::new()),
            all_realized: AtomicBool::new(false),
            index: RootIndex::new(),
            enumerations: DashMap::new(),
        }
    }

    pub fn options(&self) -> &LoaderOptions {
        &self.options
    }

    pub fn pool(&self) -> &Arc<HandlePool> {
        &self.pool
    }

    /// Loader `i` in search order, realizing pending roots as needed.
    pub fn get_loader(&self, i: LoaderId) -> Option<Arc<dyn Loader>> {
        if let Some(loader) = self.loader_at(i) {
            return Some(loader);
        }
        if self.all_realized.load(Ordering::Acquire) {
            return None;
        }

        let mut pending = self.pending.lock();
        loop {
            if let Some(loader) = self.loader_at(i) {
                return Some(loader);
            }
            let Some(root) = pending.stack.pop() else {
                self.all_realized.store(true, Ordering::Release);
                return None;
            };
            if !pending.seen.insert(root.clone()) {
                continue;
            }
            let Some(loader) = open_loader(&root, &self.options, &self.pool) else {
                continue;
            };

            for dependent in loader.dependent_roots().into_iter().rev() {
                pending.stack.push(dependent);
            }

            let data = if self.options.indexed() {
                match loader.build_index() {
                    Ok(data) => Some(data),
                    Err(e) => {
                        warn!(root = %root.display(), error = %e, "root left unindexed");
                        None
                    }
                }
            } else {
                None
            };

            let id = {
                let mut loaders = self.loaders.write();
                loaders.push(loader);
                loaders.len() - 1
            };
            if self.options.indexed() {
                self.index.apply_loader_data(id, data);
            }
            debug!(root = %root.display(), id, "realized classpath root");
        }
    }

    /// First resource named `name` in search order.
    pub fn get_resource(&self, name: &str) -> Option<Resource> {
        if !self.options.indexed() {
            return self.scan_from(0, name).map(|(_, r)| r);
        }

        let complete = self.all_realized.load(Ordering::Acquire);
        let candidates = self.index.candidates(name);
        for id in candidates.ids.iter().copied() {
            if let Some(found) = self.loader_at(id).and_then(|l| l.get_resource(name)) {
                return Some(found);
            }
        }
        if complete {
            return None;
        }
        self.scan_from(candidates.covered, name).map(|(_, r)| r)
    }

    /// Every resource named `name`, lazily, in search order.
    pub fn get_resources(&self, name: &str) -> Resources<'_> {
        if let Some(cached) = self.enumerations.get(name) {
            return Resources {
                class_path: self,
                name: name.to_string(),
                listed: cached.value().to_vec().into_iter(),
                scan_from: None,
                hits: Vec::new(),
                remember: false,
            };
        }

        let (listed, scan_from) = if self.options.indexed() {
            let complete = self.all_realized.load(Ordering::Acquire);
            let candidates = self.index.candidates(name);
            let scan_from = (!complete).then_some(candidates.covered);
            (candidates.ids.to_vec(), scan_from)
        } else {
            (Vec::new(), Some(0))
        };

        Resources {
            class_path: self,
            name: name.to_string(),
            listed: listed.into_iter(),
            scan_from,
            hits: Vec::new(),
            remember: true,
        }
    }

    /// Realizes every pending root; returns the number of loaders.
    pub fn realize_all(&self) -> usize {
        let mut i = 0;
        while self.get_loader(i).is_some() {
            i += 1;
        }
        i
    }

    pub fn is_fully_realized(&self) -> bool {
        self.all_realized.load(Ordering::Acquire)
    }

    pub fn loader_count(&self) -> usize {
        self.loaders.read().len()
    }

    pub fn loaders(&self) -> Vec<Arc<dyn Loader>> {
        self.loaders.read().clone()
    }

    /// Roots realized so far, in search order.
    pub fn roots(&self) -> Vec<PathBuf> {
        self.loaders.read().iter().map(|l| l.root().to_path_buf()).collect()
    }

    pub fn index_stats(&self) -> IndexStats {
        self.index.stats()
    }

    fn loader_at(&self, i: LoaderId) -> Option<Arc<dyn Loader>> {
        self.loaders.read().get(i).cloned()
    }

    fn scan_from(&self, start: LoaderId, name: &str) -> Option<(LoaderId, Resource)> {
        let mut i = start;
        while let Some(loader) = self.get_loader(i) {
            if loader.contains_name(name)
                && let Some(found) = loader.get_resource(name)
            {
                return Some((i, found));
            }
            i += 1;
        }
        None
    }

    fn remember(&self, name: &str, hits: &[LoaderId]) {
        self.enumerations
            .entry(name.to_string())
            .or_insert_with(|| hits.into());
    }
}

/// Lazy enumeration returned by [`ClassPath::get_resources`]. Finite and
/// single-pass; call `get_resources` again to start over.
pub struct Resources<'a> {
    class_path: &'a ClassPath,
    name: String,
    listed: std::vec::IntoIter<LoaderId>,
    scan_from: Option<LoaderId>,
    hits: Vec<LoaderId>,
    remember: bool,
}

impl Iterator for Resources<'_> {
    type Item = Resource;

    fn next(&mut self) -> Option<Resource> {
        for id in self.listed.by_ref() {
            if let Some(found) = self
                .class_path
                .loader_at(id)
                .and_then(|l| l.get_resource(&self.name))
            {
                self.hits.push(id);
                return Some(found);
            }
        }

        if let Some(start) = self.scan_from.take() {
            if let Some((id, found)) = self.class_path.scan_from(start, &self.name) {
                self.hits.push(id);
                self.scan_from = Some(id + 1);
                return Some(found);
            }
        }

        if self.remember && self.class_path.is_fully_realized() {
            self.remember = false;
            self.class_path.remember(&self.name, &self.hits);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;
    use std::path::Path;
    use zip::write::FileOptions;

    fn write_jar(path: &Path, entries: &[(&str, &[u8])]) {
        let file = fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        for (name, content) in entries {
            zip.start_file(*name, FileOptions::default()).unwrap();
            zip.write_all(content).unwrap();
        }
        zip.finish().unwrap();
    }

    fn write_file(path: &Path, content: &[u8]) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn class_path(urls: Vec<PathBuf>, indexed: bool) -> ClassPath {
        let options = LoaderOptions {
            urls,
            use_index: indexed,
            ..LoaderOptions::default()
        };
        ClassPath::new(options, Arc::new(HandlePool::new(16)))
    }

    #[test]
    fn roots_are_realized_on_demand_and_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first");
        let second = dir.path().join("second");
        write_file(&first.join("a/Foo.class"), b"first");
        write_file(&second.join("a/Bar.class"), b"second");

        let cp = class_path(vec![first.clone(), second.clone()], true);
        assert_eq!(cp.loader_count(), 0);

        assert!(cp.get_resource("a/Foo.class").is_some());
        assert_eq!(cp.loader_count(), 1);

        assert!(cp.get_resource("a/Bar.class").is_some());
        assert_eq!(cp.loader_count(), 2);
        assert_eq!(cp.loaders()[0].root(), first.as_path());
        assert_eq!(cp.loaders()[1].root(), second.as_path());
    }

    #[test]
    fn earliest_root_wins_in_both_modes() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.jar");
        let second = dir.path().join("second");
        write_jar(&first, &[("a/Same.txt", b"from-jar")]);
        write_file(&second.join("a/Same.txt"), b"from-dir");

        for indexed in [true, false] {
            let cp = class_path(vec![first.clone(), second.clone()], indexed);
            // realize the later root first through enumeration
            assert_eq!(cp.get_resources("a/Same.txt").count(), 2);
            let found = cp.get_resource("a/Same.txt").unwrap();
            assert_eq!(found.bytes().unwrap(), b"from-jar");
        }
    }

    #[test]
    fn miss_is_authoritative_after_full_realization() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("out");
        write_file(&root.join("a/Foo.class"), b"x");

        let cp = class_path(vec![root], true);
        assert!(cp.get_resource("a/Missing.class").is_none());
        assert!(cp.is_fully_realized());
        assert!(cp.get_resource("a/Missing.class").is_none());
        assert!(cp.get_resource("a/Foo.class").is_some());
    }

    #[test]
    fn duplicate_and_missing_roots_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("out");
        write_file(&root.join("x.txt"), b"x");

        let cp = class_path(
            vec![root.clone(), dir.path().join("nowhere"), root.clone()],
            true,
        );
        assert_eq!(cp.realize_all(), 1);
        assert_eq!(cp.index_stats().indexed_loaders, 1);
    }

    #[test]
    fn manifest_dependents_are_searched_after_their_archive() {
        let dir = tempfile::tempdir().unwrap();
        let pathing = dir.path().join("classpath-app.jar");
        let dep = dir.path().join("libs/dep.jar");
        let later = dir.path().join("later");
        fs::create_dir_all(dep.parent().unwrap()).unwrap();
        write_jar(
            &pathing,
            &[(
                "META-INF/MANIFEST.MF",
                b"Manifest-Version: 1.0\r\nClass-Path: libs/dep.jar\r\n\r\n",
            )],
        );
        write_jar(&dep, &[("b/Dep.class", b"dep"), ("b/Shared.txt", b"dep")]);
        write_file(&later.join("b/Shared.txt"), b"later");

        let cp = class_path(vec![pathing, later], true);
        assert_eq!(cp.get_resource("b/Dep.class").unwrap().bytes().unwrap(), b"dep");
        assert_eq!(cp.get_resource("b/Shared.txt").unwrap().bytes().unwrap(), b"dep");
        assert_eq!(cp.realize_all(), 3);
        assert_eq!(cp.loaders()[1].root(), dep.as_path());
    }

    #[test]
    fn enumeration_is_cached_once_everything_is_realized() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        write_file(&a.join("META-INF/services/x"), b"a");
        write_file(&b.join("META-INF/services/x"), b"b");

        let cp = class_path(vec![a, b], true);
        let first: Vec<Vec<u8>> = cp
            .get_resources("META-INF/services/x")
            .map(|r| r.bytes().unwrap())
            .collect();
        assert_eq!(first, vec![b"a".to_vec(), b"b".to_vec()]);
        assert!(cp.enumerations.contains_key("META-INF/services/x"));

        let again: Vec<Vec<u8>> = cp
            .get_resources("META-INF/services/x")
            .map(|r| r.bytes().unwrap())
            .collect();
        assert_eq!(again, first);
        assert_eq!(cp.get_resources("META-INF/services/none").count(), 0);
    }

    #[test]
    fn lazy_mode_skips_the_root_index() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("out");
        write_file(&root.join("a/Foo.class"), b"x");

        let options = LoaderOptions {
            urls: vec![root],
            lazy_indexing: true,
            ..LoaderOptions::default()
        };
        let cp = ClassPath::new(options, Arc::new(HandlePool::new(4)));
        assert!(cp.get_resource("a/Foo.class").is_some());
        assert!(cp.get_resource("a/Nope.class").is_none());
        assert_eq!(cp.index_stats(), IndexStats::default());
    }
}
