//! Zip-format archive roots.
//!
//! The handle is retained in the shared `HandlePool` when retention is on.
//! Hot archives build their index in-process after enough lookups, after
//! which absent names are rejected by package hash and name filter without
//! consulting the central directory. Archives named `classpath*` may list
//! further roots in their manifest's `Class-Path`. An archive that fails to
//! open is reported once and contributes nothing afterwards.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

use tracing::debug;

use crate::config::LoaderOptions;
use crate::error::{LoaderError, Result};
use crate::index::{IndexBuilder, IndexData};
use crate::loader::{report_failure, Loader, LoaderKind};
use crate::manifest::{resolve_class_path_entry, Attributes, MANIFEST_PATH};
use crate::pool::{empty_slot, ArchiveHandle, HandlePool, HandleSlot};
use crate::resource::{AccessControl, Resource};

/// File-name prefix of archives whose manifest `Class-Path` is expanded.
pub const CLASSPATH_ARCHIVE_PREFIX: &str = "classpath";

pub struct ArchiveLoader {
    root: PathBuf,
    pool: Arc<HandlePool>,
    slot: HandleSlot,
    retain_handles: bool,
    log_as_error: bool,
    filter_probability: f64,
    lazy_index_threshold: u32,
    accesses: AtomicU32,
    unreadable: AtomicBool,
    access: Option<Arc<AccessControl>>,
    attributes: Option<Arc<Attributes>>,
    dependents: Vec<PathBuf>,
    index: OnceLock<Arc<IndexData>>,
}

impl std::fmt::Debug for ArchiveLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveLoader")
            .field("root", &self.root)
            .field("retain_handles", &self.retain_handles)
            .field("dependents", &self.dependents)
            .field("indexed", &self.index.get().is_some())
            .field("unreadable", &self.is_unreadable())
            .finish()
    }
}

impl ArchiveLoader {
    pub fn new(
        root: PathBuf,
        options: &LoaderOptions,
        pool: Arc<HandlePool>,
        access: Option<Arc<AccessControl>>,
    ) -> Self {
        let mut loader = Self {
            root,
            pool,
            slot: empty_slot(),
            retain_handles: options.retain_handles,
            log_as_error: options.log_missing_archive_as_error,
            filter_probability: options.filter_probability,
            lazy_index_threshold: options.lazy_index_threshold,
            accesses: AtomicU32::new(0),
            unreadable: AtomicBool::new(false),
            access,
            attributes: None,
            dependents: Vec::new(),
            index: OnceLock::new(),
        };
        loader.read_manifest();
        loader
    }

    fn read_manifest(&mut self) {
        let Some(handle) = self.open() else {
            return;
        };
        let raw = match handle.read_optional(MANIFEST_PATH) {
            Ok(Some(raw)) => raw,
            Ok(None) => return,
            Err(e) => {
                debug!(archive = %self.root.display(), error = %e, "unreadable manifest");
                return;
            }
        };

        let attributes = Attributes::parse(&raw);
        if is_classpath_archive(&self.root) {
            self.dependents = attributes
                .class_path()
                .into_iter()
                .map(|entry| resolve_class_path_entry(&self.root, entry))
                .collect();
            if !self.dependents.is_empty() {
                debug!(
                    archive = %self.root.display(),
                    dependents = self.dependents.len(),
                    "expanding manifest class path"
                );
            }
        }
        if !attributes.is_empty() {
            self.attributes = Some(Arc::new(attributes));
        }
    }

    fn handle(&self) -> Result<Arc<ArchiveHandle>> {
        if self.retain_handles {
            self.pool.acquire(&self.root, &self.slot)
        } else {
            Ok(Arc::new(ArchiveHandle::open(&self.root)?))
        }
    }

    /// The archive handle, or `None` once opening has failed. The first
    /// failure is reported; the root is not reopened after that.
    fn open(&self) -> Option<Arc<ArchiveHandle>> {
        if self.is_unreadable() {
            return None;
        }
        match self.handle() {
            Ok(handle) => Some(handle),
            Err(e) => {
                if !self.unreadable.swap(true, Ordering::AcqRel) {
                    report_failure(&e, self.log_as_error);
                }
                None
            }
        }
    }

    pub fn is_unreadable(&self) -> bool {
        self.unreadable.load(Ordering::Acquire)
    }

    fn index_entries(&self, handle: &ArchiveHandle) -> IndexData {
        let mut builder = IndexBuilder::new();
        for name in handle.entry_names() {
            builder.add_entry(name);
        }
        builder.build(self.filter_probability)
    }

    /// Counts a lookup; past the threshold the in-process index is built.
    fn note_access(&self) {
        if !self.retain_handles || self.lazy_index_threshold == 0 || self.index.get().is_some() {
            return;
        }
        let seen = self.accesses.fetch_add(1, Ordering::Relaxed) + 1;
        if seen >= self.lazy_index_threshold {
            match self.build_index() {
                Ok(_) => debug!(archive = %self.root.display(), lookups = seen, "built lazy archive index"),
                Err(e) => report_failure(&e, self.log_as_error),
            }
        }
    }

    pub fn is_indexed(&self) -> bool {
        self.index.get().is_some()
    }

    pub fn attributes(&self) -> Option<&Attributes> {
        self.attributes.as_deref()
    }
}

impl Loader for ArchiveLoader {
    fn root(&self) -> &Path {
        &self.root
    }

    fn kind(&self) -> LoaderKind {
        LoaderKind::Archive
    }

    fn get_resource(&self, name: &str) -> Option<Resource> {
        self.note_access();
        if let Some(data) = self.index.get()
            && !(data.has_package_of(name) && data.might_contain(name))
        {
            return None;
        }

        let handle = self.open()?;
        if !handle.contains(name) {
            return None;
        }
        Some(Resource::archive_entry(
            handle,
            name,
            self.attributes.clone(),
            self.access.clone(),
        ))
    }

    fn contains_name(&self, name: &str) -> bool {
        !self.is_unreadable() && self.index.get().is_none_or(|data| data.might_contain(name))
    }

    fn build_index(&self) -> Result<Arc<IndexData>> {
        if let Some(data) = self.index.get() {
            return Ok(Arc::clone(data));
        }
        if self.is_unreadable() {
            return Err(LoaderError::io(
                self.root.clone(),
                std::io::Error::other("archive failed to open earlier"),
            ));
        }
        let handle = self.handle().inspect_err(|_| self.unreadable.store(true, Ordering::Release))?;
        let data = Arc::new(self.index_entries(&handle));
        Ok(Arc::clone(self.index.get_or_init(|| data)))
    }

    fn dependent_roots(&self) -> Vec<PathBuf> {
        self.dependents.clone()
    }
}

pub fn is_classpath_archive(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(CLASSPATH_ARCHIVE_PREFIX))
}
