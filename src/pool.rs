//! Bounded pool of open archive handles.
//!
//! Opening an archive means an `open`, an mmap and a central-directory parse,
//! so archive loaders keep their handle here when retention is on. The pool
//! owns the only long-lived strong reference to each handle; loaders hold a
//! weak one they upgrade without locking. When the pool is over capacity it
//! drops the least recently used handle, which unmaps the archive as soon as
//! in-flight readers let go of it. Loaders whose weak reference no longer
//! upgrades simply reopen through the pool.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use memmap2::Mmap;
use parking_lot::Mutex;
use tracing::debug;
use zip::ZipArchive;

use crate::error::{LoaderError, Result};

pub const DEFAULT_MAX_OPEN_HANDLES: usize = 512;

#[derive(Clone)]
struct MappedBytes(Arc<Mmap>);

impl AsRef<[u8]> for MappedBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// An open, memory-mapped archive. Cloning the inner `ZipArchive` only
/// bumps reference counts, so concurrent readers never share a cursor.
pub struct ArchiveHandle {
    path: PathBuf,
    archive: ZipArchive<Cursor<MappedBytes>>,
    last_used: AtomicU64,
}

impl std::fmt::Debug for ArchiveHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveHandle")
            .field("path", &self.path)
            .field("entries", &self.archive.len())
            .finish()
    }
}

impl ArchiveHandle {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| LoaderError::io(path, e))?;
        // SAFETY: The file is opened read-only and the map is owned by this
        // handle; archives on the classpath are not rewritten while in use.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| LoaderError::io(path, e))?;
        let archive = ZipArchive::new(Cursor::new(MappedBytes(Arc::new(mmap)))).map_err(
            |source| LoaderError::ArchiveOpen {
                path: path.to_path_buf(),
                source,
            },
        )?;
        Ok(Self {
            path: path.to_path_buf(),
            archive,
            last_used: AtomicU64::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.archive.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archive.len() == 0
    }

    pub fn entry_names(&self) -> impl Iterator<Item = &str> {
        self.archive.file_names()
    }

    pub fn contains(&self, name: &str) -> bool {
        let mut archive = self.archive.clone();
        archive.by_name(name).is_ok()
    }

    pub fn read_entry(&self, name: &str) -> io::Result<Vec<u8>> {
        let mut archive = self.archive.clone();
        let mut entry = archive.by_name(name).map_err(io::Error::other)?;
        let mut buf = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Like `read_entry`, but `None` when the entry does not exist.
    pub fn read_optional(&self, name: &str) -> io::Result<Option<Vec<u8>>> {
        if !self.contains(name) {
            return Ok(None);
        }
        self.read_entry(name).map(Some)
    }
}

/// Slot a loader keeps for its retained handle.
pub type HandleSlot = ArcSwap<Weak<ArchiveHandle>>;

pub fn empty_slot() -> HandleSlot {
    ArcSwap::from_pointee(Weak::new())
}

#[derive(Debug)]
pub struct HandlePool {
    capacity: usize,
    tick: AtomicU64,
    open: Mutex<HashMap<PathBuf, Arc<ArchiveHandle>>>,
    creation: Mutex<()>,
}

impl Default for HandlePool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_OPEN_HANDLES)
    }
}

impl HandlePool {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            tick: AtomicU64::new(0),
            open: Mutex::new(HashMap::new()),
            creation: Mutex::new(()),
        }
    }

    /// Returns the live handle behind `slot`, or opens and retains a new one.
    pub fn acquire(&self, path: &Path, slot: &HandleSlot) -> Result<Arc<ArchiveHandle>> {
        if let Some(handle) = slot.load().upgrade() {
            self.touch(&handle);
            return Ok(handle);
        }

        let _creating = self.creation.lock();
        if let Some(handle) = slot.load().upgrade() {
            self.touch(&handle);
            return Ok(handle);
        }

        let handle = Arc::new(ArchiveHandle::open(path)?);
        self.touch(&handle);
        slot.store(Arc::new(Arc::downgrade(&handle)));
        self.retain(Arc::clone(&handle));
        Ok(handle)
    }

    pub fn open_count(&self) -> usize {
        self.open.lock().len()
    }

    pub fn is_open(&self, path: &Path) -> bool {
        self.open.lock().contains_key(path)
    }

    /// Drops every retained handle.
    pub fn close_all(&self) {
        self.open.lock().clear();
    }

    fn touch(&self, handle: &ArchiveHandle) {
        let now = self.tick.fetch_add(1, Ordering::Relaxed) + 1;
        handle.last_used.store(now, Ordering::Relaxed);
    }

    fn retain(&self, handle: Arc<ArchiveHandle>) {
        let mut open = self.open.lock();
        open.insert(handle.path.clone(), handle);
        while open.len() > self.capacity {
            let Some(victim) = open
                .iter()
                .min_by_key(|(_, h)| h.last_used.load(Ordering::Relaxed))
                .map(|(p, _)| p.clone())
            else {
                break;
            };
            open.remove(&victim);
            debug!(archive = %victim.display(), "evicted archive handle");
        }
    }
}
