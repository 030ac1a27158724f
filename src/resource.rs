//! A single loadable unit found under a root.

use std::fmt;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{LoaderError, Result};
use crate::manifest::Attributes;
use crate::pool::ArchiveHandle;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceUrl {
    File(PathBuf),
    ArchiveEntry { archive: PathBuf, entry: String },
    Bootstrap(String),
}

impl fmt::Display for ResourceUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "file:{}", path.display()),
            Self::ArchiveEntry { archive, entry } => {
                write!(f, "jar:file:{}!/{entry}", archive.display())
            }
            Self::Bootstrap(path) => write!(f, "bootstrap:/{path}"),
        }
    }
}

/// Access-control metadata for roots that need a code source attached.
/// Passed through to the host untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessControl {
    pub code_source: PathBuf,
}

#[derive(Clone)]
enum Source {
    File(PathBuf),
    Archive {
        handle: Arc<ArchiveHandle>,
        entry: String,
    },
    Memory(Arc<[u8]>),
}

#[derive(Clone)]
pub struct Resource {
    url: ResourceUrl,
    source: Source,
    attributes: Option<Arc<Attributes>>,
    access: Option<Arc<AccessControl>>,
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("url", &self.url)
            .field("has_attributes", &self.attributes.is_some())
            .field("access", &self.access)
            .finish()
    }
}

impl Resource {
    pub(crate) fn file(path: PathBuf, access: Option<Arc<AccessControl>>) -> Self {
        Self {
            url: ResourceUrl::File(path.clone()),
            source: Source::File(path),
            attributes: None,
            access,
        }
    }

    pub(crate) fn archive_entry(
        handle: Arc<ArchiveHandle>,
        entry: &str,
        attributes: Option<Arc<Attributes>>,
        access: Option<Arc<AccessControl>>,
    ) -> Self {
        Self {
            url: ResourceUrl::ArchiveEntry {
                archive: handle.path().to_path_buf(),
                entry: entry.to_string(),
            },
            source: Source::Archive {
                handle,
                entry: entry.to_string(),
            },
            attributes,
            access,
        }
    }

    /// Resource served from memory, e.g. by a host's bootstrap lookup.
    pub fn from_bytes(path: &str, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            url: ResourceUrl::Bootstrap(path.to_string()),
            source: Source::Memory(bytes.into()),
            attributes: None,
            access: None,
        }
    }

    pub fn url(&self) -> &ResourceUrl {
        &self.url
    }

    pub fn attributes(&self) -> Option<&Attributes> {
        self.attributes.as_deref()
    }

    pub fn access_control(&self) -> Option<&AccessControl> {
        self.access.as_deref()
    }

    pub fn bytes(&self) -> Result<Vec<u8>> {
        match &self.source {
            Source::File(path) => std::fs::read(path).map_err(|e| LoaderError::io(path, e)),
            Source::Archive { handle, entry } => handle
                .read_entry(entry)
                .map_err(|e| LoaderError::io(archive_entry_path(handle.path(), entry), e)),
            Source::Memory(bytes) => Ok(bytes.to_vec()),
        }
    }

    pub fn open_stream(&self) -> Result<Box<dyn Read + Send>> {
        match &self.source {
            Source::File(path) => {
                let file = File::open(path).map_err(|e| LoaderError::io(path, e))?;
                Ok(Box::new(file))
            }
            Source::Archive { .. } => Ok(Box::new(Cursor::new(self.bytes()?))),
            Source::Memory(bytes) => Ok(Box::new(Cursor::new(Arc::clone(bytes)))),
        }
    }
}

fn archive_entry_path(archive: &Path, entry: &str) -> PathBuf {
    let mut os = archive.as_os_str().to_os_string();
    os.push("!/");
    os.push(entry);
    PathBuf::from(os)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_render_like_classpath_urls() {
        let file = ResourceUrl::File(PathBuf::from("/out/a/Foo.class"));
        assert_eq!(file.to_string(), "file:/out/a/Foo.class");
        let entry = ResourceUrl::ArchiveEntry {
            archive: PathBuf::from("/lib/x.jar"),
            entry: "a/Bar.class".to_string(),
        };
        assert_eq!(entry.to_string(), "jar:file:/lib/x.jar!/a/Bar.class");
    }

    #[test]
    fn memory_resource_streams_its_bytes() {
        let res = Resource::from_bytes("java/lang/Object.class", b"abc".to_vec());
        let mut out = Vec::new();
        res.open_stream().unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abc");
        assert_eq!(res.bytes().unwrap(), b"abc");
    }

    #[test]
    fn file_resource_reads_lazily() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.txt");
        let res = Resource::file(path.clone(), None);
        std::fs::write(&path, b"late").unwrap();
        assert_eq!(res.bytes().unwrap(), b"late");
    }
}
