//! Per-loader index data and the persisted directory index format.
//!
//! `IndexData` is what a loader contributes to the root index: the package
//! hashes of its class entries, the package hashes of everything else, and a
//! bloom filter over short entry names.
//!
//! Persisted layout (big-endian, one file per directory root):
//!
//! ```text
//! i32 version
//! i32 n, n x i32        resource package hashes
//! i32 n, n x i32        class package hashes
//! i32 k, i32 bit_count, ceil(bit_count / 64) x i64   name filter
//! ```

use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::bloom::{read_i32, BloomFilter};
use crate::error::{LoaderError, Result};
use crate::names::{is_class_entry, name_fingerprint, package_hash};

pub const INDEX_VERSION: i32 = 1;
pub const INDEX_FILE_NAME: &str = "classpath.index";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexData {
    pub resource_package_hashes: HashSet<i32>,
    pub class_package_hashes: HashSet<i32>,
    pub name_filter: BloomFilter,
}

impl IndexData {
    pub fn might_contain(&self, name: &str) -> bool {
        self.name_filter.might_contain_hash(name_fingerprint(name))
    }

    /// Whether the package of `name` appears in this index at all.
    pub fn has_package_of(&self, name: &str) -> bool {
        let hash = package_hash(name);
        if is_class_entry(name) {
            self.class_package_hashes.contains(&hash)
        } else {
            self.resource_package_hashes.contains(&hash)
        }
    }
}

#[derive(Debug, Default)]
pub struct IndexBuilder {
    resource_packages: HashSet<i32>,
    class_packages: HashSet<i32>,
    names: HashSet<u64>,
}

impl IndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one entry. Directory entries keep their trailing `/`.
    pub fn add_entry(&mut self, name: &str) {
        if name.is_empty() || name == "/" {
            return;
        }
        let hash = package_hash(name);
        if is_class_entry(name) {
            self.class_packages.insert(hash);
        } else {
            self.resource_packages.insert(hash);
        }
        self.names.insert(name_fingerprint(name));
    }

    pub fn entry_count(&self) -> usize {
        self.names.len()
    }

    pub fn build(self, false_probability: f64) -> IndexData {
        let mut name_filter = BloomFilter::new(self.names.len(), false_probability);
        for hash in &self.names {
            name_filter.add_hash(*hash);
        }
        IndexData {
            resource_package_hashes: self.resource_packages,
            class_package_hashes: self.class_packages,
            name_filter,
        }
    }
}

pub fn index_file_for(root: &Path) -> PathBuf {
    root.join(INDEX_FILE_NAME)
}

pub fn read_index(path: &Path) -> Result<IndexData> {
    let file = File::open(path).map_err(|e| LoaderError::io(path, e))?;
    let mut input = BufReader::new(file);
    decode(&mut input).map_err(|e| LoaderError::corrupt(path, e.to_string()))
}

/// Writes through a temp file renamed into place; a failed write leaves
/// nothing behind.
pub fn write_index(path: &Path, data: &IndexData) -> Result<()> {
    let mut tmp_os = path.as_os_str().to_os_string();
    tmp_os.push(".tmp");
    let tmp = PathBuf::from(tmp_os);

    let written = File::create(&tmp).and_then(|file| {
        let mut out = BufWriter::new(file);
        encode(&mut out, data)?;
        out.flush()?;
        out.into_inner().map_err(|e| e.into_error())?.sync_all()
    });

    if let Err(e) = written.and_then(|()| std::fs::rename(&tmp, path)) {
        let _ = std::fs::remove_file(&tmp);
        let _ = std::fs::remove_file(path);
        debug!(path = %path.display(), error = %e, "discarded partial index file");
        return Err(LoaderError::io(path, e));
    }
    Ok(())
}

pub fn encode<W: Write>(out: &mut W, data: &IndexData) -> io::Result<()> {
    out.write_all(&INDEX_VERSION.to_be_bytes())?;
    write_hashes(out, &data.resource_package_hashes)?;
    write_hashes(out, &data.class_package_hashes)?;
    data.name_filter.write_to(out)
}

pub fn decode<R: Read>(input: &mut R) -> io::Result<IndexData> {
    let version = read_i32(input)?;
    if version != INDEX_VERSION {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("index version {version}, expected {INDEX_VERSION}"),
        ));
    }

    let resource_package_hashes = read_hashes(input)?;
    let class_package_hashes = read_hashes(input)?;
    let name_filter = BloomFilter::read_from(input)?;

    let mut trailing = [0u8; 1];
    if input.read(&mut trailing)? != 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "trailing bytes after index",
        ));
    }

    Ok(IndexData {
        resource_package_hashes,
        class_package_hashes,
        name_filter,
    })
}

fn write_hashes<W: Write>(out: &mut W, hashes: &HashSet<i32>) -> io::Result<()> {
    out.write_all(&(hashes.len() as i32).to_be_bytes())?;
    for hash in hashes {
        out.write_all(&hash.to_be_bytes())?;
    }
    Ok(())
}

fn read_hashes<R: Read>(input: &mut R) -> io::Result<HashSet<i32>> {
    let count = read_i32(input)?;
    if count < 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("negative hash count {count}"),
        ));
    }
    let mut hashes = HashSet::with_capacity((count as usize).min(4096));
    for _ in 0..count {
        hashes.insert(read_i32(input)?);
    }
    Ok(hashes)
}
