//! `META-INF/MANIFEST.MF` main-section parsing.
//!
//! Only the main section is read: archives contribute origin attributes
//! (title, version, vendor, sealing) for package definitions and, for
//! classpath archives, the `Class-Path` list of dependent roots.

use std::path::{Path, PathBuf};

pub const MANIFEST_PATH: &str = "META-INF/MANIFEST.MF";
pub const CLASS_PATH: &str = "Class-Path";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
    entries: Vec<(String, String)>,
}

impl Attributes {
    pub fn parse(bytes: &[u8]) -> Self {
        let text = String::from_utf8_lossy(bytes);
        let mut entries: Vec<(String, String)> = Vec::new();

        for line in text.split("\r\n").flat_map(|l| l.split(['\n', '\r'])) {
            if line.is_empty() {
                // end of the main section
                break;
            }
            if let Some(rest) = line.strip_prefix(' ') {
                if let Some((_, value)) = entries.last_mut() {
                    value.push_str(rest);
                }
                continue;
            }
            if let Some((key, value)) = line.split_once(':') {
                let value = value.strip_prefix(' ').unwrap_or(value);
                entries.push((key.trim().to_string(), value.to_string()));
            }
        }

        Self { entries }
    }

    /// Case-insensitive lookup, like manifest attribute names.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn class_path(&self) -> Vec<&str> {
        self.get(CLASS_PATH)
            .map(|v| v.split_whitespace().collect())
            .unwrap_or_default()
    }
}

/// Resolves one `Class-Path` token against the directory of the archive
/// that declared it. Absolute `file:` URLs and absolute paths are taken as is.
pub fn resolve_class_path_entry(archive: &Path, entry: &str) -> PathBuf {
    let raw = entry
        .strip_prefix("file://")
        .or_else(|| entry.strip_prefix("file:"))
        .unwrap_or(entry);
    let decoded = raw.replace("%20", " ");
    let candidate = PathBuf::from(&decoded);
    if candidate.is_absolute() {
        return candidate;
    }
    match archive.parent() {
        Some(parent) => parent.join(candidate),
        None => candidate,
    }
}
