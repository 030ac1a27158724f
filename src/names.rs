//! Name helpers shared by loaders and the root index: resource paths for
//! class names, package hashes and short-name fingerprints.

pub const CLASS_EXTENSION: &str = ".class";

pub fn class_name_to_class_path(class_name: &str) -> String {
    format!("{}{CLASS_EXTENSION}", class_name.replace('.', "/"))
}

/// Package of a dotted class name, `None` for the default package.
pub fn package_of_class(class_name: &str) -> Option<&str> {
    class_name.rfind('.').map(|i| &class_name[..i])
}

pub fn is_class_entry(name: &str) -> bool {
    name.ends_with(CLASS_EXTENSION)
}

/// Strips the leading `/` callers sometimes put on resource paths.
pub fn normalize_resource_path(path: &str) -> &str {
    path.trim_start_matches('/')
}

/// Whether `name` stays inside the root it is looked up in: relative, no
/// `.`, `..` or empty segments. A single trailing `/` marks a directory.
pub fn is_contained_entry_name(name: &str) -> bool {
    let trimmed = name.strip_suffix('/').unwrap_or(name);
    !trimmed.is_empty()
        && !trimmed.contains('\\')
        && trimmed
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..")
}

/// Path prefix before the final segment. A trailing `/` (directory entries)
/// does not count as the final separator.
pub fn package_prefix(name: &str) -> &str {
    let trimmed = name.strip_suffix('/').unwrap_or(name);
    match trimmed.rfind('/') {
        Some(i) => &trimmed[..i],
        None => "",
    }
}

/// Last path segment, ignoring a trailing `/`.
pub fn short_name(name: &str) -> &str {
    let trimmed = name.strip_suffix('/').unwrap_or(name);
    match trimmed.rfind('/') {
        Some(i) => &trimmed[i + 1..],
        None => trimmed,
    }
}

/// 31-multiplier rolling hash over UTF-16 code units, wrapping in 32 bits.
pub fn string_hash(s: &str) -> i32 {
    s.encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(i32::from(unit)))
}

pub fn package_hash(name: &str) -> i32 {
    string_hash(package_prefix(name))
}

/// 64-bit fingerprint of a short name, fed to the bloom filters.
pub fn fingerprint(short: &str) -> u64 {
    let digest = blake3::hash(short.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(head)
}

pub fn name_fingerprint(name: &str) -> u64 {
    fingerprint(short_name(name))
}
